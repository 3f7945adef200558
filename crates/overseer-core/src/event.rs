//! The audit trail: who did what, and when.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// The administrator on whose behalf an operation runs.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Actor(String);

impl Actor {
  pub fn new(username: impl Into<String>) -> Self { Self(username.into()) }

  /// The actor used for bootstrap and maintenance tasks run by the server
  /// itself.
  pub fn system() -> Self { Self("system".to_owned()) }

  pub fn username(&self) -> &str { &self.0 }
}

impl std::fmt::Display for Actor {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.write_str(&self.0)
  }
}

/// A recorded administrative action. Append-only.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
  pub event_id:    Uuid,
  /// Operation name, e.g. `promote_supervisor`.
  pub name:        String,
  pub actor:       String,
  pub detail:      serde_json::Value,
  pub recorded_at: DateTime<Utc>,
}

impl Event {
  pub fn new(name: &str, actor: &Actor, detail: serde_json::Value) -> Self {
    Self {
      event_id: Uuid::new_v4(),
      name: name.to_owned(),
      actor: actor.username().to_owned(),
      detail,
      recorded_at: Utc::now(),
    }
  }
}
