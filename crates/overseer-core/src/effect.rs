//! Post-commit side effects: notices to users and messages to other services.
//!
//! The engine never talks to a collaborator directly. It queues [`Effect`]s,
//! the store hands them back inside [`Committed`] once the transaction has
//! committed, and only then are they dispatched. A rolled-back operation
//! therefore never notifies anyone.

use serde::Serialize;
use serde_json::Value;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Effect {
  /// A push notice to one user.
  Notice {
    username: String,
    title:    String,
    body:     String,
  },
  /// A message for other services. The payload is opaque to the core.
  Message {
    topic:   String,
    method:  String,
    payload: Value,
  },
}

impl Effect {
  pub fn notice(
    username: impl Into<String>,
    title: impl Into<String>,
    body: impl Into<String>,
  ) -> Self {
    Self::Notice {
      username: username.into(),
      title:    title.into(),
      body:     body.into(),
    }
  }

  pub fn message(topic: &str, method: &str, payload: Value) -> Self {
    Self::Message {
      topic: topic.to_owned(),
      method: method.to_owned(),
      payload,
    }
  }
}

/// The value of a committed operation together with the effects it queued.
#[derive(Debug, Clone)]
pub struct Committed<T> {
  pub value:   T,
  pub effects: Vec<Effect>,
}

impl<T> Committed<T> {
  /// A committed value with nothing to announce.
  pub fn quiet(value: T) -> Self { Self { value, effects: Vec::new() } }

  pub fn map<U>(self, f: impl FnOnce(T) -> U) -> Committed<U> {
    Committed { value: f(self.value), effects: self.effects }
  }
}

// ─── Collaborators ───────────────────────────────────────────────────────────

#[derive(Debug, Error)]
#[error("{0}")]
pub struct SinkError(pub String);

/// Delivers push notices. Best-effort and fire-and-forget: implementations
/// must not block on remote delivery.
pub trait Notifier: Send + Sync {
  fn push_message(
    &self,
    username: &str,
    title: &str,
    body: &str,
  ) -> Result<(), SinkError>;
}

/// Publishes messages for other services. Same delivery contract as
/// [`Notifier`].
pub trait Publisher: Send + Sync {
  fn publish(
    &self,
    topic: &str,
    method: &str,
    payload: &Value,
  ) -> Result<(), SinkError>;
}

/// Hand every effect to its collaborator. Failures are logged and swallowed;
/// the owning transaction has already committed.
pub fn dispatch(
  effects: &[Effect],
  notifier: &dyn Notifier,
  publisher: &dyn Publisher,
) {
  for effect in effects {
    let outcome = match effect {
      Effect::Notice { username, title, body } => {
        notifier.push_message(username, title, body)
      }
      Effect::Message { topic, method, payload } => {
        publisher.publish(topic, method, payload)
      }
    };
    if let Err(e) = outcome {
      tracing::warn!(?effect, error = %e, "failed to dispatch effect");
    }
  }
}

/// Writes every effect to the log instead of delivering it.
#[derive(Debug, Clone, Copy, Default)]
pub struct LogSink;

impl Notifier for LogSink {
  fn push_message(
    &self,
    username: &str,
    title: &str,
    body: &str,
  ) -> Result<(), SinkError> {
    tracing::info!(%username, %title, %body, "notice");
    Ok(())
  }
}

impl Publisher for LogSink {
  fn publish(
    &self,
    topic: &str,
    method: &str,
    payload: &Value,
  ) -> Result<(), SinkError> {
    tracing::info!(%topic, %method, %payload, "message");
    Ok(())
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::memory::RecordingSink;

  struct Broken;

  impl Notifier for Broken {
    fn push_message(&self, _: &str, _: &str, _: &str) -> Result<(), SinkError> {
      Err(SinkError("unreachable".into()))
    }
  }

  #[test]
  fn dispatch_routes_by_kind() {
    let sink = RecordingSink::default();
    let effects = vec![
      Effect::notice("alice", "hello", "body"),
      Effect::message("user_service", "add_supervisor", serde_json::json!({})),
    ];

    dispatch(&effects, &sink, &sink);

    assert_eq!(sink.effects(), effects);
  }

  #[test]
  fn dispatch_survives_failing_collaborators() {
    let sink = RecordingSink::default();
    let effects = vec![
      Effect::notice("alice", "hello", "body"),
      Effect::message("user_service", "renew_supervisor", serde_json::json!({})),
    ];

    dispatch(&effects, &Broken, &sink);

    assert_eq!(sink.effects(), effects[1..].to_vec());
  }
}
