//! The Group Registry: a denormalised view of who leads each group.
//!
//! The Role Ledger is authoritative. `leader_name` is only ever written in the
//! same transaction as the ledger change that caused it, and can be rebuilt
//! from the ledger at any time.

use serde::{Deserialize, Serialize};

use crate::user::User;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Group {
  pub name:        String,
  /// Username of the current grouper; empty when the slot is vacant.
  pub leader_name: String,
  pub using:       bool,
}

impl Group {
  pub fn new(name: impl Into<String>) -> Self {
    Self { name: name.into(), leader_name: String::new(), using: true }
  }

  pub fn leader(&self) -> Option<&str> {
    Some(self.leader_name.as_str()).filter(|l| !l.is_empty())
  }
}

/// A group with its leader resolved to a user, for presentation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GroupView {
  pub name:   String,
  pub leader: Option<User>,
}
