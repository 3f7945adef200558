//! Error types for `overseer-core`.
//!
//! Every failure belongs to exactly one [`ErrorKind`]. Callers branch on the
//! kind (via [`Classify`]) rather than on concrete error variants, so storage
//! backends and HTTP layers can wrap these errors without losing the category.

use serde::Serialize;
use thiserror::Error;

use crate::{role::Role, term::Term};

/// The closed set of failure categories surfaced by every operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
  /// A referenced user, supervisor record or group does not exist.
  NotFound,
  /// The operation would duplicate an active assignment.
  Conflict,
  /// The target lacks a precondition role or the request breaks a rule.
  PolicyViolation,
  /// Storage or otherwise unexpected failure.
  Internal,
}

/// Anything that can report which [`ErrorKind`] it belongs to.
pub trait Classify {
  fn kind(&self) -> ErrorKind;
}

#[derive(Debug, Error)]
pub enum Error {
  #[error("user not found: {0}")]
  UserNotFound(String),

  #[error("supervisor record not found: {0}")]
  SupervisorNotFound(i64),

  #[error("{username} has no supervisor record for term {term}")]
  NoSupervisorRecord { username: String, term: Term },

  #[error("group not found: {0}")]
  GroupNotFound(String),

  #[error("username already taken: {0}")]
  UsernameTaken(String),

  #[error("group already exists: {0}")]
  GroupExists(String),

  #[error("{username} is already a supervisor in term {term}")]
  AlreadySupervisor { username: String, term: Term },

  #[error("{holder} still holds the {role} slot in term {term}")]
  SlotOccupied { role: Role, holder: String, term: Term },

  #[error("{username} must be a supervisor in term {term}")]
  NotSupervisor { username: String, term: Term },

  #[error("a grouper must belong to a group")]
  GrouperWithoutGroup,

  #[error("role {0} requires the supervisor role")]
  RequiresSupervisor(Role),

  #[error("invalid term identifier: {0:?}")]
  InvalidTerm(String),

  #[error("unknown role: {0:?}")]
  UnknownRole(String),

  /// A uniqueness constraint in the storage layer rejected the write.
  #[error("storage constraint violated: {0}")]
  StorageConflict(String),

  #[error("storage error: {0}")]
  Storage(#[source] Box<dyn std::error::Error + Send + Sync>),

  #[error("serialization error: {0}")]
  Serialization(#[from] serde_json::Error),
}

impl Classify for Error {
  fn kind(&self) -> ErrorKind {
    match self {
      Self::UserNotFound(_)
      | Self::SupervisorNotFound(_)
      | Self::NoSupervisorRecord { .. }
      | Self::GroupNotFound(_) => ErrorKind::NotFound,

      Self::UsernameTaken(_)
      | Self::GroupExists(_)
      | Self::AlreadySupervisor { .. }
      | Self::SlotOccupied { .. }
      | Self::StorageConflict(_) => ErrorKind::Conflict,

      Self::NotSupervisor { .. }
      | Self::GrouperWithoutGroup
      | Self::RequiresSupervisor(_)
      | Self::InvalidTerm(_)
      | Self::UnknownRole(_) => ErrorKind::PolicyViolation,

      Self::Storage(_) | Self::Serialization(_) => ErrorKind::Internal,
    }
  }
}

pub type Result<T, E = Error> = std::result::Result<T, E>;

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn kinds_follow_the_taxonomy() {
    let term: Term = "2023-2024-1".parse().unwrap();

    assert_eq!(Error::UserNotFound("x".into()).kind(), ErrorKind::NotFound);
    assert_eq!(
      Error::AlreadySupervisor { username: "x".into(), term }.kind(),
      ErrorKind::Conflict
    );
    assert_eq!(
      Error::NotSupervisor { username: "x".into(), term }.kind(),
      ErrorKind::PolicyViolation
    );
    assert_eq!(
      Error::Storage("disk full".into()).kind(),
      ErrorKind::Internal
    );
  }
}
