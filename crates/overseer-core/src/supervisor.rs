//! Supervisor records: the Role Ledger.
//!
//! One active record per `(username, term)` means "is a supervisor that
//! term". Records are never deleted; retirement flips `using` to `false`.

use serde::{Deserialize, Serialize};

use crate::{role::Role, term::Term};

// ─── Records ─────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SupervisorRecord {
  pub id:              i64,
  pub username:        String,
  /// The user's display name, copied in when the record is written.
  pub name:            String,
  pub term:            Term,
  pub group_name:      Option<String>,
  pub is_grouper:      bool,
  pub is_main_grouper: bool,
  pub using:           bool,
}

impl SupervisorRecord {
  pub fn holds(&self, role: LeaderRole) -> bool {
    match role {
      LeaderRole::Grouper => self.is_grouper,
      LeaderRole::MainGrouper => self.is_main_grouper,
    }
  }
}

/// Input to [`crate::ledger::Ledger::insert_supervisor`]. Ids are assigned by
/// the ledger and new records are always active.
#[derive(Debug, Clone)]
pub struct NewSupervisor {
  pub username:        String,
  pub name:            String,
  pub term:            Term,
  pub group_name:      Option<String>,
  pub is_grouper:      bool,
  pub is_main_grouper: bool,
}

/// Placeholder row handed to the lesson subsystem for each provisioned term.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LessonSeed {
  pub username:   String,
  pub name:       String,
  pub term:       Term,
  pub group_name: Option<String>,
}

// ─── Leadership slots ────────────────────────────────────────────────────────

/// The two single-occupancy slots a supervisor can hold.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LeaderRole {
  /// One per group per term.
  Grouper,
  /// One per term, across all groups.
  MainGrouper,
}

impl From<LeaderRole> for Role {
  fn from(r: LeaderRole) -> Self {
    match r {
      LeaderRole::Grouper => Role::Grouper,
      LeaderRole::MainGrouper => Role::MainGrouper,
    }
  }
}

// ─── Requests ────────────────────────────────────────────────────────────────

/// Input to promotion: make `username` a supervisor from `term` onwards.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PromoteRequest {
  pub username:        String,
  pub term:            Term,
  #[serde(default)]
  pub group_name:      Option<String>,
  #[serde(default)]
  pub is_grouper:      bool,
  #[serde(default)]
  pub is_main_grouper: bool,
}

impl PromoteRequest {
  pub fn new(username: impl Into<String>, term: Term) -> Self {
    Self {
      username: username.into(),
      term,
      group_name: None,
      is_grouper: false,
      is_main_grouper: false,
    }
  }

  pub fn in_group(mut self, group_name: impl Into<String>) -> Self {
    self.group_name = Some(group_name.into());
    self
  }

  pub fn as_grouper(mut self) -> Self {
    self.is_grouper = true;
    self
  }

  pub fn as_main_grouper(mut self) -> Self {
    self.is_main_grouper = true;
    self
  }
}

/// A partial update. `None` leaves a field untouched; `group_name:
/// Some(None)` clears the group.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SupervisorPatch {
  #[serde(
    default,
    with = "double_option",
    skip_serializing_if = "Option::is_none"
  )]
  pub group_name:      Option<Option<String>>,
  pub is_grouper:      Option<bool>,
  pub is_main_grouper: Option<bool>,
}

impl SupervisorPatch {
  pub fn flag(role: LeaderRole, value: bool) -> Self {
    match role {
      LeaderRole::Grouper => Self { is_grouper: Some(value), ..Self::default() },
      LeaderRole::MainGrouper => {
        Self { is_main_grouper: Some(value), ..Self::default() }
      }
    }
  }

  pub fn is_empty(&self) -> bool {
    self.group_name.is_none()
      && self.is_grouper.is_none()
      && self.is_main_grouper.is_none()
  }
}

/// Distinguishes an absent `group_name` key from an explicit `null`.
mod double_option {
  use serde::{Deserialize, Deserializer, Serialize, Serializer};

  pub fn serialize<S: Serializer>(
    value: &Option<Option<String>>,
    serializer: S,
  ) -> Result<S::Ok, S::Error> {
    match value {
      Some(inner) => inner.serialize(serializer),
      None => serializer.serialize_none(),
    }
  }

  pub fn deserialize<'de, D: Deserializer<'de>>(
    deserializer: D,
  ) -> Result<Option<Option<String>>, D::Error> {
    Option::<String>::deserialize(deserializer).map(Some)
  }
}

// ─── Query type ──────────────────────────────────────────────────────────────

/// Which terms a [`SupervisorFilter`] matches.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum TermRange {
  #[default]
  Any,
  Exactly(Term),
  /// The given term and every later one.
  From(Term),
}

impl TermRange {
  pub fn contains(&self, term: Term) -> bool {
    match self {
      Self::Any => true,
      Self::Exactly(t) => term == *t,
      Self::From(t) => term >= *t,
    }
  }
}

/// Exact-match and term-range filter over **active** Supervisor records.
#[derive(Debug, Clone, Default)]
pub struct SupervisorFilter {
  pub id:              Option<i64>,
  pub username:        Option<String>,
  pub terms:           TermRange,
  pub group_name:      Option<String>,
  pub is_grouper:      Option<bool>,
  pub is_main_grouper: Option<bool>,
}

impl SupervisorFilter {
  pub fn by_id(id: i64) -> Self { Self { id: Some(id), ..Self::default() } }

  pub fn for_user(username: &str) -> Self {
    Self { username: Some(username.to_owned()), ..Self::default() }
  }

  pub fn at(mut self, term: Term) -> Self {
    self.terms = TermRange::Exactly(term);
    self
  }

  pub fn since(mut self, term: Term) -> Self {
    self.terms = TermRange::From(term);
    self
  }

  pub fn in_group(mut self, group_name: &str) -> Self {
    self.group_name = Some(group_name.to_owned());
    self
  }

  pub fn holding(mut self, role: LeaderRole) -> Self {
    match role {
      LeaderRole::Grouper => self.is_grouper = Some(true),
      LeaderRole::MainGrouper => self.is_main_grouper = Some(true),
    }
    self
  }

  /// Whether an (active) record passes the filter.
  pub fn matches(&self, r: &SupervisorRecord) -> bool {
    r.using
      && self.id.is_none_or(|id| r.id == id)
      && self.username.as_ref().is_none_or(|u| &r.username == u)
      && self.terms.contains(r.term)
      && self
        .group_name
        .as_ref()
        .is_none_or(|g| r.group_name.as_ref() == Some(g))
      && self.is_grouper.is_none_or(|v| r.is_grouper == v)
      && self.is_main_grouper.is_none_or(|v| r.is_main_grouper == v)
  }
}
