//! Roles and the effective-role aggregator.
//!
//! A user's roles come from two places: a static per-user table (teacher,
//! admin, college leader) and the Supervisor record for the term in question
//! (supervisor, grouper, main grouper).

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};
use strum::{Display, EnumIter, EnumString, IntoStaticStr};

use crate::supervisor::SupervisorRecord;

#[derive(
  Debug,
  Clone,
  Copy,
  PartialEq,
  Eq,
  Hash,
  PartialOrd,
  Ord,
  Serialize,
  Deserialize,
  Display,
  EnumString,
  EnumIter,
  IntoStaticStr,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum Role {
  Teacher,
  Admin,
  /// College leadership.
  Leader,
  Supervisor,
  /// Group leader.
  Grouper,
  /// Lead group leader, one per term across all groups.
  MainGrouper,
}

impl Role {
  /// Static roles live in the per-user role table; the rest are derived from
  /// the Supervisor record for a term.
  pub fn is_static(self) -> bool {
    matches!(self, Self::Teacher | Self::Admin | Self::Leader)
  }

  /// Human-readable label for presentation.
  pub fn label(self) -> &'static str {
    match self {
      Self::Teacher => "teacher",
      Self::Admin => "admin",
      Self::Leader => "college leader",
      Self::Supervisor => "supervisor",
      Self::Grouper => "group leader",
      Self::MainGrouper => "main group leader",
    }
  }
}

/// Combine static roles with the term's Supervisor record.
///
/// Non-static entries in `static_roles` are ignored; supervisor-derived roles
/// only ever come from `record`.
pub fn effective_roles(
  static_roles: impl IntoIterator<Item = Role>,
  record: Option<&SupervisorRecord>,
) -> BTreeSet<Role> {
  let mut roles: BTreeSet<Role> =
    static_roles.into_iter().filter(|r| r.is_static()).collect();

  if let Some(record) = record.filter(|r| r.using) {
    roles.insert(Role::Supervisor);
    if record.is_grouper {
      roles.insert(Role::Grouper);
    }
    if record.is_main_grouper {
      roles.insert(Role::MainGrouper);
    }
  }

  roles
}

// ─── Delta ───────────────────────────────────────────────────────────────────

/// Roles gained and lost between two role sets.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RoleDelta {
  pub added:   BTreeSet<Role>,
  pub removed: BTreeSet<Role>,
}

impl RoleDelta {
  pub fn between(old: &BTreeSet<Role>, new: &BTreeSet<Role>) -> Self {
    Self {
      added:   new.difference(old).copied().collect(),
      removed: old.difference(new).copied().collect(),
    }
  }

  pub fn is_empty(&self) -> bool { self.added.is_empty() && self.removed.is_empty() }

  pub fn adds(&self, role: Role) -> bool { self.added.contains(&role) }

  pub fn removes(&self, role: Role) -> bool { self.removed.contains(&role) }
}
