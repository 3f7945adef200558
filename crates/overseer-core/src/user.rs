//! Users, their profiles and the user query type.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use crate::{role::Role, supervisor::SupervisorRecord, term::Term};

/// Free-form profile fields kept for display and reporting.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Profile {
  /// Display name.
  pub name:    String,
  pub sex:     String,
  pub email:   String,
  pub phone:   String,
  /// Department or teaching unit.
  pub unit:    String,
  pub status:  String,
  /// Professional rank.
  pub prorank: String,
  pub skill:   String,
}

/// A partial [`Profile`] update; `None` fields are left untouched.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ProfilePatch {
  pub name:    Option<String>,
  pub sex:     Option<String>,
  pub email:   Option<String>,
  pub phone:   Option<String>,
  pub unit:    Option<String>,
  pub status:  Option<String>,
  pub prorank: Option<String>,
  pub skill:   Option<String>,
}

impl ProfilePatch {
  pub fn apply(self, profile: &mut Profile) {
    let fields = [
      (self.name, &mut profile.name),
      (self.sex, &mut profile.sex),
      (self.email, &mut profile.email),
      (self.phone, &mut profile.phone),
      (self.unit, &mut profile.unit),
      (self.status, &mut profile.status),
      (self.prorank, &mut profile.prorank),
      (self.skill, &mut profile.skill),
    ];
    for (value, slot) in fields {
      if let Some(value) = value {
        *slot = value;
      }
    }
  }
}

/// A user account. The password hash is kept out of this type entirely; it
/// is only ever read by the authentication layer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
  pub username:  String,
  #[serde(flatten)]
  pub profile:   Profile,
  /// Set while the user holds (or is provisioned for) a supervisor record.
  pub is_guider: bool,
  /// Soft-delete flag.
  pub using:     bool,
}

/// Input to user creation.
#[derive(Debug, Clone)]
pub struct NewUser {
  pub username:      String,
  pub profile:       Profile,
  /// Argon2 PHC string.
  pub password_hash: String,
  /// Requested roles. `teacher` is always granted; supervisor-derived roles
  /// trigger a promotion in the same transaction.
  pub roles:         BTreeSet<Role>,
  /// Group for the promotion when `roles` contains `supervisor`.
  pub group_name:    Option<String>,
}

/// The read model for a user at a given term, never stored, always derived.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserView {
  #[serde(flatten)]
  pub user:       User,
  pub term:       Term,
  pub roles:      BTreeSet<Role>,
  /// The Supervisor record for `term`, when the user has one.
  pub supervisor: Option<SupervisorRecord>,
}

// ─── Query type ──────────────────────────────────────────────────────────────

/// The entities a user listing may be joined against.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UserJoin {
  /// Users holding `role` in the static role table.
  StaticRole(Role),
  /// Users with an active Supervisor record at `term`, optionally in one group.
  SupervisorAt {
    term:       Term,
    group_name: Option<String>,
  },
}

/// Parameters for [`crate::store::AdminStore::list_users`]. Only active users
/// are ever listed.
#[derive(Debug, Clone, Default)]
pub struct UserQuery {
  /// Substring filter on the username or display name.
  pub text:   Option<String>,
  pub join:   Option<UserJoin>,
  pub limit:  Option<usize>,
  pub offset: Option<usize>,
}
