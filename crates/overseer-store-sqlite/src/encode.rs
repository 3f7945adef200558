//! Encoding and decoding helpers between domain types and the plain-text
//! representations stored in SQLite columns.
//!
//! Timestamps are RFC 3339 strings, terms their `YYYY-YYYY-H` identifier,
//! roles their snake_case name and event details compact JSON.

use chrono::{DateTime, Utc};
use overseer_core::{
  Error, Result,
  event::Event,
  role::Role,
  supervisor::SupervisorRecord,
  term::Term,
  user::{Profile, User},
};
use uuid::Uuid;

/// Map a storage-layer failure into the core taxonomy. Constraint violations
/// are conflicts; anything else is internal.
pub trait Storage<T> {
  fn storage(self) -> Result<T>;
}

impl<T> Storage<T> for rusqlite::Result<T> {
  fn storage(self) -> Result<T> {
    self.map_err(|e| match e.sqlite_error_code() {
      Some(rusqlite::ErrorCode::ConstraintViolation) => {
        Error::StorageConflict(e.to_string())
      }
      _ => Error::Storage(Box::new(e)),
    })
  }
}

// ─── Scalars ─────────────────────────────────────────────────────────────────

pub fn encode_term(term: Term) -> String { term.to_string() }

pub fn decode_term(s: &str) -> Result<Term> { s.parse() }

pub fn encode_role(role: Role) -> &'static str { role.into() }

pub fn decode_role(s: &str) -> Result<Role> {
  s.parse().map_err(|_| Error::UnknownRole(s.to_owned()))
}

pub fn encode_dt(dt: DateTime<Utc>) -> String { dt.to_rfc3339() }

pub fn decode_dt(s: &str) -> Result<DateTime<Utc>> {
  DateTime::parse_from_rfc3339(s)
    .map(|dt| dt.with_timezone(&Utc))
    .map_err(|e| Error::Storage(Box::new(e)))
}

pub fn decode_uuid(s: &str) -> Result<Uuid> {
  Uuid::parse_str(s).map_err(|e| Error::Storage(Box::new(e)))
}

// ─── Rows ────────────────────────────────────────────────────────────────────

pub const USER_COLUMNS: &str = "u.username, u.name, u.sex, u.email, u.phone, \
                                u.unit, u.status, u.prorank, u.skill, \
                                u.is_guider, u.active";

/// Read a `users` row selected with [`USER_COLUMNS`].
pub fn user_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<User> {
  Ok(User {
    username:  row.get(0)?,
    profile:   Profile {
      name:    row.get(1)?,
      sex:     row.get(2)?,
      email:   row.get(3)?,
      phone:   row.get(4)?,
      unit:    row.get(5)?,
      status:  row.get(6)?,
      prorank: row.get(7)?,
      skill:   row.get(8)?,
    },
    is_guider: row.get(9)?,
    using:     row.get(10)?,
  })
}

pub const SUPERVISOR_COLUMNS: &str = "id, username, name, term, group_name, \
                                      is_grouper, is_main_grouper, active";

/// Raw values read directly from a `supervisors` row.
pub struct RawSupervisor {
  pub id:              i64,
  pub username:        String,
  pub name:            String,
  pub term:            String,
  pub group_name:      Option<String>,
  pub is_grouper:      bool,
  pub is_main_grouper: bool,
  pub active:          bool,
}

impl RawSupervisor {
  pub fn from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Self> {
    Ok(Self {
      id:              row.get(0)?,
      username:        row.get(1)?,
      name:            row.get(2)?,
      term:            row.get(3)?,
      group_name:      row.get(4)?,
      is_grouper:      row.get(5)?,
      is_main_grouper: row.get(6)?,
      active:          row.get(7)?,
    })
  }

  pub fn into_record(self) -> Result<SupervisorRecord> {
    Ok(SupervisorRecord {
      id:              self.id,
      username:        self.username,
      name:            self.name,
      term:            decode_term(&self.term)?,
      group_name:      self.group_name,
      is_grouper:      self.is_grouper,
      is_main_grouper: self.is_main_grouper,
      using:           self.active,
    })
  }
}

/// Raw strings read directly from an `events` row.
pub struct RawEvent {
  pub event_id:    String,
  pub name:        String,
  pub actor:       String,
  pub detail:      String,
  pub recorded_at: String,
}

impl RawEvent {
  pub fn from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Self> {
    Ok(Self {
      event_id:    row.get(0)?,
      name:        row.get(1)?,
      actor:       row.get(2)?,
      detail:      row.get(3)?,
      recorded_at: row.get(4)?,
    })
  }

  pub fn into_event(self) -> Result<Event> {
    Ok(Event {
      event_id:    decode_uuid(&self.event_id)?,
      name:        self.name,
      actor:       self.actor,
      detail:      serde_json::from_str(&self.detail)?,
      recorded_at: decode_dt(&self.recorded_at)?,
    })
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn roles_use_snake_case_names() {
    assert_eq!(encode_role(Role::MainGrouper), "main_grouper");
    assert_eq!(decode_role("main_grouper").unwrap(), Role::MainGrouper);
    assert!(matches!(decode_role("boss"), Err(Error::UnknownRole(_))));
  }

  #[test]
  fn stored_terms_sort_chronologically() {
    let mut stored: Vec<String> = ["2024-2025-1", "2023-2024-2", "2023-2024-1"]
      .iter()
      .map(|s| encode_term(s.parse().unwrap()))
      .collect();
    stored.sort();
    assert_eq!(stored, ["2023-2024-1", "2023-2024-2", "2024-2025-1"]);
  }
}
