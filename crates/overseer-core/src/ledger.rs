//! The `Ledger` trait: transaction-scoped access to the durable state the
//! lifecycle engine operates on.
//!
//! A `Ledger` value *is* one open transaction. Implementations must make every
//! write visible to later reads through the same value, and must discard all
//! of them if the transaction is dropped without committing. Committing is the
//! owner's job, not the engine's.

use crate::{
  Result,
  event::Event,
  group::Group,
  role::Role,
  supervisor::{
    LessonSeed, NewSupervisor, SupervisorFilter, SupervisorPatch,
    SupervisorRecord,
  },
  term::Term,
  user::{NewUser, ProfilePatch, User, UserQuery},
};

pub trait Ledger {
  // ── Users ─────────────────────────────────────────────────────────────

  /// The active user with this username, if any.
  fn user(&self, username: &str) -> Result<Option<User>>;

  /// Whether the username is taken by any user, active or not.
  fn username_taken(&self, username: &str) -> Result<bool>;

  fn users(&self, query: &UserQuery) -> Result<Vec<User>>;

  fn insert_user(&mut self, new: &NewUser) -> Result<User>;

  fn update_profile(&mut self, username: &str, patch: &ProfilePatch) -> Result<()>;

  fn set_guider(&mut self, username: &str, is_guider: bool) -> Result<()>;

  fn set_password_hash(&mut self, username: &str, hash: &str) -> Result<()>;

  /// The stored password hash of an active user.
  fn password_hash(&self, username: &str) -> Result<Option<String>>;

  /// Soft-delete: the row stays, `using` becomes `false`.
  fn deactivate_user(&mut self, username: &str) -> Result<()>;

  // ── Static roles ──────────────────────────────────────────────────────

  /// Active entries of the static role table for a user.
  fn static_roles(&self, username: &str) -> Result<Vec<Role>>;

  fn grant_role(&mut self, username: &str, role: Role) -> Result<()>;

  fn revoke_role(&mut self, username: &str, role: Role) -> Result<()>;

  // ── Terms ─────────────────────────────────────────────────────────────

  /// Create the Term row if absent. Returns `true` when it was created.
  fn ensure_term(&mut self, term: Term) -> Result<bool>;

  fn terms(&self) -> Result<Vec<Term>>;

  // ── Supervisor records ────────────────────────────────────────────────

  /// An active record by id.
  fn supervisor(&self, id: i64) -> Result<Option<SupervisorRecord>>;

  /// Active records matching `filter`, ordered by term then username.
  fn supervisors(&self, filter: &SupervisorFilter) -> Result<Vec<SupervisorRecord>>;

  fn insert_supervisor(&mut self, new: &NewSupervisor) -> Result<SupervisorRecord>;

  /// Apply `patch` to every active record matching `filter`. Returns the
  /// number of records touched.
  fn update_supervisors(
    &mut self,
    filter: &SupervisorFilter,
    patch: &SupervisorPatch,
  ) -> Result<usize>;

  /// Set `using = false` on every active record matching `filter`.
  fn retire_supervisors(&mut self, filter: &SupervisorFilter) -> Result<usize>;

  fn seed_lesson_record(&mut self, seed: &LessonSeed) -> Result<()>;

  // ── Groups ────────────────────────────────────────────────────────────

  fn group(&self, name: &str) -> Result<Option<Group>>;

  fn groups(&self) -> Result<Vec<Group>>;

  fn insert_group(&mut self, group: &Group) -> Result<()>;

  /// Write the denormalised leader; `""` clears it.
  fn set_group_leader(&mut self, name: &str, leader_name: &str) -> Result<()>;

  // ── Audit ─────────────────────────────────────────────────────────────

  fn record_event(&mut self, event: &Event) -> Result<()>;

  /// Most recent events first.
  fn events(&self, limit: usize) -> Result<Vec<Event>>;
}
