//! The `AdminStore` trait.
//!
//! Implemented by storage backends (e.g. `overseer-store-sqlite`). Higher
//! layers (`overseer-api`, `overseer-server`) depend on this abstraction, not
//! on any concrete backend.
//!
//! Every mutating method runs as exactly one transaction and returns the
//! effects it queued inside [`Committed`]. A method that returns `Err` has
//! written nothing and queued nothing. Callers dispatch the effects; see
//! [`crate::service::Administration`].

use std::{collections::BTreeSet, future::Future};

use crate::{
  effect::Committed,
  error::Classify,
  event::{Actor, Event},
  group::{Group, GroupView},
  role::{Role, RoleDelta},
  supervisor::{PromoteRequest, SupervisorFilter, SupervisorPatch, SupervisorRecord},
  term::Term,
  user::{NewUser, ProfilePatch, User, UserQuery, UserView},
};

/// All methods return `Send` futures so the trait can be used in
/// multi-threaded async runtimes (e.g. tokio with `axum`).
pub trait AdminStore: Send + Sync {
  type Error: std::error::Error + Classify + Send + Sync + 'static;

  // ── Users ─────────────────────────────────────────────────────────────

  fn create_user(
    &self,
    actor: Actor,
    new: NewUser,
    term: Term,
  ) -> impl Future<Output = Result<Committed<User>, Self::Error>> + Send + '_;

  fn update_profile(
    &self,
    actor: Actor,
    username: String,
    patch: ProfilePatch,
  ) -> impl Future<Output = Result<Committed<User>, Self::Error>> + Send + '_;

  /// Soft-delete a user and retire their supervision from `term` on.
  fn delete_user(
    &self,
    actor: Actor,
    username: String,
    term: Term,
  ) -> impl Future<Output = Result<Committed<()>, Self::Error>> + Send + '_;

  fn change_password(
    &self,
    actor: Actor,
    username: String,
    password_hash: String,
  ) -> impl Future<Output = Result<Committed<()>, Self::Error>> + Send + '_;

  /// The stored hash of an active user. Only the authentication layer should
  /// call this.
  fn password_hash(
    &self,
    username: String,
  ) -> impl Future<Output = Result<Option<String>, Self::Error>> + Send + '_;

  fn get_user(
    &self,
    username: String,
    term: Term,
  ) -> impl Future<Output = Result<Option<UserView>, Self::Error>> + Send + '_;

  fn list_users(
    &self,
    query: UserQuery,
    term: Term,
  ) -> impl Future<Output = Result<Vec<UserView>, Self::Error>> + Send + '_;

  // ── Roles ─────────────────────────────────────────────────────────────

  fn update_user_roles(
    &self,
    actor: Actor,
    username: String,
    term: Term,
    roles: BTreeSet<Role>,
    group_name: Option<String>,
  ) -> impl Future<Output = Result<Committed<RoleDelta>, Self::Error>> + Send + '_;

  // ── Supervisors ───────────────────────────────────────────────────────

  fn promote_to_supervisor(
    &self,
    actor: Actor,
    req: PromoteRequest,
  ) -> impl Future<Output = Result<Committed<Vec<SupervisorRecord>>, Self::Error>>
  + Send
  + '_;

  fn update_supervisor(
    &self,
    actor: Actor,
    id: i64,
    patch: SupervisorPatch,
  ) -> impl Future<Output = Result<Committed<SupervisorRecord>, Self::Error>> + Send + '_;

  fn retire_supervisor(
    &self,
    actor: Actor,
    username: String,
    term: Term,
  ) -> impl Future<Output = Result<Committed<usize>, Self::Error>> + Send + '_;

  fn batch_renew(
    &self,
    actor: Actor,
    usernames: Vec<String>,
    term: Term,
  ) -> impl Future<Output = Result<Committed<usize>, Self::Error>> + Send + '_;

  fn expire_listing(
    &self,
    term: Term,
  ) -> impl Future<Output = Result<Vec<SupervisorRecord>, Self::Error>> + Send + '_;

  fn get_supervisor(
    &self,
    id: i64,
  ) -> impl Future<Output = Result<Option<SupervisorRecord>, Self::Error>> + Send + '_;

  fn list_supervisors(
    &self,
    filter: SupervisorFilter,
  ) -> impl Future<Output = Result<Vec<SupervisorRecord>, Self::Error>> + Send + '_;

  /// Number of active records at `term`.
  fn supervisor_count(
    &self,
    term: Term,
  ) -> impl Future<Output = Result<usize, Self::Error>> + Send + '_;

  // ── Groups ────────────────────────────────────────────────────────────

  fn create_group(
    &self,
    actor: Actor,
    name: String,
  ) -> impl Future<Output = Result<Committed<Group>, Self::Error>> + Send + '_;

  fn list_groups(
    &self,
  ) -> impl Future<Output = Result<Vec<GroupView>, Self::Error>> + Send + '_;

  fn reconcile_groups(
    &self,
    actor: Actor,
    term: Term,
  ) -> impl Future<Output = Result<Committed<Vec<Group>>, Self::Error>> + Send + '_;

  // ── Terms and audit ───────────────────────────────────────────────────

  fn list_terms(
    &self,
  ) -> impl Future<Output = Result<Vec<Term>, Self::Error>> + Send + '_;

  /// Most recent first.
  fn list_events(
    &self,
    limit: usize,
  ) -> impl Future<Output = Result<Vec<Event>, Self::Error>> + Send + '_;
}
