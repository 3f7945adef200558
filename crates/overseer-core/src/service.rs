//! [`Administration`]: the front door used by the HTTP layer.
//!
//! Wraps an [`AdminStore`] with the current-term provider and the effect
//! collaborators. Mutations default their term to the current one, run as a
//! single store transaction, and dispatch the queued effects only after the
//! store reports a commit.

use std::{collections::BTreeSet, sync::Arc};

use tracing::debug;

use crate::{
  effect::{Committed, LogSink, Notifier, Publisher, dispatch},
  event::{Actor, Event},
  group::{Group, GroupView},
  role::{Role, RoleDelta},
  store::AdminStore,
  supervisor::{PromoteRequest, SupervisorFilter, SupervisorPatch, SupervisorRecord},
  term::{Term, TermProvider},
  user::{NewUser, ProfilePatch, User, UserQuery, UserView},
};

pub struct Administration<S> {
  store:     Arc<S>,
  terms:     Arc<dyn TermProvider>,
  notifier:  Arc<dyn Notifier>,
  publisher: Arc<dyn Publisher>,
}

impl<S> Clone for Administration<S> {
  fn clone(&self) -> Self {
    Self {
      store:     self.store.clone(),
      terms:     self.terms.clone(),
      notifier:  self.notifier.clone(),
      publisher: self.publisher.clone(),
    }
  }
}

impl<S: AdminStore> Administration<S> {
  /// Effects go to the log until real collaborators are attached.
  pub fn new(store: S, terms: impl TermProvider + 'static) -> Self {
    Self {
      store:     Arc::new(store),
      terms:     Arc::new(terms),
      notifier:  Arc::new(LogSink),
      publisher: Arc::new(LogSink),
    }
  }

  pub fn with_notifier(mut self, notifier: Arc<dyn Notifier>) -> Self {
    self.notifier = notifier;
    self
  }

  pub fn with_publisher(mut self, publisher: Arc<dyn Publisher>) -> Self {
    self.publisher = publisher;
    self
  }

  pub fn store(&self) -> &S { &self.store }

  pub fn current_term(&self) -> Term { self.terms.current_term() }

  fn term_or_current(&self, term: Option<Term>) -> Term {
    term.unwrap_or_else(|| self.current_term())
  }

  fn settle<T>(&self, committed: Committed<T>) -> T {
    debug!(effects = committed.effects.len(), "dispatching effects");
    dispatch(&committed.effects, &*self.notifier, &*self.publisher);
    committed.value
  }

  // ── Users ─────────────────────────────────────────────────────────────

  pub async fn create_user(
    &self,
    actor: &Actor,
    new: NewUser,
    term: Option<Term>,
  ) -> Result<User, S::Error> {
    let term = self.term_or_current(term);
    let committed = self.store.create_user(actor.clone(), new, term).await?;
    Ok(self.settle(committed))
  }

  pub async fn update_profile(
    &self,
    actor: &Actor,
    username: &str,
    patch: ProfilePatch,
  ) -> Result<User, S::Error> {
    let committed = self
      .store
      .update_profile(actor.clone(), username.to_owned(), patch)
      .await?;
    Ok(self.settle(committed))
  }

  pub async fn delete_user(
    &self,
    actor: &Actor,
    username: &str,
    term: Option<Term>,
  ) -> Result<(), S::Error> {
    let term = self.term_or_current(term);
    let committed = self
      .store
      .delete_user(actor.clone(), username.to_owned(), term)
      .await?;
    Ok(self.settle(committed))
  }

  pub async fn change_password(
    &self,
    actor: &Actor,
    username: &str,
    password_hash: String,
  ) -> Result<(), S::Error> {
    let committed = self
      .store
      .change_password(actor.clone(), username.to_owned(), password_hash)
      .await?;
    Ok(self.settle(committed))
  }

  /// The stored argon2 hash, if `username` exists and is active.
  pub async fn password_hash(&self, username: &str) -> Result<Option<String>, S::Error> {
    self.store.password_hash(username.to_owned()).await
  }

  pub async fn get_user(
    &self,
    username: &str,
    term: Option<Term>,
  ) -> Result<Option<UserView>, S::Error> {
    let term = self.term_or_current(term);
    self.store.get_user(username.to_owned(), term).await
  }

  pub async fn list_users(
    &self,
    query: UserQuery,
    term: Option<Term>,
  ) -> Result<Vec<UserView>, S::Error> {
    let term = self.term_or_current(term);
    self.store.list_users(query, term).await
  }

  pub async fn update_user_roles(
    &self,
    actor: &Actor,
    username: &str,
    term: Option<Term>,
    roles: BTreeSet<Role>,
    group_name: Option<String>,
  ) -> Result<RoleDelta, S::Error> {
    let term = self.term_or_current(term);
    let committed = self
      .store
      .update_user_roles(actor.clone(), username.to_owned(), term, roles, group_name)
      .await?;
    Ok(self.settle(committed))
  }

  // ── Supervisors ───────────────────────────────────────────────────────

  pub async fn promote_to_supervisor(
    &self,
    actor: &Actor,
    req: PromoteRequest,
  ) -> Result<Vec<SupervisorRecord>, S::Error> {
    let committed = self.store.promote_to_supervisor(actor.clone(), req).await?;
    Ok(self.settle(committed))
  }

  pub async fn update_supervisor(
    &self,
    actor: &Actor,
    id: i64,
    patch: SupervisorPatch,
  ) -> Result<SupervisorRecord, S::Error> {
    let committed = self.store.update_supervisor(actor.clone(), id, patch).await?;
    Ok(self.settle(committed))
  }

  pub async fn retire_supervisor(
    &self,
    actor: &Actor,
    username: &str,
    term: Option<Term>,
  ) -> Result<usize, S::Error> {
    let term = self.term_or_current(term);
    let committed = self
      .store
      .retire_supervisor(actor.clone(), username.to_owned(), term)
      .await?;
    Ok(self.settle(committed))
  }

  pub async fn batch_renew(
    &self,
    actor: &Actor,
    usernames: Vec<String>,
    term: Option<Term>,
  ) -> Result<usize, S::Error> {
    let term = self.term_or_current(term);
    let committed = self.store.batch_renew(actor.clone(), usernames, term).await?;
    Ok(self.settle(committed))
  }

  pub async fn expire_listing(
    &self,
    term: Option<Term>,
  ) -> Result<Vec<SupervisorRecord>, S::Error> {
    let term = self.term_or_current(term);
    self.store.expire_listing(term).await
  }

  pub async fn get_supervisor(
    &self,
    id: i64,
  ) -> Result<Option<SupervisorRecord>, S::Error> {
    self.store.get_supervisor(id).await
  }

  pub async fn list_supervisors(
    &self,
    filter: SupervisorFilter,
  ) -> Result<Vec<SupervisorRecord>, S::Error> {
    self.store.list_supervisors(filter).await
  }

  pub async fn supervisor_count(&self, term: Option<Term>) -> Result<usize, S::Error> {
    let term = self.term_or_current(term);
    self.store.supervisor_count(term).await
  }

  // ── Groups ────────────────────────────────────────────────────────────

  pub async fn create_group(&self, actor: &Actor, name: &str) -> Result<Group, S::Error> {
    let committed = self.store.create_group(actor.clone(), name.to_owned()).await?;
    Ok(self.settle(committed))
  }

  pub async fn reconcile_groups(
    &self,
    actor: &Actor,
    term: Option<Term>,
  ) -> Result<Vec<Group>, S::Error> {
    let term = self.term_or_current(term);
    let committed = self.store.reconcile_groups(actor.clone(), term).await?;
    Ok(self.settle(committed))
  }

  pub async fn list_groups(&self) -> Result<Vec<GroupView>, S::Error> {
    self.store.list_groups().await
  }

  // ── Terms and audit ───────────────────────────────────────────────────

  pub async fn list_terms(&self) -> Result<Vec<Term>, S::Error> {
    self.store.list_terms().await
  }

  pub async fn list_events(&self, limit: usize) -> Result<Vec<Event>, S::Error> {
    self.store.list_events(limit).await
  }
}
