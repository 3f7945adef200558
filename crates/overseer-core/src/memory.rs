//! In-memory [`Ledger`] and a recording effect sink.
//!
//! Used by the engine's own tests and by anything that wants the lifecycle
//! rules without a database. The uniqueness rules that the SQLite schema
//! enforces with partial indexes are checked here after every supervisor
//! write.

use std::{
  collections::{BTreeMap, BTreeSet},
  sync::Mutex,
};

use serde_json::Value;

use crate::{
  Error, Result,
  effect::{Committed, Effect, Notifier, Publisher, SinkError},
  engine::{self, Engine},
  event::{Actor, Event},
  group::{Group, GroupView},
  ledger::Ledger,
  role::{Role, RoleDelta},
  store::AdminStore,
  supervisor::{
    LessonSeed, NewSupervisor, PromoteRequest, SupervisorFilter,
    SupervisorPatch, SupervisorRecord,
  },
  term::Term,
  user::{NewUser, ProfilePatch, User, UserJoin, UserQuery, UserView},
};

#[derive(Debug, Clone, Default)]
pub struct MemoryLedger {
  users:       BTreeMap<String, User>,
  passwords:   BTreeMap<String, String>,
  roles:       BTreeMap<String, BTreeSet<Role>>,
  terms:       BTreeSet<Term>,
  supervisors: BTreeMap<i64, SupervisorRecord>,
  next_id:     i64,
  lessons:     Vec<LessonSeed>,
  groups:      BTreeMap<String, Group>,
  events:      Vec<Event>,
}

impl MemoryLedger {
  pub fn new() -> Self { Self::default() }

  /// Run `f` as one transaction: on `Err` every write it made is undone.
  pub fn transact<T>(
    &mut self,
    f: impl FnOnce(&mut Self) -> Result<T>,
  ) -> Result<T> {
    let snapshot = self.clone();
    let outcome = f(self);
    if outcome.is_err() {
      *self = snapshot;
    }
    outcome
  }

  /// Every record ever written, retired ones included, in id order.
  pub fn all_supervisors(&self) -> impl Iterator<Item = &SupervisorRecord> {
    self.supervisors.values()
  }

  pub fn lesson_records(&self) -> &[LessonSeed] { &self.lessons }

  fn check_unique(&self) -> Result<()> {
    let mut seen_user = BTreeSet::new();
    let mut seen_grouper = BTreeSet::new();
    let mut seen_main = BTreeSet::new();

    for r in self.supervisors.values().filter(|r| r.using) {
      if !seen_user.insert((&r.username, r.term)) {
        return Err(Error::StorageConflict(format!(
          "duplicate active record for {} at {}",
          r.username, r.term
        )));
      }
      if r.is_grouper && !seen_grouper.insert((r.term, &r.group_name)) {
        return Err(Error::StorageConflict(format!(
          "second grouper for {:?} at {}",
          r.group_name, r.term
        )));
      }
      if r.is_main_grouper && !seen_main.insert(r.term) {
        return Err(Error::StorageConflict(format!(
          "second main grouper at {}",
          r.term
        )));
      }
      if r.is_grouper && r.group_name.is_none() {
        return Err(Error::GrouperWithoutGroup);
      }
    }
    Ok(())
  }

  fn joined(&self, user: &User, join: &UserJoin) -> bool {
    match join {
      UserJoin::StaticRole(role) => self
        .roles
        .get(&user.username)
        .is_some_and(|roles| roles.contains(role)),
      UserJoin::SupervisorAt { term, group_name } => {
        let mut filter = SupervisorFilter::for_user(&user.username).at(*term);
        if let Some(group) = group_name {
          filter = filter.in_group(group);
        }
        self.supervisors.values().any(|r| filter.matches(r))
      }
    }
  }

  fn active_user_mut(&mut self, username: &str) -> Result<&mut User> {
    self
      .users
      .get_mut(username)
      .filter(|u| u.using)
      .ok_or_else(|| Error::UserNotFound(username.to_owned()))
  }
}

impl Ledger for MemoryLedger {
  fn user(&self, username: &str) -> Result<Option<User>> {
    Ok(self.users.get(username).filter(|u| u.using).cloned())
  }

  fn username_taken(&self, username: &str) -> Result<bool> {
    Ok(self.users.contains_key(username))
  }

  fn users(&self, query: &UserQuery) -> Result<Vec<User>> {
    let needle = query.text.as_deref().map(str::to_lowercase);
    Ok(
      self
        .users
        .values()
        .filter(|u| u.using)
        .filter(|u| {
          needle.as_deref().is_none_or(|n| {
            u.username.to_lowercase().contains(n)
              || u.profile.name.to_lowercase().contains(n)
          })
        })
        .filter(|u| query.join.as_ref().is_none_or(|j| self.joined(u, j)))
        .skip(query.offset.unwrap_or(0))
        .take(query.limit.unwrap_or(usize::MAX))
        .cloned()
        .collect(),
    )
  }

  fn insert_user(&mut self, new: &NewUser) -> Result<User> {
    if self.users.contains_key(&new.username) {
      return Err(Error::StorageConflict(format!(
        "username {} already stored",
        new.username
      )));
    }
    let user = User {
      username:  new.username.clone(),
      profile:   new.profile.clone(),
      is_guider: false,
      using:     true,
    };
    self.users.insert(user.username.clone(), user.clone());
    self.passwords.insert(user.username.clone(), new.password_hash.clone());
    Ok(user)
  }

  fn update_profile(&mut self, username: &str, patch: &ProfilePatch) -> Result<()> {
    let user = self.active_user_mut(username)?;
    patch.clone().apply(&mut user.profile);
    Ok(())
  }

  fn set_guider(&mut self, username: &str, is_guider: bool) -> Result<()> {
    self.active_user_mut(username)?.is_guider = is_guider;
    Ok(())
  }

  fn set_password_hash(&mut self, username: &str, hash: &str) -> Result<()> {
    self.active_user_mut(username)?;
    self.passwords.insert(username.to_owned(), hash.to_owned());
    Ok(())
  }

  fn password_hash(&self, username: &str) -> Result<Option<String>> {
    if self.user(username)?.is_none() {
      return Ok(None);
    }
    Ok(self.passwords.get(username).cloned())
  }

  fn deactivate_user(&mut self, username: &str) -> Result<()> {
    self.active_user_mut(username)?.using = false;
    Ok(())
  }

  fn static_roles(&self, username: &str) -> Result<Vec<Role>> {
    Ok(
      self
        .roles
        .get(username)
        .map(|roles| roles.iter().copied().collect())
        .unwrap_or_default(),
    )
  }

  fn grant_role(&mut self, username: &str, role: Role) -> Result<()> {
    self.roles.entry(username.to_owned()).or_default().insert(role);
    Ok(())
  }

  fn revoke_role(&mut self, username: &str, role: Role) -> Result<()> {
    if let Some(roles) = self.roles.get_mut(username) {
      roles.remove(&role);
    }
    Ok(())
  }

  fn ensure_term(&mut self, term: Term) -> Result<bool> {
    Ok(self.terms.insert(term))
  }

  fn terms(&self) -> Result<Vec<Term>> { Ok(self.terms.iter().copied().collect()) }

  fn supervisor(&self, id: i64) -> Result<Option<SupervisorRecord>> {
    Ok(self.supervisors.get(&id).filter(|r| r.using).cloned())
  }

  fn supervisors(&self, filter: &SupervisorFilter) -> Result<Vec<SupervisorRecord>> {
    let mut records: Vec<_> = self
      .supervisors
      .values()
      .filter(|r| filter.matches(r))
      .cloned()
      .collect();
    records.sort_by(|a, b| (a.term, &a.username).cmp(&(b.term, &b.username)));
    Ok(records)
  }

  fn insert_supervisor(&mut self, new: &NewSupervisor) -> Result<SupervisorRecord> {
    self.next_id += 1;
    let record = SupervisorRecord {
      id:              self.next_id,
      username:        new.username.clone(),
      name:            new.name.clone(),
      term:            new.term,
      group_name:      new.group_name.clone(),
      is_grouper:      new.is_grouper,
      is_main_grouper: new.is_main_grouper,
      using:           true,
    };
    self.supervisors.insert(record.id, record.clone());
    if let Err(e) = self.check_unique() {
      self.supervisors.remove(&record.id);
      return Err(e);
    }
    Ok(record)
  }

  fn update_supervisors(
    &mut self,
    filter: &SupervisorFilter,
    patch: &SupervisorPatch,
  ) -> Result<usize> {
    let before = self.supervisors.clone();
    let mut touched = 0;
    for r in self.supervisors.values_mut().filter(|r| filter.matches(r)) {
      if let Some(group_name) = &patch.group_name {
        r.group_name = group_name.clone();
      }
      if let Some(v) = patch.is_grouper {
        r.is_grouper = v;
      }
      if let Some(v) = patch.is_main_grouper {
        r.is_main_grouper = v;
      }
      touched += 1;
    }
    if let Err(e) = self.check_unique() {
      self.supervisors = before;
      return Err(e);
    }
    Ok(touched)
  }

  fn retire_supervisors(&mut self, filter: &SupervisorFilter) -> Result<usize> {
    let mut retired = 0;
    for r in self.supervisors.values_mut().filter(|r| filter.matches(r)) {
      r.using = false;
      retired += 1;
    }
    Ok(retired)
  }

  fn seed_lesson_record(&mut self, seed: &LessonSeed) -> Result<()> {
    self.lessons.push(seed.clone());
    Ok(())
  }

  fn group(&self, name: &str) -> Result<Option<Group>> {
    Ok(self.groups.get(name).cloned())
  }

  fn groups(&self) -> Result<Vec<Group>> { Ok(self.groups.values().cloned().collect()) }

  fn insert_group(&mut self, group: &Group) -> Result<()> {
    if self.groups.contains_key(&group.name) {
      return Err(Error::StorageConflict(format!(
        "group {} already stored",
        group.name
      )));
    }
    self.groups.insert(group.name.clone(), group.clone());
    Ok(())
  }

  fn set_group_leader(&mut self, name: &str, leader_name: &str) -> Result<()> {
    let group = self
      .groups
      .get_mut(name)
      .ok_or_else(|| Error::GroupNotFound(name.to_owned()))?;
    group.leader_name = leader_name.to_owned();
    Ok(())
  }

  fn record_event(&mut self, event: &Event) -> Result<()> {
    self.events.push(event.clone());
    Ok(())
  }

  fn events(&self, limit: usize) -> Result<Vec<Event>> {
    Ok(self.events.iter().rev().take(limit).cloned().collect())
  }
}

// ─── MemoryStore ─────────────────────────────────────────────────────────────

/// An [`AdminStore`] over a [`MemoryLedger`] behind a mutex. Each call is one
/// [`MemoryLedger::transact`].
#[derive(Debug, Default)]
pub struct MemoryStore {
  ledger: Mutex<MemoryLedger>,
}

impl MemoryStore {
  pub fn new() -> Self { Self::default() }

  fn write<T>(
    &self,
    actor: &Actor,
    op: impl FnOnce(&mut Engine<'_, MemoryLedger>) -> Result<T>,
  ) -> Result<Committed<T>> {
    let mut ledger = self.ledger.lock().map_err(|_| poisoned())?;
    ledger.transact(|l| {
      let mut engine = Engine::new(l, actor);
      let value = op(&mut engine)?;
      Ok(Committed { value, effects: engine.into_effects() })
    })
  }

  fn read<T>(&self, op: impl FnOnce(&MemoryLedger) -> Result<T>) -> Result<T> {
    let ledger = self.ledger.lock().map_err(|_| poisoned())?;
    op(&ledger)
  }
}

fn poisoned() -> Error { Error::Storage("memory ledger lock poisoned".into()) }

impl AdminStore for MemoryStore {
  type Error = Error;

  async fn create_user(
    &self,
    actor: Actor,
    new: NewUser,
    term: Term,
  ) -> Result<Committed<User>> {
    self.write(&actor, |e| e.create_user(&new, term))
  }

  async fn update_profile(
    &self,
    actor: Actor,
    username: String,
    patch: ProfilePatch,
  ) -> Result<Committed<User>> {
    self.write(&actor, |e| e.update_profile(&username, &patch))
  }

  async fn delete_user(
    &self,
    actor: Actor,
    username: String,
    term: Term,
  ) -> Result<Committed<()>> {
    self.write(&actor, |e| e.delete_user(&username, term))
  }

  async fn change_password(
    &self,
    actor: Actor,
    username: String,
    password_hash: String,
  ) -> Result<Committed<()>> {
    self.write(&actor, |e| e.change_password(&username, &password_hash))
  }

  async fn password_hash(&self, username: String) -> Result<Option<String>> {
    self.read(|l| l.password_hash(&username))
  }

  async fn get_user(&self, username: String, term: Term) -> Result<Option<UserView>> {
    self.read(|l| {
      l.user(&username)?
        .map(|u| engine::user_view(l, u, term))
        .transpose()
    })
  }

  async fn list_users(&self, query: UserQuery, term: Term) -> Result<Vec<UserView>> {
    self.read(|l| {
      l.users(&query)?
        .into_iter()
        .map(|u| engine::user_view(l, u, term))
        .collect()
    })
  }

  async fn update_user_roles(
    &self,
    actor: Actor,
    username: String,
    term: Term,
    roles: BTreeSet<Role>,
    group_name: Option<String>,
  ) -> Result<Committed<RoleDelta>> {
    self.write(&actor, |e| {
      e.update_user_roles(&username, term, &roles, group_name.as_deref())
    })
  }

  async fn promote_to_supervisor(
    &self,
    actor: Actor,
    req: PromoteRequest,
  ) -> Result<Committed<Vec<SupervisorRecord>>> {
    self.write(&actor, |e| e.promote_to_supervisor(&req))
  }

  async fn update_supervisor(
    &self,
    actor: Actor,
    id: i64,
    patch: SupervisorPatch,
  ) -> Result<Committed<SupervisorRecord>> {
    self.write(&actor, |e| e.update_supervisor(id, &patch))
  }

  async fn retire_supervisor(
    &self,
    actor: Actor,
    username: String,
    term: Term,
  ) -> Result<Committed<usize>> {
    self.write(&actor, |e| e.retire_supervisor(&username, term))
  }

  async fn batch_renew(
    &self,
    actor: Actor,
    usernames: Vec<String>,
    term: Term,
  ) -> Result<Committed<usize>> {
    self.write(&actor, |e| e.batch_renew(&usernames, term))
  }

  async fn expire_listing(&self, term: Term) -> Result<Vec<SupervisorRecord>> {
    self.read(|l| engine::expire_listing(l, term))
  }

  async fn get_supervisor(&self, id: i64) -> Result<Option<SupervisorRecord>> {
    self.read(|l| l.supervisor(id))
  }

  async fn list_supervisors(
    &self,
    filter: SupervisorFilter,
  ) -> Result<Vec<SupervisorRecord>> {
    self.read(|l| l.supervisors(&filter))
  }

  async fn supervisor_count(&self, term: Term) -> Result<usize> {
    self.read(|l| Ok(l.supervisors(&SupervisorFilter::default().at(term))?.len()))
  }

  async fn create_group(&self, actor: Actor, name: String) -> Result<Committed<Group>> {
    self.write(&actor, |e| e.create_group(&name))
  }

  async fn list_groups(&self) -> Result<Vec<GroupView>> {
    self.read(|l| engine::group_views(l))
  }

  async fn reconcile_groups(
    &self,
    actor: Actor,
    term: Term,
  ) -> Result<Committed<Vec<Group>>> {
    self.write(&actor, |e| e.reconcile_groups(term))
  }

  async fn list_terms(&self) -> Result<Vec<Term>> { self.read(|l| l.terms()) }

  async fn list_events(&self, limit: usize) -> Result<Vec<Event>> {
    self.read(|l| l.events(limit))
  }
}

// ─── RecordingSink ───────────────────────────────────────────────────────────

/// A [`Notifier`] and [`Publisher`] that keeps everything it is handed.
#[derive(Debug, Default)]
pub struct RecordingSink {
  effects: Mutex<Vec<Effect>>,
}

impl RecordingSink {
  pub fn effects(&self) -> Vec<Effect> {
    self.effects.lock().map(|e| e.clone()).unwrap_or_default()
  }

  fn record(&self, effect: Effect) -> Result<(), SinkError> {
    self
      .effects
      .lock()
      .map_err(|_| SinkError("recording sink poisoned".into()))?
      .push(effect);
    Ok(())
  }
}

impl Notifier for RecordingSink {
  fn push_message(
    &self,
    username: &str,
    title: &str,
    body: &str,
  ) -> Result<(), SinkError> {
    self.record(Effect::notice(username, title, body))
  }
}

impl Publisher for RecordingSink {
  fn publish(
    &self,
    topic: &str,
    method: &str,
    payload: &Value,
  ) -> Result<(), SinkError> {
    self.record(Effect::message(topic, method, payload.clone()))
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  fn t(s: &str) -> Term { s.parse().unwrap() }

  fn record(username: &str, group: &str, grouper: bool) -> NewSupervisor {
    NewSupervisor {
      username:        username.into(),
      name:            username.into(),
      term:            t("2023-2024-1"),
      group_name:      Some(group.into()),
      is_grouper:      grouper,
      is_main_grouper: false,
    }
  }

  #[test]
  fn rejects_a_second_grouper_in_the_same_group() {
    let mut ledger = MemoryLedger::new();
    ledger.insert_supervisor(&record("alice", "G1", true)).unwrap();

    let err = ledger.insert_supervisor(&record("bob", "G1", true)).unwrap_err();
    assert!(matches!(err, Error::StorageConflict(_)));
    assert_eq!(ledger.all_supervisors().count(), 1);
  }

  #[test]
  fn transact_restores_state_on_error() {
    let mut ledger = MemoryLedger::new();
    let out: Result<()> = ledger.transact(|l| {
      l.insert_supervisor(&record("alice", "G1", false))?;
      Err(Error::GrouperWithoutGroup)
    });

    assert!(out.is_err());
    assert_eq!(ledger.all_supervisors().count(), 0);
  }
}
