//! The Supervisor Lifecycle Engine.
//!
//! An [`Engine`] wraps one open [`Ledger`] transaction and the [`Actor`] the
//! work is done for. Each public operation either returns `Ok` with all of its
//! writes applied to the ledger, or returns the first error it hit; in the
//! error case the owner must drop the transaction instead of committing it.
//!
//! Two slots are single-occupancy: the grouper of a group in a term and the
//! main grouper of a term. Every write that fills a slot first vacates it, so
//! at no point does the ledger hold two holders, even inside the transaction.

use std::collections::{BTreeMap, BTreeSet};

use serde_json::json;
use tracing::{debug, info};

use crate::{
  Error, Result,
  effect::Effect,
  event::{Actor, Event},
  group::{Group, GroupView},
  ledger::Ledger,
  role::{Role, RoleDelta, effective_roles},
  supervisor::{
    LeaderRole, LessonSeed, NewSupervisor, PromoteRequest, SupervisorFilter,
    SupervisorPatch, SupervisorRecord,
  },
  term::{HORIZON, Term},
  user::{NewUser, ProfilePatch, User, UserView},
};

/// Topic for messages about supervisor assignments.
pub const USER_TOPIC: &str = "user_service";

// ─── Reads ───────────────────────────────────────────────────────────────────

/// A user's effective roles at `term`.
pub fn effective_roles_at<L: Ledger + ?Sized>(
  ledger: &L,
  username: &str,
  term: Term,
) -> Result<BTreeSet<Role>> {
  let record = record_at(ledger, username, term)?;
  Ok(effective_roles(ledger.static_roles(username)?, record.as_ref()))
}

/// Materialise the [`UserView`] of `user` at `term`.
pub fn user_view<L: Ledger + ?Sized>(
  ledger: &L,
  user: User,
  term: Term,
) -> Result<UserView> {
  let supervisor = record_at(ledger, &user.username, term)?;
  let roles = effective_roles(ledger.static_roles(&user.username)?, supervisor.as_ref());
  Ok(UserView { user, term, roles, supervisor })
}

/// Active records at `term` whose user has no active record in the next term:
/// the assignments that lapse unless renewed.
pub fn expire_listing<L: Ledger + ?Sized>(
  ledger: &L,
  term: Term,
) -> Result<Vec<SupervisorRecord>> {
  let continuing: BTreeSet<String> = ledger
    .supervisors(&SupervisorFilter::default().at(term.advance(1)))?
    .into_iter()
    .map(|r| r.username)
    .collect();

  let mut lapsing = ledger.supervisors(&SupervisorFilter::default().at(term))?;
  lapsing.retain(|r| !continuing.contains(&r.username));
  Ok(lapsing)
}

/// Every group with its leader resolved to an active user.
pub fn group_views<L: Ledger + ?Sized>(ledger: &L) -> Result<Vec<GroupView>> {
  ledger
    .groups()?
    .into_iter()
    .map(|group| {
      let leader = match group.leader() {
        Some(username) => ledger.user(username)?,
        None => None,
      };
      Ok(GroupView { name: group.name, leader })
    })
    .collect()
}

fn record_at<L: Ledger + ?Sized>(
  ledger: &L,
  username: &str,
  term: Term,
) -> Result<Option<SupervisorRecord>> {
  Ok(
    ledger
      .supervisors(&SupervisorFilter::for_user(username).at(term))?
      .into_iter()
      .next(),
  )
}

// ─── Engine ──────────────────────────────────────────────────────────────────

pub struct Engine<'l, L: ?Sized> {
  ledger:  &'l mut L,
  actor:   Actor,
  effects: Vec<Effect>,
}

impl<'l, L: Ledger + ?Sized> Engine<'l, L> {
  pub fn new(ledger: &'l mut L, actor: &Actor) -> Self {
    Self { ledger, actor: actor.clone(), effects: Vec::new() }
  }

  pub fn ledger(&self) -> &L { self.ledger }

  /// The effects queued so far, to be dispatched after commit.
  pub fn into_effects(self) -> Vec<Effect> { self.effects }

  // ── Supervisors ───────────────────────────────────────────────────────

  /// Make a user a supervisor for `req.term` and the [`HORIZON`] terms after
  /// it, optionally as grouper and/or main grouper.
  pub fn promote_to_supervisor(
    &mut self,
    req: &PromoteRequest,
  ) -> Result<Vec<SupervisorRecord>> {
    let records = self.promote(req)?;
    self.audit("promote_supervisor", json!({
      "username": req.username,
      "term": req.term,
      "group_name": req.group_name,
      "is_grouper": req.is_grouper,
      "is_main_grouper": req.is_main_grouper,
    }))?;
    Ok(records)
  }

  /// Set or clear a leadership flag on the user's records from `term` on,
  /// mirroring grouper changes onto the Group Registry.
  ///
  /// Adding requires the slot to be vacant; use [`Engine::appoint`] to
  /// displace a current holder. Removing a grouper flag only touches records
  /// in the resolved group. The main grouper slot spans every group, so
  /// `group_name` is ignored for it and the records keep their group.
  pub fn set_leader_flag(
    &mut self,
    username: &str,
    term: Term,
    group_name: Option<&str>,
    role: LeaderRole,
    add: bool,
  ) -> Result<()> {
    let record = self.require_record(username, term)?;
    let group = group_name.map(str::to_owned).or(record.group_name);

    let mut filter = SupervisorFilter::for_user(username).since(term);
    let mut patch = SupervisorPatch::flag(role, add);
    let mut abandoned = BTreeSet::new();

    match (role, add) {
      (LeaderRole::Grouper, true) => {
        let group = group.as_deref().ok_or(Error::GrouperWithoutGroup)?;
        self.require_group(group)?;
        self.ensure_vacant(role, term, Some(group), username)?;
        abandoned = self
          .ledger
          .supervisors(&filter.clone().holding(role))?
          .into_iter()
          .filter_map(|r| r.group_name)
          .filter(|g| g != group)
          .collect();
        patch.group_name = Some(Some(group.to_owned()));
      }
      (LeaderRole::Grouper, false) => {
        if let Some(group) = &group {
          filter = filter.in_group(group);
        }
      }
      (LeaderRole::MainGrouper, true) => {
        self.ensure_vacant(role, term, None, username)?;
      }
      (LeaderRole::MainGrouper, false) => {}
    }

    let touched = self.ledger.update_supervisors(&filter, &patch)?;

    if role == LeaderRole::Grouper
      && let Some(group) = group.as_deref()
    {
      if add {
        self.ledger.set_group_leader(group, username)?;
      } else {
        self.release_group(group, username)?;
      }
    }
    for old in &abandoned {
      self.release_group(old, username)?;
    }

    debug!(%username, %term, ?role, add, touched, "leader flag written");
    Ok(())
  }

  /// Give `username` a leadership slot from `term` on, first vacating it for
  /// everyone else.
  pub fn appoint(
    &mut self,
    username: &str,
    term: Term,
    group_name: Option<&str>,
    role: LeaderRole,
  ) -> Result<()> {
    let record = self.require_record(username, term)?;

    match role {
      LeaderRole::Grouper => {
        let group = group_name
          .map(str::to_owned)
          .or(record.group_name)
          .ok_or(Error::GrouperWithoutGroup)?;
        self.require_group(&group)?;
        self.vacate(role, term, Some(&group), username)?;
        self.set_leader_flag(username, term, Some(&group), role, true)?;
      }
      LeaderRole::MainGrouper => {
        self.vacate(role, term, None, username)?;
        self.set_leader_flag(username, term, None, role, true)?;
      }
    }

    self.effects.push(Effect::notice(
      username,
      "Role change",
      format!("You are the {} from term {term}.", Role::from(role).label()),
    ));
    Ok(())
  }

  /// Partially update one record, reconciling leadership transitions at the
  /// record's term before the field update is written.
  pub fn update_supervisor(
    &mut self,
    id: i64,
    patch: &SupervisorPatch,
  ) -> Result<SupervisorRecord> {
    let record = self
      .ledger
      .supervisor(id)?
      .ok_or(Error::SupervisorNotFound(id))?;
    let username = record.username.as_str();
    let term = record.term;

    if let Some(Some(group)) = &patch.group_name {
      self.require_group(group)?;
    }

    let new_group = patch
      .group_name
      .clone()
      .unwrap_or_else(|| record.group_name.clone());

    let was_grouper_of = record
      .is_grouper
      .then(|| record.group_name.clone())
      .flatten();
    let will_be_grouper_of = if patch.is_grouper.unwrap_or(record.is_grouper) {
      Some(new_group.clone().ok_or(Error::GrouperWithoutGroup)?)
    } else {
      None
    };
    let was_main = record.is_main_grouper;
    let will_be_main = patch.is_main_grouper.unwrap_or(was_main);

    // Vacate first so the slot is never held twice.
    if let Some(old) = &was_grouper_of
      && was_grouper_of != will_be_grouper_of
    {
      self.set_leader_flag(username, term, Some(old), LeaderRole::Grouper, false)?;
    }
    if was_main && !will_be_main {
      self.set_leader_flag(username, term, None, LeaderRole::MainGrouper, false)?;
    }

    if let Some(group) = &will_be_grouper_of
      && was_grouper_of.as_ref() != Some(group)
    {
      self.appoint(username, term, Some(group), LeaderRole::Grouper)?;
    }
    if will_be_main && !was_main {
      self.appoint(username, term, None, LeaderRole::MainGrouper)?;
    }

    if let Some(group_name) = &patch.group_name {
      let fields = SupervisorPatch {
        group_name: Some(group_name.clone()),
        ..SupervisorPatch::default()
      };
      self.ledger.update_supervisors(&SupervisorFilter::by_id(id), &fields)?;
    }

    self.audit("update_supervisor", json!({ "id": id, "patch": patch }))?;

    self.ledger.supervisor(id)?.ok_or(Error::SupervisorNotFound(id))
  }

  /// End a user's supervision from `term` on.
  pub fn retire_supervisor(&mut self, username: &str, term: Term) -> Result<usize> {
    self.active_user(username)?;
    self.require_record(username, term)?;
    let retired = self.retire_from(username, term)?;
    self.audit("retire_supervisor", json!({ "username": username, "term": term }))?;
    Ok(retired)
  }

  /// Copy each user's assignment at `term` forward into the [`HORIZON`] terms
  /// after it, skipping terms that already have an active record. Returns the
  /// number of records inserted.
  pub fn batch_renew(&mut self, usernames: &[String], term: Term) -> Result<usize> {
    let mut inserted = 0;

    for username in usernames {
      let user = self.active_user(username)?;
      let current = record_at(self.ledger, username, term)?.ok_or_else(|| {
        Error::NoSupervisorRecord { username: username.clone(), term }
      })?;

      for step in 1..=HORIZON {
        let next = term.advance(step);
        self.ledger.ensure_term(next)?;
        if record_at(self.ledger, username, next)?.is_some() {
          continue;
        }
        self.provision(&user, next, current.group_name.clone(), false, false)?;
        inserted += 1;
      }
    }

    self.audit("batch_renew", json!({
      "usernames": usernames,
      "term": term,
      "inserted": inserted,
    }))?;
    if inserted > 0 {
      self.effects.push(Effect::message(
        USER_TOPIC,
        "renew_supervisor",
        json!({ "usernames": usernames, "term": term }),
      ));
      info!(%term, users = usernames.len(), inserted, "supervisors renewed");
    }
    Ok(inserted)
  }

  pub fn expire_listing(&self, term: Term) -> Result<Vec<SupervisorRecord>> {
    expire_listing(self.ledger, term)
  }

  // ── Roles ─────────────────────────────────────────────────────────────

  pub fn effective_roles(&self, username: &str, term: Term) -> Result<BTreeSet<Role>> {
    effective_roles_at(self.ledger, username, term)
  }

  /// Move a user from their current effective roles at `term` to `requested`.
  ///
  /// `teacher` is always kept. Removals run innermost first (main grouper,
  /// grouper, supervisor) and additions outermost first (supervisor, grouper,
  /// main grouper), so a leadership change always sees supervisor status
  /// holding.
  pub fn update_user_roles(
    &mut self,
    username: &str,
    term: Term,
    requested: &BTreeSet<Role>,
    group_name: Option<&str>,
  ) -> Result<RoleDelta> {
    self.active_user(username)?;

    let mut requested = requested.clone();
    requested.insert(Role::Teacher);

    for leader in [Role::Grouper, Role::MainGrouper] {
      if requested.contains(&leader) && !requested.contains(&Role::Supervisor) {
        return Err(Error::RequiresSupervisor(leader));
      }
    }

    let current = self.effective_roles(username, term)?;
    let delta = RoleDelta::between(&current, &requested);

    if delta.removes(Role::MainGrouper) {
      self.set_leader_flag(username, term, None, LeaderRole::MainGrouper, false)?;
    }
    if delta.removes(Role::Grouper) {
      self.set_leader_flag(username, term, None, LeaderRole::Grouper, false)?;
    }
    if delta.removes(Role::Supervisor) {
      self.retire_from(username, term)?;
    }

    for role in delta.removed.iter().filter(|r| r.is_static()) {
      self.ledger.revoke_role(username, *role)?;
    }
    for role in delta.added.iter().filter(|r| r.is_static()) {
      self.ledger.grant_role(username, *role)?;
    }

    if delta.adds(Role::Supervisor) {
      let mut req = PromoteRequest::new(username, term);
      req.group_name = group_name.map(str::to_owned);
      self.promote(&req)?;
    }
    if delta.adds(Role::Grouper) {
      self.appoint(username, term, group_name, LeaderRole::Grouper)?;
    }
    if delta.adds(Role::MainGrouper) {
      self.appoint(username, term, None, LeaderRole::MainGrouper)?;
    }

    if !delta.is_empty() {
      self.audit("update_user_roles", json!({
        "username": username,
        "term": term,
        "added": delta.added,
        "removed": delta.removed,
      }))?;
    }
    Ok(delta)
  }

  // ── Users ─────────────────────────────────────────────────────────────

  /// Create a user, grant `teacher` plus the requested static roles, and
  /// promote them when `supervisor` is requested.
  pub fn create_user(&mut self, new: &NewUser, term: Term) -> Result<User> {
    if self.ledger.username_taken(&new.username)? {
      return Err(Error::UsernameTaken(new.username.clone()));
    }
    for leader in [Role::Grouper, Role::MainGrouper] {
      if new.roles.contains(&leader) && !new.roles.contains(&Role::Supervisor) {
        return Err(Error::RequiresSupervisor(leader));
      }
    }

    self.ledger.insert_user(new)?;
    let static_roles = new.roles.iter().copied().filter(|r| r.is_static());
    for role in std::iter::once(Role::Teacher).chain(static_roles) {
      self.ledger.grant_role(&new.username, role)?;
    }

    if new.roles.contains(&Role::Supervisor) {
      self.promote(&PromoteRequest {
        username:        new.username.clone(),
        term,
        group_name:      new.group_name.clone(),
        is_grouper:      new.roles.contains(&Role::Grouper),
        is_main_grouper: new.roles.contains(&Role::MainGrouper),
      })?;
    }

    self.audit("create_user", json!({ "username": new.username, "roles": new.roles }))?;
    self.active_user(&new.username)
  }

  pub fn update_profile(&mut self, username: &str, patch: &ProfilePatch) -> Result<User> {
    self.active_user(username)?;
    self.ledger.update_profile(username, patch)?;
    self.audit("update_user", json!({ "username": username }))?;
    self.active_user(username)
  }

  /// Soft-delete a user, retiring their supervision from `term` on.
  pub fn delete_user(&mut self, username: &str, term: Term) -> Result<()> {
    self.active_user(username)?;
    self.retire_from(username, term)?;
    self.ledger.deactivate_user(username)?;
    self.audit("delete_user", json!({ "username": username, "term": term }))?;
    info!(%username, "user deactivated");
    Ok(())
  }

  pub fn change_password(&mut self, username: &str, password_hash: &str) -> Result<()> {
    self.active_user(username)?;
    self.ledger.set_password_hash(username, password_hash)?;
    self.audit("change_password", json!({ "username": username }))
  }

  // ── Groups ────────────────────────────────────────────────────────────

  pub fn create_group(&mut self, name: &str) -> Result<Group> {
    if self.ledger.group(name)?.is_some() {
      return Err(Error::GroupExists(name.to_owned()));
    }
    let group = Group::new(name);
    self.ledger.insert_group(&group)?;
    self.audit("create_group", json!({ "name": name }))?;
    Ok(group)
  }

  /// Rewrite every group's leader from the active grouper at `term`. Returns
  /// the groups that changed.
  pub fn reconcile_groups(&mut self, term: Term) -> Result<Vec<Group>> {
    let mut changed = Vec::new();

    for mut group in self.ledger.groups()? {
      let holder = self
        .ledger
        .supervisors(
          &SupervisorFilter::default()
            .at(term)
            .in_group(&group.name)
            .holding(LeaderRole::Grouper),
        )?
        .into_iter()
        .next()
        .map(|r| r.username)
        .unwrap_or_default();

      if group.leader_name != holder {
        self.ledger.set_group_leader(&group.name, &holder)?;
        group.leader_name = holder;
        changed.push(group);
      }
    }

    self.audit("reconcile_groups", json!({
      "term": term,
      "changed": changed.iter().map(|g| &g.name).collect::<Vec<_>>(),
    }))?;
    Ok(changed)
  }

  // ── Internals ─────────────────────────────────────────────────────────

  fn promote(&mut self, req: &PromoteRequest) -> Result<Vec<SupervisorRecord>> {
    let user = self.active_user(&req.username)?;
    if record_at(self.ledger, &req.username, req.term)?.is_some() {
      return Err(Error::AlreadySupervisor {
        username: req.username.clone(),
        term:     req.term,
      });
    }
    if let Some(group) = &req.group_name {
      self.require_group(group)?;
    }
    let grouper_of = match (req.is_grouper, req.group_name.as_deref()) {
      (true, Some(group)) => Some(group),
      (true, None) => return Err(Error::GrouperWithoutGroup),
      (false, _) => None,
    };

    if let Some(group) = grouper_of {
      self.vacate(LeaderRole::Grouper, req.term, Some(group), &req.username)?;
    }
    if req.is_main_grouper {
      self.vacate(LeaderRole::MainGrouper, req.term, None, &req.username)?;
    }

    self.ledger.set_guider(&req.username, true)?;

    let mut records = Vec::with_capacity(HORIZON as usize + 1);
    let mut released = BTreeSet::new();
    for term in req.term.horizon() {
      self.ledger.ensure_term(term)?;
      let record = match record_at(self.ledger, &req.username, term)? {
        // Left over from an assignment that started later; align it.
        Some(existing) => {
          if let Some(old) = existing.group_name.filter(|_| existing.is_grouper) {
            released.insert(old);
          }
          let patch = SupervisorPatch {
            group_name:      Some(req.group_name.clone()),
            is_grouper:      Some(req.is_grouper),
            is_main_grouper: Some(req.is_main_grouper),
          };
          self.ledger.update_supervisors(&SupervisorFilter::by_id(existing.id), &patch)?;
          self
            .ledger
            .supervisor(existing.id)?
            .ok_or(Error::SupervisorNotFound(existing.id))?
        }
        None => self.provision(
          &user,
          term,
          req.group_name.clone(),
          req.is_grouper,
          req.is_main_grouper,
        )?,
      };
      records.push(record);
    }

    for old in released.iter().filter(|g| Some(g.as_str()) != grouper_of) {
      self.release_group(old, &req.username)?;
    }
    if let Some(group) = grouper_of {
      self.ledger.set_group_leader(group, &req.username)?;
    }

    self.effects.push(Effect::message(
      USER_TOPIC,
      "add_supervisor",
      json!({ "usernames": [req.username], "term": req.term }),
    ));
    self.effects.push(Effect::notice(
      &req.username,
      "Supervisor appointment",
      format!("You are a supervisor from term {}.", req.term),
    ));
    info!(
      username = %req.username,
      term = %req.term,
      grouper = req.is_grouper,
      main_grouper = req.is_main_grouper,
      "promoted to supervisor"
    );
    Ok(records)
  }

  /// Insert a record and its lesson-record placeholder.
  fn provision(
    &mut self,
    user: &User,
    term: Term,
    group_name: Option<String>,
    is_grouper: bool,
    is_main_grouper: bool,
  ) -> Result<SupervisorRecord> {
    let record = self.ledger.insert_supervisor(&NewSupervisor {
      username: user.username.clone(),
      name: user.profile.name.clone(),
      term,
      group_name: group_name.clone(),
      is_grouper,
      is_main_grouper,
    })?;
    self.ledger.seed_lesson_record(&LessonSeed {
      username: user.username.clone(),
      name: user.profile.name.clone(),
      term,
      group_name,
    })?;
    Ok(record)
  }

  /// Retire every active record of `username` from `term` on and release the
  /// groups those records led. No precondition on the record at `term`.
  fn retire_from(&mut self, username: &str, term: Term) -> Result<usize> {
    let filter = SupervisorFilter::for_user(username).since(term);
    let led: BTreeSet<String> = self
      .ledger
      .supervisors(&filter.clone().holding(LeaderRole::Grouper))?
      .into_iter()
      .filter_map(|r| r.group_name)
      .collect();

    let retired = self.ledger.retire_supervisors(&filter)?;
    if retired == 0 {
      return Ok(0);
    }

    self.ledger.set_guider(username, false)?;
    for group in &led {
      self.release_group(group, username)?;
    }

    self.effects.push(Effect::message(
      USER_TOPIC,
      "delete_supervisor",
      json!({ "usernames": [username], "term": term }),
    ));
    self.effects.push(Effect::notice(
      username,
      "Supervisor appointment ended",
      format!("Your supervision ends from term {term}."),
    ));
    info!(%username, %term, retired, "supervisor retired");
    Ok(retired)
  }

  /// Strip a slot from every holder other than `except`, from `term` on.
  fn vacate(
    &mut self,
    role: LeaderRole,
    term: Term,
    group_name: Option<&str>,
    except: &str,
  ) -> Result<()> {
    let mut filter = SupervisorFilter::default().since(term).holding(role);
    if role == LeaderRole::Grouper {
      filter = filter.in_group(group_name.ok_or(Error::GrouperWithoutGroup)?);
    }

    // A holder may only hold the slot in later terms; start from the first.
    let mut holders: BTreeMap<String, Term> = BTreeMap::new();
    for r in self.ledger.supervisors(&filter)? {
      if r.username != except {
        holders
          .entry(r.username)
          .and_modify(|t| *t = (*t).min(r.term))
          .or_insert(r.term);
      }
    }

    for (holder, from) in holders {
      let group = if role == LeaderRole::Grouper { group_name } else { None };
      self.set_leader_flag(&holder, from, group, role, false)?;
      self.effects.push(Effect::notice(
        &holder,
        "Role change",
        format!("You are no longer the {} from term {from}.", Role::from(role).label()),
      ));
      debug!(%holder, %from, ?role, "slot vacated");
    }
    Ok(())
  }

  fn ensure_vacant(
    &self,
    role: LeaderRole,
    term: Term,
    group_name: Option<&str>,
    username: &str,
  ) -> Result<()> {
    let mut filter = SupervisorFilter::default().since(term).holding(role);
    if let Some(group) = group_name {
      filter = filter.in_group(group);
    }
    match self
      .ledger
      .supervisors(&filter)?
      .into_iter()
      .find(|r| r.username != username)
    {
      Some(other) => Err(Error::SlotOccupied {
        role:   role.into(),
        holder: other.username,
        term:   other.term,
      }),
      None => Ok(()),
    }
  }

  /// Clear a group's leader if it currently names `username`.
  fn release_group(&mut self, group: &str, username: &str) -> Result<()> {
    if let Some(g) = self.ledger.group(group)?
      && g.leader_name == username
    {
      self.ledger.set_group_leader(group, "")?;
    }
    Ok(())
  }

  fn active_user(&self, username: &str) -> Result<User> {
    self
      .ledger
      .user(username)?
      .ok_or_else(|| Error::UserNotFound(username.to_owned()))
  }

  fn require_record(&self, username: &str, term: Term) -> Result<SupervisorRecord> {
    record_at(self.ledger, username, term)?.ok_or_else(|| Error::NotSupervisor {
      username: username.to_owned(),
      term,
    })
  }

  fn require_group(&self, name: &str) -> Result<Group> {
    self
      .ledger
      .group(name)?
      .filter(|g| g.using)
      .ok_or_else(|| Error::GroupNotFound(name.to_owned()))
  }

  fn audit(&mut self, name: &str, detail: serde_json::Value) -> Result<()> {
    self.ledger.record_event(&Event::new(name, &self.actor, detail))
  }
}
