//! [`SqliteLedger`]: the [`Ledger`] over one open SQLite transaction.

use chrono::Utc;
use rusqlite::{OptionalExtension as _, params, params_from_iter, types::Value};

use overseer_core::{
  Error, Result,
  event::Event,
  group::Group,
  ledger::Ledger,
  role::Role,
  supervisor::{
    LessonSeed, NewSupervisor, SupervisorFilter, SupervisorPatch,
    SupervisorRecord, TermRange,
  },
  term::Term,
  user::{NewUser, ProfilePatch, User, UserJoin, UserQuery},
};

use crate::encode::{
  RawEvent, RawSupervisor, SUPERVISOR_COLUMNS, Storage as _, USER_COLUMNS,
  decode_role, decode_term, encode_dt, encode_role, encode_term, user_row,
};

/// Borrows the connection of an open transaction. Dropping the transaction
/// without committing discards everything written through this ledger.
pub struct SqliteLedger<'c> {
  conn: &'c rusqlite::Connection,
}

impl<'c> SqliteLedger<'c> {
  pub fn new(conn: &'c rusqlite::Connection) -> Self { Self { conn } }

  fn query_supervisors(
    &self,
    filter: &SupervisorFilter,
  ) -> Result<Vec<SupervisorRecord>> {
    let (where_clause, args) = supervisor_where(filter);
    let sql = format!(
      "SELECT {SUPERVISOR_COLUMNS} FROM supervisors
       WHERE {where_clause}
       ORDER BY term, username"
    );

    let mut stmt = self.conn.prepare(&sql).storage()?;
    let raws = stmt
      .query_map(params_from_iter(args), RawSupervisor::from_row)
      .storage()?
      .collect::<rusqlite::Result<Vec<_>>>()
      .storage()?;

    raws.into_iter().map(RawSupervisor::into_record).collect()
  }

  fn require_user_touched(&self, username: &str, changed: usize) -> Result<()> {
    match changed {
      0 => Err(Error::UserNotFound(username.to_owned())),
      _ => Ok(()),
    }
  }
}

/// Escape `%`, `_` and the escape character itself so `text` matches
/// literally inside a `LIKE ... ESCAPE '\'` pattern.
fn escape_like(text: &str) -> String {
  let mut out = String::with_capacity(text.len());
  for c in text.chars() {
    if matches!(c, '%' | '_' | '\\') {
      out.push('\\');
    }
    out.push(c);
  }
  out
}

/// Build the `WHERE` clause for a filter over active records. Parameters are
/// positional, in the order returned.
fn supervisor_where(filter: &SupervisorFilter) -> (String, Vec<Value>) {
  let mut conds = vec!["active = 1"];
  let mut args: Vec<Value> = Vec::new();

  if let Some(id) = filter.id {
    conds.push("id = ?");
    args.push(Value::Integer(id));
  }
  if let Some(username) = &filter.username {
    conds.push("username = ?");
    args.push(Value::Text(username.clone()));
  }
  match filter.terms {
    TermRange::Any => {}
    TermRange::Exactly(term) => {
      conds.push("term = ?");
      args.push(Value::Text(encode_term(term)));
    }
    TermRange::From(term) => {
      conds.push("term >= ?");
      args.push(Value::Text(encode_term(term)));
    }
  }
  if let Some(group_name) = &filter.group_name {
    conds.push("group_name = ?");
    args.push(Value::Text(group_name.clone()));
  }
  if let Some(v) = filter.is_grouper {
    conds.push("is_grouper = ?");
    args.push(Value::Integer(v.into()));
  }
  if let Some(v) = filter.is_main_grouper {
    conds.push("is_main_grouper = ?");
    args.push(Value::Integer(v.into()));
  }

  (conds.join(" AND "), args)
}

impl Ledger for SqliteLedger<'_> {
  // ── Users ─────────────────────────────────────────────────────────────

  fn user(&self, username: &str) -> Result<Option<User>> {
    self
      .conn
      .query_row(
        &format!("SELECT {USER_COLUMNS} FROM users u WHERE u.username = ?1 AND u.active = 1"),
        params![username],
        user_row,
      )
      .optional()
      .storage()
  }

  fn username_taken(&self, username: &str) -> Result<bool> {
    Ok(
      self
        .conn
        .query_row(
          "SELECT 1 FROM users WHERE username = ?1",
          params![username],
          |_| Ok(true),
        )
        .optional()
        .storage()?
        .unwrap_or(false),
    )
  }

  fn users(&self, query: &UserQuery) -> Result<Vec<User>> {
    let mut sql = format!("SELECT DISTINCT {USER_COLUMNS} FROM users u");
    let mut args: Vec<Value> = Vec::new();

    match &query.join {
      None => {}
      Some(UserJoin::StaticRole(role)) => {
        sql.push_str(
          " JOIN user_roles r
              ON r.username = u.username AND r.active = 1 AND r.role = ?",
        );
        args.push(Value::Text(encode_role(*role).to_owned()));
      }
      Some(UserJoin::SupervisorAt { term, group_name }) => {
        sql.push_str(
          " JOIN supervisors s
              ON s.username = u.username AND s.active = 1 AND s.term = ?",
        );
        args.push(Value::Text(encode_term(*term)));
        if let Some(group_name) = group_name {
          sql.push_str(" AND s.group_name = ?");
          args.push(Value::Text(group_name.clone()));
        }
      }
    }

    sql.push_str(" WHERE u.active = 1");
    if let Some(text) = &query.text {
      let pattern = format!("%{}%", escape_like(text));
      sql.push_str(
        " AND (u.username LIKE ? ESCAPE '\\' OR u.name LIKE ? ESCAPE '\\')",
      );
      args.push(Value::Text(pattern.clone()));
      args.push(Value::Text(pattern));
    }

    // LIMIT -1 is unbounded in SQLite.
    sql.push_str(" ORDER BY u.username LIMIT ? OFFSET ?");
    args.push(Value::Integer(query.limit.map_or(-1, |l| l as i64)));
    args.push(Value::Integer(query.offset.unwrap_or(0) as i64));

    let mut stmt = self.conn.prepare(&sql).storage()?;
    stmt
      .query_map(params_from_iter(args), user_row)
      .storage()?
      .collect::<rusqlite::Result<Vec<_>>>()
      .storage()
  }

  fn insert_user(&mut self, new: &NewUser) -> Result<User> {
    let p = &new.profile;
    self
      .conn
      .execute(
        "INSERT INTO users (
           username, name, sex, email, phone, unit, status, prorank, skill,
           password_hash, created_at
         ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)",
        params![
          new.username,
          p.name,
          p.sex,
          p.email,
          p.phone,
          p.unit,
          p.status,
          p.prorank,
          p.skill,
          new.password_hash,
          encode_dt(Utc::now()),
        ],
      )
      .storage()?;

    Ok(User {
      username:  new.username.clone(),
      profile:   new.profile.clone(),
      is_guider: false,
      using:     true,
    })
  }

  fn update_profile(&mut self, username: &str, patch: &ProfilePatch) -> Result<()> {
    let changed = self
      .conn
      .execute(
        "UPDATE users SET
           name    = COALESCE(?2, name),
           sex     = COALESCE(?3, sex),
           email   = COALESCE(?4, email),
           phone   = COALESCE(?5, phone),
           unit    = COALESCE(?6, unit),
           status  = COALESCE(?7, status),
           prorank = COALESCE(?8, prorank),
           skill   = COALESCE(?9, skill)
         WHERE username = ?1 AND active = 1",
        params![
          username,
          patch.name,
          patch.sex,
          patch.email,
          patch.phone,
          patch.unit,
          patch.status,
          patch.prorank,
          patch.skill,
        ],
      )
      .storage()?;
    self.require_user_touched(username, changed)
  }

  fn set_guider(&mut self, username: &str, is_guider: bool) -> Result<()> {
    let changed = self
      .conn
      .execute(
        "UPDATE users SET is_guider = ?2 WHERE username = ?1 AND active = 1",
        params![username, is_guider],
      )
      .storage()?;
    self.require_user_touched(username, changed)
  }

  fn set_password_hash(&mut self, username: &str, hash: &str) -> Result<()> {
    let changed = self
      .conn
      .execute(
        "UPDATE users SET password_hash = ?2 WHERE username = ?1 AND active = 1",
        params![username, hash],
      )
      .storage()?;
    self.require_user_touched(username, changed)
  }

  fn password_hash(&self, username: &str) -> Result<Option<String>> {
    self
      .conn
      .query_row(
        "SELECT password_hash FROM users WHERE username = ?1 AND active = 1",
        params![username],
        |r| r.get(0),
      )
      .optional()
      .storage()
  }

  fn deactivate_user(&mut self, username: &str) -> Result<()> {
    let changed = self
      .conn
      .execute(
        "UPDATE users SET active = 0 WHERE username = ?1 AND active = 1",
        params![username],
      )
      .storage()?;
    self.require_user_touched(username, changed)
  }

  // ── Static roles ──────────────────────────────────────────────────────

  fn static_roles(&self, username: &str) -> Result<Vec<Role>> {
    let mut stmt = self
      .conn
      .prepare(
        "SELECT role FROM user_roles
         WHERE username = ?1 AND active = 1
         ORDER BY role",
      )
      .storage()?;
    let names = stmt
      .query_map(params![username], |r| r.get::<_, String>(0))
      .storage()?
      .collect::<rusqlite::Result<Vec<_>>>()
      .storage()?;

    names.iter().map(|s| decode_role(s)).collect()
  }

  fn grant_role(&mut self, username: &str, role: Role) -> Result<()> {
    self
      .conn
      .execute(
        "INSERT INTO user_roles (username, role, active) VALUES (?1, ?2, 1)
         ON CONFLICT (username, role) DO UPDATE SET active = 1",
        params![username, encode_role(role)],
      )
      .storage()?;
    Ok(())
  }

  fn revoke_role(&mut self, username: &str, role: Role) -> Result<()> {
    self
      .conn
      .execute(
        "UPDATE user_roles SET active = 0 WHERE username = ?1 AND role = ?2",
        params![username, encode_role(role)],
      )
      .storage()?;
    Ok(())
  }

  // ── Terms ─────────────────────────────────────────────────────────────

  fn ensure_term(&mut self, term: Term) -> Result<bool> {
    let inserted = self
      .conn
      .execute(
        "INSERT OR IGNORE INTO terms (name, created_at) VALUES (?1, ?2)",
        params![encode_term(term), encode_dt(Utc::now())],
      )
      .storage()?;
    Ok(inserted == 1)
  }

  fn terms(&self) -> Result<Vec<Term>> {
    let mut stmt = self
      .conn
      .prepare("SELECT name FROM terms ORDER BY name")
      .storage()?;
    let names = stmt
      .query_map([], |r| r.get::<_, String>(0))
      .storage()?
      .collect::<rusqlite::Result<Vec<_>>>()
      .storage()?;

    names.iter().map(|s| decode_term(s)).collect()
  }

  // ── Supervisor records ────────────────────────────────────────────────

  fn supervisor(&self, id: i64) -> Result<Option<SupervisorRecord>> {
    Ok(self.query_supervisors(&SupervisorFilter::by_id(id))?.into_iter().next())
  }

  fn supervisors(&self, filter: &SupervisorFilter) -> Result<Vec<SupervisorRecord>> {
    self.query_supervisors(filter)
  }

  fn insert_supervisor(&mut self, new: &NewSupervisor) -> Result<SupervisorRecord> {
    self
      .conn
      .execute(
        "INSERT INTO supervisors (
           username, name, term, group_name, is_grouper, is_main_grouper
         ) VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
        params![
          new.username,
          new.name,
          encode_term(new.term),
          new.group_name,
          new.is_grouper,
          new.is_main_grouper,
        ],
      )
      .storage()?;

    Ok(SupervisorRecord {
      id:              self.conn.last_insert_rowid(),
      username:        new.username.clone(),
      name:            new.name.clone(),
      term:            new.term,
      group_name:      new.group_name.clone(),
      is_grouper:      new.is_grouper,
      is_main_grouper: new.is_main_grouper,
      using:           true,
    })
  }

  fn update_supervisors(
    &mut self,
    filter: &SupervisorFilter,
    patch: &SupervisorPatch,
  ) -> Result<usize> {
    if patch.is_empty() {
      return Ok(0);
    }

    let mut sets = Vec::new();
    let mut args: Vec<Value> = Vec::new();
    if let Some(group_name) = &patch.group_name {
      sets.push("group_name = ?");
      args.push(group_name.clone().map_or(Value::Null, Value::Text));
    }
    if let Some(v) = patch.is_grouper {
      sets.push("is_grouper = ?");
      args.push(Value::Integer(v.into()));
    }
    if let Some(v) = patch.is_main_grouper {
      sets.push("is_main_grouper = ?");
      args.push(Value::Integer(v.into()));
    }

    let (where_clause, where_args) = supervisor_where(filter);
    args.extend(where_args);
    let sql = format!(
      "UPDATE supervisors SET {} WHERE {where_clause}",
      sets.join(", ")
    );

    self.conn.execute(&sql, params_from_iter(args)).storage()
  }

  fn retire_supervisors(&mut self, filter: &SupervisorFilter) -> Result<usize> {
    let (where_clause, args) = supervisor_where(filter);
    self
      .conn
      .execute(
        &format!("UPDATE supervisors SET active = 0 WHERE {where_clause}"),
        params_from_iter(args),
      )
      .storage()
  }

  fn seed_lesson_record(&mut self, seed: &LessonSeed) -> Result<()> {
    self
      .conn
      .execute(
        "INSERT INTO lesson_records (username, name, term, group_name, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5)",
        params![
          seed.username,
          seed.name,
          encode_term(seed.term),
          seed.group_name,
          encode_dt(Utc::now()),
        ],
      )
      .storage()?;
    Ok(())
  }

  // ── Groups ────────────────────────────────────────────────────────────

  fn group(&self, name: &str) -> Result<Option<Group>> {
    self
      .conn
      .query_row(
        "SELECT name, leader_name, active FROM supervision_groups WHERE name = ?1",
        params![name],
        |r| Ok(Group { name: r.get(0)?, leader_name: r.get(1)?, using: r.get(2)? }),
      )
      .optional()
      .storage()
  }

  fn groups(&self) -> Result<Vec<Group>> {
    let mut stmt = self
      .conn
      .prepare(
        "SELECT name, leader_name, active FROM supervision_groups
         WHERE active = 1
         ORDER BY name",
      )
      .storage()?;
    stmt
      .query_map([], |r| {
        Ok(Group { name: r.get(0)?, leader_name: r.get(1)?, using: r.get(2)? })
      })
      .storage()?
      .collect::<rusqlite::Result<Vec<_>>>()
      .storage()
  }

  fn insert_group(&mut self, group: &Group) -> Result<()> {
    self
      .conn
      .execute(
        "INSERT INTO supervision_groups (name, leader_name, active, created_at)
         VALUES (?1, ?2, ?3, ?4)",
        params![group.name, group.leader_name, group.using, encode_dt(Utc::now())],
      )
      .storage()?;
    Ok(())
  }

  fn set_group_leader(&mut self, name: &str, leader_name: &str) -> Result<()> {
    let changed = self
      .conn
      .execute(
        "UPDATE supervision_groups SET leader_name = ?2 WHERE name = ?1",
        params![name, leader_name],
      )
      .storage()?;
    match changed {
      0 => Err(Error::GroupNotFound(name.to_owned())),
      _ => Ok(()),
    }
  }

  // ── Audit ─────────────────────────────────────────────────────────────

  fn record_event(&mut self, event: &Event) -> Result<()> {
    self
      .conn
      .execute(
        "INSERT INTO events (event_id, name, actor, detail, recorded_at)
         VALUES (?1, ?2, ?3, ?4, ?5)",
        params![
          event.event_id.hyphenated().to_string(),
          event.name,
          event.actor,
          serde_json::to_string(&event.detail)?,
          encode_dt(event.recorded_at),
        ],
      )
      .storage()?;
    Ok(())
  }

  fn events(&self, limit: usize) -> Result<Vec<Event>> {
    let mut stmt = self
      .conn
      .prepare(
        "SELECT event_id, name, actor, detail, recorded_at FROM events
         ORDER BY rowid DESC
         LIMIT ?1",
      )
      .storage()?;
    let raws = stmt
      .query_map(params![limit as i64], RawEvent::from_row)
      .storage()?
      .collect::<rusqlite::Result<Vec<_>>>()
      .storage()?;

    raws.into_iter().map(RawEvent::into_event).collect()
  }
}
