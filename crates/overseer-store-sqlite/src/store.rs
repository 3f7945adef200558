//! [`SqliteStore`]: the SQLite implementation of [`AdminStore`].

use std::{collections::BTreeSet, path::Path, time::Duration};

use rusqlite::TransactionBehavior;
use tracing::debug;

use overseer_core::{
  effect::Committed,
  engine::{self, Engine},
  event::{Actor, Event},
  group::{Group, GroupView},
  ledger::Ledger,
  role::{Role, RoleDelta},
  store::AdminStore,
  supervisor::{PromoteRequest, SupervisorFilter, SupervisorPatch, SupervisorRecord},
  term::Term,
  user::{NewUser, ProfilePatch, User, UserQuery, UserView},
};

use crate::{Result, ledger::SqliteLedger, schema::SCHEMA};

/// How long a writer waits on a lock held by another connection.
const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

// ─── Store ───────────────────────────────────────────────────────────────────

/// An Overseer store backed by a single SQLite file.
///
/// Cloning is cheap; the inner connection is reference-counted.
#[derive(Clone)]
pub struct SqliteStore {
  pub(crate) conn: tokio_rusqlite::Connection,
}

impl SqliteStore {
  /// Open (or create) a store at `path` and run schema initialisation.
  pub async fn open(path: impl AsRef<Path>) -> Result<Self> {
    let conn = tokio_rusqlite::Connection::open(path).await?;
    let store = Self { conn };
    store.init_schema().await?;
    Ok(store)
  }

  /// Open an in-memory store, useful for testing.
  pub async fn open_in_memory() -> Result<Self> {
    let conn = tokio_rusqlite::Connection::open_in_memory().await?;
    let store = Self { conn };
    store.init_schema().await?;
    Ok(store)
  }

  async fn init_schema(&self) -> Result<()> {
    self
      .conn
      .call(|conn| {
        conn.busy_timeout(BUSY_TIMEOUT)?;
        conn.execute_batch(SCHEMA)?;
        Ok(())
      })
      .await?;
    Ok(())
  }

  /// Run one engine operation inside a `BEGIN IMMEDIATE` transaction.
  ///
  /// The transaction commits only when `op` succeeds; on error it is dropped
  /// and rolls back, and the queued effects are discarded with it.
  async fn write<T, F>(&self, actor: Actor, op: F) -> Result<Committed<T>>
  where
    T: Send + 'static,
    F: FnOnce(&mut Engine<'_, SqliteLedger<'_>>) -> overseer_core::Result<T>
      + Send
      + 'static,
  {
    let outcome = self
      .conn
      .call(move |conn| {
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        let mut ledger = SqliteLedger::new(&tx);
        let mut engine = Engine::new(&mut ledger, &actor);

        let outcome = match op(&mut engine) {
          Ok(value) => Ok(Committed { value, effects: engine.into_effects() }),
          Err(e) => Err(e),
        };
        if outcome.is_ok() {
          tx.commit()?;
        }
        Ok(outcome)
      })
      .await?;

    match &outcome {
      Ok(committed) => debug!(effects = committed.effects.len(), "transaction committed"),
      Err(e) => debug!(error = %e, "transaction rolled back"),
    }
    Ok(outcome?)
  }

  /// Run a read against a consistent snapshot.
  async fn read<T, F>(&self, op: F) -> Result<T>
  where
    T: Send + 'static,
    F: FnOnce(&SqliteLedger<'_>) -> overseer_core::Result<T> + Send + 'static,
  {
    let outcome = self
      .conn
      .call(move |conn| {
        let tx = conn.transaction()?;
        Ok(op(&SqliteLedger::new(&tx)))
      })
      .await?;
    Ok(outcome?)
  }
}

// ─── AdminStore impl ─────────────────────────────────────────────────────────

impl AdminStore for SqliteStore {
  type Error = crate::Error;

  // ── Users ─────────────────────────────────────────────────────────────

  async fn create_user(
    &self,
    actor: Actor,
    new: NewUser,
    term: Term,
  ) -> Result<Committed<User>> {
    self.write(actor, move |e| e.create_user(&new, term)).await
  }

  async fn update_profile(
    &self,
    actor: Actor,
    username: String,
    patch: ProfilePatch,
  ) -> Result<Committed<User>> {
    self.write(actor, move |e| e.update_profile(&username, &patch)).await
  }

  async fn delete_user(
    &self,
    actor: Actor,
    username: String,
    term: Term,
  ) -> Result<Committed<()>> {
    self.write(actor, move |e| e.delete_user(&username, term)).await
  }

  async fn change_password(
    &self,
    actor: Actor,
    username: String,
    password_hash: String,
  ) -> Result<Committed<()>> {
    self
      .write(actor, move |e| e.change_password(&username, &password_hash))
      .await
  }

  async fn password_hash(&self, username: String) -> Result<Option<String>> {
    self.read(move |l| l.password_hash(&username)).await
  }

  async fn get_user(&self, username: String, term: Term) -> Result<Option<UserView>> {
    self
      .read(move |l| {
        l.user(&username)?
          .map(|u| engine::user_view(l, u, term))
          .transpose()
      })
      .await
  }

  async fn list_users(&self, query: UserQuery, term: Term) -> Result<Vec<UserView>> {
    self
      .read(move |l| {
        l.users(&query)?
          .into_iter()
          .map(|u| engine::user_view(l, u, term))
          .collect()
      })
      .await
  }

  // ── Roles ─────────────────────────────────────────────────────────────

  async fn update_user_roles(
    &self,
    actor: Actor,
    username: String,
    term: Term,
    roles: BTreeSet<Role>,
    group_name: Option<String>,
  ) -> Result<Committed<RoleDelta>> {
    self
      .write(actor, move |e| {
        e.update_user_roles(&username, term, &roles, group_name.as_deref())
      })
      .await
  }

  // ── Supervisors ───────────────────────────────────────────────────────

  async fn promote_to_supervisor(
    &self,
    actor: Actor,
    req: PromoteRequest,
  ) -> Result<Committed<Vec<SupervisorRecord>>> {
    self.write(actor, move |e| e.promote_to_supervisor(&req)).await
  }

  async fn update_supervisor(
    &self,
    actor: Actor,
    id: i64,
    patch: SupervisorPatch,
  ) -> Result<Committed<SupervisorRecord>> {
    self.write(actor, move |e| e.update_supervisor(id, &patch)).await
  }

  async fn retire_supervisor(
    &self,
    actor: Actor,
    username: String,
    term: Term,
  ) -> Result<Committed<usize>> {
    self.write(actor, move |e| e.retire_supervisor(&username, term)).await
  }

  async fn batch_renew(
    &self,
    actor: Actor,
    usernames: Vec<String>,
    term: Term,
  ) -> Result<Committed<usize>> {
    self.write(actor, move |e| e.batch_renew(&usernames, term)).await
  }

  async fn expire_listing(&self, term: Term) -> Result<Vec<SupervisorRecord>> {
    self.read(move |l| engine::expire_listing(l, term)).await
  }

  async fn get_supervisor(&self, id: i64) -> Result<Option<SupervisorRecord>> {
    self.read(move |l| l.supervisor(id)).await
  }

  async fn list_supervisors(
    &self,
    filter: SupervisorFilter,
  ) -> Result<Vec<SupervisorRecord>> {
    self.read(move |l| l.supervisors(&filter)).await
  }

  async fn supervisor_count(&self, term: Term) -> Result<usize> {
    self
      .read(move |l| Ok(l.supervisors(&SupervisorFilter::default().at(term))?.len()))
      .await
  }

  // ── Groups ────────────────────────────────────────────────────────────

  async fn create_group(&self, actor: Actor, name: String) -> Result<Committed<Group>> {
    self.write(actor, move |e| e.create_group(&name)).await
  }

  async fn list_groups(&self) -> Result<Vec<GroupView>> {
    self.read(|l| engine::group_views(l)).await
  }

  async fn reconcile_groups(
    &self,
    actor: Actor,
    term: Term,
  ) -> Result<Committed<Vec<Group>>> {
    self.write(actor, move |e| e.reconcile_groups(term)).await
  }

  // ── Terms and audit ───────────────────────────────────────────────────

  async fn list_terms(&self) -> Result<Vec<Term>> { self.read(|l| l.terms()).await }

  async fn list_events(&self, limit: usize) -> Result<Vec<Event>> {
    self.read(move |l| l.events(limit)).await
  }
}
