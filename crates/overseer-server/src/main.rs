//! Overseer server binary.
//!
//! Reads `config.toml` (or the path specified with `--config`), opens an
//! in-process SQLite store, and serves the JSON API under `/api`.
//!
//! # Password hash generation
//!
//! To generate the argon2 PHC string for `admin_password_hash`:
//!
//! ```text
//! cargo run -p overseer-server -- --hash-password
//! ```

mod settings;
mod sinks;

use std::{path::PathBuf, sync::Arc};

use anyhow::Context as _;
use axum::Router;
use clap::Parser;
use overseer_core::{
  Classify, ErrorKind,
  effect::{LogSink, Notifier, Publisher},
  event::Actor,
  role::Role,
  service::Administration,
  store::AdminStore,
  term::{CalendarTerm, FixedTerm},
  user::{NewUser, Profile},
};
use overseer_store_sqlite::SqliteStore;
use tokio::net::TcpListener;
use tracing::level_filters::LevelFilter;
use tracing_subscriber::EnvFilter;

use crate::{settings::ServerConfig, sinks::WebhookSink};

#[derive(Parser)]
#[command(author, version, about = "Overseer supervision administration server")]
struct Cli {
  /// Path to the TOML configuration file.
  #[arg(short, long, default_value = "config.toml")]
  config: PathBuf,

  /// Print the argon2 hash for a password entered on stdin and exit.
  #[arg(long)]
  hash_password: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
  tracing_subscriber::fmt()
    .with_env_filter(
      EnvFilter::builder()
        .with_default_directive(LevelFilter::INFO.into())
        .from_env_lossy(),
    )
    .init();

  let cli = Cli::parse();

  if cli.hash_password {
    let password = read_password()?;
    let hash = overseer_api::hash_password(&password)
      .map_err(|e| anyhow::anyhow!("argon2 error: {e}"))?;
    println!("{hash}");
    return Ok(());
  }

  let cfg = ServerConfig::load(&cli.config)?;

  let store = SqliteStore::open(&cfg.store_path)
    .await
    .with_context(|| format!("failed to open store at {:?}", cfg.store_path))?;

  let admin = administration(store, &cfg)?;
  bootstrap_admin(&admin, cfg.admin_account()).await?;
  tracing::info!(term = %admin.current_term(), "current term");

  let app = Router::new().nest("/api", overseer_api::api_router(admin));
  let address = format!("{}:{}", cfg.host, cfg.port);

  tracing::info!("Listening on http://{address}");
  let listener = TcpListener::bind(&address)
    .await
    .with_context(|| format!("failed to bind {address}"))?;

  axum::serve(listener, app).await.context("server error")?;

  Ok(())
}

/// Wire the store to the term provider and the configured sinks.
fn administration(
  store: SqliteStore,
  cfg: &ServerConfig,
) -> anyhow::Result<Administration<SqliteStore>> {
  let notifier: Arc<dyn Notifier> = match &cfg.notice_url {
    Some(url) => Arc::new(WebhookSink::new(url)?),
    None => Arc::new(LogSink),
  };
  let publisher: Arc<dyn Publisher> = match &cfg.publish_url {
    Some(url) => Arc::new(WebhookSink::new(url)?),
    None => Arc::new(LogSink),
  };

  let admin = match cfg.current_term {
    Some(term) => Administration::new(store, FixedTerm(term)),
    None => Administration::new(store, CalendarTerm),
  };
  Ok(admin.with_notifier(notifier).with_publisher(publisher))
}

/// Create the configured admin account on first start.
///
/// A soft-deleted account keeps its username reserved; it is left alone with
/// a warning rather than failing startup.
async fn bootstrap_admin<S: AdminStore + 'static>(
  admin: &Administration<S>,
  account: Option<(&str, &str)>,
) -> anyhow::Result<()> {
  let Some((username, password_hash)) = account else {
    return Ok(());
  };
  if admin.get_user(username, None).await?.is_some() {
    return Ok(());
  }

  let new = NewUser {
    username:      username.to_owned(),
    profile:       Profile { name: username.to_owned(), ..Profile::default() },
    password_hash: password_hash.to_owned(),
    roles:         [Role::Admin].into(),
    group_name:    None,
  };
  match admin.create_user(&Actor::system(), new, None).await {
    Ok(_) => {
      tracing::info!(%username, "created admin account");
      Ok(())
    }
    Err(e) if e.kind() == ErrorKind::Conflict => {
      tracing::warn!(
        %username,
        "admin username belongs to a deleted account; not bootstrapping"
      );
      Ok(())
    }
    Err(e) => Err(anyhow::Error::new(e))
      .with_context(|| format!("failed to create admin account {username}")),
  }
}

/// Read a password from stdin.
fn read_password() -> anyhow::Result<String> {
  use std::io::{self, BufRead, Write};
  print!("Password: ");
  io::stdout().flush().ok();
  let mut line = String::new();
  io::stdin().lock().read_line(&mut line)?;
  Ok(line.trim_end_matches(['\n', '\r']).to_string())
}

#[cfg(test)]
mod tests {
  use overseer_core::term::Term;

  use super::*;

  async fn admin() -> Administration<SqliteStore> {
    let store = SqliteStore::open_in_memory().await.unwrap();
    let term: Term = "2023-2024-1".parse().unwrap();
    Administration::new(store, FixedTerm(term))
  }

  #[tokio::test]
  async fn bootstrap_creates_the_admin_once() {
    let admin = admin().await;
    let account = Some(("root", "$argon2id$x"));

    bootstrap_admin(&admin, account).await.unwrap();
    bootstrap_admin(&admin, account).await.unwrap();

    let view = admin.get_user("root", None).await.unwrap().unwrap();
    assert!(view.roles.contains(&Role::Admin));
  }

  #[tokio::test]
  async fn bootstrap_skips_a_deleted_admin() {
    let admin = admin().await;
    let account = Some(("root", "$argon2id$x"));
    bootstrap_admin(&admin, account).await.unwrap();
    admin.delete_user(&Actor::system(), "root", None).await.unwrap();

    bootstrap_admin(&admin, account).await.unwrap();

    assert!(admin.get_user("root", None).await.unwrap().is_none());
  }

  #[tokio::test]
  async fn bootstrap_without_an_account_is_a_no_op() {
    let admin = admin().await;
    bootstrap_admin(&admin, None).await.unwrap();
    assert!(admin.list_events(10).await.unwrap().is_empty());
  }
}
