//! Runtime configuration, layered from `config.toml` and `OVERSEER_*`
//! environment variables.

use std::path::{Path, PathBuf};

use anyhow::Context as _;
use overseer_core::term::Term;
use serde::Deserialize;

/// Runtime server configuration.
#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
  pub host:                String,
  pub port:                u16,
  pub store_path:          PathBuf,
  /// Pins the default term. When absent it is derived from today's date.
  #[serde(default)]
  pub current_term:        Option<Term>,
  /// Webhook receiving user notices; notices are only logged when unset.
  #[serde(default)]
  pub notice_url:          Option<String>,
  /// Webhook receiving `topic/method` messages; only logged when unset.
  #[serde(default)]
  pub publish_url:         Option<String>,
  /// Admin account created on startup if no user by that name exists.
  #[serde(default)]
  pub admin_username:      Option<String>,
  #[serde(default)]
  pub admin_password_hash: Option<String>,
}

impl ServerConfig {
  /// Load from `path` (optional) overlaid with `OVERSEER_*` variables.
  pub fn load(path: &Path) -> anyhow::Result<Self> {
    let settings = config::Config::builder()
      .set_default("host", "127.0.0.1")?
      .set_default("port", 8080)?
      .set_default("store_path", "overseer.db")?
      .add_source(config::File::from(path).required(false))
      .add_source(config::Environment::with_prefix("OVERSEER"))
      .build()
      .context("failed to read config file")?;

    let mut cfg: Self = settings
      .try_deserialize()
      .context("failed to deserialise ServerConfig")?;
    cfg.store_path = expand_tilde(&cfg.store_path);
    Ok(cfg)
  }

  /// The bootstrap admin, when both halves are configured.
  pub fn admin_account(&self) -> Option<(&str, &str)> {
    self
      .admin_username
      .as_deref()
      .zip(self.admin_password_hash.as_deref())
  }
}

/// Expand a leading `~` to the user's home directory.
pub fn expand_tilde(path: &Path) -> PathBuf {
  let s = path.to_string_lossy();
  if let Some(rest) = s.strip_prefix("~/")
    && let Ok(home) = std::env::var("HOME")
  {
    return PathBuf::from(home).join(rest);
  }
  path.to_path_buf()
}
