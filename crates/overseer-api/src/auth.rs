//! HTTP Basic-auth extractor backed by the users' stored argon2 hashes.

use std::collections::BTreeSet;

use argon2::{
  Argon2, PasswordHash, PasswordHasher, PasswordVerifier,
  password_hash::SaltString,
};
use axum::{
  extract::FromRequestParts,
  http::{HeaderMap, header, request::Parts},
};
use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as B64;
use overseer_core::{event::Actor, role::Role, service::Administration, store::AdminStore};
use rand_core::OsRng;

use crate::error::ApiError;

/// Hash `password` into an argon2 PHC string suitable for storage.
pub fn hash_password(password: &str) -> Result<String, argon2::password_hash::Error> {
  let salt = SaltString::generate(&mut OsRng);
  Ok(Argon2::default().hash_password(password.as_bytes(), &salt)?.to_string())
}

/// Split a `Basic` authorization header into `(username, password)`.
pub fn basic_credentials(headers: &HeaderMap) -> Result<(String, String), ApiError> {
  let header_val = headers
    .get(header::AUTHORIZATION)
    .and_then(|v| v.to_str().ok())
    .ok_or(ApiError::Unauthorized)?;

  let encoded = header_val.strip_prefix("Basic ").ok_or(ApiError::Unauthorized)?;
  let decoded = B64.decode(encoded).map_err(|_| ApiError::Unauthorized)?;
  let creds = String::from_utf8(decoded).map_err(|_| ApiError::Unauthorized)?;

  let (username, password) = creds.split_once(':').ok_or(ApiError::Unauthorized)?;
  Ok((username.to_owned(), password.to_owned()))
}

fn verify(password: &str, hash: &str) -> Result<(), ApiError> {
  let parsed = PasswordHash::new(hash).map_err(|_| ApiError::Unauthorized)?;
  Argon2::default()
    .verify_password(password.as_bytes(), &parsed)
    .map_err(|_| ApiError::Unauthorized)
}

/// The authenticated caller and their effective roles in the current term.
#[derive(Debug, Clone)]
pub struct Authenticated {
  pub actor: Actor,
  pub roles: BTreeSet<Role>,
}

impl Authenticated {
  pub fn is_admin(&self) -> bool { self.roles.contains(&Role::Admin) }

  /// Gate for every mutating endpoint.
  pub fn require_admin(&self) -> Result<&Actor, ApiError> {
    if self.is_admin() {
      Ok(&self.actor)
    } else {
      Err(ApiError::Forbidden(format!("{} is not an admin", self.actor)))
    }
  }

  /// Admins may act on anyone; other users only on themselves.
  pub fn require_self_or_admin(&self, username: &str) -> Result<&Actor, ApiError> {
    if self.actor.username() == username {
      Ok(&self.actor)
    } else {
      self.require_admin()
    }
  }
}

impl<S> FromRequestParts<Administration<S>> for Authenticated
where
  S: AdminStore + 'static,
{
  type Rejection = ApiError;

  async fn from_request_parts(
    parts: &mut Parts,
    admin: &Administration<S>,
  ) -> Result<Self, Self::Rejection> {
    let (username, password) = basic_credentials(&parts.headers)?;

    // Deleted and unknown users have no hash.
    let hash = admin
      .password_hash(&username)
      .await
      .map_err(ApiError::store)?
      .ok_or(ApiError::Unauthorized)?;
    verify(&password, &hash)?;

    let view = admin
      .get_user(&username, None)
      .await
      .map_err(ApiError::store)?
      .ok_or(ApiError::Unauthorized)?;

    tracing::debug!(%username, "authenticated");
    Ok(Self { actor: Actor::new(username), roles: view.roles })
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use axum::http::HeaderValue;

  fn basic(user: &str, pass: &str) -> HeaderMap {
    let mut headers = HeaderMap::new();
    let value = format!("Basic {}", B64.encode(format!("{user}:{pass}")));
    headers.insert(header::AUTHORIZATION, HeaderValue::from_str(&value).unwrap());
    headers
  }

  #[test]
  fn hashes_verify_against_their_password() {
    let hash = hash_password("secret").unwrap();
    assert!(hash.starts_with("$argon2"));
    assert!(verify("secret", &hash).is_ok());
    assert!(matches!(verify("wrong", &hash), Err(ApiError::Unauthorized)));
  }

  #[test]
  fn password_may_contain_colons() {
    let (user, pass) = basic_credentials(&basic("alice", "a:b:c")).unwrap();
    assert_eq!(user, "alice");
    assert_eq!(pass, "a:b:c");
  }

  #[test]
  fn malformed_headers_are_unauthorized() {
    assert!(matches!(
      basic_credentials(&HeaderMap::new()),
      Err(ApiError::Unauthorized)
    ));

    let mut headers = HeaderMap::new();
    headers.insert(header::AUTHORIZATION, HeaderValue::from_static("Basic !!!"));
    assert!(matches!(basic_credentials(&headers), Err(ApiError::Unauthorized)));

    headers.insert(header::AUTHORIZATION, HeaderValue::from_static("Bearer abc"));
    assert!(matches!(basic_credentials(&headers), Err(ApiError::Unauthorized)));
  }

  #[test]
  fn only_admins_pass_the_admin_gate() {
    let teacher = Authenticated {
      actor: Actor::new("alice"),
      roles: BTreeSet::from([Role::Teacher]),
    };
    assert!(matches!(teacher.require_admin(), Err(ApiError::Forbidden(_))));
    assert!(teacher.require_self_or_admin("alice").is_ok());
    assert!(teacher.require_self_or_admin("bob").is_err());

    let admin = Authenticated {
      actor: Actor::new("root"),
      roles: BTreeSet::from([Role::Teacher, Role::Admin]),
    };
    assert_eq!(admin.require_admin().unwrap().username(), "root");
  }
}
