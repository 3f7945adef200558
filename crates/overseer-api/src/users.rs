//! Handlers for `/users` endpoints.
//!
//! | Method   | Path | Notes |
//! |----------|------|-------|
//! | `GET`    | `/users` | `?q=&role=&group=&term=&limit=&offset=` |
//! | `POST`   | `/users` | Admin. Body: profile fields plus `username`, `password`, `roles` |
//! | `GET`    | `/users/{username}` | `?term=`; 404 if not found |
//! | `PATCH`  | `/users/{username}` | Admin or self. Body: any profile fields |
//! | `DELETE` | `/users/{username}` | Admin. `?term=` |
//! | `PUT`    | `/users/{username}/roles` | Admin. Body: `{"roles":[..],"group_name":..}` |
//! | `PUT`    | `/users/{username}/password` | Admin or self. Body: `{"password":".."}` |

use std::collections::BTreeSet;

use axum::{
  Json,
  extract::{Path, Query, State},
  http::StatusCode,
  response::IntoResponse,
};
use overseer_core::{
  role::{Role, RoleDelta},
  service::Administration,
  store::AdminStore,
  term::Term,
  user::{NewUser, Profile, ProfilePatch, User, UserJoin, UserQuery, UserView},
};
use serde::Deserialize;

use crate::{
  auth::{Authenticated, hash_password},
  error::ApiError,
};

/// Optional `?term=` for endpoints that default to the current term.
#[derive(Debug, Default, Deserialize)]
pub struct TermParam {
  pub term: Option<Term>,
}

fn hashed(password: &str) -> Result<String, ApiError> {
  if password.is_empty() {
    return Err(ApiError::BadRequest("password must not be empty".into()));
  }
  hash_password(password).map_err(|e| ApiError::BadRequest(e.to_string()))
}

// ─── List ─────────────────────────────────────────────────────────────────────

#[derive(Debug, Default, Deserialize)]
pub struct ListParams {
  pub q:      Option<String>,
  pub role:   Option<Role>,
  pub group:  Option<String>,
  pub term:   Option<Term>,
  pub limit:  Option<usize>,
  pub offset: Option<usize>,
}

impl ListParams {
  fn into_query(self, current: Term) -> Result<UserQuery, ApiError> {
    let join = match self.role {
      None if self.group.is_some() => {
        Some(UserJoin::SupervisorAt {
          term:       self.term.unwrap_or(current),
          group_name: self.group,
        })
      }
      None => None,
      Some(role) if role.is_static() => Some(UserJoin::StaticRole(role)),
      Some(Role::Supervisor) => Some(UserJoin::SupervisorAt {
        term:       self.term.unwrap_or(current),
        group_name: self.group,
      }),
      Some(role) => {
        return Err(ApiError::BadRequest(format!(
          "cannot list users by {role}; filter /supervisors instead"
        )));
      }
    };
    Ok(UserQuery { text: self.q, join, limit: self.limit, offset: self.offset })
  }
}

/// `GET /users`
pub async fn list<S: AdminStore + 'static>(
  State(admin): State<Administration<S>>,
  _auth: Authenticated,
  Query(params): Query<ListParams>,
) -> Result<Json<Vec<UserView>>, ApiError> {
  let term = params.term;
  let query = params.into_query(admin.current_term())?;
  let users = admin.list_users(query, term).await.map_err(ApiError::store)?;
  Ok(Json(users))
}

// ─── Create ───────────────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
pub struct CreateBody {
  pub username:   String,
  pub password:   String,
  #[serde(flatten)]
  pub profile:    Profile,
  #[serde(default)]
  pub roles:      BTreeSet<Role>,
  #[serde(default)]
  pub group_name: Option<String>,
  #[serde(default)]
  pub term:       Option<Term>,
}

/// `POST /users`
pub async fn create<S: AdminStore + 'static>(
  State(admin): State<Administration<S>>,
  auth: Authenticated,
  Json(body): Json<CreateBody>,
) -> Result<impl IntoResponse, ApiError> {
  let actor = auth.require_admin()?;
  if body.username.trim().is_empty() {
    return Err(ApiError::BadRequest("username must not be empty".into()));
  }

  let new = NewUser {
    username:      body.username,
    profile:       body.profile,
    password_hash: hashed(&body.password)?,
    roles:         body.roles,
    group_name:    body.group_name,
  };
  let user = admin
    .create_user(actor, new, body.term)
    .await
    .map_err(ApiError::store)?;
  Ok((StatusCode::CREATED, Json(user)))
}

// ─── Get one ──────────────────────────────────────────────────────────────────

/// `GET /users/{username}`
pub async fn get_one<S: AdminStore + 'static>(
  State(admin): State<Administration<S>>,
  _auth: Authenticated,
  Path(username): Path<String>,
  Query(params): Query<TermParam>,
) -> Result<Json<UserView>, ApiError> {
  admin
    .get_user(&username, params.term)
    .await
    .map_err(ApiError::store)?
    .filter(|view| view.user.using)
    .map(Json)
    .ok_or_else(|| ApiError::NotFound(format!("user {username}")))
}

// ─── Update / delete ──────────────────────────────────────────────────────────

/// `PATCH /users/{username}`
pub async fn update<S: AdminStore + 'static>(
  State(admin): State<Administration<S>>,
  auth: Authenticated,
  Path(username): Path<String>,
  Json(patch): Json<ProfilePatch>,
) -> Result<Json<User>, ApiError> {
  let actor = auth.require_self_or_admin(&username)?;
  let user = admin
    .update_profile(actor, &username, patch)
    .await
    .map_err(ApiError::store)?;
  Ok(Json(user))
}

/// `DELETE /users/{username}`
pub async fn delete<S: AdminStore + 'static>(
  State(admin): State<Administration<S>>,
  auth: Authenticated,
  Path(username): Path<String>,
  Query(params): Query<TermParam>,
) -> Result<StatusCode, ApiError> {
  let actor = auth.require_admin()?;
  if actor.username() == username {
    return Err(ApiError::BadRequest("cannot delete yourself".into()));
  }
  admin
    .delete_user(actor, &username, params.term)
    .await
    .map_err(ApiError::store)?;
  Ok(StatusCode::NO_CONTENT)
}

// ─── Roles ────────────────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
pub struct RolesBody {
  pub roles:      BTreeSet<Role>,
  #[serde(default)]
  pub group_name: Option<String>,
  #[serde(default)]
  pub term:       Option<Term>,
}

/// `PUT /users/{username}/roles`: replaces the user's role set for a term and
/// returns what changed.
pub async fn set_roles<S: AdminStore + 'static>(
  State(admin): State<Administration<S>>,
  auth: Authenticated,
  Path(username): Path<String>,
  Json(body): Json<RolesBody>,
) -> Result<Json<RoleDelta>, ApiError> {
  let actor = auth.require_admin()?;
  let delta = admin
    .update_user_roles(actor, &username, body.term, body.roles, body.group_name)
    .await
    .map_err(ApiError::store)?;
  Ok(Json(delta))
}

// ─── Password ─────────────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
pub struct PasswordBody {
  pub password: String,
}

/// `PUT /users/{username}/password`
pub async fn set_password<S: AdminStore + 'static>(
  State(admin): State<Administration<S>>,
  auth: Authenticated,
  Path(username): Path<String>,
  Json(body): Json<PasswordBody>,
) -> Result<StatusCode, ApiError> {
  let actor = auth.require_self_or_admin(&username)?;
  admin
    .change_password(actor, &username, hashed(&body.password)?)
    .await
    .map_err(ApiError::store)?;
  Ok(StatusCode::NO_CONTENT)
}
