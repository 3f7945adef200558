//! Handlers for `/groups` endpoints.
//!
//! | Method | Path | Notes |
//! |--------|------|-------|
//! | `GET`  | `/groups` | Each group with its current leader |
//! | `POST` | `/groups` | Admin. Body: `{"name":"G1"}` |
//! | `POST` | `/groups/reconcile` | Admin. Body: `{"term":..}` (optional) |

use axum::{Json, extract::State, http::StatusCode, response::IntoResponse};
use overseer_core::{
  group::{Group, GroupView},
  service::Administration,
  store::AdminStore,
  term::Term,
};
use serde::Deserialize;

use crate::{auth::Authenticated, error::ApiError};

/// `GET /groups`
pub async fn list<S: AdminStore + 'static>(
  State(admin): State<Administration<S>>,
  _auth: Authenticated,
) -> Result<Json<Vec<GroupView>>, ApiError> {
  let groups = admin.list_groups().await.map_err(ApiError::store)?;
  Ok(Json(groups))
}

#[derive(Debug, Deserialize)]
pub struct CreateBody {
  pub name: String,
}

/// `POST /groups`
pub async fn create<S: AdminStore + 'static>(
  State(admin): State<Administration<S>>,
  auth: Authenticated,
  Json(body): Json<CreateBody>,
) -> Result<impl IntoResponse, ApiError> {
  let actor = auth.require_admin()?;
  let name = body.name.trim();
  if name.is_empty() {
    return Err(ApiError::BadRequest("group name must not be empty".into()));
  }
  let group = admin.create_group(actor, name).await.map_err(ApiError::store)?;
  Ok((StatusCode::CREATED, Json(group)))
}

#[derive(Debug, Default, Deserialize)]
pub struct ReconcileBody {
  #[serde(default)]
  pub term: Option<Term>,
}

/// `POST /groups/reconcile`: responds with the groups whose leader changed.
pub async fn reconcile<S: AdminStore + 'static>(
  State(admin): State<Administration<S>>,
  auth: Authenticated,
  Json(body): Json<ReconcileBody>,
) -> Result<Json<Vec<Group>>, ApiError> {
  let actor = auth.require_admin()?;
  let changed = admin
    .reconcile_groups(actor, body.term)
    .await
    .map_err(ApiError::store)?;
  Ok(Json(changed))
}
