//! Handlers for `/supervisors` endpoints.
//!
//! | Method  | Path | Notes |
//! |---------|------|-------|
//! | `GET`   | `/supervisors` | `?username=&term=&since=&group=&grouper=&main_grouper=` |
//! | `POST`  | `/supervisors` | Admin. Body: `{"username":..,"term":..,"group_name":..,"is_grouper":..}`; `term` defaults to the current one |
//! | `GET`   | `/supervisors/{id}` | 404 if not found or retired |
//! | `PATCH` | `/supervisors/{id}` | Admin. Body: any of `group_name`, `is_grouper`, `is_main_grouper` |
//! | `GET`   | `/supervisors/expiring` | `?term=` |
//! | `GET`   | `/supervisors/count` | `?term=` |
//! | `POST`  | `/supervisors/renew` | Admin. Body: `{"usernames":[..],"term":..}` |
//! | `POST`  | `/supervisors/retire` | Admin. Body: `{"username":..,"term":..}` |

use axum::{
  Json,
  extract::{Path, Query, State},
  http::StatusCode,
  response::IntoResponse,
};
use overseer_core::{
  service::Administration,
  store::AdminStore,
  supervisor::{PromoteRequest, SupervisorFilter, SupervisorPatch, SupervisorRecord, TermRange},
  term::Term,
};
use serde::{Deserialize, Serialize};

use crate::{auth::Authenticated, error::ApiError, users::TermParam};

// ─── List ─────────────────────────────────────────────────────────────────────

#[derive(Debug, Default, Deserialize)]
pub struct ListParams {
  pub username:     Option<String>,
  /// Exactly this term.
  pub term:         Option<Term>,
  /// This term and every later one. Ignored when `term` is given.
  pub since:        Option<Term>,
  pub group:        Option<String>,
  pub grouper:      Option<bool>,
  pub main_grouper: Option<bool>,
}

impl From<ListParams> for SupervisorFilter {
  fn from(p: ListParams) -> Self {
    let terms = match (p.term, p.since) {
      (Some(t), _) => TermRange::Exactly(t),
      (None, Some(t)) => TermRange::From(t),
      (None, None) => TermRange::Any,
    };
    SupervisorFilter {
      id: None,
      username: p.username,
      terms,
      group_name: p.group,
      is_grouper: p.grouper,
      is_main_grouper: p.main_grouper,
    }
  }
}

/// `GET /supervisors`
pub async fn list<S: AdminStore + 'static>(
  State(admin): State<Administration<S>>,
  _auth: Authenticated,
  Query(params): Query<ListParams>,
) -> Result<Json<Vec<SupervisorRecord>>, ApiError> {
  let records = admin
    .list_supervisors(params.into())
    .await
    .map_err(ApiError::store)?;
  Ok(Json(records))
}

// ─── Promote ──────────────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
pub struct PromoteBody {
  pub username:        String,
  #[serde(default)]
  pub term:            Option<Term>,
  #[serde(default)]
  pub group_name:      Option<String>,
  #[serde(default)]
  pub is_grouper:      bool,
  #[serde(default)]
  pub is_main_grouper: bool,
}

/// `POST /supervisors`: responds with every provisioned record.
pub async fn promote<S: AdminStore + 'static>(
  State(admin): State<Administration<S>>,
  auth: Authenticated,
  Json(body): Json<PromoteBody>,
) -> Result<impl IntoResponse, ApiError> {
  let actor = auth.require_admin()?;
  let req = PromoteRequest {
    username:        body.username,
    term:            body.term.unwrap_or_else(|| admin.current_term()),
    group_name:      body.group_name,
    is_grouper:      body.is_grouper,
    is_main_grouper: body.is_main_grouper,
  };
  let records = admin
    .promote_to_supervisor(actor, req)
    .await
    .map_err(ApiError::store)?;
  Ok((StatusCode::CREATED, Json(records)))
}

// ─── One record ───────────────────────────────────────────────────────────────

/// `GET /supervisors/{id}`
pub async fn get_one<S: AdminStore + 'static>(
  State(admin): State<Administration<S>>,
  _auth: Authenticated,
  Path(id): Path<i64>,
) -> Result<Json<SupervisorRecord>, ApiError> {
  admin
    .get_supervisor(id)
    .await
    .map_err(ApiError::store)?
    .map(Json)
    .ok_or_else(|| ApiError::NotFound(format!("supervisor record {id}")))
}

/// `PATCH /supervisors/{id}`
pub async fn update<S: AdminStore + 'static>(
  State(admin): State<Administration<S>>,
  auth: Authenticated,
  Path(id): Path<i64>,
  Json(patch): Json<SupervisorPatch>,
) -> Result<Json<SupervisorRecord>, ApiError> {
  let actor = auth.require_admin()?;
  let record = admin
    .update_supervisor(actor, id, patch)
    .await
    .map_err(ApiError::store)?;
  Ok(Json(record))
}

// ─── Term-wide views ──────────────────────────────────────────────────────────

/// `GET /supervisors/expiring`: supervisors of a term with nothing
/// provisioned for the next one.
pub async fn expiring<S: AdminStore + 'static>(
  State(admin): State<Administration<S>>,
  _auth: Authenticated,
  Query(params): Query<TermParam>,
) -> Result<Json<Vec<SupervisorRecord>>, ApiError> {
  let records = admin.expire_listing(params.term).await.map_err(ApiError::store)?;
  Ok(Json(records))
}

#[derive(Debug, Serialize)]
pub struct CountResponse {
  pub term:  Term,
  pub count: usize,
}

/// `GET /supervisors/count`
pub async fn count<S: AdminStore + 'static>(
  State(admin): State<Administration<S>>,
  _auth: Authenticated,
  Query(params): Query<TermParam>,
) -> Result<Json<CountResponse>, ApiError> {
  let term = params.term.unwrap_or_else(|| admin.current_term());
  let count = admin
    .supervisor_count(Some(term))
    .await
    .map_err(ApiError::store)?;
  Ok(Json(CountResponse { term, count }))
}

// ─── Renew / retire ───────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
pub struct RenewBody {
  pub usernames: Vec<String>,
  #[serde(default)]
  pub term:      Option<Term>,
}

/// `POST /supervisors/renew`
pub async fn renew<S: AdminStore + 'static>(
  State(admin): State<Administration<S>>,
  auth: Authenticated,
  Json(body): Json<RenewBody>,
) -> Result<Json<serde_json::Value>, ApiError> {
  let actor = auth.require_admin()?;
  let inserted = admin
    .batch_renew(actor, body.usernames, body.term)
    .await
    .map_err(ApiError::store)?;
  Ok(Json(serde_json::json!({ "inserted": inserted })))
}

#[derive(Debug, Deserialize)]
pub struct RetireBody {
  pub username: String,
  #[serde(default)]
  pub term:     Option<Term>,
}

/// `POST /supervisors/retire`
pub async fn retire<S: AdminStore + 'static>(
  State(admin): State<Administration<S>>,
  auth: Authenticated,
  Json(body): Json<RetireBody>,
) -> Result<Json<serde_json::Value>, ApiError> {
  let actor = auth.require_admin()?;
  let retired = admin
    .retire_supervisor(actor, &body.username, body.term)
    .await
    .map_err(ApiError::store)?;
  Ok(Json(serde_json::json!({ "retired": retired })))
}
