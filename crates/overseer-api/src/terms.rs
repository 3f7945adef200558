//! Handlers for `/terms` and `/events`.
//!
//! | Method | Path | Notes |
//! |--------|------|-------|
//! | `GET`  | `/terms` | Every term referenced so far, oldest first |
//! | `GET`  | `/terms/current` | `{"term":"2023-2024-1"}` |
//! | `GET`  | `/events` | Admin. `?limit=` (default 50), newest first |

use axum::{
  Json,
  extract::{Query, State},
};
use overseer_core::{
  event::Event,
  service::Administration,
  store::AdminStore,
  term::Term,
};
use serde::Deserialize;
use serde_json::{Value, json};

use crate::{auth::Authenticated, error::ApiError};

const DEFAULT_EVENT_LIMIT: usize = 50;

/// `GET /terms`
pub async fn list<S: AdminStore + 'static>(
  State(admin): State<Administration<S>>,
  _auth: Authenticated,
) -> Result<Json<Vec<Term>>, ApiError> {
  let terms = admin.list_terms().await.map_err(ApiError::store)?;
  Ok(Json(terms))
}

/// `GET /terms/current`
pub async fn current<S: AdminStore + 'static>(
  State(admin): State<Administration<S>>,
  _auth: Authenticated,
) -> Json<Value> {
  Json(json!({ "term": admin.current_term() }))
}

#[derive(Debug, Default, Deserialize)]
pub struct EventParams {
  pub limit: Option<usize>,
}

/// `GET /events`
pub async fn events<S: AdminStore + 'static>(
  State(admin): State<Administration<S>>,
  auth: Authenticated,
  Query(params): Query<EventParams>,
) -> Result<Json<Vec<Event>>, ApiError> {
  auth.require_admin()?;
  let events = admin
    .list_events(params.limit.unwrap_or(DEFAULT_EVENT_LIMIT))
    .await
    .map_err(ApiError::store)?;
  Ok(Json(events))
}
