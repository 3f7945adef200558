//! JSON REST API for Overseer.
//!
//! Exposes an axum [`Router`] backed by any [`AdminStore`], wrapped in an
//! [`Administration`] that supplies the current term and dispatches
//! post-commit effects. Every route requires HTTP Basic credentials of an
//! active user; mutations additionally require the `admin` role.
//!
//! # Mounting
//!
//! ```rust,ignore
//! .nest("/api", overseer_api::api_router(admin.clone()))
//! ```

pub mod auth;
pub mod error;
pub mod groups;
pub mod supervisors;
pub mod terms;
pub mod users;

use axum::{
  Router,
  routing::{get, post, put},
};
use overseer_core::{service::Administration, store::AdminStore};
use tower_http::trace::TraceLayer;

pub use auth::{Authenticated, hash_password};
pub use error::ApiError;

/// Build a fully-materialised API router for `admin`.
///
/// The returned `Router<()>` can be nested into any parent router regardless
/// of its own state type.
pub fn api_router<S>(admin: Administration<S>) -> Router<()>
where
  S: AdminStore + 'static,
{
  Router::new()
    // Users
    .route("/users", get(users::list::<S>).post(users::create::<S>))
    .route(
      "/users/{username}",
      get(users::get_one::<S>)
        .patch(users::update::<S>)
        .delete(users::delete::<S>),
    )
    .route("/users/{username}/roles", put(users::set_roles::<S>))
    .route("/users/{username}/password", put(users::set_password::<S>))
    // Supervisors
    .route(
      "/supervisors",
      get(supervisors::list::<S>).post(supervisors::promote::<S>),
    )
    .route("/supervisors/expiring", get(supervisors::expiring::<S>))
    .route("/supervisors/count", get(supervisors::count::<S>))
    .route("/supervisors/renew", post(supervisors::renew::<S>))
    .route("/supervisors/retire", post(supervisors::retire::<S>))
    .route(
      "/supervisors/{id}",
      get(supervisors::get_one::<S>).patch(supervisors::update::<S>),
    )
    // Groups
    .route("/groups", get(groups::list::<S>).post(groups::create::<S>))
    .route("/groups/reconcile", post(groups::reconcile::<S>))
    // Terms and audit
    .route("/terms", get(terms::list::<S>))
    .route("/terms/current", get(terms::current::<S>))
    .route("/events", get(terms::events::<S>))
    .layer(TraceLayer::new_for_http())
    .with_state(admin)
}

#[cfg(test)]
mod tests {
  use super::*;

  use argon2::{
    Algorithm, Argon2, Params, PasswordHasher, Version, password_hash::SaltString,
  };
  use axum::{
    body::Body,
    http::{Request, StatusCode, header},
  };
  use base64::Engine as _;
  use base64::engine::general_purpose::STANDARD as B64;
  use overseer_core::{
    event::Actor,
    role::Role,
    term::{FixedTerm, Term},
    user::{NewUser, Profile},
  };
  use overseer_store_sqlite::SqliteStore;
  use rand_core::OsRng;
  use serde_json::{Value, json};
  use tower::ServiceExt as _;

  const TERM: &str = "2023-2024-1";

  /// Minimum-cost hash; verification reads its parameters from the string.
  fn cheap_hash(password: &str) -> String {
    let params = Params::new(Params::MIN_M_COST, 1, 1, None).unwrap();
    let salt = SaltString::generate(&mut OsRng);
    Argon2::new(Algorithm::Argon2id, Version::V0x13, params)
      .hash_password(password.as_bytes(), &salt)
      .unwrap()
      .to_string()
  }

  fn new_user(username: &str, roles: &[Role]) -> NewUser {
    NewUser {
      username:      username.into(),
      profile:       Profile { name: username.to_uppercase(), ..Profile::default() },
      password_hash: cheap_hash("secret"),
      roles:         roles.iter().copied().collect(),
      group_name:    None,
    }
  }

  /// `root` is an admin, `tess` a plain teacher, `alice` a teacher; group G1
  /// exists.
  async fn app() -> Administration<SqliteStore> {
    let store = SqliteStore::open_in_memory().await.unwrap();
    let admin = Administration::new(store, FixedTerm(TERM.parse().unwrap()));
    let system = Actor::system();
    admin.create_user(&system, new_user("root", &[Role::Admin]), None).await.unwrap();
    admin.create_user(&system, new_user("tess", &[]), None).await.unwrap();
    admin.create_user(&system, new_user("alice", &[]), None).await.unwrap();
    admin.create_group(&system, "G1").await.unwrap();
    admin
  }

  fn basic(user: &str, pass: &str) -> String {
    format!("Basic {}", B64.encode(format!("{user}:{pass}")))
  }

  async fn send(
    admin: &Administration<SqliteStore>,
    method: &str,
    uri: &str,
    auth: Option<(&str, &str)>,
    body: Option<Value>,
  ) -> (StatusCode, Value) {
    let mut builder = Request::builder().method(method).uri(uri);
    if let Some((user, pass)) = auth {
      builder = builder.header(header::AUTHORIZATION, basic(user, pass));
    }
    let req = match body {
      Some(body) => builder
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(body.to_string()))
        .unwrap(),
      None => builder.body(Body::empty()).unwrap(),
    };

    let resp = api_router(admin.clone()).oneshot(req).await.unwrap();
    let status = resp.status();
    let bytes = axum::body::to_bytes(resp.into_body(), usize::MAX).await.unwrap();
    let json = if bytes.is_empty() {
      Value::Null
    } else {
      serde_json::from_slice(&bytes).unwrap()
    };
    (status, json)
  }

  const ROOT: Option<(&str, &str)> = Some(("root", "secret"));
  const TESS: Option<(&str, &str)> = Some(("tess", "secret"));

  // ── Authentication ─────────────────────────────────────────────────────────

  #[tokio::test]
  async fn missing_credentials_get_a_challenge() {
    let admin = app().await;
    let req = Request::builder().uri("/groups").body(Body::empty()).unwrap();
    let resp = api_router(admin).oneshot(req).await.unwrap();

    assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);
    assert!(resp.headers().contains_key(header::WWW_AUTHENTICATE));
  }

  #[tokio::test]
  async fn wrong_password_is_unauthorized() {
    let admin = app().await;
    let (status, body) =
      send(&admin, "GET", "/groups", Some(("root", "nope")), None).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["error"], "unauthorized");
  }

  #[tokio::test]
  async fn non_admins_may_read_but_not_mutate() {
    let admin = app().await;

    let (status, _) = send(&admin, "GET", "/groups", TESS, None).await;
    assert_eq!(status, StatusCode::OK);

    let (status, _) =
      send(&admin, "POST", "/groups", TESS, Some(json!({ "name": "G2" }))).await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let (status, _) = send(&admin, "GET", "/events", TESS, None).await;
    assert_eq!(status, StatusCode::FORBIDDEN);
  }

  #[tokio::test]
  async fn deleted_users_can_no_longer_authenticate() {
    let admin = app().await;
    let (status, _) = send(&admin, "DELETE", "/users/tess", ROOT, None).await;
    assert_eq!(status, StatusCode::NO_CONTENT);

    let (status, _) = send(&admin, "GET", "/groups", TESS, None).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
  }

  // ── Supervisors ────────────────────────────────────────────────────────────

  #[tokio::test]
  async fn promotion_provisions_the_horizon_and_leads_the_group() {
    let admin = app().await;
    let promote = json!({
      "username": "alice",
      "term": TERM,
      "group_name": "G1",
      "is_grouper": true,
    });

    let (status, records) =
      send(&admin, "POST", "/supervisors", ROOT, Some(promote.clone())).await;
    assert_eq!(status, StatusCode::CREATED);
    let records = records.as_array().unwrap();
    assert_eq!(records.len(), 5);
    assert_eq!(records[0]["term"], TERM);
    assert_eq!(records[4]["term"], "2025-2026-1");

    let (status, body) = send(&admin, "POST", "/supervisors", ROOT, Some(promote)).await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert!(body["error"].as_str().unwrap().contains("alice"));

    let (_, groups) = send(&admin, "GET", "/groups", TESS, None).await;
    assert_eq!(groups[0]["name"], "G1");
    assert_eq!(groups[0]["leader"]["username"], "alice");

    let (_, count) = send(&admin, "GET", "/supervisors/count", TESS, None).await;
    assert_eq!(count, json!({ "term": TERM, "count": 1 }));
  }

  #[tokio::test]
  async fn promotion_without_a_term_starts_at_the_current_one() {
    let admin = app().await;
    let (status, records) = send(
      &admin,
      "POST",
      "/supervisors",
      ROOT,
      Some(json!({ "username": "alice" })),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(records[0]["term"], TERM);
    assert_eq!(records.as_array().unwrap().len(), 5);

    let (status, _) = send(
      &admin,
      "POST",
      "/supervisors",
      ROOT,
      Some(json!({ "username": "tess", "term": "9998-9999-1" })),
    )
    .await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
  }

  #[tokio::test]
  async fn promotion_into_unknown_group_is_not_found() {
    let admin = app().await;
    let (status, _) = send(
      &admin,
      "POST",
      "/supervisors",
      ROOT,
      Some(json!({ "username": "alice", "term": TERM, "group_name": "G9" })),
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
  }

  #[tokio::test]
  async fn patch_moves_a_record_between_groups() {
    let admin = app().await;
    send(&admin, "POST", "/groups", ROOT, Some(json!({ "name": "G2" }))).await;
    let (_, records) = send(
      &admin,
      "POST",
      "/supervisors",
      ROOT,
      Some(json!({ "username": "alice", "term": TERM, "group_name": "G1" })),
    )
    .await;
    let id = records[0]["id"].as_i64().unwrap();

    let (status, record) = send(
      &admin,
      "PATCH",
      &format!("/supervisors/{id}"),
      ROOT,
      Some(json!({ "group_name": "G2", "is_grouper": true })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(record["group_name"], "G2");
    assert_eq!(record["is_grouper"], true);

    let (status, _) =
      send(&admin, "GET", "/supervisors/999999", TESS, None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
  }

  #[tokio::test]
  async fn renew_and_retire_round_out_the_lifecycle() {
    let admin = app().await;
    send(
      &admin,
      "POST",
      "/supervisors",
      ROOT,
      Some(json!({ "username": "alice", "term": TERM })),
    )
    .await;

    let last = "2025-2026-1";
    let (_, expiring) =
      send(&admin, "GET", &format!("/supervisors/expiring?term={last}"), TESS, None).await;
    assert_eq!(expiring[0]["username"], "alice");

    let (status, body) = send(
      &admin,
      "POST",
      "/supervisors/renew",
      ROOT,
      Some(json!({ "usernames": ["alice"], "term": last })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["inserted"], 4);

    let (_, body) = send(
      &admin,
      "POST",
      "/supervisors/retire",
      ROOT,
      Some(json!({ "username": "alice" })),
    )
    .await;
    assert_eq!(body["retired"], 9);

    let (_, remaining) =
      send(&admin, "GET", "/supervisors?username=alice", TESS, None).await;
    assert_eq!(remaining, json!([]));
  }

  // ── Users ──────────────────────────────────────────────────────────────────

  #[tokio::test]
  async fn role_updates_report_the_delta() {
    let admin = app().await;

    let (status, _) = send(
      &admin,
      "PUT",
      "/users/alice/roles",
      ROOT,
      Some(json!({ "roles": ["teacher", "grouper"] })),
    )
    .await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);

    let (status, delta) = send(
      &admin,
      "PUT",
      "/users/alice/roles",
      ROOT,
      Some(json!({ "roles": ["supervisor", "grouper"], "group_name": "G1" })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(delta["added"], json!(["supervisor", "grouper"]));
    assert_eq!(delta["removed"], json!([]));

    let (_, view) = send(&admin, "GET", "/users/alice", TESS, None).await;
    assert_eq!(view["roles"], json!(["teacher", "supervisor", "grouper"]));
    assert_eq!(view["supervisor"]["group_name"], "G1");

    let (_, supervisors) =
      send(&admin, "GET", "/users?role=supervisor&group=G1", TESS, None).await;
    assert_eq!(supervisors.as_array().unwrap().len(), 1);
  }

  #[tokio::test]
  async fn users_can_be_created_and_edited() {
    let admin = app().await;

    let (status, user) = send(
      &admin,
      "POST",
      "/users",
      ROOT,
      Some(json!({
        "username": "dave",
        "password": "pw",
        "name": "Dave",
        "unit": "Physics",
        "roles": ["leader"],
      })),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(user["unit"], "Physics");
    assert!(user.get("password_hash").is_none());

    let (status, _) = send(
      &admin,
      "POST",
      "/users",
      ROOT,
      Some(json!({ "username": "dave", "password": "pw" })),
    )
    .await;
    assert_eq!(status, StatusCode::CONFLICT);

    let (status, user) = send(
      &admin,
      "PATCH",
      "/users/tess",
      TESS,
      Some(json!({ "phone": "555-0100" })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(user["phone"], "555-0100");

    let (status, _) = send(
      &admin,
      "PATCH",
      "/users/alice",
      TESS,
      Some(json!({ "phone": "555-0100" })),
    )
    .await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let (status, _) = send(&admin, "GET", "/users/ghost", TESS, None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
  }

  #[tokio::test]
  async fn users_may_change_their_own_password() {
    let admin = app().await;
    let (status, _) = send(
      &admin,
      "PUT",
      "/users/tess/password",
      TESS,
      Some(json!({ "password": "hunter2" })),
    )
    .await;
    assert_eq!(status, StatusCode::NO_CONTENT);

    let (status, _) = send(&admin, "GET", "/terms/current", TESS, None).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    let (status, body) =
      send(&admin, "GET", "/terms/current", Some(("tess", "hunter2")), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["term"], TERM);
  }

  // ── Audit ──────────────────────────────────────────────────────────────────

  #[tokio::test]
  async fn events_name_the_acting_user() {
    let admin = app().await;
    send(&admin, "POST", "/groups", ROOT, Some(json!({ "name": "G2" }))).await;

    let (status, events) = send(&admin, "GET", "/events?limit=1", ROOT, None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(events.as_array().unwrap().len(), 1);
    assert_eq!(events[0]["name"], "create_group");
    assert_eq!(events[0]["actor"], "root");
  }

  #[tokio::test]
  async fn terms_appear_once_referenced() {
    let admin = app().await;
    let (_, terms) = send(&admin, "GET", "/terms", TESS, None).await;
    assert_eq!(terms, json!([]));

    send(
      &admin,
      "POST",
      "/supervisors",
      ROOT,
      Some(json!({ "username": "alice", "term": TERM })),
    )
    .await;

    let (_, terms) = send(&admin, "GET", "/terms", TESS, None).await;
    let terms = terms.as_array().unwrap();
    assert_eq!(terms.len(), 5);
    assert_eq!(terms[0], TERM);
  }

  #[test]
  fn term_param_parses_identifiers() {
    let parsed: Term = serde_json::from_value(json!(TERM)).unwrap();
    assert_eq!(parsed.to_string(), TERM);
  }
}
