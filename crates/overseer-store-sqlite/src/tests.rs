//! Integration tests for `SqliteStore` against an in-memory database.

use std::collections::BTreeSet;

use overseer_core::{
  Classify, ErrorKind,
  effect::Effect,
  event::Actor,
  role::Role,
  store::AdminStore,
  supervisor::{
    LeaderRole, PromoteRequest, SupervisorFilter, SupervisorPatch, SupervisorRecord,
  },
  term::{HORIZON, Term},
  user::{NewUser, Profile, UserJoin, UserQuery},
};

use crate::SqliteStore;

fn t(s: &str) -> Term { s.parse().unwrap() }

fn root() -> Actor { Actor::new("root") }

fn new_user(username: &str) -> NewUser {
  NewUser {
    username:      username.into(),
    profile:       Profile { name: username.to_uppercase(), ..Profile::default() },
    password_hash: "$argon2id$fake".into(),
    roles:         BTreeSet::new(),
    group_name:    None,
  }
}

/// A store with alice, bob and carol as plain teachers and groups G1 and G2.
async fn store() -> SqliteStore {
  let s = SqliteStore::open_in_memory()
    .await
    .expect("in-memory store");
  for name in ["alice", "bob", "carol"] {
    s.create_user(root(), new_user(name), t("2023-2024-1")).await.unwrap();
  }
  for group in ["G1", "G2"] {
    s.create_group(root(), group.into()).await.unwrap();
  }
  s
}

async fn promote(s: &SqliteStore, req: PromoteRequest) {
  s.promote_to_supervisor(root(), req).await.unwrap();
}

async fn records(s: &SqliteStore, username: &str) -> Vec<SupervisorRecord> {
  s.list_supervisors(SupervisorFilter::for_user(username)).await.unwrap()
}

async fn leader_of(s: &SqliteStore, group: &str) -> Option<String> {
  s.list_groups()
    .await
    .unwrap()
    .into_iter()
    .find(|g| g.name == group)
    .and_then(|g| g.leader)
    .map(|u| u.username)
}

/// At most one grouper per (term, group) and one main grouper per term.
async fn assert_single_occupancy(s: &SqliteStore) {
  let all = s.list_supervisors(SupervisorFilter::default()).await.unwrap();
  let mut groupers = BTreeSet::new();
  let mut mains = BTreeSet::new();
  for r in &all {
    if r.is_grouper {
      assert!(groupers.insert((r.term, r.group_name.clone())), "two groupers: {r:?}");
    }
    if r.is_main_grouper {
      assert!(mains.insert(r.term), "two main groupers: {r:?}");
    }
  }
}

// ─── Promotion ───────────────────────────────────────────────────────────────

#[tokio::test]
async fn promotion_provisions_five_terms() {
  let s = store().await;
  let start = t("2023-2024-2");

  let committed = s
    .promote_to_supervisor(root(), PromoteRequest::new("alice", start).in_group("G1"))
    .await
    .unwrap();

  let terms: Vec<Term> = records(&s, "alice").await.iter().map(|r| r.term).collect();
  assert_eq!(
    terms,
    (0..=HORIZON).map(|k| start.advance(k)).collect::<Vec<_>>()
  );
  assert_eq!(committed.value.len(), 5);
  assert!(committed.effects.iter().any(|e| matches!(
    e,
    Effect::Message { method, .. } if method == "add_supervisor"
  )));

  let listed = s.list_terms().await.unwrap();
  assert!(listed.contains(&start.advance(HORIZON)));
}

#[tokio::test]
async fn promoting_an_active_supervisor_conflicts_without_writes() {
  let s = store().await;
  let term = t("2023-2024-1");
  promote(&s, PromoteRequest::new("alice", term)).await;
  let events_before = s.list_events(100).await.unwrap().len();

  let err = s
    .promote_to_supervisor(root(), PromoteRequest::new("alice", term).in_group("G1"))
    .await
    .unwrap_err();

  assert_eq!(err.kind(), ErrorKind::Conflict);
  assert!(records(&s, "alice").await.iter().all(|r| r.group_name.is_none()));
  assert_eq!(s.list_events(100).await.unwrap().len(), events_before);
}

#[tokio::test]
async fn promoting_into_an_unknown_group_is_not_found() {
  let s = store().await;
  let err = s
    .promote_to_supervisor(root(), PromoteRequest::new("alice", t("2023-2024-1")).in_group("G9"))
    .await
    .unwrap_err();
  assert_eq!(err.kind(), ErrorKind::NotFound);
  assert!(records(&s, "alice").await.is_empty());
}

#[tokio::test]
async fn grouper_promotion_displaces_the_current_holder() {
  let s = store().await;
  let term = t("2023-2024-1");
  promote(&s, PromoteRequest::new("bob", term).in_group("G1").as_grouper()).await;
  assert_eq!(leader_of(&s, "G1").await.as_deref(), Some("bob"));

  let committed = s
    .promote_to_supervisor(root(), PromoteRequest::new("alice", term).in_group("G1").as_grouper())
    .await
    .unwrap();

  let bob = records(&s, "bob").await;
  assert!(bob.iter().filter(|r| r.term >= term).all(|r| !r.is_grouper));
  assert!(records(&s, "alice").await.iter().all(|r| r.is_grouper));
  assert_eq!(leader_of(&s, "G1").await.as_deref(), Some("alice"));
  assert!(committed.effects.iter().any(|e| matches!(
    e,
    Effect::Notice { username, .. } if username == "bob"
  )));
  assert_single_occupancy(&s).await;
}

// ─── Roles ───────────────────────────────────────────────────────────────────

#[tokio::test]
async fn carol_loses_grouper_before_anything_else() {
  let s = store().await;
  let term = t("2023-2024-2");
  promote(&s, PromoteRequest::new("carol", term).in_group("G2").as_grouper()).await;

  let committed = s
    .update_user_roles(root(), "carol".into(), term, [Role::Supervisor].into(), None)
    .await
    .unwrap();

  assert_eq!(committed.value.removed, [Role::Grouper].into());
  assert!(committed.value.added.is_empty());
  let carol = records(&s, "carol").await;
  assert_eq!(carol.len(), 5);
  assert!(carol.iter().all(|r| !r.is_grouper));
  assert_eq!(leader_of(&s, "G2").await, None);

  let roles = s.get_user("carol".into(), term).await.unwrap().unwrap().roles;
  assert_eq!(roles, [Role::Teacher, Role::Supervisor].into());
}

#[tokio::test]
async fn demoting_without_a_record_is_a_policy_violation() {
  let s = store().await;
  let term = t("2023-2024-1");

  let err = s
    .retire_supervisor(root(), "alice".into(), term)
    .await
    .unwrap_err();
  assert_eq!(err.kind(), ErrorKind::PolicyViolation);

  let patch_err = s
    .update_user_roles(root(), "alice".into(), term, [Role::Grouper].into(), Some("G1".into()))
    .await
    .unwrap_err();
  assert_eq!(patch_err.kind(), ErrorKind::PolicyViolation);
  assert!(records(&s, "alice").await.is_empty());
}

#[tokio::test]
async fn role_update_rolls_back_entirely_on_failure() {
  let s = store().await;
  let term = t("2023-2024-1");

  // Admin is granted before the promotion into G9 fails.
  let err = s
    .update_user_roles(
      root(),
      "alice".into(),
      term,
      [Role::Admin, Role::Supervisor, Role::Grouper].into(),
      Some("G9".into()),
    )
    .await
    .unwrap_err();

  assert_eq!(err.kind(), ErrorKind::NotFound);
  assert!(records(&s, "alice").await.is_empty());
  let roles = s.get_user("alice".into(), term).await.unwrap().unwrap().roles;
  assert_eq!(roles, [Role::Teacher].into());
}

// ─── Supervisor updates ──────────────────────────────────────────────────────

#[tokio::test]
async fn update_supervisor_hands_over_the_main_grouper_slot() {
  let s = store().await;
  let term = t("2023-2024-1");
  promote(&s, PromoteRequest::new("alice", term).as_main_grouper()).await;
  promote(&s, PromoteRequest::new("bob", term)).await;
  let bob_now = records(&s, "bob").await[0].clone();

  let updated = s
    .update_supervisor(
      root(),
      bob_now.id,
      SupervisorPatch::flag(LeaderRole::MainGrouper, true),
    )
    .await
    .unwrap()
    .value;

  assert!(updated.is_main_grouper);
  assert!(records(&s, "alice").await.iter().all(|r| !r.is_main_grouper));
  assert_single_occupancy(&s).await;
}

#[tokio::test]
async fn update_supervisor_for_missing_record_is_not_found() {
  let s = store().await;
  let err = s
    .update_supervisor(root(), 4242, SupervisorPatch::default())
    .await
    .unwrap_err();
  assert_eq!(err.kind(), ErrorKind::NotFound);
}

// ─── Renewal and expiry ──────────────────────────────────────────────────────

#[tokio::test]
async fn batch_renew_is_idempotent() {
  let s = store().await;
  let term = t("2023-2024-1");
  promote(&s, PromoteRequest::new("alice", term).in_group("G1")).await;
  promote(&s, PromoteRequest::new("bob", term.advance(2))).await;
  let last = term.advance(HORIZON);
  let users = vec!["alice".to_owned(), "bob".to_owned()];

  let first = s.batch_renew(root(), users.clone(), last).await.unwrap().value;
  let after_first = s.list_supervisors(SupervisorFilter::default()).await.unwrap();
  let second = s.batch_renew(root(), users, last).await.unwrap().value;
  let after_second = s.list_supervisors(SupervisorFilter::default()).await.unwrap();

  // alice gains four terms; bob already reaches last + 2.
  assert_eq!(first, 4 + 2);
  assert_eq!(second, 0);
  assert_eq!(after_first, after_second);
}

#[tokio::test]
async fn expire_listing_and_counts() {
  let s = store().await;
  let term = t("2023-2024-1");
  promote(&s, PromoteRequest::new("alice", term)).await;
  promote(&s, PromoteRequest::new("bob", term.advance(1))).await;

  let last = term.advance(HORIZON);
  let lapsing = s.expire_listing(last).await.unwrap();
  assert_eq!(lapsing.iter().map(|r| r.username.as_str()).collect::<Vec<_>>(), ["alice"]);

  assert_eq!(s.supervisor_count(term).await.unwrap(), 1);
  assert_eq!(s.supervisor_count(last).await.unwrap(), 2);
}

// ─── Users and groups ────────────────────────────────────────────────────────

#[tokio::test]
async fn list_users_by_join() {
  let s = store().await;
  let term = t("2023-2024-1");
  promote(&s, PromoteRequest::new("alice", term).in_group("G1")).await;
  promote(&s, PromoteRequest::new("bob", term).in_group("G2")).await;

  let in_g1 = s
    .list_users(
      UserQuery {
        join: Some(UserJoin::SupervisorAt { term, group_name: Some("G1".into()) }),
        ..UserQuery::default()
      },
      term,
    )
    .await
    .unwrap();
  assert_eq!(in_g1.len(), 1);
  assert_eq!(in_g1[0].user.username, "alice");
  assert!(in_g1[0].roles.contains(&Role::Supervisor));

  let teachers = s
    .list_users(
      UserQuery { join: Some(UserJoin::StaticRole(Role::Teacher)), ..UserQuery::default() },
      term,
    )
    .await
    .unwrap();
  assert_eq!(teachers.len(), 3);

  let text = s
    .list_users(UserQuery { text: Some("CAR".into()), ..UserQuery::default() }, term)
    .await
    .unwrap();
  assert_eq!(text.len(), 1);
}

async fn matching(s: &SqliteStore, text: &str) -> Vec<String> {
  let query = UserQuery { text: Some(text.into()), ..UserQuery::default() };
  s.list_users(query, t("2023-2024-1"))
    .await
    .unwrap()
    .into_iter()
    .map(|v| v.user.username)
    .collect()
}

#[tokio::test]
async fn text_search_matches_wildcards_literally() {
  let s = store().await;
  let term = t("2023-2024-1");
  for name in ["a_c", "abc", "x%y"] {
    s.create_user(root(), new_user(name), term).await.unwrap();
  }

  assert_eq!(matching(&s, "a_c").await, ["a_c"]);
  assert_eq!(matching(&s, "%").await, ["x%y"]);
  assert_eq!(matching(&s, "\\").await, Vec::<String>::new());
}

#[tokio::test]
async fn latest_accepted_term_lists_back() {
  let s = store().await;
  let start = t("9996-9997-1");
  promote(&s, PromoteRequest::new("alice", start).in_group("G1")).await;

  let terms: Vec<Term> = records(&s, "alice").await.iter().map(|r| r.term).collect();
  assert_eq!(terms.len(), HORIZON as usize + 1);
  assert_eq!(terms.last(), Some(&t("9998-9999-1")));
  assert!(s.list_terms().await.unwrap().contains(&t("9998-9999-1")));
  assert_eq!(s.expire_listing(t("9998-9999-1")).await.unwrap().len(), 1);
}

#[tokio::test]
async fn deleting_a_user_soft_deletes_and_retires() {
  let s = store().await;
  let term = t("2023-2024-1");
  promote(&s, PromoteRequest::new("alice", term).in_group("G1").as_grouper()).await;

  s.delete_user(root(), "alice".into(), term).await.unwrap();

  assert!(s.get_user("alice".into(), term).await.unwrap().is_none());
  assert!(records(&s, "alice").await.is_empty());
  assert_eq!(leader_of(&s, "G1").await, None);
  assert!(s.password_hash("alice".into()).await.unwrap().is_none());

  let again = s.create_user(root(), new_user("alice"), term).await.unwrap_err();
  assert_eq!(again.kind(), ErrorKind::Conflict);
}

#[tokio::test]
async fn password_changes_are_stored() {
  let s = store().await;
  s.change_password(root(), "bob".into(), "$argon2id$new".into()).await.unwrap();
  assert_eq!(
    s.password_hash("bob".into()).await.unwrap().as_deref(),
    Some("$argon2id$new")
  );
}

#[tokio::test]
async fn duplicate_groups_conflict() {
  let s = store().await;
  let err = s.create_group(root(), "G1".into()).await.unwrap_err();
  assert_eq!(err.kind(), ErrorKind::Conflict);
}

#[tokio::test]
async fn reconcile_is_a_no_op_on_a_consistent_registry() {
  let s = store().await;
  let term = t("2023-2024-1");
  promote(&s, PromoteRequest::new("alice", term).in_group("G1").as_grouper()).await;

  let changed = s.reconcile_groups(root(), term).await.unwrap().value;
  assert!(changed.is_empty());
  assert_eq!(leader_of(&s, "G1").await.as_deref(), Some("alice"));
}

#[tokio::test]
async fn events_record_the_actor() {
  let s = store().await;
  promote(&s, PromoteRequest::new("alice", t("2023-2024-1"))).await;

  let events = s.list_events(1).await.unwrap();
  assert_eq!(events[0].name, "promote_supervisor");
  assert_eq!(events[0].actor, "root");
  assert_eq!(events[0].detail["username"], "alice");
}

// ─── Storage-level uniqueness ────────────────────────────────────────────────

#[tokio::test]
async fn partial_indexes_reject_a_second_grouper() {
  let s = store().await;
  let term = t("2023-2024-1");
  promote(&s, PromoteRequest::new("alice", term).in_group("G1").as_grouper()).await;
  promote(&s, PromoteRequest::new("bob", term).in_group("G1")).await;

  let conn = s.conn.clone();
  let raw = conn
    .call(move |conn| {
      Ok(conn.execute(
        "UPDATE supervisors SET is_grouper = 1 WHERE username = 'bob'",
        [],
      ))
    })
    .await
    .unwrap();

  assert!(matches!(
    raw.unwrap_err().sqlite_error_code(),
    Some(rusqlite::ErrorCode::ConstraintViolation)
  ));
  assert_single_occupancy(&s).await;
}
