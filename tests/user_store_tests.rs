// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! User store behavior against the in-memory backend.

use docstore_identity::error::StoreError;
use docstore_identity::models::{Claim, Role, User, UserLoginInfo};
use docstore_identity::stores::UserStore;

mod common;
use common::{open_session, stores, test_db, unique_suffix};

fn test_user(email: &str) -> User {
    User::new(format!("user-{}", unique_suffix())).with_email(email)
}

// ═══════════════════════════════════════════════════════════════════════════
// CREATE / FIND
// ═══════════════════════════════════════════════════════════════════════════

#[tokio::test]
async fn test_create_then_find_by_email_and_name() {
    let db = test_db().await;
    let (users, _) = stores(&db);

    let mut user = test_user("Test@Test.com");
    users.create(&mut user).await.unwrap();

    assert!(user.id.starts_with("IdentityUsers/"));
    assert_eq!(user.normalized_email.as_deref(), Some("TEST@TEST.COM"));
    assert!(!user.concurrency_stamp.is_empty());
    assert!(user.security_stamp.is_some());

    // A separate session reads what was committed.
    let other = UserStore::new(open_session(&db));
    let found = other.find_by_email("test@test.com").await.unwrap().unwrap();
    assert_eq!(found.id, user.id);

    let by_name = other
        .find_by_name(&user.user_name.to_uppercase())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(by_name.id, user.id);

    let by_id = other
        .find_by_id(user.id.trim_start_matches("IdentityUsers/"))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(by_id.email.as_deref(), Some("Test@Test.com"));
}

#[tokio::test]
async fn test_find_by_unknown_email_returns_none() {
    let db = test_db().await;
    let (users, _) = stores(&db);

    assert!(users
        .find_by_email("nobody@example.com")
        .await
        .unwrap()
        .is_none());
}

#[tokio::test]
async fn test_duplicate_email_differing_in_case_conflicts() {
    let db = test_db().await;
    let (users, _) = stores(&db);

    let mut first = test_user("Test@Test.com");
    users.create(&mut first).await.unwrap();

    let other = UserStore::new(open_session(&db));
    let mut second = test_user("test@test.com");
    let err = other.create(&mut second).await.unwrap_err();
    assert!(matches!(err, StoreError::Conflict(_)));

    // The loser left nothing behind.
    assert_eq!(db.document_count(), 1);
}

#[tokio::test]
async fn test_duplicate_user_name_conflicts() {
    let db = test_db().await;
    let (users, _) = stores(&db);

    let mut first = User::new("alice");
    users.create(&mut first).await.unwrap();

    let mut second = User::new("ALICE");
    let err = users.create(&mut second).await.unwrap_err();
    assert!(matches!(err, StoreError::Conflict(_)));
}

#[tokio::test]
async fn test_create_requires_user_name() {
    let db = test_db().await;
    let (users, _) = stores(&db);

    let mut user = User::new("  ");
    let err = users.create(&mut user).await.unwrap_err();
    assert!(matches!(err, StoreError::Validation(_)));
}

// ═══════════════════════════════════════════════════════════════════════════
// UPDATE / DELETE
// ═══════════════════════════════════════════════════════════════════════════

#[tokio::test]
async fn test_email_change_moves_uniqueness_record() {
    let db = test_db().await;
    let (users, _) = stores(&db);

    let mut user = test_user("old@example.com");
    users.create(&mut user).await.unwrap();
    let first_stamp = user.concurrency_stamp.clone();

    user.email = Some("new@example.com".to_string());
    users.update(&mut user).await.unwrap();
    assert_ne!(user.concurrency_stamp, first_stamp);

    assert!(users
        .find_by_email("old@example.com")
        .await
        .unwrap()
        .is_none());
    assert!(users
        .find_by_email("new@example.com")
        .await
        .unwrap()
        .is_some());

    // The old address is free again.
    let mut other = test_user("old@example.com");
    users.create(&mut other).await.unwrap();
}

#[tokio::test]
async fn test_delete_frees_email() {
    let db = test_db().await;
    let (users, _) = stores(&db);

    let mut user = test_user("gone@example.com");
    users.create(&mut user).await.unwrap();
    users.delete(&user).await.unwrap();

    assert!(users.find_by_id(&user.id).await.unwrap().is_none());
    assert!(users
        .find_by_email("gone@example.com")
        .await
        .unwrap()
        .is_none());
    assert_eq!(db.compare_exchange_count(), 0);

    let mut again = test_user("gone@example.com");
    users.create(&mut again).await.unwrap();
}

#[tokio::test]
async fn test_stale_update_from_second_session_fails() {
    let db = test_db().await;
    let (users, _) = stores(&db);

    let mut user = test_user("race@example.com");
    users.create(&mut user).await.unwrap();

    let store_a = UserStore::new(open_session(&db));
    let store_b = UserStore::new(open_session(&db));
    let mut copy_a = store_a.find_by_id(&user.id).await.unwrap().unwrap();
    let mut copy_b = store_b.find_by_id(&user.id).await.unwrap().unwrap();

    copy_a.phone_number = Some("555-0100".to_string());
    store_a.update(&mut copy_a).await.unwrap();

    copy_b.phone_number = Some("555-0199".to_string());
    let err = store_b.update(&mut copy_b).await.unwrap_err();
    assert!(matches!(err, StoreError::Concurrency(_)));
    assert!(err.is_retryable());
}

#[tokio::test]
async fn test_update_with_stale_stamp_fails() {
    let db = test_db().await;
    let (users, _) = stores(&db);

    let mut user = test_user("stamp@example.com");
    users.create(&mut user).await.unwrap();

    let mut stale = user.clone();
    stale.concurrency_stamp = "not-the-current-stamp".to_string();
    let err = users.update(&mut stale).await.unwrap_err();
    assert!(matches!(err, StoreError::Concurrency(_)));
}

#[tokio::test]
async fn test_update_unknown_user_is_not_found() {
    let db = test_db().await;
    let (users, _) = stores(&db);

    let mut user = User::new("ghost");
    user.id = "IdentityUsers/missing".to_string();
    let err = users.update(&mut user).await.unwrap_err();
    assert!(matches!(err, StoreError::NotFound(_)));
}

#[tokio::test]
async fn test_without_auto_save_nothing_commits_until_save() {
    let db = test_db().await;
    let session = open_session(&db);
    let users = UserStore::new(session.clone()).with_auto_save_changes(false);

    let mut user = test_user("deferred@example.com");
    users.create(&mut user).await.unwrap();
    assert_eq!(db.document_count(), 0);

    // The creating session sees its own pending write.
    assert!(users.find_by_id(&user.id).await.unwrap().is_some());

    session.save_changes().await.unwrap();
    assert_eq!(db.document_count(), 1);
}

#[tokio::test]
async fn test_rollback_releases_reserved_email() {
    let db = test_db().await;
    let session = open_session(&db);
    let users = UserStore::new(session.clone()).with_auto_save_changes(false);

    let mut user = test_user("undo@example.com");
    users.create(&mut user).await.unwrap();
    session.rollback().await;

    assert_eq!(db.compare_exchange_count(), 0);
    let (fresh, _) = stores(&db);
    let mut again = test_user("undo@example.com");
    fresh.create(&mut again).await.unwrap();
}

#[tokio::test]
async fn test_failed_create_over_existing_id_keeps_its_records() {
    let db = test_db().await;
    let (users, _) = stores(&db);

    let mut dave = test_user("dave@example.com");
    users.create(&mut dave).await.unwrap();

    let other = UserStore::new(open_session(&db));
    let mut copy = test_user("dave@example.com");
    copy.id = dave.id.clone();
    let err = other.create(&mut copy).await.unwrap_err();
    assert!(matches!(err, StoreError::Concurrency(_)));

    let (fresh, _) = stores(&db);
    let found = fresh.find_by_email("dave@example.com").await.unwrap().unwrap();
    assert_eq!(found.id, dave.id);

    let mut mallory = test_user("DAVE@example.com");
    let err = fresh.create(&mut mallory).await.unwrap_err();
    assert!(matches!(err, StoreError::Conflict(_)));
}

#[tokio::test]
async fn test_abandoned_reservation_is_reclaimed() {
    let db = test_db().await;
    {
        let abandoned = UserStore::new(open_session(&db)).with_auto_save_changes(false);
        let mut user = test_user("carol@example.com");
        abandoned.create(&mut user).await.unwrap();
    }
    assert_eq!(db.document_count(), 0);

    let (users, _) = stores(&db);
    assert!(users.find_by_email("carol@example.com").await.unwrap().is_none());

    let mut carol = test_user("Carol@Example.com");
    users.create(&mut carol).await.unwrap();
    let found = users.find_by_email("carol@example.com").await.unwrap().unwrap();
    assert_eq!(found.id, carol.id);
}

#[tokio::test]
async fn test_reclaimed_reservation_fails_the_pending_commit() {
    let db = test_db().await;
    let pending = UserStore::new(open_session(&db)).with_auto_save_changes(false);
    let mut first = test_user("race@example.com");
    pending.create(&mut first).await.unwrap();

    let (users, _) = stores(&db);
    let mut second = test_user("race@example.com");
    users.create(&mut second).await.unwrap();

    let err = pending.session().save_changes().await.unwrap_err();
    assert!(matches!(err, StoreError::Conflict(_)));
    assert_eq!(db.document_count(), 1);

    let (fresh, _) = stores(&db);
    let owner = fresh.find_by_email("race@example.com").await.unwrap().unwrap();
    assert_eq!(owner.id, second.id);
}

// ═══════════════════════════════════════════════════════════════════════════
// CLAIMS
// ═══════════════════════════════════════════════════════════════════════════

#[tokio::test]
async fn test_remove_claim_removes_all_duplicates() {
    let db = test_db().await;
    let (users, _) = stores(&db);

    let mut user = test_user("claims@example.com");
    users.create(&mut user).await.unwrap();

    let claim = Claim::new("GraduatedSchoolYear", "2006");
    let duplicates = vec![claim.clone(); 10];
    users.add_claims(&mut user, &duplicates);
    users.update(&mut user).await.unwrap();
    assert_eq!(users.get_claims(&user).len(), 10);
    assert_eq!(users.users_for_claim(&claim).await.unwrap().len(), 1);

    users.remove_claims(&mut user, &[Claim::new("graduatedschoolyear", "2006")]);
    users.update(&mut user).await.unwrap();

    let stored = users.find_by_id(&user.id).await.unwrap().unwrap();
    assert!(stored.claims.is_empty());
    assert!(users.users_for_claim(&claim).await.unwrap().is_empty());
}

#[tokio::test]
async fn test_replace_claim() {
    let db = test_db().await;
    let (users, _) = stores(&db);

    let mut user = test_user("replace@example.com");
    users.create(&mut user).await.unwrap();

    let old = Claim::new("Department", "Sales");
    let new = Claim::new("Department", "Support");
    users.add_claims(&mut user, &[old.clone(), Claim::new("Level", "2")]);
    users.update(&mut user).await.unwrap();

    users.replace_claim(&mut user, &old, &new);
    users.update(&mut user).await.unwrap();

    assert!(users.users_for_claim(&old).await.unwrap().is_empty());
    let holders = users.users_for_claim(&new).await.unwrap();
    assert_eq!(holders.len(), 1);
    assert_eq!(holders[0].claims.len(), 2);
}

#[tokio::test]
async fn test_users_for_claim_lists_every_holder() {
    let db = test_db().await;
    let (users, _) = stores(&db);
    let claim = Claim::new("Team", "Blue/Green");

    for i in 0..3 {
        let mut user = test_user(&format!("member{}@example.com", i));
        users.add_claims(&mut user, &[claim.clone()]);
        users.create(&mut user).await.unwrap();
    }
    let mut outsider = test_user("outsider@example.com");
    users.add_claims(&mut outsider, &[Claim::new("Team", "Red")]);
    users.create(&mut outsider).await.unwrap();

    assert_eq!(users.users_for_claim(&claim).await.unwrap().len(), 3);
}

#[tokio::test]
async fn test_users_for_claim_ignores_case() {
    let db = test_db().await;
    let (users, _) = stores(&db);

    let mut user = test_user("graduate@example.com");
    users.add_claims(&mut user, &[Claim::new("GraduatedSchoolYear", "2006")]);
    users.create(&mut user).await.unwrap();

    let lookup = Claim::new("graduatedschoolyear", "2006");
    let holders = users.users_for_claim(&lookup).await.unwrap();
    assert_eq!(holders.len(), 1);
    assert_eq!(holders[0].id, user.id);

    // The same claim value removes it, so lookups agree with removal.
    users.remove_claims(&mut user, &[lookup.clone()]);
    assert!(users.get_claims(&user).is_empty());
}

// ═══════════════════════════════════════════════════════════════════════════
// LOGINS
// ═══════════════════════════════════════════════════════════════════════════

#[tokio::test]
async fn test_login_find_and_remove() {
    let db = test_db().await;
    let (users, _) = stores(&db);
    let provider_key = "56759f85-0ad3-4fd3-86e3-a9d133fc5816";

    let mut user = test_user("login@example.com");
    users.create(&mut user).await.unwrap();

    users
        .add_login(
            &mut user,
            UserLoginInfo::new("FaceBook", provider_key, Some("Test User")),
        )
        .unwrap();
    users.update(&mut user).await.unwrap();

    let found = users
        .find_by_login("FaceBook", provider_key)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(found.id, user.id);
    assert_eq!(users.get_logins(&found).len(), 1);

    users.remove_login(&mut user, "FaceBook", provider_key);
    users.update(&mut user).await.unwrap();

    assert!(users
        .find_by_login("FaceBook", provider_key)
        .await
        .unwrap()
        .is_none());
}

#[tokio::test]
async fn test_duplicate_login_on_same_user_conflicts() {
    let db = test_db().await;
    let (users, _) = stores(&db);

    let mut user = test_user("twice@example.com");
    users
        .add_login(&mut user, UserLoginInfo::new("GitHub", "42", None))
        .unwrap();
    let err = users
        .add_login(&mut user, UserLoginInfo::new("GitHub", "42", None))
        .unwrap_err();
    assert!(matches!(err, StoreError::Conflict(_)));

    let err = users
        .add_login(&mut user, UserLoginInfo::new("", "42", None))
        .unwrap_err();
    assert!(matches!(err, StoreError::Validation(_)));
}

// ═══════════════════════════════════════════════════════════════════════════
// ROLES
// ═══════════════════════════════════════════════════════════════════════════

#[tokio::test]
async fn test_add_and_remove_role_updates_both_sides() {
    let db = test_db().await;
    let (users, roles) = stores(&db);

    let mut role = Role::new("Admin");
    roles.create(&mut role).await.unwrap();

    let mut user = test_user("admin@example.com");
    users.create(&mut user).await.unwrap();

    users.add_to_role(&mut user, "admin").await.unwrap();
    users.update(&mut user).await.unwrap();

    assert!(users.is_in_role(&user, "ADMIN").await.unwrap());
    assert_eq!(users.get_roles(&user).await.unwrap(), vec!["Admin"]);
    let members = users.users_in_role("Admin").await.unwrap();
    assert_eq!(members.len(), 1);
    assert_eq!(members[0].id, user.id);

    let stored_role = roles.find_by_name("admin").await.unwrap().unwrap();
    assert_eq!(stored_role.users, vec![user.id.clone()]);

    users.remove_from_role(&mut user, "Admin").await.unwrap();
    users.update(&mut user).await.unwrap();

    assert!(!users.is_in_role(&user, "Admin").await.unwrap());
    assert!(user.roles.is_empty());
    let stored_role = roles.find_by_name("Admin").await.unwrap().unwrap();
    assert!(stored_role.users.is_empty());
}

#[tokio::test]
async fn test_intervening_commit_writes_both_sides_of_membership() {
    let db = test_db().await;
    let (users, roles) = stores(&db);

    let mut admin = Role::new("Admin");
    roles.create(&mut admin).await.unwrap();
    let mut alice = test_user("alice@example.com");
    users.create(&mut alice).await.unwrap();

    users.add_to_role(&mut alice, "Admin").await.unwrap();
    // Another store operation on the same session commits everything queued.
    let mut other = Role::new("Other");
    roles.create(&mut other).await.unwrap();

    let (fresh_users, fresh_roles) = stores(&db);
    let stored_role = fresh_roles.find_by_name("Admin").await.unwrap().unwrap();
    let stored_user = fresh_users.find_by_id(&alice.id).await.unwrap().unwrap();
    assert_eq!(stored_role.users, vec![alice.id.clone()]);
    assert_eq!(stored_user.roles, vec![stored_role.id.clone()]);

    // The caller's copy is still current.
    users.update(&mut alice).await.unwrap();
    users.remove_from_role(&mut alice, "Admin").await.unwrap();
    users.update(&mut alice).await.unwrap();

    let (fresh_users, fresh_roles) = stores(&db);
    let stored_role = fresh_roles.find_by_name("Admin").await.unwrap().unwrap();
    let stored_user = fresh_users.find_by_id(&alice.id).await.unwrap().unwrap();
    assert!(stored_role.users.is_empty());
    assert!(stored_user.roles.is_empty());
}

#[tokio::test]
async fn test_add_to_unknown_role_is_not_found() {
    let db = test_db().await;
    let (users, _) = stores(&db);

    let mut user = test_user("lonely@example.com");
    users.create(&mut user).await.unwrap();

    let err = users.add_to_role(&mut user, "Nope").await.unwrap_err();
    assert!(matches!(err, StoreError::NotFound(_)));
    assert!(users.users_in_role("Nope").await.unwrap().is_empty());
    assert!(!users.is_in_role(&user, "Nope").await.unwrap());
}

#[tokio::test]
async fn test_delete_user_leaves_role_membership() {
    let db = test_db().await;
    let (users, roles) = stores(&db);

    let mut role = Role::new("Editors");
    roles.create(&mut role).await.unwrap();
    let mut user = test_user("editor@example.com");
    users.create(&mut user).await.unwrap();
    users.add_to_role(&mut user, "Editors").await.unwrap();
    users.update(&mut user).await.unwrap();

    users.delete(&user).await.unwrap();

    assert!(users.users_in_role("Editors").await.unwrap().is_empty());
    let stored_role = roles.find_by_name("Editors").await.unwrap().unwrap();
    assert!(stored_role.users.is_empty());
}

// ═══════════════════════════════════════════════════════════════════════════
// VIEW REGISTRATION
// ═══════════════════════════════════════════════════════════════════════════

#[tokio::test]
async fn test_ensure_indexes_is_idempotent() {
    let db = docstore_identity::db::MemoryDb::new();
    let users = UserStore::new(open_session(&db));
    let claim = Claim::new("Region", "EU");

    let err = users.users_for_claim(&claim).await.unwrap_err();
    assert!(matches!(err, StoreError::Configuration(_)));

    let mut user = test_user("early@example.com");
    users.add_claims(&mut user, &[claim.clone()]);
    users.create(&mut user).await.unwrap();

    assert!(users.ensure_indexes().await.unwrap());
    assert!(!users.ensure_indexes().await.unwrap());

    // Users stored before the view existed are backfilled.
    assert_eq!(users.users_for_claim(&claim).await.unwrap().len(), 1);
}
