// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Uniqueness records shared between sessions and stores.

use docstore_identity::db::{DocumentClient, MemoryDb};
use docstore_identity::error::StoreError;
use docstore_identity::index::{escape_unique_value, load_by_unique, UniqueFields, UniqueIndex};
use docstore_identity::models::User;
use docstore_identity::stores::user_store::{default_user_unique_fields, EMAIL_PROPERTY};
use docstore_identity::stores::UserStore;
use std::sync::Arc;

mod common;
use common::{open_session, test_db};

#[tokio::test]
async fn test_concurrent_claims_have_one_winner() {
    let client: Arc<dyn DocumentClient> = Arc::new(MemoryDb::new());
    let unique = UniqueIndex::new(client);
    let token = escape_unique_value("race", true);

    let mut handles = Vec::new();
    for i in 0..16 {
        let unique = unique.clone();
        let token = token.clone();
        handles.push(tokio::spawn(async move {
            let owner = format!("IdentityUsers/{}", i);
            unique.put("IdentityUsers", "UserName", &token, &owner).await
        }));
    }

    let mut winners = 0;
    for handle in handles {
        match handle.await.unwrap() {
            Ok(()) => winners += 1,
            Err(StoreError::Conflict(_)) => {}
            Err(other) => panic!("unexpected error: {}", other),
        }
    }
    assert_eq!(winners, 1);
}

#[tokio::test]
async fn test_store_records_are_visible_through_the_index() {
    let db = test_db().await;
    let users = UserStore::new(open_session(&db));

    let mut user = User::new("Zoe").with_email("Zoe@Example.com");
    users.create(&mut user).await.unwrap();

    let client: Arc<dyn DocumentClient> = Arc::new(db.clone());
    let unique = UniqueIndex::new(client);
    let owner = unique
        .get(
            "IdentityUsers",
            EMAIL_PROPERTY,
            &escape_unique_value("ZOE@EXAMPLE.COM", true),
        )
        .await
        .unwrap();
    assert_eq!(owner, Some(user.id.clone()));

    let by_name = unique
        .get("IdentityUsers", "UserName", &escape_unique_value("zoe", true))
        .await
        .unwrap();
    assert_eq!(by_name, Some(user.id));
}

#[tokio::test]
async fn test_load_by_unique_rejects_undeclared_property() {
    let db = test_db().await;
    let session = open_session(&db);

    let err = load_by_unique(
        &session,
        &default_user_unique_fields(),
        "PhoneNumber",
        "555-0100",
    )
    .await
    .unwrap_err();
    assert!(matches!(err, StoreError::Configuration(_)));

    let err = load_by_unique(&session, &default_user_unique_fields(), EMAIL_PROPERTY, "")
        .await
        .unwrap_err();
    assert!(matches!(err, StoreError::Validation(_)));
}

#[tokio::test]
async fn test_custom_unique_field_is_enforced() {
    fn phone(user: &User) -> Option<&str> {
        user.phone_number.as_deref()
    }

    let db = test_db().await;
    let fields: UniqueFields<User> = default_user_unique_fields().with("PhoneNumber", false, phone);
    let users = UserStore::new(open_session(&db)).with_unique_fields(fields.clone());

    let mut first = User::new("first");
    first.phone_number = Some("+1 555 0100".to_string());
    users.create(&mut first).await.unwrap();

    let mut second = User::new("second");
    second.phone_number = Some("+1 555 0100".to_string());
    let err = users.create(&mut second).await.unwrap_err();
    assert!(matches!(err, StoreError::Conflict(_)));

    let session = open_session(&db);
    let found = load_by_unique(&session, &fields, "PhoneNumber", "+1 555 0100")
        .await
        .unwrap();
    assert_eq!(found.map(|u| u.id), Some(first.id));
}
