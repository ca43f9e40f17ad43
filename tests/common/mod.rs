// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

use docstore_identity::config::Config;
use docstore_identity::db::{Conventions, DocumentClient, MemoryDb, Session};
use docstore_identity::index::create_claims_and_logins_index;
use docstore_identity::routes::create_router;
use docstore_identity::stores::{RoleStore, UserStore};
use docstore_identity::AppState;
use std::sync::Arc;

/// Check if emulator is available via environment variable.
#[allow(dead_code)]
pub fn emulator_available() -> bool {
    std::env::var("FIRESTORE_EMULATOR_HOST").is_ok()
}

/// Skip test with message if emulator not available.
#[macro_export]
macro_rules! require_emulator {
    () => {
        if !crate::common::emulator_available() {
            eprintln!("⚠️  Skipping: FIRESTORE_EMULATOR_HOST not set");
            return;
        }
    };
}

/// Fresh in-memory database with the ClaimsAndLogins view registered.
#[allow(dead_code)]
pub async fn test_db() -> MemoryDb {
    let db = MemoryDb::new();
    create_claims_and_logins_index(&db, &Conventions::default())
        .await
        .expect("Failed to create ClaimsAndLogins index");
    db
}

/// New session over `db` with default conventions.
#[allow(dead_code)]
pub fn open_session(db: &MemoryDb) -> Arc<Session> {
    let client: Arc<dyn DocumentClient> = Arc::new(db.clone());
    Arc::new(Session::new(client, Arc::new(Conventions::default())))
}

/// User and role stores sharing one session.
#[allow(dead_code)]
pub fn stores(db: &MemoryDb) -> (UserStore, RoleStore) {
    let session = open_session(db);
    (UserStore::new(session.clone()), RoleStore::new(session))
}

/// Unique suffix for test isolation.
#[allow(dead_code)]
pub fn unique_suffix() -> String {
    uuid::Uuid::new_v4().simple().to_string()
}

/// Create a test app over an in-memory database.
/// Returns the router and the shared state.
#[allow(dead_code)]
pub async fn create_test_app() -> (axum::Router, Arc<AppState>) {
    let db = test_db().await;
    let state = Arc::new(AppState::new(Config::test_default(), Arc::new(db)));
    (create_router(state.clone()), state)
}
