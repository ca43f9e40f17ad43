// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! User and role stores.
//!
//! Both stores work against a shared [`Session`](crate::db::Session). With
//! `auto_save_changes` on (the default) `create`, `update` and `delete`
//! commit the session themselves; otherwise the caller commits it.

pub mod role_store;
pub mod user_store;

pub use role_store::RoleStore;
pub use user_store::UserStore;

use crate::error::{StoreError, StoreResult};

pub(crate) fn require_non_empty(value: &str, what: &str) -> StoreResult<()> {
    if value.trim().is_empty() {
        return Err(StoreError::Validation(format!("{} is required", what)));
    }
    Ok(())
}

pub(crate) fn stale_stamp(kind: &str, id: &str) -> StoreError {
    StoreError::Concurrency(format!(
        "{} {} was modified since it was loaded",
        kind, id
    ))
}
