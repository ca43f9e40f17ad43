// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@kernel.org>

//! Data models for users, roles and their attached records.

pub mod claim;
pub mod role;
pub mod user;

pub use claim::{Claim, UserLoginInfo, UserToken};
pub use role::Role;
pub use user::User;

/// Canonical form used for case-insensitive names and emails.
pub fn normalize_key(value: &str) -> String {
    value.to_uppercase()
}

/// Fresh random value for security and concurrency stamps.
pub fn new_stamp() -> String {
    uuid::Uuid::new_v4().to_string()
}
