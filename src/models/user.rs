// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! User model for storage.

use crate::db::Document;
use crate::models::{new_stamp, Claim, UserLoginInfo, UserToken};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;

/// User document.
///
/// Stored at `IdentityUsers/{guid}` under the default conventions.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct User {
    /// Full document id, empty until created
    pub id: String,
    pub user_name: String,
    pub normalized_user_name: Option<String>,
    pub email: Option<String>,
    pub normalized_email: Option<String>,
    pub email_confirmed: bool,
    /// Salted hash produced by the caller; never interpreted here
    pub password_hash: Option<String>,
    /// Must change whenever the user's credentials change
    pub security_stamp: Option<String>,
    /// Rotated on every persisted update
    pub concurrency_stamp: String,
    pub phone_number: Option<String>,
    pub phone_number_confirmed: bool,
    pub two_factor_enabled: bool,
    /// End of the current lockout (UTC); a past value means not locked out
    pub lockout_end: Option<DateTime<Utc>>,
    pub lockout_enabled: bool,
    pub access_failed_count: i32,
    /// Ids of the roles this user belongs to
    pub roles: Vec<String>,
    pub claims: Vec<Claim>,
    pub logins: Vec<UserLoginInfo>,
    pub tokens: Vec<UserToken>,
    /// Application-specific fields persisted alongside the user
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Document for User {
    const TYPE_NAME: &'static str = "IdentityUser";

    fn id(&self) -> &str {
        &self.id
    }

    fn set_id(&mut self, id: String) {
        self.id = id;
    }
}

impl fmt::Display for User {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.user_name)
    }
}

impl User {
    pub fn new(user_name: impl Into<String>) -> Self {
        Self {
            user_name: user_name.into(),
            lockout_enabled: true,
            ..Default::default()
        }
    }

    pub fn with_email(mut self, email: impl Into<String>) -> Self {
        self.email = Some(email.into());
        self
    }

    // ─── Password / Security Stamp ───────────────────────────────

    pub fn has_password(&self) -> bool {
        self.password_hash.as_deref().is_some_and(|h| !h.is_empty())
    }

    pub fn set_password_hash(&mut self, password_hash: Option<String>) {
        self.password_hash = password_hash;
    }

    pub fn rotate_security_stamp(&mut self) {
        self.security_stamp = Some(new_stamp());
    }

    // ─── Lockout ─────────────────────────────────────────────────

    /// Locked out when lockout is enabled and the lockout end lies after `now`.
    pub fn is_locked_out(&self, now: DateTime<Utc>) -> bool {
        self.lockout_enabled && self.lockout_end.is_some_and(|end| end > now)
    }

    /// Record a failed access attempt and return the new count.
    pub fn increment_access_failed_count(&mut self) -> i32 {
        self.access_failed_count = self.access_failed_count.saturating_add(1);
        self.access_failed_count
    }

    pub fn reset_access_failed_count(&mut self) {
        self.access_failed_count = 0;
    }

    // ─── Authentication Tokens ───────────────────────────────────

    /// Set a token, replacing any existing one for (provider, name).
    pub fn set_token(&mut self, login_provider: &str, name: &str, value: impl Into<String>) {
        let value = value.into();
        match self
            .tokens
            .iter_mut()
            .find(|t| t.login_provider == login_provider && t.name == name)
        {
            Some(token) => token.value = value,
            None => self.tokens.push(UserToken {
                login_provider: login_provider.to_string(),
                name: name.to_string(),
                value,
            }),
        }
    }

    pub fn remove_token(&mut self, login_provider: &str, name: &str) {
        self.tokens
            .retain(|t| !(t.login_provider == login_provider && t.name == name));
    }

    pub fn get_token(&self, login_provider: &str, name: &str) -> Option<&str> {
        self.tokens
            .iter()
            .find(|t| t.login_provider == login_provider && t.name == name)
            .map(|t| t.value.as_str())
    }
}
