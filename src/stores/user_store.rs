// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! User persistence.
//!
//! Provides:
//! - Users (create/update/delete, lookup by id, user name and email)
//! - Claims and external logins, with reverse lookups through the
//!   ClaimsAndLogins view
//! - Role membership, kept consistent on both the user and the role

use crate::db::Session;
use crate::error::{StoreError, StoreResult};
use crate::index::claims_logins::{self, claim_term, login_term};
use crate::index::unique::{
    load_by_unique, release_unique_records, sync_unique_records, UniqueFields,
};
use crate::models::{new_stamp, normalize_key, Claim, Role, User, UserLoginInfo};
use crate::stores::role_store::{default_role_unique_fields, find_role_by_name};
use crate::stores::{require_non_empty, stale_stamp};
use std::sync::Arc;

/// Unique property holding the normalized user name.
pub const USER_NAME_PROPERTY: &str = "UserName";
/// Unique property holding the normalized email.
pub const EMAIL_PROPERTY: &str = "Email";

/// Unique fields of users: normalized user name and email, both
/// case-insensitive.
pub fn default_user_unique_fields() -> UniqueFields<User> {
    UniqueFields::<User>::new()
        .with(USER_NAME_PROPERTY, true, normalized_user_name)
        .with(EMAIL_PROPERTY, true, normalized_email)
}

fn normalized_user_name(user: &User) -> Option<&str> {
    user.normalized_user_name.as_deref()
}

fn normalized_email(user: &User) -> Option<&str> {
    user.normalized_email.as_deref()
}

/// User store over a shared session.
pub struct UserStore {
    session: Arc<Session>,
    unique_fields: UniqueFields<User>,
    role_unique_fields: UniqueFields<Role>,
    auto_save_changes: bool,
}

impl UserStore {
    pub fn new(session: Arc<Session>) -> Self {
        Self {
            session,
            unique_fields: default_user_unique_fields(),
            role_unique_fields: default_role_unique_fields(),
            auto_save_changes: true,
        }
    }

    pub fn with_unique_fields(mut self, unique_fields: UniqueFields<User>) -> Self {
        self.unique_fields = unique_fields;
        self
    }

    pub fn with_role_unique_fields(mut self, unique_fields: UniqueFields<Role>) -> Self {
        self.role_unique_fields = unique_fields;
        self
    }

    pub fn with_auto_save_changes(mut self, enabled: bool) -> Self {
        self.auto_save_changes = enabled;
        self
    }

    pub fn session(&self) -> &Arc<Session> {
        &self.session
    }

    /// Register the ClaimsAndLogins view. Returns `false` if it existed.
    pub async fn ensure_indexes(&self) -> StoreResult<bool> {
        claims_logins::create_claims_and_logins_index(
            self.session.client().as_ref(),
            self.session.conventions(),
        )
        .await
    }

    async fn save_changes(&self) -> StoreResult<()> {
        if self.auto_save_changes {
            self.session.save_changes().await?;
        }
        Ok(())
    }

    fn normalize(user: &mut User) {
        user.normalized_user_name = Some(normalize_key(&user.user_name));
        user.normalized_email = user
            .email
            .as_deref()
            .filter(|email| !email.is_empty())
            .map(normalize_key);
    }

    async fn load_for_write(&self, user: &User) -> StoreResult<User> {
        require_non_empty(&user.id, "User id")?;

        let stored: User = self
            .session
            .load(&user.id)
            .await?
            .ok_or_else(|| StoreError::NotFound(format!("User {} not found", user.id)))?;
        if stored.concurrency_stamp != user.concurrency_stamp {
            return Err(stale_stamp("User", &user.id));
        }
        Ok(stored)
    }

    // ─── Create / Update / Delete ────────────────────────────────

    /// Persist a new user and claim its user name and email.
    ///
    /// Fails with `StoreError::Conflict` if either is already taken.
    pub async fn create(&self, user: &mut User) -> StoreResult<()> {
        require_non_empty(&user.user_name, "User name")?;

        if user.id.is_empty() {
            user.id = self.session.conventions().generate_document_id::<User>();
        }
        Self::normalize(user);
        if user.concurrency_stamp.is_empty() {
            user.concurrency_stamp = new_stamp();
        }
        if user.security_stamp.is_none() {
            user.rotate_security_stamp();
        }

        sync_unique_records(&self.session, &self.unique_fields, None, user).await?;
        self.session.store(user)?;
        self.save_changes().await?;

        tracing::info!(user_id = %user.id, "User created");
        Ok(())
    }

    /// Persist changes to an existing user, rotating its concurrency stamp.
    ///
    /// Fails with `StoreError::Concurrency` if the user changed since the
    /// caller loaded it.
    pub async fn update(&self, user: &mut User) -> StoreResult<()> {
        require_non_empty(&user.user_name, "User name")?;
        let stored = self.load_for_write(user).await?;

        Self::normalize(user);
        sync_unique_records(&self.session, &self.unique_fields, Some(&stored), user).await?;
        user.concurrency_stamp = new_stamp();
        self.session.store(user)?;
        self.save_changes().await?;

        tracing::info!(user_id = %user.id, "User updated");
        Ok(())
    }

    /// Delete a user, dropping it from the member sets of its roles.
    pub async fn delete(&self, user: &User) -> StoreResult<()> {
        let stored = self.load_for_write(user).await?;

        let roles: Vec<Role> = self.session.load_many(&stored.roles).await?;
        for mut role in roles {
            role.users.retain(|id| id != &stored.id);
            role.concurrency_stamp = new_stamp();
            self.session.store(&role)?;
        }

        self.session.delete(&stored.id);
        release_unique_records(&self.session, &self.unique_fields, &stored);
        self.save_changes().await?;

        tracing::info!(user_id = %stored.id, "User deleted");
        Ok(())
    }

    // ─── Lookups ─────────────────────────────────────────────────

    pub async fn find_by_id(&self, user_id: &str) -> StoreResult<Option<User>> {
        let id = self.session.conventions().full_document_id::<User>(user_id);
        self.session.load(&id).await
    }

    /// Find a user by user name, case-insensitively.
    pub async fn find_by_name(&self, user_name: &str) -> StoreResult<Option<User>> {
        require_non_empty(user_name, "User name")?;
        load_by_unique(
            &self.session,
            &self.unique_fields,
            USER_NAME_PROPERTY,
            &normalize_key(user_name),
        )
        .await
    }

    /// Find a user by email, case-insensitively.
    pub async fn find_by_email(&self, email: &str) -> StoreResult<Option<User>> {
        require_non_empty(email, "Email")?;
        let user = load_by_unique(
            &self.session,
            &self.unique_fields,
            EMAIL_PROPERTY,
            &normalize_key(email),
        )
        .await?;
        tracing::debug!(found = user.is_some(), "User lookup by email");
        Ok(user)
    }

    // ─── Claims ──────────────────────────────────────────────────

    pub fn get_claims(&self, user: &User) -> Vec<Claim> {
        user.claims.clone()
    }

    pub fn add_claims(&self, user: &mut User, claims: &[Claim]) {
        user.claims.extend(claims.iter().cloned());
    }

    /// Replace every instance of `claim` with `new_claim`.
    pub fn replace_claim(&self, user: &mut User, claim: &Claim, new_claim: &Claim) {
        for existing in user.claims.iter_mut().filter(|c| c.matches(claim)) {
            *existing = new_claim.clone();
        }
    }

    /// Remove every instance of each claim (duplicates included).
    pub fn remove_claims(&self, user: &mut User, claims: &[Claim]) {
        user.claims
            .retain(|existing| !claims.iter().any(|c| existing.matches(c)));
    }

    /// Users holding `claim`.
    ///
    /// Answered from the ClaimsAndLogins view, which may lag recent writes.
    pub async fn users_for_claim(&self, claim: &Claim) -> StoreResult<Vec<User>> {
        let index = claims_logins::index_name(self.session.conventions());
        let users: Vec<User> = self
            .session
            .query_index(&index, &claim_term(claim))
            .await?;
        Ok(users
            .into_iter()
            .filter(|user| user.claims.iter().any(|c| c.matches(claim)))
            .collect())
    }

    // ─── Logins ──────────────────────────────────────────────────

    /// Bind an external login. Fails with `StoreError::Conflict` if the
    /// user already has this (provider, key).
    pub fn add_login(&self, user: &mut User, login: UserLoginInfo) -> StoreResult<()> {
        require_non_empty(&login.login_provider, "Login provider")?;
        require_non_empty(&login.provider_key, "Provider key")?;

        if user
            .logins
            .iter()
            .any(|l| l.is_for(&login.login_provider, &login.provider_key))
        {
            return Err(StoreError::Conflict(format!(
                "Login {} is already linked to user {}",
                login.login_provider, user.id
            )));
        }
        user.logins.push(login);
        Ok(())
    }

    pub fn remove_login(&self, user: &mut User, login_provider: &str, provider_key: &str) {
        user.logins
            .retain(|l| !l.is_for(login_provider, provider_key));
    }

    pub fn get_logins(&self, user: &User) -> Vec<UserLoginInfo> {
        user.logins.clone()
    }

    /// User bound to the external login, via the ClaimsAndLogins view.
    pub async fn find_by_login(
        &self,
        login_provider: &str,
        provider_key: &str,
    ) -> StoreResult<Option<User>> {
        require_non_empty(login_provider, "Login provider")?;
        require_non_empty(provider_key, "Provider key")?;

        let index = claims_logins::index_name(self.session.conventions());
        let users: Vec<User> = self
            .session
            .query_index(&index, &login_term(login_provider, provider_key))
            .await?;
        Ok(users.into_iter().find(|user| {
            user.logins
                .iter()
                .any(|l| l.is_for(login_provider, provider_key))
        }))
    }

    // ─── Roles ───────────────────────────────────────────────────

    async fn require_role(&self, role_name: &str) -> StoreResult<Role> {
        find_role_by_name(&self.session, &self.role_unique_fields, role_name)
            .await?
            .ok_or_else(|| StoreError::NotFound(format!("Role {} does not exist", role_name)))
    }

    /// Add the user to a role.
    ///
    /// The user's role set and the role's member set are queued in the
    /// session together, so whichever commit comes next writes both sides.
    pub async fn add_to_role(&self, user: &mut User, role_name: &str) -> StoreResult<()> {
        let mut stored = self.load_for_write(user).await?;
        let mut role = self.require_role(role_name).await?;

        if !role.users.contains(&user.id) {
            role.users.push(user.id.clone());
            role.concurrency_stamp = new_stamp();
            self.session.store(&role)?;
        }
        if !user.roles.contains(&role.id) {
            user.roles.push(role.id.clone());
        }
        if !stored.roles.contains(&role.id) {
            stored.roles.push(role.id.clone());
            self.store_membership(user, &mut stored)?;
        }

        tracing::debug!(user_id = %user.id, role_id = %role.id, "User added to role");
        Ok(())
    }

    /// Remove the user from a role, on both sides.
    pub async fn remove_from_role(&self, user: &mut User, role_name: &str) -> StoreResult<()> {
        let mut stored = self.load_for_write(user).await?;
        let mut role = self.require_role(role_name).await?;

        if role.users.contains(&user.id) {
            role.users.retain(|id| id != &user.id);
            role.concurrency_stamp = new_stamp();
            self.session.store(&role)?;
        }
        user.roles.retain(|id| id != &role.id);
        if stored.roles.contains(&role.id) {
            stored.roles.retain(|id| id != &role.id);
            self.store_membership(user, &mut stored)?;
        }

        tracing::debug!(user_id = %user.id, role_id = %role.id, "User removed from role");
        Ok(())
    }

    /// Queue the stored user with only its role set changed. The caller's
    /// copy takes the new stamp so a later `update` still matches.
    fn store_membership(&self, user: &mut User, stored: &mut User) -> StoreResult<()> {
        stored.concurrency_stamp = new_stamp();
        user.concurrency_stamp = stored.concurrency_stamp.clone();
        self.session.store(stored)
    }

    /// Names of the user's roles.
    pub async fn get_roles(&self, user: &User) -> StoreResult<Vec<String>> {
        let roles: Vec<Role> = self.session.load_many(&user.roles).await?;
        Ok(roles.into_iter().map(|role| role.name).collect())
    }

    pub async fn is_in_role(&self, user: &User, role_name: &str) -> StoreResult<bool> {
        let role = find_role_by_name(&self.session, &self.role_unique_fields, role_name).await?;
        Ok(role.is_some_and(|role| user.roles.contains(&role.id)))
    }

    /// Members of a role; empty if the role does not exist.
    pub async fn users_in_role(&self, role_name: &str) -> StoreResult<Vec<User>> {
        let Some(role) =
            find_role_by_name(&self.session, &self.role_unique_fields, role_name).await?
        else {
            return Ok(Vec::new());
        };
        self.session.load_many(&role.users).await
    }
}
