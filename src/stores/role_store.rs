// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Role persistence.

use crate::db::Session;
use crate::error::{StoreError, StoreResult};
use crate::index::unique::{
    load_by_unique, release_unique_records, sync_unique_records, UniqueFields,
};
use crate::models::{new_stamp, normalize_key, Claim, Role, User};
use crate::stores::{require_non_empty, stale_stamp};
use std::sync::Arc;

/// Unique property holding the normalized role name.
pub const NAME_PROPERTY: &str = "Name";

/// Unique fields of roles: the normalized name, case-insensitive.
pub fn default_role_unique_fields() -> UniqueFields<Role> {
    UniqueFields::<Role>::new().with(NAME_PROPERTY, true, normalized_name)
}

fn normalized_name(role: &Role) -> Option<&str> {
    role.normalized_name.as_deref()
}

/// Role store over a shared session.
pub struct RoleStore {
    session: Arc<Session>,
    unique_fields: UniqueFields<Role>,
    auto_save_changes: bool,
}

impl RoleStore {
    pub fn new(session: Arc<Session>) -> Self {
        Self {
            session,
            unique_fields: default_role_unique_fields(),
            auto_save_changes: true,
        }
    }

    pub fn with_unique_fields(mut self, unique_fields: UniqueFields<Role>) -> Self {
        self.unique_fields = unique_fields;
        self
    }

    pub fn with_auto_save_changes(mut self, enabled: bool) -> Self {
        self.auto_save_changes = enabled;
        self
    }

    pub fn session(&self) -> &Arc<Session> {
        &self.session
    }

    async fn save_changes(&self) -> StoreResult<()> {
        if self.auto_save_changes {
            self.session.save_changes().await?;
        }
        Ok(())
    }

    fn normalize(role: &mut Role) {
        role.normalized_name = Some(normalize_key(&role.name));
    }

    /// Persist a new role and claim its name.
    pub async fn create(&self, role: &mut Role) -> StoreResult<()> {
        require_non_empty(&role.name, "Role name")?;

        if role.id.is_empty() {
            role.id = self.session.conventions().generate_document_id::<Role>();
        }
        Self::normalize(role);
        if role.concurrency_stamp.is_empty() {
            role.concurrency_stamp = new_stamp();
        }

        sync_unique_records(&self.session, &self.unique_fields, None, role).await?;
        self.session.store(role)?;
        self.save_changes().await?;

        tracing::info!(role_id = %role.id, name = %role.name, "Role created");
        Ok(())
    }

    /// Persist changes to an existing role, rotating its concurrency stamp.
    pub async fn update(&self, role: &mut Role) -> StoreResult<()> {
        require_non_empty(&role.id, "Role id")?;
        require_non_empty(&role.name, "Role name")?;

        let stored: Role = self
            .session
            .load(&role.id)
            .await?
            .ok_or_else(|| StoreError::NotFound(format!("Role {} not found", role.id)))?;
        if stored.concurrency_stamp != role.concurrency_stamp {
            return Err(stale_stamp("Role", &role.id));
        }

        Self::normalize(role);
        sync_unique_records(&self.session, &self.unique_fields, Some(&stored), role).await?;
        role.concurrency_stamp = new_stamp();
        self.session.store(role)?;
        self.save_changes().await?;

        tracing::info!(role_id = %role.id, "Role updated");
        Ok(())
    }

    /// Delete a role, dropping it from its members' role sets.
    pub async fn delete(&self, role: &Role) -> StoreResult<()> {
        require_non_empty(&role.id, "Role id")?;

        let stored: Role = self
            .session
            .load(&role.id)
            .await?
            .ok_or_else(|| StoreError::NotFound(format!("Role {} not found", role.id)))?;
        if stored.concurrency_stamp != role.concurrency_stamp {
            return Err(stale_stamp("Role", &role.id));
        }

        let members: Vec<User> = self.session.load_many(&stored.users).await?;
        for mut member in members {
            member.roles.retain(|id| id != &stored.id);
            member.concurrency_stamp = new_stamp();
            self.session.store(&member)?;
        }

        self.session.delete(&stored.id);
        release_unique_records(&self.session, &self.unique_fields, &stored);
        self.save_changes().await?;

        tracing::info!(role_id = %stored.id, members = stored.users.len(), "Role deleted");
        Ok(())
    }

    pub async fn find_by_id(&self, role_id: &str) -> StoreResult<Option<Role>> {
        let id = self.session.conventions().full_document_id::<Role>(role_id);
        self.session.load(&id).await
    }

    /// Find a role by name, case-insensitively.
    pub async fn find_by_name(&self, name: &str) -> StoreResult<Option<Role>> {
        find_role_by_name(&self.session, &self.unique_fields, name).await
    }

    pub fn get_claims(&self, role: &Role) -> Vec<Claim> {
        role.claims.clone()
    }

    pub fn add_claim(&self, role: &mut Role, claim: Claim) {
        role.claims.push(claim);
    }

    /// Remove every claim matching type and value (case-insensitive).
    pub fn remove_claim(&self, role: &mut Role, claim: &Claim) {
        role.claims.retain(|c| !c.matches(claim));
    }
}

pub(crate) async fn find_role_by_name(
    session: &Session,
    unique_fields: &UniqueFields<Role>,
    name: &str,
) -> StoreResult<Option<Role>> {
    require_non_empty(name, "Role name")?;
    let role = load_by_unique(session, unique_fields, NAME_PROPERTY, &normalize_key(name)).await?;
    tracing::debug!(name, found = role.is_some(), "Role lookup by name");
    Ok(role)
}
