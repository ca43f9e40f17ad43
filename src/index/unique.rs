// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Uniqueness records.
//!
//! Every value of a field declared unique is claimed by a compare-exchange
//! record at `UniqueExchangeValue/<collection>/<property>/<token>` whose
//! value is the owning document id. Creating the record is a single atomic
//! create-if-absent, so two writers racing for the same email cannot both
//! win. The record also serves exact-match lookups without a query.

use crate::db::collections;
use crate::db::{Document, DocumentClient, Session};
use crate::error::{StoreError, StoreResult};
use base64::{engine::general_purpose::URL_SAFE, Engine as _};
use std::fmt;
use std::sync::Arc;

/// Turn a raw value into a token safe to embed in a record key.
///
/// Case-insensitive values are lower-cased first. Values that survive
/// percent-encoding unchanged are used as-is; anything else is replaced by
/// the URL-safe base64 of its UTF-8 bytes.
pub fn escape_unique_value(value: &str, case_insensitive: bool) -> String {
    let value = if case_insensitive {
        value.to_lowercase()
    } else {
        value.to_string()
    };

    if urlencoding::encode(&value) == value.as_str() {
        value
    } else {
        URL_SAFE.encode(value.as_bytes())
    }
}

/// Record key for a (collection, property, token) triple.
pub fn unique_key(collection: &str, property: &str, token: &str) -> String {
    format!(
        "{}/{}/{}/{}",
        collections::UNIQUE_EXCHANGE_VALUE,
        collection.to_lowercase(),
        property.to_lowercase(),
        token
    )
}

/// A field declared unique for documents of type `T`.
pub struct UniqueField<T> {
    pub property: &'static str,
    pub case_insensitive: bool,
    pub accessor: fn(&T) -> Option<&str>,
}

impl<T> Clone for UniqueField<T> {
    fn clone(&self) -> Self {
        Self {
            property: self.property,
            case_insensitive: self.case_insensitive,
            accessor: self.accessor,
        }
    }
}

impl<T> fmt::Debug for UniqueField<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("UniqueField")
            .field("property", &self.property)
            .field("case_insensitive", &self.case_insensitive)
            .finish()
    }
}

impl<T> UniqueField<T> {
    /// Token for this field's current value on `entity`, if it has one.
    pub fn token_for(&self, entity: &T) -> Option<String> {
        (self.accessor)(entity)
            .filter(|value| !value.is_empty())
            .map(|value| escape_unique_value(value, self.case_insensitive))
    }
}

/// Registration table of the unique fields of `T`.
pub struct UniqueFields<T> {
    fields: Vec<UniqueField<T>>,
}

impl<T> Clone for UniqueFields<T> {
    fn clone(&self) -> Self {
        Self {
            fields: self.fields.clone(),
        }
    }
}

impl<T> fmt::Debug for UniqueFields<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list().entries(&self.fields).finish()
    }
}

impl<T> Default for UniqueFields<T> {
    fn default() -> Self {
        Self { fields: Vec::new() }
    }
}

impl<T> UniqueFields<T> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Declare `property` unique. Re-declaring a property replaces it.
    pub fn with(
        mut self,
        property: &'static str,
        case_insensitive: bool,
        accessor: fn(&T) -> Option<&str>,
    ) -> Self {
        self.fields.retain(|f| !f.property.eq_ignore_ascii_case(property));
        self.fields.push(UniqueField {
            property,
            case_insensitive,
            accessor,
        });
        self
    }

    pub fn get(&self, property: &str) -> Option<&UniqueField<T>> {
        self.fields
            .iter()
            .find(|f| f.property.eq_ignore_ascii_case(property))
    }

    pub fn iter(&self) -> impl Iterator<Item = &UniqueField<T>> {
        self.fields.iter()
    }
}

/// Direct access to uniqueness records.
#[derive(Clone)]
pub struct UniqueIndex {
    client: Arc<dyn DocumentClient>,
}

impl UniqueIndex {
    pub fn new(client: Arc<dyn DocumentClient>) -> Self {
        Self { client }
    }

    /// Claim `token` for `owner_id`.
    ///
    /// Succeeds if the record was created or already points at `owner_id`;
    /// fails with `StoreError::Conflict` if another owner holds it.
    pub async fn put(
        &self,
        collection: &str,
        property: &str,
        token: &str,
        owner_id: &str,
    ) -> StoreResult<()> {
        reserve_record(self.client.as_ref(), &unique_key(collection, property, token), owner_id)
            .await
            .map(|_| ())
    }

    /// Owner of `token`, if claimed.
    pub async fn get(
        &self,
        collection: &str,
        property: &str,
        token: &str,
    ) -> StoreResult<Option<String>> {
        Ok(self
            .client
            .get_compare_exchange(&unique_key(collection, property, token))
            .await?
            .map(|record| record.value))
    }

    /// Delete the record whoever owns it. Absent records are a no-op.
    pub async fn remove(&self, collection: &str, property: &str, token: &str) -> StoreResult<()> {
        let key = unique_key(collection, property, token);
        let Some(record) = self.client.get_compare_exchange(&key).await? else {
            return Ok(());
        };

        let result = self
            .client
            .delete_compare_exchange(&key, record.index)
            .await?;
        if !result.successful && result.value.is_some() {
            return Err(StoreError::Concurrency(format!(
                "Uniqueness record {} changed while being removed",
                key
            )));
        }
        Ok(())
    }

    /// Delete the record only if it still belongs to `owner_id`.
    pub async fn release(
        &self,
        collection: &str,
        property: &str,
        token: &str,
        owner_id: &str,
    ) -> StoreResult<bool> {
        release_record(
            self.client.as_ref(),
            &unique_key(collection, property, token),
            owner_id,
        )
        .await
    }
}

/// How a record came to belong to its owner.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Reservation {
    /// Created, or taken over, by this call.
    Created,
    /// Already pointed at the owner.
    Existing,
}

pub(crate) async fn reserve_record(
    client: &dyn DocumentClient,
    key: &str,
    owner_id: &str,
) -> StoreResult<Reservation> {
    let result = client.put_compare_exchange(key, owner_id, 0).await?;
    if result.successful {
        return Ok(Reservation::Created);
    }
    if result.value.as_deref() == Some(owner_id) {
        return Ok(Reservation::Existing);
    }

    tracing::debug!(key, owner = owner_id, "Unique value already claimed");
    Err(StoreError::Conflict(format!(
        "Value for {} is already taken",
        key
    )))
}

/// Take over `key` if the document it points at does not exist.
///
/// Records are reserved before their owner is committed, so a session
/// dropped in between leaves one behind. Returns `false` if the recorded
/// owner exists or the record changed while being examined.
pub(crate) async fn reclaim_orphaned_record(
    client: &dyn DocumentClient,
    key: &str,
    owner_id: &str,
) -> StoreResult<bool> {
    let Some(record) = client.get_compare_exchange(key).await? else {
        return Ok(client.put_compare_exchange(key, owner_id, 0).await?.successful);
    };
    if record.value == owner_id || client.load(&record.value).await?.is_some() {
        return Ok(false);
    }

    let result = client
        .put_compare_exchange(key, owner_id, record.index)
        .await?;
    if result.successful {
        tracing::info!(
            key,
            previous_owner = %record.value,
            owner = owner_id,
            "Reclaimed orphaned uniqueness record"
        );
    }
    Ok(result.successful)
}

/// Reserve `key`, reclaiming it when its recorded owner was never committed.
async fn claim_record(
    client: &dyn DocumentClient,
    key: &str,
    owner_id: &str,
) -> StoreResult<Reservation> {
    match reserve_record(client, key, owner_id).await {
        Err(StoreError::Conflict(message)) => {
            if reclaim_orphaned_record(client, key, owner_id).await? {
                Ok(Reservation::Created)
            } else {
                Err(StoreError::Conflict(message))
            }
        }
        other => other,
    }
}

pub(crate) async fn release_record(
    client: &dyn DocumentClient,
    key: &str,
    owner_id: &str,
) -> StoreResult<bool> {
    let Some(record) = client.get_compare_exchange(key).await? else {
        return Ok(false);
    };
    if record.value != owner_id {
        tracing::debug!(key, owner = owner_id, "Record owned by another document, keeping it");
        return Ok(false);
    }

    let result = client.delete_compare_exchange(key, record.index).await?;
    Ok(result.successful)
}

/// Load the document that owns `value` of the unique field `property`.
///
/// Fails with `StoreError::Configuration` if `property` was never declared
/// unique for `T`.
pub async fn load_by_unique<T: Document>(
    session: &Session,
    fields: &UniqueFields<T>,
    property: &str,
    value: &str,
) -> StoreResult<Option<T>> {
    let field = fields.get(property).ok_or_else(|| {
        StoreError::Configuration(format!(
            "{}.{} is not declared unique",
            T::TYPE_NAME,
            property
        ))
    })?;
    if value.is_empty() {
        return Err(StoreError::Validation(format!(
            "The unique value for {} cannot be empty",
            property
        )));
    }

    let token = escape_unique_value(value, field.case_insensitive);
    let key = unique_key(&session.conventions().prefix_for::<T>(), field.property, &token);
    let Some(record) = session.client().get_compare_exchange(&key).await? else {
        return Ok(None);
    };

    session.load(&record.value).await
}

/// Bring the records of `current` in line with the values it had in
/// `previous` (`None` for a new document).
///
/// New values are reserved immediately and released again if the session
/// fails to commit; replaced values are released after a successful commit.
/// A value whose record points at a document that was never committed is
/// taken over.
pub(crate) async fn sync_unique_records<T: Document>(
    session: &Session,
    fields: &UniqueFields<T>,
    previous: Option<&T>,
    current: &T,
) -> StoreResult<()> {
    let collection = session.conventions().prefix_for::<T>();
    let owner = current.id();
    let mut reserved: Vec<String> = Vec::new();
    let mut replaced: Vec<String> = Vec::new();

    for field in fields.iter() {
        let old_key = previous
            .and_then(|p| field.token_for(p))
            .map(|token| unique_key(&collection, field.property, &token));
        let new_key = field
            .token_for(current)
            .map(|token| unique_key(&collection, field.property, &token));
        if old_key == new_key {
            continue;
        }

        if let Some(key) = new_key {
            match claim_record(session.client().as_ref(), &key, owner).await {
                Ok(Reservation::Created) => reserved.push(key),
                // Held by this document already; a failed commit must not free it.
                Ok(Reservation::Existing) => {}
                Err(err) => {
                    for key in &reserved {
                        let _ = release_record(session.client().as_ref(), key, owner).await;
                    }
                    return Err(err);
                }
            }
        }
        if let Some(key) = old_key {
            replaced.push(key);
        }
    }

    for key in reserved {
        session.release_on_failure(key, owner.to_string());
    }
    for key in replaced {
        session.release_after_commit(key, owner.to_string());
    }
    Ok(())
}

/// Release every record held by `entity` once the session commits.
pub(crate) fn release_unique_records<T: Document>(
    session: &Session,
    fields: &UniqueFields<T>,
    entity: &T,
) {
    let collection = session.conventions().prefix_for::<T>();
    for field in fields.iter() {
        if let Some(token) = field.token_for(entity) {
            session.release_after_commit(
                unique_key(&collection, field.property, &token),
                entity.id().to_string(),
            );
        }
    }
}
