// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Firestore document backend.
//!
//! Layout:
//! - A document `Prefix/rest` lives in collection `Prefix` under the
//!   url-encoded id `rest`, wrapped in an envelope carrying its version
//!   and JSON body.
//! - Compare-exchange records live in `UniqueExchangeValue`, keyed by the
//!   url-encoded record key.
//! - View rows live in `IndexEntries` (one document per view and source
//!   document) and are written in the same transaction as the source.
//! - View definitions live in `IndexDefinitions`.

use crate::db::{
    collections, CompareExchangeResult, CompareExchangeValue, DocumentClient, IndexDefinition,
    StoredDocument, WriteOp,
};
use crate::error::{StoreError, StoreResult};
use async_trait::async_trait;
use dashmap::DashMap;
use firestore::errors::FirestoreError;
use firestore::{FirestoreConsistencySelector, FirestoreTransaction};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;

// Firestore limits a transaction to 500 writes; leave room for view rows.
const MAX_BATCH_WRITES: usize = 200;

const INDEX_ENTRIES: &str = "IndexEntries";
const INDEX_DEFINITIONS: &str = "IndexDefinitions";
const DEFAULT_COLLECTION: &str = "Documents";

#[derive(Debug, Clone, Serialize, Deserialize)]
struct DocumentEnvelope {
    id: String,
    version: i64,
    body: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct CompareExchangeRecord {
    key: String,
    value: String,
    index: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct IndexEntry {
    index: String,
    document_id: String,
    terms: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct IndexDefinitionRecord {
    name: String,
    definition: String,
}

/// Firestore database client.
#[derive(Clone)]
pub struct FirestoreDb {
    client: firestore::FirestoreDb,
    separator: char,
    indexes: Arc<DashMap<String, IndexDefinition>>,
}

impl FirestoreDb {
    /// Create a new Firestore client and load the registered views.
    ///
    /// For local development with emulator, set FIRESTORE_EMULATOR_HOST.
    pub async fn new(project_id: &str) -> StoreResult<Self> {
        let client = if std::env::var("FIRESTORE_EMULATOR_HOST").is_ok() {
            Self::create_emulator_client(project_id).await?
        } else {
            let client = firestore::FirestoreDb::new(project_id).await.map_err(|e| {
                StoreError::Database(format!("Failed to connect to Firestore: {}", e))
            })?;
            tracing::info!(project = project_id, "Connected to Firestore");
            client
        };

        let db = Self {
            client,
            separator: '/',
            indexes: Arc::new(DashMap::new()),
        };
        db.refresh_indexes().await?;
        Ok(db)
    }

    /// Use a different identity parts separator when splitting ids.
    pub fn with_separator(mut self, separator: char) -> Self {
        self.separator = separator;
        self
    }

    /// Create a Firestore client for the emulator with unauthenticated access.
    async fn create_emulator_client(project_id: &str) -> StoreResult<firestore::FirestoreDb> {
        tracing::info!("Using unauthenticated connection for Firestore Emulator");

        let token_source = gcloud_sdk::ExternalJwtFunctionSource::new(|| async {
            Ok(gcloud_sdk::Token {
                token_type: "Bearer".to_string(),
                token: gcloud_sdk::SecretValue::new(
                    "eyJhbGciOiJub25lIn0.eyJ1aWQiOiJ0ZXN0In0."
                        .to_string()
                        .into(),
                ),
                expiry: chrono::Utc::now() + chrono::Duration::hours(1),
            })
        });

        let options = firestore::FirestoreDbOptions::new(project_id.to_string());

        let client = firestore::FirestoreDb::with_options_token_source(
            options,
            gcloud_sdk::GCP_DEFAULT_SCOPES.clone(),
            gcloud_sdk::TokenSourceType::ExternalSource(Box::new(token_source)),
        )
        .await
        .map_err(|e| {
            StoreError::Database(format!("Failed to connect to Firestore Emulator: {}", e))
        })?;

        tracing::info!(
            project = project_id,
            "Connected to Firestore (Emulator/Unauthenticated)"
        );
        Ok(client)
    }

    /// Reload view definitions registered by any process.
    pub async fn refresh_indexes(&self) -> StoreResult<()> {
        let records: Vec<IndexDefinitionRecord> = self
            .client
            .fluent()
            .select()
            .from(INDEX_DEFINITIONS)
            .obj()
            .query()
            .await
            .map_err(StoreError::database)?;

        for record in records {
            let definition: IndexDefinition = serde_json::from_str(&record.definition)?;
            self.indexes.insert(definition.name.clone(), definition);
        }
        Ok(())
    }

    /// Split a document id into (collection, Firestore document id).
    fn locate(&self, id: &str) -> (String, String) {
        match id.split_once(self.separator) {
            Some((collection, rest)) if !collection.is_empty() => {
                (collection.to_string(), urlencoding::encode(rest).into_owned())
            }
            _ => (
                DEFAULT_COLLECTION.to_string(),
                urlencoding::encode(id).into_owned(),
            ),
        }
    }

    fn entry_id(index_name: &str, document_id: &str) -> String {
        urlencoding::encode(&format!("{}|{}", index_name, document_id)).into_owned()
    }

    fn cmpxchg_id(key: &str) -> String {
        urlencoding::encode(key).into_owned()
    }

    fn next_cmpxchg_index(previous: i64) -> i64 {
        (previous + 1).max(chrono::Utc::now().timestamp_micros())
    }

    async fn read_envelope(
        client: &firestore::FirestoreDb,
        collection: &str,
        doc_id: &str,
    ) -> StoreResult<Option<DocumentEnvelope>> {
        client
            .fluent()
            .select()
            .by_id_in(collection)
            .obj()
            .one(doc_id)
            .await
            .map_err(StoreError::database)
    }

    async fn read_cmpxchg(
        client: &firestore::FirestoreDb,
        key: &str,
    ) -> StoreResult<Option<CompareExchangeRecord>> {
        client
            .fluent()
            .select()
            .by_id_in(collections::UNIQUE_EXCHANGE_VALUE)
            .obj()
            .one(&Self::cmpxchg_id(key))
            .await
            .map_err(StoreError::database)
    }

    fn transactional_client(&self, transaction: &FirestoreTransaction<'_>) -> firestore::FirestoreDb {
        self.client
            .clone_with_consistency_selector(FirestoreConsistencySelector::Transaction(
                transaction.transaction_id().clone(),
            ))
    }

    fn add_index_writes(
        &self,
        transaction: &mut FirestoreTransaction<'_>,
        id: &str,
        body: Option<&serde_json::Value>,
    ) -> StoreResult<()> {
        for definition in self.indexes.iter() {
            if !definition.applies_to(id) {
                continue;
            }

            let entry_id = Self::entry_id(&definition.name, id);
            match body {
                Some(body) => {
                    let entry = IndexEntry {
                        index: definition.name.clone(),
                        document_id: id.to_string(),
                        terms: definition.terms_for(body),
                    };
                    self.client
                        .fluent()
                        .update()
                        .in_col(INDEX_ENTRIES)
                        .document_id(&entry_id)
                        .object(&entry)
                        .add_to_transaction(transaction)
                        .map_err(|e| {
                            StoreError::Database(format!(
                                "Failed to add index entry to transaction: {}",
                                e
                            ))
                        })?;
                }
                None => {
                    self.client
                        .fluent()
                        .delete()
                        .from(INDEX_ENTRIES)
                        .document_id(&entry_id)
                        .add_to_transaction(transaction)
                        .map_err(|e| {
                            StoreError::Database(format!(
                                "Failed to add index removal to transaction: {}",
                                e
                            ))
                        })?;
                }
            }
        }
        Ok(())
    }

    async fn backfill_index(&self, definition: &IndexDefinition) -> StoreResult<()> {
        let docs: Vec<DocumentEnvelope> = self
            .client
            .fluent()
            .select()
            .from(definition.collection.as_str())
            .obj()
            .query()
            .await
            .map_err(StoreError::database)?;

        for doc in &docs {
            let body: serde_json::Value = serde_json::from_str(&doc.body)?;
            let entry = IndexEntry {
                index: definition.name.clone(),
                document_id: doc.id.clone(),
                terms: definition.terms_for(&body),
            };
            let _: () = self
                .client
                .fluent()
                .update()
                .in_col(INDEX_ENTRIES)
                .document_id(Self::entry_id(&definition.name, &doc.id))
                .object(&entry)
                .execute()
                .await
                .map_err(StoreError::database)?;
        }

        tracing::info!(index = %definition.name, documents = docs.len(), "Index backfilled");
        Ok(())
    }
}

fn commit_error(err: FirestoreError) -> StoreError {
    match err {
        FirestoreError::DataConflictError(e) => {
            StoreError::Concurrency(format!("Transaction conflict: {}", e))
        }
        other => StoreError::Database(format!("Transaction commit failed: {}", other)),
    }
}

#[async_trait]
impl DocumentClient for FirestoreDb {
    async fn load(&self, id: &str) -> StoreResult<Option<StoredDocument>> {
        let (collection, doc_id) = self.locate(id);
        let Some(envelope) = Self::read_envelope(&self.client, &collection, &doc_id).await? else {
            return Ok(None);
        };

        Ok(Some(StoredDocument {
            id: envelope.id,
            version: u64::try_from(envelope.version).unwrap_or(0),
            body: serde_json::from_str(&envelope.body)?,
        }))
    }

    async fn commit(&self, writes: Vec<WriteOp>) -> StoreResult<HashMap<String, u64>> {
        if writes.len() > MAX_BATCH_WRITES {
            return Err(StoreError::Validation(format!(
                "A single commit is limited to {} writes, got {}",
                MAX_BATCH_WRITES,
                writes.len()
            )));
        }

        let mut transaction = self
            .client
            .begin_transaction()
            .await
            .map_err(|e| StoreError::Database(format!("Failed to begin transaction: {}", e)))?;
        let reader = self.transactional_client(&transaction);

        // Reads inside the transaction register the documents for conflict
        // detection, so the version checks hold until commit.
        let mut current_versions = HashMap::new();
        for write in &writes {
            let (collection, doc_id) = self.locate(write.id());
            let current = Self::read_envelope(&reader, &collection, &doc_id)
                .await?
                .map(|doc| u64::try_from(doc.version).unwrap_or(0))
                .unwrap_or(0);

            if let Some(expected) = write.expected_version() {
                if current != expected {
                    let _ = transaction.rollback().await;
                    return Err(StoreError::Concurrency(format!(
                        "Document {} is at version {}, expected {}",
                        write.id(),
                        current,
                        expected
                    )));
                }
            }
            current_versions.insert(write.id().to_string(), current);
        }

        let mut versions = HashMap::new();
        for write in &writes {
            let (collection, doc_id) = self.locate(write.id());
            match write {
                WriteOp::Put { id, body, .. } => {
                    let version = current_versions.get(id).copied().unwrap_or(0) + 1;
                    let envelope = DocumentEnvelope {
                        id: id.clone(),
                        version: i64::try_from(version).map_err(StoreError::database)?,
                        body: serde_json::to_string(body)?,
                    };
                    self.client
                        .fluent()
                        .update()
                        .in_col(&collection)
                        .document_id(&doc_id)
                        .object(&envelope)
                        .add_to_transaction(&mut transaction)
                        .map_err(|e| {
                            StoreError::Database(format!(
                                "Failed to add {} to transaction: {}",
                                id, e
                            ))
                        })?;
                    self.add_index_writes(&mut transaction, id, Some(body))?;
                    versions.insert(id.clone(), version);
                }
                WriteOp::Delete { id, .. } => {
                    self.client
                        .fluent()
                        .delete()
                        .from(collection.as_str())
                        .document_id(&doc_id)
                        .add_to_transaction(&mut transaction)
                        .map_err(|e| {
                            StoreError::Database(format!(
                                "Failed to add deletion of {} to transaction: {}",
                                id, e
                            ))
                        })?;
                    self.add_index_writes(&mut transaction, id, None)?;
                }
            }
        }

        transaction.commit().await.map_err(commit_error)?;

        tracing::debug!(writes = writes.len(), "Firestore commit applied");
        Ok(versions)
    }

    async fn get_compare_exchange(&self, key: &str) -> StoreResult<Option<CompareExchangeValue>> {
        Ok(Self::read_cmpxchg(&self.client, key)
            .await?
            .map(|record| CompareExchangeValue {
                key: record.key,
                value: record.value,
                index: u64::try_from(record.index).unwrap_or(0),
            }))
    }

    async fn put_compare_exchange(
        &self,
        key: &str,
        value: &str,
        expected_index: u64,
    ) -> StoreResult<CompareExchangeResult> {
        if expected_index == 0 {
            let record = CompareExchangeRecord {
                key: key.to_string(),
                value: value.to_string(),
                index: Self::next_cmpxchg_index(0),
            };
            let inserted: Result<CompareExchangeRecord, FirestoreError> = self
                .client
                .fluent()
                .insert()
                .into(collections::UNIQUE_EXCHANGE_VALUE)
                .document_id(Self::cmpxchg_id(key))
                .object(&record)
                .execute()
                .await;

            return match inserted {
                Ok(_) => Ok(CompareExchangeResult {
                    successful: true,
                    value: Some(record.value),
                    index: u64::try_from(record.index).unwrap_or(0),
                }),
                Err(FirestoreError::DataConflictError(_)) => {
                    let existing = self.get_compare_exchange(key).await?;
                    Ok(CompareExchangeResult {
                        successful: false,
                        index: existing.as_ref().map(|v| v.index).unwrap_or(0),
                        value: existing.map(|v| v.value),
                    })
                }
                Err(e) => Err(StoreError::database(e)),
            };
        }

        let mut transaction = self
            .client
            .begin_transaction()
            .await
            .map_err(|e| StoreError::Database(format!("Failed to begin transaction: {}", e)))?;
        let reader = self.transactional_client(&transaction);

        let current = Self::read_cmpxchg(&reader, key).await?;
        let current_index = current
            .as_ref()
            .map(|record| u64::try_from(record.index).unwrap_or(0))
            .unwrap_or(0);
        let current = match current {
            Some(current) if current_index == expected_index => current,
            other => {
                let _ = transaction.rollback().await;
                return Ok(CompareExchangeResult {
                    successful: false,
                    value: other.map(|record| record.value),
                    index: current_index,
                });
            }
        };

        let record = CompareExchangeRecord {
            key: key.to_string(),
            value: value.to_string(),
            index: Self::next_cmpxchg_index(current.index),
        };
        self.client
            .fluent()
            .update()
            .in_col(collections::UNIQUE_EXCHANGE_VALUE)
            .document_id(Self::cmpxchg_id(key))
            .object(&record)
            .add_to_transaction(&mut transaction)
            .map_err(StoreError::database)?;

        match transaction.commit().await {
            Ok(_) => Ok(CompareExchangeResult {
                successful: true,
                value: Some(record.value),
                index: u64::try_from(record.index).unwrap_or(0),
            }),
            Err(FirestoreError::DataConflictError(_)) => {
                let existing = self.get_compare_exchange(key).await?;
                Ok(CompareExchangeResult {
                    successful: false,
                    index: existing.as_ref().map(|v| v.index).unwrap_or(0),
                    value: existing.map(|v| v.value),
                })
            }
            Err(e) => Err(commit_error(e)),
        }
    }

    async fn delete_compare_exchange(
        &self,
        key: &str,
        expected_index: u64,
    ) -> StoreResult<CompareExchangeResult> {
        let mut transaction = self
            .client
            .begin_transaction()
            .await
            .map_err(|e| StoreError::Database(format!("Failed to begin transaction: {}", e)))?;
        let reader = self.transactional_client(&transaction);

        let Some(current) = Self::read_cmpxchg(&reader, key).await? else {
            let _ = transaction.rollback().await;
            return Ok(CompareExchangeResult {
                successful: false,
                value: None,
                index: 0,
            });
        };
        let current_index = u64::try_from(current.index).unwrap_or(0);
        if current_index != expected_index {
            let _ = transaction.rollback().await;
            return Ok(CompareExchangeResult {
                successful: false,
                value: Some(current.value),
                index: current_index,
            });
        }

        self.client
            .fluent()
            .delete()
            .from(collections::UNIQUE_EXCHANGE_VALUE)
            .document_id(Self::cmpxchg_id(key))
            .add_to_transaction(&mut transaction)
            .map_err(StoreError::database)?;

        match transaction.commit().await {
            Ok(_) => Ok(CompareExchangeResult {
                successful: true,
                value: Some(current.value),
                index: current_index,
            }),
            Err(FirestoreError::DataConflictError(_)) => {
                let existing = self.get_compare_exchange(key).await?;
                Ok(CompareExchangeResult {
                    successful: false,
                    index: existing.as_ref().map(|v| v.index).unwrap_or(0),
                    value: existing.map(|v| v.value),
                })
            }
            Err(e) => Err(commit_error(e)),
        }
    }

    async fn ensure_index(&self, definition: &IndexDefinition) -> StoreResult<bool> {
        let record = IndexDefinitionRecord {
            name: definition.name.clone(),
            definition: serde_json::to_string(definition)?,
        };
        let inserted: Result<IndexDefinitionRecord, FirestoreError> = self
            .client
            .fluent()
            .insert()
            .into(INDEX_DEFINITIONS)
            .document_id(urlencoding::encode(&definition.name).into_owned())
            .object(&record)
            .execute()
            .await;

        let created = match inserted {
            Ok(_) => true,
            Err(FirestoreError::DataConflictError(_)) => false,
            Err(e) => return Err(StoreError::database(e)),
        };

        self.indexes
            .insert(definition.name.clone(), definition.clone());
        if created {
            self.backfill_index(definition).await?;
            tracing::info!(index = %definition.name, "Index created");
        }
        Ok(created)
    }

    async fn query_index(&self, index_name: &str, term: &str) -> StoreResult<Vec<String>> {
        if !self.indexes.contains_key(index_name) {
            return Err(StoreError::Configuration(format!(
                "Index {} does not exist",
                index_name
            )));
        }

        let index_name = index_name.to_string();
        let term = term.to_string();
        let entries: Vec<IndexEntry> = self
            .client
            .fluent()
            .select()
            .from(INDEX_ENTRIES)
            .filter(move |q| {
                q.for_all([
                    q.field("index").eq(index_name.clone()),
                    q.field("terms").array_contains(term.clone()),
                ])
            })
            .obj()
            .query()
            .await
            .map_err(StoreError::database)?;

        let mut ids: Vec<String> = entries.into_iter().map(|entry| entry.document_id).collect();
        ids.sort();
        Ok(ids)
    }
}
