// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! In-process document backend.
//!
//! Used by the test suites, local development and the sample server when
//! no Firestore project is configured. Commits are serialized by a single
//! lock so that version checks and writes of one batch are atomic; reads
//! and compare-exchange operations go straight to the concurrent maps.

use crate::db::{
    CompareExchangeResult, CompareExchangeValue, DocumentClient, IndexDefinition,
    StoredDocument, WriteOp,
};
use crate::error::{StoreError, StoreResult};
use async_trait::async_trait;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

#[derive(Default)]
struct Inner {
    documents: DashMap<String, StoredDocument>,
    compare_exchange: DashMap<String, CompareExchangeValue>,
    indexes: DashMap<String, IndexDefinition>,
    /// index name -> document id -> terms
    index_entries: DashMap<String, HashMap<String, Vec<String>>>,
    next_index: AtomicU64,
    commit_lock: Mutex<()>,
}

/// In-memory database. Clones share the same data.
#[derive(Clone, Default)]
pub struct MemoryDb {
    inner: Arc<Inner>,
}

impl MemoryDb {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored documents.
    pub fn document_count(&self) -> usize {
        self.inner.documents.len()
    }

    /// Number of compare-exchange records.
    pub fn compare_exchange_count(&self) -> usize {
        self.inner.compare_exchange.len()
    }

    fn next_cmpxchg_index(&self) -> u64 {
        self.inner.next_index.fetch_add(1, Ordering::SeqCst) + 1
    }

    fn check_version(&self, write: &WriteOp) -> StoreResult<()> {
        let Some(expected) = write.expected_version() else {
            return Ok(());
        };

        let current = self
            .inner
            .documents
            .get(write.id())
            .map(|doc| doc.version)
            .unwrap_or(0);

        if current != expected {
            return Err(StoreError::Concurrency(format!(
                "Document {} is at version {}, expected {}",
                write.id(),
                current,
                expected
            )));
        }
        Ok(())
    }

    fn reindex(&self, doc: Option<&StoredDocument>, id: &str) {
        for definition in self.inner.indexes.iter() {
            if !definition.applies_to(id) {
                continue;
            }

            let mut entries = self
                .inner
                .index_entries
                .entry(definition.name.clone())
                .or_default();
            match doc {
                Some(doc) => {
                    entries.insert(id.to_string(), definition.terms_for(&doc.body));
                }
                None => {
                    entries.remove(id);
                }
            }
        }
    }
}

#[async_trait]
impl DocumentClient for MemoryDb {
    async fn load(&self, id: &str) -> StoreResult<Option<StoredDocument>> {
        Ok(self.inner.documents.get(id).map(|doc| doc.clone()))
    }

    async fn commit(&self, writes: Vec<WriteOp>) -> StoreResult<HashMap<String, u64>> {
        let _guard = self
            .inner
            .commit_lock
            .lock()
            .map_err(|_| StoreError::Database("Commit lock poisoned".to_string()))?;

        for write in &writes {
            self.check_version(write)?;
        }

        let mut versions = HashMap::new();
        for write in writes {
            match write {
                WriteOp::Put { id, body, .. } => {
                    let version = self
                        .inner
                        .documents
                        .get(&id)
                        .map(|doc| doc.version + 1)
                        .unwrap_or(1);
                    let doc = StoredDocument {
                        id: id.clone(),
                        version,
                        body,
                    };
                    self.reindex(Some(&doc), &id);
                    self.inner.documents.insert(id.clone(), doc);
                    versions.insert(id, version);
                }
                WriteOp::Delete { id, .. } => {
                    self.inner.documents.remove(&id);
                    self.reindex(None, &id);
                }
            }
        }

        tracing::debug!(writes = versions.len(), "Memory commit applied");
        Ok(versions)
    }

    async fn get_compare_exchange(&self, key: &str) -> StoreResult<Option<CompareExchangeValue>> {
        Ok(self.inner.compare_exchange.get(key).map(|v| v.clone()))
    }

    async fn put_compare_exchange(
        &self,
        key: &str,
        value: &str,
        expected_index: u64,
    ) -> StoreResult<CompareExchangeResult> {
        match self.inner.compare_exchange.entry(key.to_string()) {
            Entry::Occupied(mut existing) => {
                if existing.get().index != expected_index {
                    return Ok(CompareExchangeResult {
                        successful: false,
                        value: Some(existing.get().value.clone()),
                        index: existing.get().index,
                    });
                }
                let index = self.next_cmpxchg_index();
                existing.insert(CompareExchangeValue {
                    key: key.to_string(),
                    value: value.to_string(),
                    index,
                });
                Ok(CompareExchangeResult {
                    successful: true,
                    value: Some(value.to_string()),
                    index,
                })
            }
            Entry::Vacant(slot) => {
                if expected_index != 0 {
                    return Ok(CompareExchangeResult {
                        successful: false,
                        value: None,
                        index: 0,
                    });
                }
                let index = self.next_cmpxchg_index();
                slot.insert(CompareExchangeValue {
                    key: key.to_string(),
                    value: value.to_string(),
                    index,
                });
                Ok(CompareExchangeResult {
                    successful: true,
                    value: Some(value.to_string()),
                    index,
                })
            }
        }
    }

    async fn delete_compare_exchange(
        &self,
        key: &str,
        expected_index: u64,
    ) -> StoreResult<CompareExchangeResult> {
        match self.inner.compare_exchange.entry(key.to_string()) {
            Entry::Occupied(existing) if existing.get().index == expected_index => {
                let removed = existing.remove();
                Ok(CompareExchangeResult {
                    successful: true,
                    value: Some(removed.value),
                    index: removed.index,
                })
            }
            Entry::Occupied(existing) => Ok(CompareExchangeResult {
                successful: false,
                value: Some(existing.get().value.clone()),
                index: existing.get().index,
            }),
            Entry::Vacant(_) => Ok(CompareExchangeResult {
                successful: false,
                value: None,
                index: 0,
            }),
        }
    }

    async fn ensure_index(&self, definition: &IndexDefinition) -> StoreResult<bool> {
        let created = match self.inner.indexes.entry(definition.name.clone()) {
            Entry::Occupied(_) => false,
            Entry::Vacant(slot) => {
                slot.insert(definition.clone());
                true
            }
        };

        if created {
            // Backfill documents stored before the view existed.
            let _guard = self
                .inner
                .commit_lock
                .lock()
                .map_err(|_| StoreError::Database("Commit lock poisoned".to_string()))?;
            let entries: HashMap<String, Vec<String>> = self
                .inner
                .documents
                .iter()
                .filter(|doc| definition.applies_to(doc.key()))
                .map(|doc| (doc.key().clone(), definition.terms_for(&doc.body)))
                .collect();
            self.inner
                .index_entries
                .insert(definition.name.clone(), entries);
            tracing::info!(index = %definition.name, "Index created");
        }

        Ok(created)
    }

    async fn query_index(&self, index_name: &str, term: &str) -> StoreResult<Vec<String>> {
        if !self.inner.indexes.contains_key(index_name) {
            return Err(StoreError::Configuration(format!(
                "Index {} does not exist",
                index_name
            )));
        }

        let mut ids: Vec<String> = self
            .inner
            .index_entries
            .get(index_name)
            .map(|entries| {
                entries
                    .iter()
                    .filter(|(_, terms)| terms.iter().any(|t| t == term))
                    .map(|(id, _)| id.clone())
                    .collect()
            })
            .unwrap_or_default();
        ids.sort();
        Ok(ids)
    }
}
