// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Database layer.
//!
//! The stores talk to the database only through [`DocumentClient`]: load
//! by id, atomic version-checked commits, compare-exchange records and
//! materialized views. [`memory::MemoryDb`] is the in-process backend;
//! the `firestore` feature adds a Google Firestore backend.

pub mod conventions;
#[cfg(feature = "firestore")]
pub mod firestore;
pub mod memory;
pub mod session;
pub mod view;

pub use conventions::{Conventions, Document};
#[cfg(feature = "firestore")]
pub use firestore::FirestoreDb;
pub use memory::MemoryDb;
pub use session::Session;
pub use view::{IndexDefinition, IndexProjection};

use crate::error::StoreResult;
use async_trait::async_trait;
use futures_util::{stream, StreamExt, TryStreamExt};
use serde_json::Value;
use std::collections::HashMap;

const MAX_CONCURRENT_DB_OPS: usize = 50;

/// Collection names as constants.
pub mod collections {
    /// Prefix of every uniqueness record key.
    pub const UNIQUE_EXCHANGE_VALUE: &str = "UniqueExchangeValue";
}

/// A document as persisted: id, backend version and JSON body.
#[derive(Debug, Clone, PartialEq)]
pub struct StoredDocument {
    pub id: String,
    pub version: u64,
    pub body: Value,
}

/// One write in an atomic batch.
///
/// `expected_version` of `Some(0)` requires the document not to exist,
/// `Some(v)` requires it to be at version `v`, `None` writes unconditionally.
#[derive(Debug, Clone, PartialEq)]
pub enum WriteOp {
    Put {
        id: String,
        body: Value,
        expected_version: Option<u64>,
    },
    Delete {
        id: String,
        expected_version: Option<u64>,
    },
}

impl WriteOp {
    pub fn id(&self) -> &str {
        match self {
            WriteOp::Put { id, .. } | WriteOp::Delete { id, .. } => id,
        }
    }

    pub fn expected_version(&self) -> Option<u64> {
        match self {
            WriteOp::Put {
                expected_version, ..
            }
            | WriteOp::Delete {
                expected_version, ..
            } => *expected_version,
        }
    }
}

/// A compare-exchange record and its modification index.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompareExchangeValue {
    pub key: String,
    pub value: String,
    pub index: u64,
}

/// Outcome of a compare-exchange put or delete.
///
/// On failure `value`/`index` describe the record that prevented the write.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompareExchangeResult {
    pub successful: bool,
    pub value: Option<String>,
    pub index: u64,
}

/// The operations the stores need from a document database.
#[async_trait]
pub trait DocumentClient: Send + Sync {
    /// Load a single document.
    async fn load(&self, id: &str) -> StoreResult<Option<StoredDocument>>;

    /// Load several documents, skipping ids that do not exist.
    async fn load_many(&self, ids: &[String]) -> StoreResult<Vec<StoredDocument>> {
        let docs: Vec<Option<StoredDocument>> = stream::iter(ids.iter().cloned())
            .map(|id| async move { self.load(&id).await })
            .buffered(MAX_CONCURRENT_DB_OPS)
            .try_collect()
            .await?;
        Ok(docs.into_iter().flatten().collect())
    }

    /// Apply all writes atomically or none of them.
    ///
    /// Fails with `StoreError::Concurrency` when any expected version does
    /// not match. Returns the new version of every document put.
    async fn commit(&self, writes: Vec<WriteOp>) -> StoreResult<HashMap<String, u64>>;

    async fn get_compare_exchange(&self, key: &str) -> StoreResult<Option<CompareExchangeValue>>;

    /// Atomically set `key` to `value` if its index equals `expected_index`.
    /// An `expected_index` of 0 creates the record only if it is absent.
    async fn put_compare_exchange(
        &self,
        key: &str,
        value: &str,
        expected_index: u64,
    ) -> StoreResult<CompareExchangeResult>;

    /// Atomically delete `key` if its index equals `expected_index`.
    async fn delete_compare_exchange(
        &self,
        key: &str,
        expected_index: u64,
    ) -> StoreResult<CompareExchangeResult>;

    /// Register a view. Returns `false` if it already existed.
    async fn ensure_index(&self, definition: &IndexDefinition) -> StoreResult<bool>;

    /// Ids of the documents that emitted `term` into the named view.
    async fn query_index(&self, index_name: &str, term: &str) -> StoreResult<Vec<String>>;
}
