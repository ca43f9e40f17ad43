// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Unit of work over a [`DocumentClient`].
//!
//! A session remembers every document it has loaded together with the
//! version it saw, serves later loads of the same id from that identity
//! map (including its own pending writes), and queues writes until
//! [`Session::save_changes`] commits them as one batch. With optimistic
//! concurrency on, each queued write carries the version the session last
//! saw, so a document changed by another session fails the whole commit.
//!
//! Uniqueness records live outside the batch. Stores reserve them eagerly
//! and register follow-ups here: records to release once the commit
//! succeeds and records to release if it fails. A commit whose reserved
//! records no longer point at their owners fails with a conflict.

use crate::db::{Conventions, Document, DocumentClient, WriteOp};
use crate::error::{StoreError, StoreResult};
use crate::index::unique::release_record;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

struct Tracked {
    version: u64,
    body: Value,
}

enum Pending {
    Put(Value),
    Delete,
}

/// Compare-exchange record to delete if it still belongs to `owner`.
#[derive(Debug, Clone, PartialEq, Eq)]
struct Release {
    key: String,
    owner: String,
}

#[derive(Default)]
struct SessionState {
    tracked: HashMap<String, Tracked>,
    pending: HashMap<String, Pending>,
    release_after_commit: Vec<Release>,
    release_on_failure: Vec<Release>,
}

/// A request-scoped unit of work.
pub struct Session {
    client: Arc<dyn DocumentClient>,
    conventions: Arc<Conventions>,
    optimistic_concurrency: bool,
    state: Mutex<SessionState>,
}

impl Session {
    /// Open a session with optimistic concurrency enabled.
    pub fn new(client: Arc<dyn DocumentClient>, conventions: Arc<Conventions>) -> Self {
        Self {
            client,
            conventions,
            optimistic_concurrency: true,
            state: Mutex::new(SessionState::default()),
        }
    }

    pub fn with_optimistic_concurrency(mut self, enabled: bool) -> Self {
        self.optimistic_concurrency = enabled;
        self
    }

    pub fn client(&self) -> &Arc<dyn DocumentClient> {
        &self.client
    }

    pub fn conventions(&self) -> &Conventions {
        &self.conventions
    }

    pub fn optimistic_concurrency(&self) -> bool {
        self.optimistic_concurrency
    }

    fn state(&self) -> MutexGuard<'_, SessionState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Session view of a document: pending write first, then the identity map.
    /// `Some(None)` means the session knows the document is deleted.
    fn cached(&self, id: &str) -> Option<Option<Value>> {
        let state = self.state();
        match state.pending.get(id) {
            Some(Pending::Put(body)) => Some(Some(body.clone())),
            Some(Pending::Delete) => Some(None),
            None => state.tracked.get(id).map(|t| Some(t.body.clone())),
        }
    }

    /// Load a document by full id.
    pub async fn load<T: Document>(&self, id: &str) -> StoreResult<Option<T>> {
        if let Some(cached) = self.cached(id) {
            return cached
                .map(serde_json::from_value::<T>)
                .transpose()
                .map_err(Into::into);
        }

        let Some(doc) = self.client.load(id).await? else {
            return Ok(None);
        };

        let entity = serde_json::from_value(doc.body.clone())?;
        self.state().tracked.insert(
            doc.id,
            Tracked {
                version: doc.version,
                body: doc.body,
            },
        );
        Ok(Some(entity))
    }

    /// Load several documents, preserving the order of `ids` and skipping
    /// ids that do not exist.
    pub async fn load_many<T: Document>(&self, ids: &[String]) -> StoreResult<Vec<T>> {
        let missing: Vec<String> = ids
            .iter()
            .filter(|id| self.cached(id).is_none())
            .cloned()
            .collect();

        if !missing.is_empty() {
            let docs = self.client.load_many(&missing).await?;
            let mut state = self.state();
            for doc in docs {
                state.tracked.entry(doc.id).or_insert(Tracked {
                    version: doc.version,
                    body: doc.body,
                });
            }
        }

        let mut entities = Vec::with_capacity(ids.len());
        for id in ids {
            if let Some(Some(body)) = self.cached(id) {
                entities.push(serde_json::from_value(body)?);
            }
        }
        Ok(entities)
    }

    /// Forget a document so the next load reads it from the database.
    pub fn evict(&self, id: &str) {
        let mut state = self.state();
        state.tracked.remove(id);
        state.pending.remove(id);
    }

    /// Queue a put of `entity`.
    pub fn store<T: Document>(&self, entity: &T) -> StoreResult<()> {
        if entity.id().is_empty() {
            return Err(StoreError::Validation(
                "Cannot store a document without an id".to_string(),
            ));
        }

        let body = serde_json::to_value(entity)?;
        self.state()
            .pending
            .insert(entity.id().to_string(), Pending::Put(body));
        Ok(())
    }

    /// Queue a delete.
    pub fn delete(&self, id: &str) {
        self.state().pending.insert(id.to_string(), Pending::Delete);
    }

    pub fn has_changes(&self) -> bool {
        !self.state().pending.is_empty()
    }

    /// Delete the record `key` after the next successful commit, if it is
    /// still owned by `owner`.
    pub fn release_after_commit(&self, key: String, owner: String) {
        self.state()
            .release_after_commit
            .push(Release { key, owner });
    }

    /// Delete the record `key` if the next commit fails or the session is
    /// rolled back, if it is still owned by `owner`.
    pub fn release_on_failure(&self, key: String, owner: String) {
        self.state().release_on_failure.push(Release { key, owner });
    }

    /// Commit all queued writes atomically.
    ///
    /// A version mismatch fails the whole batch with
    /// `StoreError::Concurrency`; nothing is retried. Queued writes are
    /// consumed either way.
    pub async fn save_changes(&self) -> StoreResult<()> {
        let (writes, after_commit, on_failure) = {
            let mut state = self.state();
            let pending = std::mem::take(&mut state.pending);
            let after_commit = std::mem::take(&mut state.release_after_commit);
            let on_failure = std::mem::take(&mut state.release_on_failure);

            let writes: Vec<WriteOp> = pending
                .into_iter()
                .map(|(id, op)| {
                    let expected_version = self
                        .optimistic_concurrency
                        .then(|| state.tracked.get(&id).map(|t| t.version).unwrap_or(0));
                    match op {
                        Pending::Put(body) => WriteOp::Put {
                            id,
                            body,
                            expected_version,
                        },
                        Pending::Delete => WriteOp::Delete {
                            id,
                            expected_version: expected_version.filter(|v| *v != 0),
                        },
                    }
                })
                .collect();
            (writes, after_commit, on_failure)
        };

        if writes.is_empty() {
            self.run_releases(after_commit).await;
            return Ok(());
        }

        if let Err(err) = self.verify_reservations(&on_failure).await {
            self.run_releases(on_failure).await;
            return Err(err);
        }

        let write_count = writes.len();
        let committed: Vec<(String, Option<Value>)> = writes
            .iter()
            .map(|w| match w {
                WriteOp::Put { id, body, .. } => (id.clone(), Some(body.clone())),
                WriteOp::Delete { id, .. } => (id.clone(), None),
            })
            .collect();

        match self.client.commit(writes).await {
            Ok(versions) => {
                {
                    let mut state = self.state();
                    for (id, body) in committed {
                        match (body, versions.get(&id)) {
                            (Some(body), Some(version)) => {
                                state.tracked.insert(
                                    id,
                                    Tracked {
                                        version: *version,
                                        body,
                                    },
                                );
                            }
                            _ => {
                                state.tracked.remove(&id);
                            }
                        }
                    }
                }
                tracing::debug!(writes = write_count, "Session changes saved");
                self.run_releases(after_commit).await;
                Ok(())
            }
            Err(err) => {
                tracing::warn!(
                    error = %err,
                    compensations = on_failure.len(),
                    "Session commit failed, releasing reserved records"
                );
                self.run_releases(on_failure).await;
                Err(err)
            }
        }
    }

    /// Drop queued writes and release records reserved for them.
    pub async fn rollback(&self) {
        let on_failure = {
            let mut state = self.state();
            state.pending.clear();
            state.release_after_commit.clear();
            std::mem::take(&mut state.release_on_failure)
        };
        self.run_releases(on_failure).await;
    }

    /// Records reserved for this commit must still point at their owners;
    /// another session takes over a record whose owner was never committed.
    async fn verify_reservations(&self, reservations: &[Release]) -> StoreResult<()> {
        for reservation in reservations {
            let holder = self
                .client
                .get_compare_exchange(&reservation.key)
                .await?
                .map(|record| record.value);
            if holder.as_deref() != Some(reservation.owner.as_str()) {
                tracing::warn!(
                    key = %reservation.key,
                    owner = %reservation.owner,
                    "Reserved uniqueness record was taken over"
                );
                return Err(StoreError::Conflict(format!(
                    "Value for {} is already taken",
                    reservation.key
                )));
            }
        }
        Ok(())
    }

    async fn run_releases(&self, releases: Vec<Release>) {
        for release in releases {
            let released =
                release_record(self.client.as_ref(), &release.key, &release.owner).await;
            if let Err(err) = released {
                tracing::warn!(
                    key = %release.key,
                    owner = %release.owner,
                    error = %err,
                    "Failed to release uniqueness record"
                );
            }
        }
    }

    /// Documents of type `T` that emitted `term` into the named view.
    ///
    /// Views are maintained asynchronously by some backends; results may
    /// lag writes made moments ago.
    pub async fn query_index<T: Document>(
        &self,
        index_name: &str,
        term: &str,
    ) -> StoreResult<Vec<T>> {
        let ids = self.client.query_index(index_name, term).await?;
        self.load_many(&ids).await
    }
}
