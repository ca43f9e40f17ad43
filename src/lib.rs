// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@kernel.org>

//! Docstore-Identity: user and role persistence over a document database
//!
//! This crate stores identity users and roles as JSON documents, enforces
//! uniqueness of user names, emails and role names through compare-exchange
//! records, and answers claim and external-login lookups from a
//! materialized view. A small HTTP API exposes the stores.

pub mod config;
pub mod db;
pub mod error;
pub mod index;
pub mod middleware;
pub mod models;
pub mod routes;
pub mod stores;

use config::Config;
use db::{Conventions, DocumentClient, Session};
use std::sync::Arc;
use stores::{RoleStore, UserStore};

/// Shared application state.
pub struct AppState {
    pub config: Config,
    pub db: Arc<dyn DocumentClient>,
    pub conventions: Arc<Conventions>,
}

impl AppState {
    pub fn new(config: Config, db: Arc<dyn DocumentClient>) -> Self {
        Self {
            config,
            db,
            conventions: Arc::new(Conventions::default()),
        }
    }

    /// A fresh unit of work; one per request.
    pub fn open_session(&self) -> Arc<Session> {
        Arc::new(
            Session::new(self.db.clone(), self.conventions.clone())
                .with_optimistic_concurrency(self.config.optimistic_concurrency),
        )
    }

    pub fn user_store(&self, session: &Arc<Session>) -> UserStore {
        UserStore::new(session.clone()).with_auto_save_changes(self.config.auto_save_changes)
    }

    pub fn role_store(&self, session: &Arc<Session>) -> RoleStore {
        RoleStore::new(session.clone()).with_auto_save_changes(self.config.auto_save_changes)
    }
}
