// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Docstore-Identity API Server
//!
//! Serves the user and role stores over HTTP, backed by the in-memory
//! database or by Firestore.

use anyhow::Context;
use docstore_identity::{
    config::{Backend, Config},
    db::{DocumentClient, MemoryDb},
    index::create_claims_and_logins_index,
    AppState,
};
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize structured JSON logging
    init_logging()?;

    let config = Config::from_env().context("Failed to load configuration")?;
    tracing::info!(
        port = config.port,
        backend = ?config.backend,
        "Starting Docstore-Identity API"
    );

    let db = connect(&config).await?;
    let state = AppState::new(config.clone(), db);

    let created = create_claims_and_logins_index(state.db.as_ref(), &state.conventions)
        .await
        .context("Failed to create ClaimsAndLogins index")?;
    tracing::info!(created, "ClaimsAndLogins index ready");

    let app = docstore_identity::routes::create_router(Arc::new(state));

    // Start server
    let addr = format!("0.0.0.0:{}", config.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    tracing::info!(address = %addr, "Server listening");

    axum::serve(listener, app).await?;
    Ok(())
}

async fn connect(config: &Config) -> anyhow::Result<Arc<dyn DocumentClient>> {
    match config.backend {
        Backend::Memory => {
            tracing::warn!("Using in-memory backend; data is lost on exit");
            Ok(Arc::new(MemoryDb::new()))
        }
        #[cfg(feature = "firestore")]
        Backend::Firestore => {
            let db = docstore_identity::db::FirestoreDb::new(&config.gcp_project_id)
                .await
                .context("Failed to connect to Firestore")?;
            Ok(Arc::new(db))
        }
        #[cfg(not(feature = "firestore"))]
        Backend::Firestore => {
            anyhow::bail!("Firestore backend requested but the firestore feature is disabled")
        }
    }
}

/// Initialize structured JSON logging.
fn init_logging() -> anyhow::Result<()> {
    let format = tracing_subscriber::fmt::layer()
        .json()
        .with_target(false)
        .with_current_span(true)
        .flatten_event(true);

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("docstore_identity=debug".parse()?)
                .add_directive("info".parse()?),
        )
        .with(format)
        .init();
    Ok(())
}
