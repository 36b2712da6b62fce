// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Storyline API Server
//!
//! Backend for writing, publishing and following multi-part stories.

use std::sync::Arc;
use std::time::Duration;
use storyline_api::{
    config::Config,
    db::FirestoreDb,
    services::{FeedAssembler, StorageService},
    AppState,
};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize structured JSON logging for GCP
    init_logging()?;

    // Load configuration from environment
    let config = Config::from_env()?;
    tracing::info!(port = config.port, "Starting Storyline API");

    // Initialize Firestore database
    let db = FirestoreDb::new(&config.gcp_project_id).await?;

    // Initialize Cloud Storage uploads
    let storage = StorageService::new(&config).await?;
    tracing::info!(bucket = %config.storage_bucket, "Storage service initialized");

    // Per-session feed de-duplication lives for the life of this instance
    let feed = FeedAssembler::new(Duration::from_secs(config.feed_session_ttl_secs));

    // Build shared state
    let state = Arc::new(AppState {
        config: config.clone(),
        db,
        storage,
        feed,
    });

    // Build router
    let app = storyline_api::routes::create_router(state);

    // Start server
    let addr = format!("0.0.0.0:{}", config.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    tracing::info!(address = %addr, "Server listening");

    axum::serve(listener, app).await?;
    Ok(())
}

/// Initialize structured JSON logging (GCP-compliant).
fn init_logging() -> Result<(), Box<dyn std::error::Error>> {
    let format = tracing_subscriber::fmt::layer()
        .json()
        .with_target(false)
        .with_current_span(true)
        .flatten_event(true);

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("storyline_api=debug".parse()?)
                .add_directive("info".parse()?),
        )
        .with(format)
        .init();
    Ok(())
}
