// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! App Engine Core - Task-run control plane
//!
//! Standalone process wiring the persistence backend selected by the database
//! URL, filesystem storage, the filesystem image registry and the in-process
//! scheduler.

use std::sync::Arc;

use anyhow::Result;
use sqlx::postgres::PgPoolOptions;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use tracing::{error, info};

use appengine_core::config::Config;
use appengine_core::migrations;
use appengine_core::persistence::{Persistence, PostgresPersistence, SqlitePersistence};
use appengine_core::registry::FileSystemRegistry;
use appengine_core::runtime::AppEngineRuntime;
use appengine_core::scheduler::InMemoryScheduler;
use appengine_core::storage::FileSystemStorage;

async fn connect(database_url: &str) -> Result<Arc<dyn Persistence>> {
    if database_url.starts_with("sqlite:") {
        let options: SqliteConnectOptions = database_url.parse()?;
        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(options.create_if_missing(true))
            .await?;

        info!("Running SQLite migrations...");
        migrations::run_sqlite(&pool).await?;
        return Ok(Arc::new(SqlitePersistence::new(pool)));
    }

    let pool = PgPoolOptions::new()
        .max_connections(10)
        .connect(database_url)
        .await?;

    let row: (i32,) = sqlx::query_as("SELECT 1").fetch_one(&pool).await?;
    info!(result = row.0, "Database health check passed");

    info!("Running PostgreSQL migrations...");
    migrations::run_postgres(&pool).await?;
    Ok(Arc::new(PostgresPersistence::new(pool)))
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file (from crate directory or parent directories)
    dotenvy::dotenv().ok();

    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("appengine_core=info".parse()?),
        )
        .init();

    info!("Starting App Engine Core");

    // Load configuration
    let config = Config::from_env().map_err(|e| {
        error!("Configuration error: {}", e);
        e
    })?;

    info!(
        storage = %config.storage_path.display(),
        registry = %config.registry_path.display(),
        charset = %config.storage_charset,
        inbox_capacity = config.inbox_capacity,
        "Configuration loaded"
    );

    // Connect to database
    info!("Connecting to database...");
    let persistence = connect(&config.database_url).await?;
    info!("Migrations completed");

    let runtime = AppEngineRuntime::builder()
        .persistence(persistence)
        .storage(Arc::new(FileSystemStorage::new(&config.storage_path)))
        .registry(Arc::new(FileSystemRegistry::new(&config.registry_path)))
        .scheduler(Arc::new(InMemoryScheduler::new()))
        .charset(config.storage_charset)
        .inbox_capacity(config.inbox_capacity)
        .max_bundle_size(config.max_bundle_size)
        .build()?
        .start()
        .await?;

    info!("App Engine Core initialized successfully");

    // Wait for shutdown signal
    tokio::signal::ctrl_c().await?;
    info!("Shutting down...");

    runtime.shutdown().await?;
    info!("Shutdown complete");

    Ok(())
}
