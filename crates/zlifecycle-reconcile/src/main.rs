// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! zlifecycle Reconciliation Server
//!
//! An HTTP server responsible for:
//! - Recording environment and component reconcile runs reported by executors
//! - Superseding abandoned runs and tracking durations
//! - Serving audit history, plan/apply logs and state files
//! - Streaming live updates and operator notifications

use std::sync::Arc;
use tracing::{info, warn};

use zlifecycle_reconcile::config::Config;
use zlifecycle_reconcile::migrations;
use zlifecycle_reconcile::object_store::FsObjectStore;
use zlifecycle_reconcile::runtime::{ReconcileRuntime, ReconcileRuntimeBuilder};
use zlifecycle_reconcile::store::{PostgresStore, SqliteStore};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "zlifecycle_reconcile=info".into()),
        )
        .init();

    // Load .env file if present
    if let Err(e) = dotenvy::dotenv() {
        warn!("No .env file loaded: {}", e);
    }

    let config = Config::from_env()?;

    info!(
        http_addr = %config.http_addr,
        bucket_namespace = %config.bucket_namespace(),
        object_store_dir = %config.object_store_dir.display(),
        "Starting zlifecycle reconciliation server"
    );

    let builder = if config.database_url.starts_with("sqlite:") {
        let store = Arc::new(SqliteStore::from_url(&config.database_url).await?);
        info!("Connected to SQLite database");
        ReconcileRuntime::builder().store(store)
    } else {
        let pool = sqlx::postgres::PgPoolOptions::new()
            .max_connections(10)
            .connect(&config.database_url)
            .await?;
        info!("Connected to database");

        migrations::run_postgres(&pool).await?;
        info!("Database migrations applied");

        ReconcileRuntime::builder().store(Arc::new(PostgresStore::new(pool)))
    };

    let runtime = configure(builder, &config).build()?.start().await?;

    info!(addr = %config.http_addr, "Reconciliation server ready");

    // Wait for shutdown signal
    tokio::signal::ctrl_c().await?;
    info!("Shutdown signal received");

    runtime.shutdown().await?;

    info!("zlifecycle reconciliation server shut down");

    Ok(())
}

fn configure(builder: ReconcileRuntimeBuilder, config: &Config) -> ReconcileRuntimeBuilder {
    builder
        .object_store(Arc::new(FsObjectStore::new(&config.object_store_dir)))
        .bucket_namespace(config.bucket_namespace())
        .heartbeat_interval(config.heartbeat_interval)
        .channel_capacity(config.channel_capacity)
        .bind_addr(config.http_addr)
}
