// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Embeddable runtime for zlifecycle-reconcile.
//!
//! [`ReconcileRuntime`] wires the engine services to a store and object
//! store, starts the heartbeat publisher and (with the `http` feature and a
//! bind address) the HTTP API, and shuts both down gracefully.
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use zlifecycle_reconcile::object_store::FsObjectStore;
//! use zlifecycle_reconcile::runtime::ReconcileRuntime;
//! use zlifecycle_reconcile::store::PostgresStore;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let pool = sqlx::PgPool::connect("postgres://...").await?;
//!     let store = Arc::new(PostgresStore::new(pool));
//!
//!     let runtime = ReconcileRuntime::builder()
//!         .store(store)
//!         .object_store(Arc::new(FsObjectStore::new(".data/objects")))
//!         .bind_addr("0.0.0.0:3000".parse()?)
//!         .build()?
//!         .start()
//!         .await?;
//!
//!     runtime.shutdown().await?;
//!     Ok(())
//! }
//! ```

#[cfg(feature = "http")]
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use tokio::sync::Notify;
#[cfg(feature = "http")]
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{error, info};

use crate::engine::ReconcileEngine;
use crate::heartbeat::{HeartbeatConfig, HeartbeatPublisher};
use crate::logs::BucketNaming;
use crate::notify::NotificationHub;
use crate::object_store::ObjectStore;
use crate::store::{NotificationStore, RunStore};

/// Builder for creating a [`ReconcileRuntime`].
pub struct ReconcileRuntimeBuilder {
    run_store: Option<Arc<dyn RunStore>>,
    notification_store: Option<Arc<dyn NotificationStore>>,
    object_store: Option<Arc<dyn ObjectStore>>,
    bucket_namespace: String,
    heartbeat_interval: Duration,
    channel_capacity: usize,
    #[cfg(feature = "http")]
    bind_addr: Option<SocketAddr>,
}

impl Default for ReconcileRuntimeBuilder {
    fn default() -> Self {
        Self {
            run_store: None,
            notification_store: None,
            object_store: None,
            bucket_namespace: "zlifecycle-multitenant".to_string(),
            heartbeat_interval: Duration::from_secs(20),
            channel_capacity: 256,
            #[cfg(feature = "http")]
            bind_addr: None,
        }
    }
}

impl ReconcileRuntimeBuilder {
    /// Create a new builder with default settings.
    pub fn new() -> Self {
        Self::default()
    }

    /// Use one store for both run history and notifications.
    pub fn store<S>(mut self, store: Arc<S>) -> Self
    where
        S: RunStore + NotificationStore + 'static,
    {
        let run_store: Arc<dyn RunStore> = store.clone();
        let notification_store: Arc<dyn NotificationStore> = store;
        self.run_store = Some(run_store);
        self.notification_store = Some(notification_store);
        self
    }

    /// Set the run history store (required unless [`store`](Self::store) is used).
    pub fn run_store(mut self, store: Arc<dyn RunStore>) -> Self {
        self.run_store = Some(store);
        self
    }

    /// Set the notification store (required unless [`store`](Self::store) is used).
    pub fn notification_store(mut self, store: Arc<dyn NotificationStore>) -> Self {
        self.notification_store = Some(store);
        self
    }

    /// Set the object store holding logs and state files (required).
    pub fn object_store(mut self, store: Arc<dyn ObjectStore>) -> Self {
        self.object_store = Some(store);
        self
    }

    /// Set the bucket namespace, `<prefix>-<deployment environment>`.
    ///
    /// Default: `zlifecycle-multitenant`
    pub fn bucket_namespace(mut self, namespace: impl Into<String>) -> Self {
        self.bucket_namespace = namespace.into();
        self
    }

    /// Set the heartbeat period.
    ///
    /// Default: 20 seconds
    pub fn heartbeat_interval(mut self, interval: Duration) -> Self {
        self.heartbeat_interval = interval;
        self
    }

    /// Set the per-class broadcast buffer.
    ///
    /// Default: 256
    pub fn channel_capacity(mut self, capacity: usize) -> Self {
        self.channel_capacity = capacity;
        self
    }

    /// Serve the HTTP API on this address. Without it no server is started.
    #[cfg(feature = "http")]
    pub fn bind_addr(mut self, addr: SocketAddr) -> Self {
        self.bind_addr = Some(addr);
        self
    }

    /// Build the runtime configuration.
    ///
    /// Returns an error if required fields are missing.
    pub fn build(self) -> Result<ReconcileRuntimeConfig> {
        let run_store = self
            .run_store
            .ok_or_else(|| anyhow::anyhow!("run_store is required"))?;
        let notification_store = self
            .notification_store
            .ok_or_else(|| anyhow::anyhow!("notification_store is required"))?;
        let object_store = self
            .object_store
            .ok_or_else(|| anyhow::anyhow!("object_store is required"))?;

        if self.heartbeat_interval.is_zero() {
            anyhow::bail!("heartbeat_interval must be positive");
        }
        if self.channel_capacity == 0 {
            anyhow::bail!("channel_capacity must be positive");
        }

        Ok(ReconcileRuntimeConfig {
            run_store,
            notification_store,
            object_store,
            bucket_namespace: self.bucket_namespace,
            heartbeat_interval: self.heartbeat_interval,
            channel_capacity: self.channel_capacity,
            #[cfg(feature = "http")]
            bind_addr: self.bind_addr,
        })
    }
}

/// Configuration for a [`ReconcileRuntime`].
pub struct ReconcileRuntimeConfig {
    run_store: Arc<dyn RunStore>,
    notification_store: Arc<dyn NotificationStore>,
    object_store: Arc<dyn ObjectStore>,
    bucket_namespace: String,
    heartbeat_interval: Duration,
    channel_capacity: usize,
    #[cfg(feature = "http")]
    bind_addr: Option<SocketAddr>,
}

impl ReconcileRuntimeConfig {
    /// Start the runtime, spawning the heartbeat publisher and HTTP server.
    pub async fn start(self) -> Result<ReconcileRuntime> {
        let hub = NotificationHub::new(self.channel_capacity);
        let engine = Arc::new(ReconcileEngine::new(
            self.run_store,
            self.notification_store,
            self.object_store,
            BucketNaming::new(self.bucket_namespace),
            hub.clone(),
        ));

        let heartbeat = HeartbeatPublisher::new(
            hub,
            HeartbeatConfig {
                interval: self.heartbeat_interval,
            },
        );
        let heartbeat_shutdown = heartbeat.shutdown_handle();
        let heartbeat_handle = tokio::spawn(async move {
            heartbeat.run().await;
        });

        #[cfg(feature = "http")]
        let server = match self.bind_addr {
            Some(addr) => Some(start_http_server(addr, engine.clone()).await?),
            None => None,
        };

        info!(
            heartbeat_interval_secs = self.heartbeat_interval.as_secs(),
            channel_capacity = self.channel_capacity,
            "ReconcileRuntime started"
        );

        Ok(ReconcileRuntime {
            engine,
            heartbeat_handle,
            heartbeat_shutdown,
            #[cfg(feature = "http")]
            server,
        })
    }
}

#[cfg(feature = "http")]
struct HttpServer {
    handle: JoinHandle<Result<()>>,
    shutdown_tx: watch::Sender<bool>,
    local_addr: SocketAddr,
}

#[cfg(feature = "http")]
async fn start_http_server(addr: SocketAddr, engine: Arc<ReconcileEngine>) -> Result<HttpServer> {
    let listener = tokio::net::TcpListener::bind(addr).await?;
    let local_addr = listener.local_addr()?;
    let (shutdown_tx, mut shutdown_rx) = watch::channel(false);
    let app = crate::api::router(engine);

    let handle = tokio::spawn(async move {
        axum::serve(listener, app)
            .with_graceful_shutdown(async move {
                let _ = shutdown_rx.changed().await;
            })
            .await?;
        Ok(())
    });

    info!(addr = %local_addr, "HTTP API listening");

    Ok(HttpServer {
        handle,
        shutdown_tx,
        local_addr,
    })
}

/// A running reconciliation engine.
///
/// Call [`shutdown`](Self::shutdown) for graceful termination.
pub struct ReconcileRuntime {
    engine: Arc<ReconcileEngine>,
    heartbeat_handle: JoinHandle<()>,
    heartbeat_shutdown: Arc<Notify>,
    #[cfg(feature = "http")]
    server: Option<HttpServer>,
}

impl ReconcileRuntime {
    /// Create a new builder for configuring the runtime.
    pub fn builder() -> ReconcileRuntimeBuilder {
        ReconcileRuntimeBuilder::new()
    }

    /// The engine services.
    pub fn engine(&self) -> &Arc<ReconcileEngine> {
        &self.engine
    }

    /// Address the HTTP API is bound to, if it was started.
    #[cfg(feature = "http")]
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.server.as_ref().map(|s| s.local_addr)
    }

    /// Gracefully shut down the runtime.
    ///
    /// Signals the heartbeat publisher and HTTP server to stop, then waits
    /// for them to complete.
    pub async fn shutdown(self) -> Result<()> {
        info!("ReconcileRuntime shutting down...");

        self.heartbeat_shutdown.notify_one();
        self.engine.hub().close();

        #[cfg(feature = "http")]
        if let Some(server) = &self.server {
            let _ = server.shutdown_tx.send(true);
        }

        if let Err(e) = self.heartbeat_handle.await {
            error!("Heartbeat publisher task panicked: {}", e);
        }

        #[cfg(feature = "http")]
        if let Some(server) = self.server {
            match server.handle.await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => {
                    error!("HTTP server error during shutdown: {}", e);
                    return Err(e);
                }
                Err(e) => {
                    error!("HTTP server task panicked: {}", e);
                    return Err(anyhow::anyhow!("server task panicked: {}", e));
                }
            }
        }

        info!("ReconcileRuntime shutdown complete");
        Ok(())
    }

    /// Check if the runtime is still running.
    pub fn is_running(&self) -> bool {
        #[cfg(feature = "http")]
        let server_running = self
            .server
            .as_ref()
            .is_none_or(|s| !s.handle.is_finished());
        #[cfg(not(feature = "http"))]
        let server_running = true;

        !self.heartbeat_handle.is_finished() && server_running
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::object_store::MemoryObjectStore;
    use crate::store::SqliteStore;

    #[test]
    fn test_build_requires_stores() {
        let result = ReconcileRuntime::builder().build();
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn test_start_and_shutdown_without_http() {
        let store = Arc::new(SqliteStore::in_memory().await.unwrap());
        let runtime = ReconcileRuntime::builder()
            .store(store)
            .object_store(Arc::new(MemoryObjectStore::new()))
            .heartbeat_interval(Duration::from_millis(50))
            .build()
            .unwrap()
            .start()
            .await
            .unwrap();

        let mut rx = runtime.engine().hub().subscribe_runs();
        assert_eq!(rx.recv().await.unwrap(), crate::notify::RunEvent::Heartbeat);
        assert!(runtime.is_running());

        runtime.shutdown().await.unwrap();
    }
}
