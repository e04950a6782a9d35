// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Background worker that keeps live streams warm.
//!
//! Dashboard connections sit behind proxies that drop idle streams, so every
//! broadcast class receives a "nothing changed" event on a fixed period.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Notify;
use tracing::{debug, info};

use crate::notify::NotificationHub;

/// Configuration for the heartbeat publisher.
#[derive(Debug, Clone)]
pub struct HeartbeatConfig {
    /// Time between heartbeats.
    pub interval: Duration,
}

impl Default for HeartbeatConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(20),
        }
    }
}

/// Periodic heartbeat publisher.
pub struct HeartbeatPublisher {
    hub: NotificationHub,
    config: HeartbeatConfig,
    shutdown: Arc<Notify>,
}

impl HeartbeatPublisher {
    /// Create a new heartbeat publisher.
    pub fn new(hub: NotificationHub, config: HeartbeatConfig) -> Self {
        Self {
            hub,
            config,
            shutdown: Arc::new(Notify::new()),
        }
    }

    /// Get a handle that can be used to signal shutdown.
    pub fn shutdown_handle(&self) -> Arc<Notify> {
        self.shutdown.clone()
    }

    /// Publish heartbeats until the shutdown signal is received.
    pub async fn run(&self) {
        info!(
            interval_secs = self.config.interval.as_secs(),
            "Heartbeat publisher started"
        );

        loop {
            tokio::select! {
                biased;

                _ = self.shutdown.notified() => {
                    info!("Heartbeat publisher received shutdown signal");
                    break;
                }

                _ = tokio::time::sleep(self.config.interval) => {
                    debug!("Publishing heartbeat");
                    self.hub.publish_heartbeat();
                }
            }
        }

        info!("Heartbeat publisher stopped");
    }
}
