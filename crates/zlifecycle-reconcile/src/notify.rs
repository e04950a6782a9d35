// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Live-update fan-out.
//!
//! Three independent broadcast classes feed the dashboard: run upserts,
//! environment refresh signals and operator messages. Publishing never blocks
//! and never fails; with no subscriber the event is dropped, and a subscriber
//! that falls more than the channel capacity behind loses the oldest events.

use std::sync::Arc;

use serde::Serialize;
use tokio::sync::{broadcast, watch};
use tracing::trace;

use crate::model::{ComponentRun, EnvironmentRun, Notification};

/// A run row was inserted or updated.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", content = "data", rename_all = "snake_case")]
pub enum RunEvent {
    /// Environment run upsert.
    Environment(EnvironmentRun),
    /// Component run upsert.
    Component(ComponentRun),
    /// Nothing changed.
    Heartbeat,
}

/// Something in an environment changed; listeners reload it.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum EnvironmentRefresh {
    /// The named environment changed.
    Updated {
        /// Environment name.
        environment_name: String,
    },
    /// Nothing changed.
    Heartbeat,
}

/// Operator message channel event.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", content = "data", rename_all = "snake_case")]
pub enum MessageEvent {
    /// A saved or replayed notification.
    Notification(Notification),
    /// Nothing changed.
    Heartbeat,
}

/// Broadcast hub shared by the coordinator, notification service and streams.
#[derive(Debug, Clone)]
pub struct NotificationHub {
    runs: broadcast::Sender<RunEvent>,
    environments: broadcast::Sender<EnvironmentRefresh>,
    messages: broadcast::Sender<MessageEvent>,
    closed: Arc<watch::Sender<bool>>,
}

impl NotificationHub {
    /// Create a hub buffering `capacity` events per class.
    pub fn new(capacity: usize) -> Self {
        let (runs, _) = broadcast::channel(capacity);
        let (environments, _) = broadcast::channel(capacity);
        let (messages, _) = broadcast::channel(capacity);
        let (closed, _) = watch::channel(false);
        let closed = Arc::new(closed);
        Self {
            runs,
            environments,
            messages,
            closed,
        }
    }

    /// Publish a run upsert.
    pub fn publish_run(&self, event: RunEvent) {
        let receivers = self.runs.send(event).unwrap_or(0);
        trace!(receivers, "Published run event");
    }

    /// Signal that an environment changed.
    pub fn publish_environment_refresh(&self, environment_name: &str) {
        let _ = self.environments.send(EnvironmentRefresh::Updated {
            environment_name: environment_name.to_string(),
        });
    }

    /// Publish an operator message.
    pub fn publish_message(&self, notification: Notification) {
        let _ = self.messages.send(MessageEvent::Notification(notification));
    }

    /// Emit the "nothing changed" event on every class.
    pub fn publish_heartbeat(&self) {
        let _ = self.runs.send(RunEvent::Heartbeat);
        let _ = self.environments.send(EnvironmentRefresh::Heartbeat);
        let _ = self.messages.send(MessageEvent::Heartbeat);
    }

    /// Subscribe to run upserts.
    pub fn subscribe_runs(&self) -> broadcast::Receiver<RunEvent> {
        self.runs.subscribe()
    }

    /// Subscribe to environment refresh signals.
    pub fn subscribe_environments(&self) -> broadcast::Receiver<EnvironmentRefresh> {
        self.environments.subscribe()
    }

    /// Subscribe to operator messages.
    pub fn subscribe_messages(&self) -> broadcast::Receiver<MessageEvent> {
        self.messages.subscribe()
    }

    /// Tell long-lived subscribers to stop. Publishing keeps working.
    pub fn close(&self) {
        self.closed.send_replace(true);
    }

    /// Watch for [`close`](Self::close). The value is `true` once closed.
    pub fn closed(&self) -> watch::Receiver<bool> {
        self.closed.subscribe()
    }
}

impl Default for NotificationHub {
    fn default() -> Self {
        Self::new(256)
    }
}
