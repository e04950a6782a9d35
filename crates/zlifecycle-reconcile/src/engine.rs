// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Shared engine state: every service wired to the same stores and hub.

use std::sync::Arc;

use crate::audit::AuditService;
use crate::coordinator::ReconciliationCoordinator;
use crate::logs::{BucketNaming, LogResolver};
use crate::notifications::NotificationService;
use crate::notify::NotificationHub;
use crate::object_store::ObjectStore;
use crate::store::{NotificationStore, RunStore};

/// The reconciliation engine's services.
#[derive(Clone)]
pub struct ReconcileEngine {
    coordinator: ReconciliationCoordinator,
    audit: AuditService,
    notifications: NotificationService,
    logs: LogResolver,
    hub: NotificationHub,
    run_store: Arc<dyn RunStore>,
}

impl ReconcileEngine {
    /// Wire the services together.
    pub fn new(
        run_store: Arc<dyn RunStore>,
        notification_store: Arc<dyn NotificationStore>,
        object_store: Arc<dyn ObjectStore>,
        naming: BucketNaming,
        hub: NotificationHub,
    ) -> Self {
        let audit = AuditService::new(run_store.clone());
        Self {
            coordinator: ReconciliationCoordinator::new(run_store.clone(), hub.clone()),
            logs: LogResolver::new(object_store, audit.clone(), naming),
            notifications: NotificationService::new(notification_store, hub.clone()),
            audit,
            hub,
            run_store,
        }
    }

    /// Run writer.
    pub fn coordinator(&self) -> &ReconciliationCoordinator {
        &self.coordinator
    }

    /// Run history reads and approvals.
    pub fn audit(&self) -> &AuditService {
        &self.audit
    }

    /// Operator notifications.
    pub fn notifications(&self) -> &NotificationService {
        &self.notifications
    }

    /// Log and state file access.
    pub fn logs(&self) -> &LogResolver {
        &self.logs
    }

    /// Live-update fan-out.
    pub fn hub(&self) -> &NotificationHub {
        &self.hub
    }

    /// Whether the run store answers.
    pub async fn health_check(&self) -> crate::error::Result<bool> {
        self.run_store.health_check_db().await
    }
}
