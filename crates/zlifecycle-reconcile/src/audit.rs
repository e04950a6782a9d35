// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Historical run listings and "latest run" resolution.
//!
//! The latest run for a name is the newest by start time whose status does
//! not begin with the skip marker, so superseded rows never shadow a real run
//! regardless of the order they were written in.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::info;

use crate::duration::duration_ms;
use crate::error::{Error, Result};
use crate::model::{ComponentRun, EnvironmentRun, RunStatus};
use crate::store::{ListRunsOptions, RunStore};

/// Sentinel run id meaning "the latest audit entry".
pub const LATEST_RUN_ID: &str = "-1";

/// One row of an audit listing.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AuditEntry {
    /// Run id.
    pub reconcile_id: i64,
    /// Environment or component name.
    pub name: String,
    /// Owning team.
    pub team_name: String,
    /// Run status.
    pub status: RunStatus,
    /// Start time.
    pub start_date_time: Option<DateTime<Utc>>,
    /// End time.
    pub end_date_time: Option<DateTime<Utc>>,
    /// Elapsed milliseconds, `-1` if unknown.
    pub duration: i64,
    /// Owning environment run (components only).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub environment_reconcile_id: Option<i64>,
    /// Approver email (components only).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub approved_by: Option<String>,
}

impl From<EnvironmentRun> for AuditEntry {
    fn from(run: EnvironmentRun) -> Self {
        Self {
            reconcile_id: run.run_id.unwrap_or_default(),
            duration: duration_ms(run.start_time, run.end_time),
            name: run.name,
            team_name: run.team_name,
            status: run.status,
            start_date_time: run.start_time,
            end_date_time: run.end_time,
            environment_reconcile_id: None,
            approved_by: None,
        }
    }
}

impl From<ComponentRun> for AuditEntry {
    fn from(run: ComponentRun) -> Self {
        Self {
            reconcile_id: run.run_id.unwrap_or_default(),
            duration: duration_ms(run.start_time, run.end_time),
            name: run.name,
            team_name: run.team_name,
            status: run.status,
            start_date_time: run.start_time,
            end_date_time: run.end_time,
            environment_reconcile_id: Some(run.environment_run_id),
            approved_by: run.approved_by,
        }
    }
}

/// Read side of the run history, plus the approval stamp.
#[derive(Clone)]
pub struct AuditService {
    store: Arc<dyn RunStore>,
}

impl AuditService {
    /// Create an audit service over `store`.
    pub fn new(store: Arc<dyn RunStore>) -> Self {
        Self { store }
    }

    /// Every run of an environment, in store order.
    pub async fn list_environment_audit(&self, name: &str) -> Result<Vec<AuditEntry>> {
        let runs = self
            .store
            .list_environment_runs(name, &ListRunsOptions::default())
            .await?;
        Ok(runs.into_iter().map(AuditEntry::from).collect())
    }

    /// Every run of a component, in store order.
    pub async fn list_component_audit(&self, name: &str) -> Result<Vec<AuditEntry>> {
        let runs = self
            .store
            .list_component_runs(name, &ListRunsOptions::default())
            .await?;
        Ok(runs.into_iter().map(AuditEntry::from).collect())
    }

    /// Most recent non-skipped component run, if any.
    pub async fn latest_audit(&self, name: &str) -> Result<Option<ComponentRun>> {
        let mut runs = self
            .store
            .list_component_runs(name, &ListRunsOptions::latest())
            .await?;
        Ok(runs.pop())
    }

    /// Most recent non-skipped environment run, if any.
    pub async fn latest_environment_audit(&self, name: &str) -> Result<Option<EnvironmentRun>> {
        let mut runs = self
            .store
            .list_environment_runs(name, &ListRunsOptions::latest())
            .await?;
        Ok(runs.pop())
    }

    /// Stamp `email` as approver of the latest run of `component_name`.
    pub async fn patch_approved_by(&self, email: &str, component_name: &str) -> Result<ComponentRun> {
        let mut run = self
            .latest_audit(component_name)
            .await?
            .ok_or_else(|| Error::not_found("audit entry", component_name))?;

        run.approved_by = Some(email.to_string());
        let saved = self.store.save_component_run(&run).await?;

        info!(
            run_id = ?saved.run_id,
            name = %component_name,
            approved_by = %email,
            "Stamped approver"
        );
        Ok(saved)
    }

    /// Approval record for a component run.
    ///
    /// `rid` is a run id, or [`LATEST_RUN_ID`] for the latest audit entry.
    pub async fn approved_by(&self, component_name: &str, rid: &str) -> Result<ComponentRun> {
        if rid == LATEST_RUN_ID {
            return self
                .latest_audit(component_name)
                .await?
                .ok_or_else(|| Error::not_found("audit entry", component_name));
        }

        let run_id: i64 = rid
            .trim()
            .parse()
            .map_err(|_| Error::InvalidArgument(format!("invalid run id '{}'", rid)))?;

        self.store
            .find_component_run(run_id)
            .await?
            .ok_or_else(|| Error::not_found("component run", run_id))
    }
}
