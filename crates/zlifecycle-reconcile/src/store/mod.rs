//! Persistence interfaces and backends for run records and notifications.
//!
//! [`RunStore`] owns environment and component run history plus the duration
//! projections; [`NotificationStore`] owns operator notifications. Both are
//! implemented by [`PostgresStore`] (production) and [`SqliteStore`]
//! (embedded deployments and tests).

pub mod postgres;
pub mod sqlite;

pub use self::postgres::PostgresStore;
pub use self::sqlite::SqliteStore;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::error::Result;
use crate::model::{
    ComponentDuration, ComponentRun, EnvironmentDuration, EnvironmentRun, NewNotification,
    Notification, RunStatus,
};

/// Row ordering for run listings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RunOrder {
    /// Insertion order (stable per store).
    #[default]
    Stored,
    /// Newest start time first; runs without a start time last.
    StartTimeDesc,
}

/// Options for listing runs by name.
#[derive(Debug, Clone, Default)]
pub struct ListRunsOptions {
    /// Row ordering.
    pub order: RunOrder,
    /// Drop rows whose status begins with the skip marker.
    pub exclude_skipped: bool,
    /// Maximum rows to return.
    pub limit: Option<i64>,
}

impl ListRunsOptions {
    /// The most recent non-skipped run only.
    pub fn latest() -> Self {
        Self {
            order: RunOrder::StartTimeDesc,
            exclude_skipped: true,
            limit: Some(1),
        }
    }
}

/// Result of admitting a brand-new run.
#[derive(Debug, Clone)]
pub struct Admission<R> {
    /// The inserted run, with its assigned id.
    pub run: R,
    /// Open runs for the same name that were superseded first.
    pub superseded: Vec<R>,
}

#[allow(missing_docs)]
#[async_trait]
pub trait RunStore: Send + Sync {
    // ------------------------------------------------------------------
    // Environment runs
    // ------------------------------------------------------------------

    async fn find_environment_run(&self, run_id: i64) -> Result<Option<EnvironmentRun>>;

    async fn find_unterminated_environment_runs(&self, name: &str) -> Result<Vec<EnvironmentRun>>;

    /// Insert when `run_id` is `None`, otherwise overwrite the row (last writer wins).
    async fn save_environment_run(&self, run: &EnvironmentRun) -> Result<EnvironmentRun>;

    async fn list_environment_runs(
        &self,
        name: &str,
        options: &ListRunsOptions,
    ) -> Result<Vec<EnvironmentRun>>;

    /// Supersede every open run for `name`, then insert `run`, atomically.
    async fn admit_environment_run(
        &self,
        run: &EnvironmentRun,
        detected_at: DateTime<Utc>,
    ) -> Result<Admission<EnvironmentRun>>;

    async fn supersede_stale_environment_runs(
        &self,
        name: &str,
        detected_at: DateTime<Utc>,
    ) -> Result<Vec<EnvironmentRun>>;

    // ------------------------------------------------------------------
    // Component runs
    // ------------------------------------------------------------------

    async fn find_component_run(&self, run_id: i64) -> Result<Option<ComponentRun>>;

    async fn find_unterminated_component_runs(&self, name: &str) -> Result<Vec<ComponentRun>>;

    /// Insert when `run_id` is `None`, otherwise overwrite the row (last writer wins).
    async fn save_component_run(&self, run: &ComponentRun) -> Result<ComponentRun>;

    async fn list_component_runs(
        &self,
        name: &str,
        options: &ListRunsOptions,
    ) -> Result<Vec<ComponentRun>>;

    /// Supersede every open run for the component name, then insert `run`, atomically.
    async fn admit_component_run(
        &self,
        run: &ComponentRun,
        detected_at: DateTime<Utc>,
    ) -> Result<Admission<ComponentRun>>;

    async fn supersede_stale_component_runs(
        &self,
        name: &str,
        detected_at: DateTime<Utc>,
    ) -> Result<Vec<ComponentRun>>;

    // ------------------------------------------------------------------
    // Duration projections
    // ------------------------------------------------------------------

    async fn put_environment_duration(
        &self,
        environment_name: &str,
        duration: i64,
    ) -> Result<EnvironmentDuration>;

    async fn get_environment_duration(
        &self,
        environment_name: &str,
    ) -> Result<Option<EnvironmentDuration>>;

    async fn put_component_duration(
        &self,
        component_name: &str,
        environment_name: &str,
        duration: i64,
    ) -> Result<ComponentDuration>;

    async fn get_component_duration(
        &self,
        component_name: &str,
    ) -> Result<Option<ComponentDuration>>;

    async fn health_check_db(&self) -> Result<bool>;
}

#[allow(missing_docs)]
#[async_trait]
pub trait NotificationStore: Send + Sync {
    async fn insert_notification(
        &self,
        notification: &NewNotification,
        timestamp: DateTime<Utc>,
    ) -> Result<Notification>;

    async fn list_unseen_notifications(
        &self,
        company_id: &str,
        team_name: &str,
    ) -> Result<Vec<Notification>>;

    /// Newest first.
    async fn list_recent_notifications(
        &self,
        company_id: &str,
        team_name: &str,
        limit: i64,
    ) -> Result<Vec<Notification>>;

    /// Returns false if the notification does not exist.
    async fn mark_notification_seen(&self, notification_id: i64) -> Result<bool>;
}

// ============================================================================
// Row types shared by the SQL backends
// ============================================================================

#[derive(Debug, sqlx::FromRow)]
pub(crate) struct EnvironmentRunRow {
    pub reconcile_id: i64,
    pub name: String,
    pub team_name: String,
    pub status: String,
    pub start_date_time: Option<DateTime<Utc>>,
    pub end_date_time: Option<DateTime<Utc>>,
}

impl From<EnvironmentRunRow> for EnvironmentRun {
    fn from(row: EnvironmentRunRow) -> Self {
        Self {
            run_id: Some(row.reconcile_id),
            name: row.name,
            team_name: row.team_name,
            start_time: row.start_date_time,
            end_time: row.end_date_time,
            status: RunStatus::from_stored(&row.status),
        }
    }
}

#[derive(Debug, sqlx::FromRow)]
pub(crate) struct ComponentRunRow {
    pub reconcile_id: i64,
    pub environment_reconcile_id: i64,
    pub name: String,
    pub team_name: String,
    pub status: String,
    pub start_date_time: Option<DateTime<Utc>>,
    pub end_date_time: Option<DateTime<Utc>>,
    pub approved_by: Option<String>,
}

impl From<ComponentRunRow> for ComponentRun {
    fn from(row: ComponentRunRow) -> Self {
        Self {
            run_id: Some(row.reconcile_id),
            environment_run_id: row.environment_reconcile_id,
            name: row.name,
            team_name: row.team_name,
            start_time: row.start_date_time,
            end_time: row.end_date_time,
            status: RunStatus::from_stored(&row.status),
            approved_by: row.approved_by,
        }
    }
}

#[derive(Debug, sqlx::FromRow)]
pub(crate) struct NotificationRow {
    pub notification_id: i64,
    pub company_id: String,
    pub team_name: String,
    pub environment_name: String,
    pub message: String,
    pub message_type: String,
    pub timestamp: DateTime<Utc>,
    pub debug: Option<String>,
    pub seen: bool,
}

impl From<NotificationRow> for Notification {
    fn from(row: NotificationRow) -> Self {
        // Reporters occasionally send plain text; keep it rather than dropping it.
        let debug = row.debug.map(|raw| {
            serde_json::from_str(&raw).unwrap_or(serde_json::Value::String(raw))
        });
        Self {
            notification_id: row.notification_id,
            company_id: row.company_id,
            team_name: row.team_name,
            environment_name: row.environment_name,
            message: row.message,
            message_type: row.message_type,
            timestamp: row.timestamp,
            debug,
            seen: row.seen,
        }
    }
}

/// ORDER BY / WHERE fragments for [`ListRunsOptions`]; identical in both dialects.
pub(crate) fn list_clauses(options: &ListRunsOptions) -> (&'static str, &'static str) {
    let filter = if options.exclude_skipped {
        "AND status NOT LIKE 'skipped%'"
    } else {
        ""
    };
    let order = match options.order {
        RunOrder::Stored => "ORDER BY reconcile_id ASC",
        RunOrder::StartTimeDesc => {
            "ORDER BY start_date_time DESC NULLS LAST, reconcile_id DESC"
        }
    };
    (filter, order)
}

pub(crate) fn encode_debug(notification: &NewNotification) -> Result<Option<String>> {
    Ok(notification
        .debug
        .as_ref()
        .map(serde_json::to_string)
        .transpose()?)
}
