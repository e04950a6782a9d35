//! SQLite-backed run and notification store.
//!
//! SQLite admits a single writer at a time. The constructors here open the
//! pool with one connection, which serializes admission of new runs the same
//! way the Postgres advisory lock does.

use std::path::Path;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::sqlite::SqlitePoolOptions;
use sqlx::{Sqlite, SqlitePool, Transaction};

use crate::error::{Error, Result};
use crate::migrations;
use crate::model::{
    ComponentDuration, ComponentRun, EnvironmentDuration, EnvironmentRun, NewNotification,
    Notification,
};
use crate::skip_detector::mark_superseded;

use super::{
    Admission, ComponentRunRow, EnvironmentRunRow, ListRunsOptions, NotificationRow,
    NotificationStore, RunStore, encode_debug, list_clauses,
};

/// SQLite-backed store.
#[derive(Clone)]
pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    /// Create a new SQLite store from an existing, migrated pool.
    ///
    /// The pool must be capped at one connection (see [`pool_options`]);
    /// admission relies on it to serialize concurrent run starts.
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Create and initialize a store from a database file path.
    ///
    /// Creates parent directories and the database file if needed, then runs
    /// all migrations.
    pub async fn from_path(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();

        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent).map_err(|e| {
                Error::Database(sqlx::Error::Configuration(
                    format!("Failed to create directory {:?}: {}", parent, e).into(),
                ))
            })?;
        }

        let url = format!("sqlite:{}?mode=rwc", path.to_string_lossy());
        Self::from_url(&url).await
    }

    /// Create a migrated in-memory store.
    pub async fn in_memory() -> Result<Self> {
        Self::from_url("sqlite::memory:").await
    }

    /// Create and migrate a store from a `sqlite:` URL.
    pub async fn from_url(url: &str) -> Result<Self> {
        let pool = pool_options(url).connect(url).await?;

        migrations::run_sqlite(&pool).await?;

        Ok(Self { pool })
    }

    /// The underlying pool.
    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }
}

/// Pool options for a store on `url`: a single connection, which for an
/// in-memory database is never recycled since closing it drops the data.
pub fn pool_options(url: &str) -> SqlitePoolOptions {
    let options = SqlitePoolOptions::new().max_connections(1);
    if url.contains(":memory:") || url.contains("mode=memory") {
        options.idle_timeout(None).max_lifetime(None)
    } else {
        options
    }
}

// ============================================================================
// Transaction helpers
// ============================================================================

async fn supersede_environment_runs_in_tx(
    tx: &mut Transaction<'_, Sqlite>,
    name: &str,
    detected_at: DateTime<Utc>,
) -> Result<Vec<EnvironmentRun>> {
    let stale: Vec<EnvironmentRun> = sqlx::query_as::<_, EnvironmentRunRow>(
        r#"
        SELECT reconcile_id, name, team_name, status, start_date_time, end_date_time
        FROM environment_reconcile
        WHERE name = ? AND end_date_time IS NULL
        ORDER BY reconcile_id
        "#,
    )
    .bind(name)
    .fetch_all(&mut **tx)
    .await?
    .into_iter()
    .map(Into::into)
    .collect();

    let superseded = mark_superseded(stale, detected_at);
    for run in &superseded {
        sqlx::query(
            r#"
            UPDATE environment_reconcile
            SET status = ?, end_date_time = ?
            WHERE reconcile_id = ?
            "#,
        )
        .bind(run.status.as_str())
        .bind(run.end_time)
        .bind(run.run_id)
        .execute(&mut **tx)
        .await?;
    }

    Ok(superseded)
}

async fn supersede_component_runs_in_tx(
    tx: &mut Transaction<'_, Sqlite>,
    name: &str,
    detected_at: DateTime<Utc>,
) -> Result<Vec<ComponentRun>> {
    let stale: Vec<ComponentRun> = sqlx::query_as::<_, ComponentRunRow>(
        r#"
        SELECT reconcile_id, environment_reconcile_id, name, team_name, status,
               start_date_time, end_date_time, approved_by
        FROM component_reconcile
        WHERE name = ? AND end_date_time IS NULL
        ORDER BY reconcile_id
        "#,
    )
    .bind(name)
    .fetch_all(&mut **tx)
    .await?
    .into_iter()
    .map(Into::into)
    .collect();

    let superseded = mark_superseded(stale, detected_at);
    for run in &superseded {
        sqlx::query(
            r#"
            UPDATE component_reconcile
            SET status = ?, end_date_time = ?
            WHERE reconcile_id = ?
            "#,
        )
        .bind(run.status.as_str())
        .bind(run.end_time)
        .bind(run.run_id)
        .execute(&mut **tx)
        .await?;
    }

    Ok(superseded)
}

async fn insert_environment_run<'e, E>(executor: E, run: &EnvironmentRun) -> Result<EnvironmentRun>
where
    E: sqlx::SqliteExecutor<'e>,
{
    let row = sqlx::query_as::<_, EnvironmentRunRow>(
        r#"
        INSERT INTO environment_reconcile (name, team_name, status, start_date_time, end_date_time)
        VALUES (?, ?, ?, ?, ?)
        RETURNING reconcile_id, name, team_name, status, start_date_time, end_date_time
        "#,
    )
    .bind(&run.name)
    .bind(&run.team_name)
    .bind(run.status.as_str())
    .bind(run.start_time)
    .bind(run.end_time)
    .fetch_one(executor)
    .await?;

    Ok(row.into())
}

async fn insert_component_run<'e, E>(executor: E, run: &ComponentRun) -> Result<ComponentRun>
where
    E: sqlx::SqliteExecutor<'e>,
{
    let row = sqlx::query_as::<_, ComponentRunRow>(
        r#"
        INSERT INTO component_reconcile
            (environment_reconcile_id, name, team_name, status, start_date_time, end_date_time, approved_by)
        VALUES (?, ?, ?, ?, ?, ?, ?)
        RETURNING reconcile_id, environment_reconcile_id, name, team_name, status,
                  start_date_time, end_date_time, approved_by
        "#,
    )
    .bind(run.environment_run_id)
    .bind(&run.name)
    .bind(&run.team_name)
    .bind(run.status.as_str())
    .bind(run.start_time)
    .bind(run.end_time)
    .bind(run.approved_by.as_deref())
    .fetch_one(executor)
    .await?;

    Ok(row.into())
}

#[async_trait]
impl RunStore for SqliteStore {
    async fn find_environment_run(&self, run_id: i64) -> Result<Option<EnvironmentRun>> {
        let row = sqlx::query_as::<_, EnvironmentRunRow>(
            r#"
            SELECT reconcile_id, name, team_name, status, start_date_time, end_date_time
            FROM environment_reconcile
            WHERE reconcile_id = ?
            "#,
        )
        .bind(run_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(Into::into))
    }

    async fn find_unterminated_environment_runs(&self, name: &str) -> Result<Vec<EnvironmentRun>> {
        let rows = sqlx::query_as::<_, EnvironmentRunRow>(
            r#"
            SELECT reconcile_id, name, team_name, status, start_date_time, end_date_time
            FROM environment_reconcile
            WHERE name = ? AND end_date_time IS NULL
            ORDER BY reconcile_id
            "#,
        )
        .bind(name)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().map(Into::into).collect())
    }

    async fn save_environment_run(&self, run: &EnvironmentRun) -> Result<EnvironmentRun> {
        let Some(run_id) = run.run_id else {
            return insert_environment_run(&self.pool, run).await;
        };

        let row = sqlx::query_as::<_, EnvironmentRunRow>(
            r#"
            UPDATE environment_reconcile
            SET name = ?, team_name = ?, status = ?, start_date_time = ?, end_date_time = ?
            WHERE reconcile_id = ?
            RETURNING reconcile_id, name, team_name, status, start_date_time, end_date_time
            "#,
        )
        .bind(&run.name)
        .bind(&run.team_name)
        .bind(run.status.as_str())
        .bind(run.start_time)
        .bind(run.end_time)
        .bind(run_id)
        .fetch_optional(&self.pool)
        .await?;

        row.map(Into::into)
            .ok_or_else(|| Error::not_found("environment run", run_id))
    }

    async fn list_environment_runs(
        &self,
        name: &str,
        options: &ListRunsOptions,
    ) -> Result<Vec<EnvironmentRun>> {
        let (filter, order) = list_clauses(options);
        let query = format!(
            r#"
            SELECT reconcile_id, name, team_name, status, start_date_time, end_date_time
            FROM environment_reconcile
            WHERE name = ? {}
            {}
            LIMIT ?
            "#,
            filter, order
        );

        let rows = sqlx::query_as::<_, EnvironmentRunRow>(&query)
            .bind(name)
            .bind(options.limit.unwrap_or(-1))
            .fetch_all(&self.pool)
            .await?;

        Ok(rows.into_iter().map(Into::into).collect())
    }

    async fn admit_environment_run(
        &self,
        run: &EnvironmentRun,
        detected_at: DateTime<Utc>,
    ) -> Result<Admission<EnvironmentRun>> {
        let mut tx = self.pool.begin().await?;
        let superseded = supersede_environment_runs_in_tx(&mut tx, &run.name, detected_at).await?;
        let inserted = insert_environment_run(&mut *tx, run).await?;
        tx.commit().await?;

        Ok(Admission {
            run: inserted,
            superseded,
        })
    }

    async fn supersede_stale_environment_runs(
        &self,
        name: &str,
        detected_at: DateTime<Utc>,
    ) -> Result<Vec<EnvironmentRun>> {
        let mut tx = self.pool.begin().await?;
        let superseded = supersede_environment_runs_in_tx(&mut tx, name, detected_at).await?;
        tx.commit().await?;
        Ok(superseded)
    }

    async fn find_component_run(&self, run_id: i64) -> Result<Option<ComponentRun>> {
        let row = sqlx::query_as::<_, ComponentRunRow>(
            r#"
            SELECT reconcile_id, environment_reconcile_id, name, team_name, status,
                   start_date_time, end_date_time, approved_by
            FROM component_reconcile
            WHERE reconcile_id = ?
            "#,
        )
        .bind(run_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(Into::into))
    }

    async fn find_unterminated_component_runs(&self, name: &str) -> Result<Vec<ComponentRun>> {
        let rows = sqlx::query_as::<_, ComponentRunRow>(
            r#"
            SELECT reconcile_id, environment_reconcile_id, name, team_name, status,
                   start_date_time, end_date_time, approved_by
            FROM component_reconcile
            WHERE name = ? AND end_date_time IS NULL
            ORDER BY reconcile_id
            "#,
        )
        .bind(name)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().map(Into::into).collect())
    }

    async fn save_component_run(&self, run: &ComponentRun) -> Result<ComponentRun> {
        let Some(run_id) = run.run_id else {
            return insert_component_run(&self.pool, run).await;
        };

        let row = sqlx::query_as::<_, ComponentRunRow>(
            r#"
            UPDATE component_reconcile
            SET environment_reconcile_id = ?, name = ?, team_name = ?, status = ?,
                start_date_time = ?, end_date_time = ?, approved_by = ?
            WHERE reconcile_id = ?
            RETURNING reconcile_id, environment_reconcile_id, name, team_name, status,
                      start_date_time, end_date_time, approved_by
            "#,
        )
        .bind(run.environment_run_id)
        .bind(&run.name)
        .bind(&run.team_name)
        .bind(run.status.as_str())
        .bind(run.start_time)
        .bind(run.end_time)
        .bind(run.approved_by.as_deref())
        .bind(run_id)
        .fetch_optional(&self.pool)
        .await?;

        row.map(Into::into)
            .ok_or_else(|| Error::not_found("component run", run_id))
    }

    async fn list_component_runs(
        &self,
        name: &str,
        options: &ListRunsOptions,
    ) -> Result<Vec<ComponentRun>> {
        let (filter, order) = list_clauses(options);
        let query = format!(
            r#"
            SELECT reconcile_id, environment_reconcile_id, name, team_name, status,
                   start_date_time, end_date_time, approved_by
            FROM component_reconcile
            WHERE name = ? {}
            {}
            LIMIT ?
            "#,
            filter, order
        );

        let rows = sqlx::query_as::<_, ComponentRunRow>(&query)
            .bind(name)
            .bind(options.limit.unwrap_or(-1))
            .fetch_all(&self.pool)
            .await?;

        Ok(rows.into_iter().map(Into::into).collect())
    }

    async fn admit_component_run(
        &self,
        run: &ComponentRun,
        detected_at: DateTime<Utc>,
    ) -> Result<Admission<ComponentRun>> {
        let mut tx = self.pool.begin().await?;
        let superseded = supersede_component_runs_in_tx(&mut tx, &run.name, detected_at).await?;
        let inserted = insert_component_run(&mut *tx, run).await?;
        tx.commit().await?;

        Ok(Admission {
            run: inserted,
            superseded,
        })
    }

    async fn supersede_stale_component_runs(
        &self,
        name: &str,
        detected_at: DateTime<Utc>,
    ) -> Result<Vec<ComponentRun>> {
        let mut tx = self.pool.begin().await?;
        let superseded = supersede_component_runs_in_tx(&mut tx, name, detected_at).await?;
        tx.commit().await?;
        Ok(superseded)
    }

    async fn put_environment_duration(
        &self,
        environment_name: &str,
        duration: i64,
    ) -> Result<EnvironmentDuration> {
        let row = sqlx::query_as::<_, EnvironmentDuration>(
            r#"
            INSERT INTO environment_duration (environment_name, duration)
            VALUES (?, ?)
            ON CONFLICT (environment_name) DO UPDATE SET duration = excluded.duration
            RETURNING environment_name, duration
            "#,
        )
        .bind(environment_name)
        .bind(duration)
        .fetch_one(&self.pool)
        .await?;

        Ok(row)
    }

    async fn get_environment_duration(
        &self,
        environment_name: &str,
    ) -> Result<Option<EnvironmentDuration>> {
        let row = sqlx::query_as::<_, EnvironmentDuration>(
            r#"
            SELECT environment_name, duration
            FROM environment_duration
            WHERE environment_name = ?
            "#,
        )
        .bind(environment_name)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row)
    }

    async fn put_component_duration(
        &self,
        component_name: &str,
        environment_name: &str,
        duration: i64,
    ) -> Result<ComponentDuration> {
        let row = sqlx::query_as::<_, ComponentDuration>(
            r#"
            INSERT INTO component_duration (component_name, environment_name, duration)
            VALUES (?, ?, ?)
            ON CONFLICT (component_name) DO UPDATE
                SET duration = excluded.duration, environment_name = excluded.environment_name
            RETURNING component_name, environment_name, duration
            "#,
        )
        .bind(component_name)
        .bind(environment_name)
        .bind(duration)
        .fetch_one(&self.pool)
        .await?;

        Ok(row)
    }

    async fn get_component_duration(
        &self,
        component_name: &str,
    ) -> Result<Option<ComponentDuration>> {
        let row = sqlx::query_as::<_, ComponentDuration>(
            r#"
            SELECT component_name, environment_name, duration
            FROM component_duration
            WHERE component_name = ?
            "#,
        )
        .bind(component_name)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row)
    }

    async fn health_check_db(&self) -> Result<bool> {
        let row: (i64,) = sqlx::query_as("SELECT 1").fetch_one(&self.pool).await?;
        Ok(row.0 == 1)
    }
}

#[async_trait]
impl NotificationStore for SqliteStore {
    async fn insert_notification(
        &self,
        notification: &NewNotification,
        timestamp: DateTime<Utc>,
    ) -> Result<Notification> {
        let debug = encode_debug(notification)?;
        let row = sqlx::query_as::<_, NotificationRow>(
            r#"
            INSERT INTO notification
                (company_id, team_name, environment_name, message, message_type, "timestamp", debug)
            VALUES (?, ?, ?, ?, ?, ?, ?)
            RETURNING notification_id, company_id, team_name, environment_name, message,
                      message_type, "timestamp", debug, seen
            "#,
        )
        .bind(&notification.company_id)
        .bind(&notification.team_name)
        .bind(&notification.environment_name)
        .bind(&notification.message)
        .bind(&notification.message_type)
        .bind(timestamp)
        .bind(debug)
        .fetch_one(&self.pool)
        .await?;

        Ok(row.into())
    }

    async fn list_unseen_notifications(
        &self,
        company_id: &str,
        team_name: &str,
    ) -> Result<Vec<Notification>> {
        let rows = sqlx::query_as::<_, NotificationRow>(
            r#"
            SELECT notification_id, company_id, team_name, environment_name, message,
                   message_type, "timestamp", debug, seen
            FROM notification
            WHERE company_id = ? AND team_name = ? AND seen = 0
            ORDER BY notification_id
            "#,
        )
        .bind(company_id)
        .bind(team_name)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().map(Into::into).collect())
    }

    async fn list_recent_notifications(
        &self,
        company_id: &str,
        team_name: &str,
        limit: i64,
    ) -> Result<Vec<Notification>> {
        let rows = sqlx::query_as::<_, NotificationRow>(
            r#"
            SELECT notification_id, company_id, team_name, environment_name, message,
                   message_type, "timestamp", debug, seen
            FROM notification
            WHERE company_id = ? AND team_name = ?
            ORDER BY notification_id DESC
            LIMIT ?
            "#,
        )
        .bind(company_id)
        .bind(team_name)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().map(Into::into).collect())
    }

    async fn mark_notification_seen(&self, notification_id: i64) -> Result<bool> {
        let result = sqlx::query("UPDATE notification SET seen = 1 WHERE notification_id = ?")
            .bind(notification_id)
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected() > 0)
    }
}
