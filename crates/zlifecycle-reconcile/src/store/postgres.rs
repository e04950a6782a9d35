// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! PostgreSQL-backed run and notification store.
//!
//! Admission of a new run takes a transaction-scoped advisory lock on the run
//! name, so two executors starting the same name concurrently are serialized:
//! the second one supersedes the first one's row instead of racing it. The
//! partial unique index on `(name) WHERE end_date_time IS NULL` backs this up.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{PgPool, Postgres, Transaction};

use crate::error::{Error, Result};
use crate::model::{
    ComponentDuration, ComponentRun, EnvironmentDuration, EnvironmentRun, NewNotification,
    Notification,
};
use crate::skip_detector::mark_superseded;

use super::{
    Admission, ComponentRunRow, EnvironmentRunRow, ListRunsOptions, NotificationRow,
    NotificationStore, RunStore, encode_debug, list_clauses,
};

/// PostgreSQL-backed store.
#[derive(Clone)]
pub struct PostgresStore {
    pool: PgPool,
}

impl PostgresStore {
    /// Create a new Postgres-backed store from an existing pool.
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// The underlying pool.
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

// ============================================================================
// Transaction helpers
// ============================================================================

async fn lock_name(tx: &mut Transaction<'_, Postgres>, table: &str, name: &str) -> Result<()> {
    sqlx::query("SELECT pg_advisory_xact_lock(hashtext($1))")
        .bind(format!("{}:{}", table, name))
        .execute(&mut **tx)
        .await?;
    Ok(())
}

async fn supersede_environment_runs_in_tx(
    tx: &mut Transaction<'_, Postgres>,
    name: &str,
    detected_at: DateTime<Utc>,
) -> Result<Vec<EnvironmentRun>> {
    lock_name(tx, "environment_reconcile", name).await?;

    let stale: Vec<EnvironmentRun> = sqlx::query_as::<_, EnvironmentRunRow>(
        r#"
        SELECT reconcile_id, name, team_name, status, start_date_time, end_date_time
        FROM environment_reconcile
        WHERE name = $1 AND end_date_time IS NULL
        ORDER BY reconcile_id
        FOR UPDATE
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
            SET status = $2, end_date_time = $3
            WHERE reconcile_id = $1
            "#,
        )
        .bind(run.run_id)
        .bind(run.status.as_str())
        .bind(run.end_time)
        .execute(&mut **tx)
        .await?;
    }

    Ok(superseded)
}

async fn supersede_component_runs_in_tx(
    tx: &mut Transaction<'_, Postgres>,
    name: &str,
    detected_at: DateTime<Utc>,
) -> Result<Vec<ComponentRun>> {
    lock_name(tx, "component_reconcile", name).await?;

    let stale: Vec<ComponentRun> = sqlx::query_as::<_, ComponentRunRow>(
        r#"
        SELECT reconcile_id, environment_reconcile_id, name, team_name, status,
               start_date_time, end_date_time, approved_by
        FROM component_reconcile
        WHERE name = $1 AND end_date_time IS NULL
        ORDER BY reconcile_id
        FOR UPDATE
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
            SET status = $2, end_date_time = $3
            WHERE reconcile_id = $1
            "#,
        )
        .bind(run.run_id)
        .bind(run.status.as_str())
        .bind(run.end_time)
        .execute(&mut **tx)
        .await?;
    }

    Ok(superseded)
}

async fn insert_environment_run<'e, E>(executor: E, run: &EnvironmentRun) -> Result<EnvironmentRun>
where
    E: sqlx::PgExecutor<'e>,
{
    let row = sqlx::query_as::<_, EnvironmentRunRow>(
        r#"
        INSERT INTO environment_reconcile (name, team_name, status, start_date_time, end_date_time)
        VALUES ($1, $2, $3, $4, $5)
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
    E: sqlx::PgExecutor<'e>,
{
    let row = sqlx::query_as::<_, ComponentRunRow>(
        r#"
        INSERT INTO component_reconcile
            (environment_reconcile_id, name, team_name, status, start_date_time, end_date_time, approved_by)
        VALUES ($1, $2, $3, $4, $5, $6, $7)
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
impl RunStore for PostgresStore {
    async fn find_environment_run(&self, run_id: i64) -> Result<Option<EnvironmentRun>> {
        let row = sqlx::query_as::<_, EnvironmentRunRow>(
            r#"
            SELECT reconcile_id, name, team_name, status, start_date_time, end_date_time
            FROM environment_reconcile
            WHERE reconcile_id = $1
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
            WHERE name = $1 AND end_date_time IS NULL
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
            SET name = $2, team_name = $3, status = $4, start_date_time = $5, end_date_time = $6
            WHERE reconcile_id = $1
            RETURNING reconcile_id, name, team_name, status, start_date_time, end_date_time
            "#,
        )
        .bind(run_id)
        .bind(&run.name)
        .bind(&run.team_name)
        .bind(run.status.as_str())
        .bind(run.start_time)
        .bind(run.end_time)
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
            WHERE name = $1 {}
            {}
            LIMIT $2
            "#,
            filter, order
        );

        let rows = sqlx::query_as::<_, EnvironmentRunRow>(&query)
            .bind(name)
            .bind(options.limit)
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
            WHERE reconcile_id = $1
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
            WHERE name = $1 AND end_date_time IS NULL
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
            SET environment_reconcile_id = $2, name = $3, team_name = $4, status = $5,
                start_date_time = $6, end_date_time = $7, approved_by = $8
            WHERE reconcile_id = $1
            RETURNING reconcile_id, environment_reconcile_id, name, team_name, status,
                      start_date_time, end_date_time, approved_by
            "#,
        )
        .bind(run_id)
        .bind(run.environment_run_id)
        .bind(&run.name)
        .bind(&run.team_name)
        .bind(run.status.as_str())
        .bind(run.start_time)
        .bind(run.end_time)
        .bind(run.approved_by.as_deref())
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
            WHERE name = $1 {}
            {}
            LIMIT $2
            "#,
            filter, order
        );

        let rows = sqlx::query_as::<_, ComponentRunRow>(&query)
            .bind(name)
            .bind(options.limit)
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
            VALUES ($1, $2)
            ON CONFLICT (environment_name) DO UPDATE SET duration = EXCLUDED.duration
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
            WHERE environment_name = $1
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
            VALUES ($1, $2, $3)
            ON CONFLICT (component_name) DO UPDATE
                SET duration = EXCLUDED.duration, environment_name = EXCLUDED.environment_name
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
            WHERE component_name = $1
            "#,
        )
        .bind(component_name)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row)
    }

    async fn health_check_db(&self) -> Result<bool> {
        let row: (i32,) = sqlx::query_as("SELECT 1").fetch_one(&self.pool).await?;
        Ok(row.0 == 1)
    }
}

#[async_trait]
impl NotificationStore for PostgresStore {
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
            VALUES ($1, $2, $3, $4, $5, $6, $7)
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
            WHERE company_id = $1 AND team_name = $2 AND seen = FALSE
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
            WHERE company_id = $1 AND team_name = $2
            ORDER BY notification_id DESC
            LIMIT $3
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
        let result = sqlx::query("UPDATE notification SET seen = TRUE WHERE notification_id = $1")
            .bind(notification_id)
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected() > 0)
    }
}
