// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! PostgreSQL store tests.
//!
//! Run with TEST_ZLIFECYCLE_DATABASE_URL (or ZLIFECYCLE_DATABASE_URL) pointing
//! at a scratch database; skipped otherwise.

mod common;

use std::sync::Arc;

use chrono::Utc;
use sqlx::PgPool;

use common::*;
use zlifecycle_reconcile::migrations;
use zlifecycle_reconcile::model::{EnvironmentRun, NewNotification, RunStatus};
use zlifecycle_reconcile::store::{ListRunsOptions, NotificationStore, PostgresStore, RunStore};

macro_rules! skip_if_no_db {
    () => {
        if std::env::var("TEST_ZLIFECYCLE_DATABASE_URL").is_err()
            && std::env::var("ZLIFECYCLE_DATABASE_URL").is_err()
        {
            eprintln!(
                "Skipping test: TEST_ZLIFECYCLE_DATABASE_URL or ZLIFECYCLE_DATABASE_URL not set"
            );
            return;
        }
    };
}

async fn get_pool() -> Option<PgPool> {
    let database_url = std::env::var("TEST_ZLIFECYCLE_DATABASE_URL")
        .or_else(|_| std::env::var("ZLIFECYCLE_DATABASE_URL"))
        .ok()?;
    let pool = PgPool::connect(&database_url).await.ok()?;
    migrations::run_postgres(&pool).await.ok()?;
    Some(pool)
}

async fn get_store() -> Arc<PostgresStore> {
    let pool = get_pool().await.expect("Failed to connect to database");
    Arc::new(PostgresStore::new(pool))
}

fn open_run(name: &str, minute: u32) -> EnvironmentRun {
    EnvironmentRun {
        run_id: None,
        name: name.to_string(),
        team_name: "platform".to_string(),
        start_time: Some(at(minute)),
        end_time: None,
        status: RunStatus::Running,
    }
}

#[tokio::test]
async fn test_admission_supersedes_open_run() {
    skip_if_no_db!();
    let store = get_store().await;
    let name = unique_name("env");

    let first = store
        .admit_environment_run(&open_run(&name, 0), Utc::now())
        .await
        .unwrap();
    assert!(first.superseded.is_empty());

    let second = store
        .admit_environment_run(&open_run(&name, 5), Utc::now())
        .await
        .unwrap();
    assert_eq!(second.superseded.len(), 1);
    assert_eq!(second.superseded[0].run_id, first.run.run_id);

    let stale = store
        .find_environment_run(first.run.run_id.unwrap())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(stale.status, RunStatus::Skipped);
    assert!(stale.end_time.is_some());

    let open = store.find_unterminated_environment_runs(&name).await.unwrap();
    assert_eq!(open.len(), 1);
    assert_eq!(open[0].run_id, second.run.run_id);
}

#[tokio::test]
async fn test_concurrent_admissions_leave_one_open_run() {
    skip_if_no_db!();
    let store = get_store().await;
    let name = unique_name("env-race");

    let handles: Vec<_> = (0..8)
        .map(|i| {
            let store = store.clone();
            let run = open_run(&name, i);
            tokio::spawn(async move { store.admit_environment_run(&run, Utc::now()).await })
        })
        .collect();
    for handle in handles {
        handle.await.unwrap().unwrap();
    }

    let open = store.find_unterminated_environment_runs(&name).await.unwrap();
    assert_eq!(open.len(), 1);

    let all = store
        .list_environment_runs(&name, &ListRunsOptions::default())
        .await
        .unwrap();
    assert_eq!(all.len(), 8);
    assert_eq!(
        all.iter()
            .filter(|run| run.status == RunStatus::Skipped)
            .count(),
        7
    );
}

#[tokio::test]
async fn test_latest_excludes_skipped_runs() {
    skip_if_no_db!();
    let store = get_store().await;
    let name = unique_name("env-latest");

    let mut finished = open_run(&name, 3);
    finished.end_time = Some(at(4));
    finished.status = RunStatus::Succeeded;
    let finished = store.save_environment_run(&finished).await.unwrap();

    for minute in [5, 6] {
        let mut skipped = open_run(&name, minute);
        skipped.end_time = Some(at(minute));
        skipped.status = RunStatus::Skipped;
        store.save_environment_run(&skipped).await.unwrap();
    }

    let latest = store
        .list_environment_runs(&name, &ListRunsOptions::latest())
        .await
        .unwrap();
    assert_eq!(latest.len(), 1);
    assert_eq!(latest[0].run_id, finished.run_id);
}

#[tokio::test]
async fn test_duration_upsert_overwrites() {
    skip_if_no_db!();
    let store = get_store().await;
    let name = unique_name("env-duration");

    store.put_environment_duration(&name, -1).await.unwrap();
    store.put_environment_duration(&name, 4200).await.unwrap();
    let duration = store.get_environment_duration(&name).await.unwrap().unwrap();
    assert_eq!(duration.duration, 4200);

    let component = format!("{name}-vpc");
    store
        .put_component_duration(&component, &name, 1500)
        .await
        .unwrap();
    let duration = store.get_component_duration(&component).await.unwrap().unwrap();
    assert_eq!(duration.environment_name, name);
    assert_eq!(duration.duration, 1500);
}

#[tokio::test]
async fn test_notifications_round_trip() {
    skip_if_no_db!();
    let store = get_store().await;
    let company = unique_name("company");

    let saved = store
        .insert_notification(
            &NewNotification {
                company_id: company.clone(),
                team_name: "platform".to_string(),
                environment_name: "dev".to_string(),
                message: "apply failed".to_string(),
                message_type: "error".to_string(),
                timestamp: None,
                debug: Some(serde_json::json!({"exit_code": 1})),
            },
            Utc::now(),
        )
        .await
        .unwrap();
    assert!(!saved.seen);

    let unseen = store
        .list_unseen_notifications(&company, "platform")
        .await
        .unwrap();
    assert_eq!(unseen.len(), 1);
    assert_eq!(unseen[0].debug, Some(serde_json::json!({"exit_code": 1})));

    assert!(store.mark_notification_seen(saved.notification_id).await.unwrap());
    assert!(
        store
            .list_unseen_notifications(&company, "platform")
            .await
            .unwrap()
            .is_empty()
    );
}

#[tokio::test]
async fn test_health_check() {
    skip_if_no_db!();
    let store = get_store().await;
    assert!(store.health_check_db().await.unwrap());
}
