// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Save-or-update orchestration for executor run reports.
//!
//! Each run name follows `NONE -> RUNNING -> {SUCCEEDED | FAILED | SKIPPED}`.
//! A report without a run id starts a new run: open runs for the same name are
//! superseded and the new row is inserted in one store transaction. A report
//! with a run id updates that row's end time and status in place.
//!
//! Writes are last-writer-wins. After every write the duration projection is
//! upserted and the change is published on the notification hub.

use std::sync::Arc;

use chrono::Utc;
use tracing::{debug, info, warn};

use crate::duration::{UNKNOWN_DURATION, duration_ms};
use crate::error::{Error, Result};
use crate::matching::{ComponentMatch, resolve_component_match};
use crate::model::{ComponentRun, ComponentRunReport, EnvironmentRun, RunReport, RunStatus};
use crate::notify::{NotificationHub, RunEvent};
use crate::store::RunStore;

/// The only writer of run records.
#[derive(Clone)]
pub struct ReconciliationCoordinator {
    store: Arc<dyn RunStore>,
    hub: NotificationHub,
}

impl ReconciliationCoordinator {
    /// Create a coordinator over `store` publishing on `hub`.
    pub fn new(store: Arc<dyn RunStore>, hub: NotificationHub) -> Self {
        Self { store, hub }
    }

    /// Record an environment run start or completion. Returns the run id.
    pub async fn save_or_update_environment_run(&self, report: &RunReport) -> Result<i64> {
        let status = RunStatus::from_reported(&report.status)?;

        let (saved, duration) = match report.reconcile_id {
            Some(run_id) => {
                let mut run = self
                    .store
                    .find_environment_run(run_id)
                    .await?
                    .ok_or_else(|| Error::not_found("environment run", run_id))?;

                run.end_time = report.end_date_time;
                run.status = status;
                let saved = self.store.save_environment_run(&run).await?;
                let duration = duration_ms(saved.start_time, saved.end_time);

                info!(
                    run_id = run_id,
                    name = %saved.name,
                    status = %saved.status,
                    duration_ms = duration,
                    "Updated environment run"
                );
                (saved, duration)
            }
            None => {
                if report.name.is_empty() {
                    return Err(Error::InvalidArgument(
                        "environment name is required to start a run".to_string(),
                    ));
                }

                let run = EnvironmentRun {
                    run_id: None,
                    name: report.name.clone(),
                    team_name: report.team_name.clone(),
                    start_time: report.start_date_time,
                    end_time: report.end_date_time,
                    status,
                };
                let admission = self.store.admit_environment_run(&run, Utc::now()).await?;
                log_superseded("environment", &run.name, admission.superseded.len());

                info!(
                    run_id = ?admission.run.run_id,
                    name = %admission.run.name,
                    status = %admission.run.status,
                    "Started environment run"
                );
                (admission.run, UNKNOWN_DURATION)
            }
        };

        self.store
            .put_environment_duration(&saved.name, duration)
            .await?;

        let run_id = saved
            .run_id
            .ok_or_else(|| Error::not_found("environment run", &saved.name))?;
        let environment_name = saved.name.clone();
        self.hub.publish_run(RunEvent::Environment(saved));
        self.hub.publish_environment_refresh(&environment_name);

        Ok(run_id)
    }

    /// Record a batch of component run starts or completions under an
    /// existing environment run. Returns the component run ids in batch order.
    pub async fn save_or_update_component_run(&self, report: &RunReport) -> Result<Vec<i64>> {
        let parent_run_id = report.reconcile_id.ok_or_else(|| {
            Error::InvalidArgument(
                "environment run id is required to save or update component runs".to_string(),
            )
        })?;

        if report.component_reconciles.is_empty() {
            return Err(Error::InvalidArgument(
                "component run batch is empty".to_string(),
            ));
        }

        // Validate every status before touching the store.
        let statuses = report
            .component_reconciles
            .iter()
            .map(|entry| RunStatus::from_reported(&entry.status))
            .collect::<Result<Vec<_>>>()?;

        let parent = self
            .store
            .find_environment_run(parent_run_id)
            .await?
            .ok_or_else(|| Error::not_found("environment run", parent_run_id))?;

        // Component durations reference the environment projection.
        if self
            .store
            .get_environment_duration(&parent.name)
            .await?
            .is_none()
        {
            return Err(Error::not_found("environment duration", &parent.name));
        }

        let parent_run_id = parent
            .run_id
            .ok_or_else(|| Error::not_found("environment run", &parent.name))?;

        // Every entry must resolve before the first write, so a bad entry
        // leaves the whole batch unapplied.
        for entry in &report.component_reconciles {
            match self.match_component_entry(parent_run_id, entry).await? {
                ComponentMatch::Missing(run_id) => {
                    return Err(Error::not_found("component run", run_id));
                }
                ComponentMatch::New if entry.name.is_empty() => {
                    return Err(Error::InvalidArgument(
                        "component name is required to start a run".to_string(),
                    ));
                }
                _ => {}
            }
        }

        let mut run_ids = Vec::with_capacity(report.component_reconciles.len());
        for (entry, status) in report.component_reconciles.iter().zip(statuses) {
            let saved = self.save_component_entry(&parent, entry, status).await?;
            if let Some(run_id) = saved.run_id {
                run_ids.push(run_id);
            }
            self.hub.publish_run(RunEvent::Component(saved));
        }

        self.hub.publish_environment_refresh(&parent.name);

        Ok(run_ids)
    }

    async fn match_component_entry(
        &self,
        parent_run_id: i64,
        entry: &ComponentRunReport,
    ) -> Result<ComponentMatch> {
        let by_id = match entry.reconcile_id {
            Some(run_id) => self.store.find_component_run(run_id).await?,
            None => None,
        };
        let open_runs = if entry.reconcile_id.is_none() {
            self.store
                .find_unterminated_component_runs(&entry.name)
                .await?
        } else {
            Vec::new()
        };

        Ok(resolve_component_match(entry, parent_run_id, by_id, &open_runs))
    }

    async fn save_component_entry(
        &self,
        parent: &EnvironmentRun,
        entry: &ComponentRunReport,
        status: RunStatus,
    ) -> Result<ComponentRun> {
        let parent_run_id = parent
            .run_id
            .ok_or_else(|| Error::not_found("environment run", &parent.name))?;

        // Re-matched: an earlier entry of the same batch may have admitted this name.
        match self.match_component_entry(parent_run_id, entry).await? {
            ComponentMatch::ById(mut run) | ComponentMatch::ByName(mut run) => {
                run.end_time = entry.end_date_time;
                run.status = status;
                let duration = duration_ms(run.start_time, run.end_time);

                self.store
                    .put_component_duration(&run.name, &parent.name, duration)
                    .await?;
                let saved = self.store.save_component_run(&run).await?;

                info!(
                    run_id = ?saved.run_id,
                    name = %saved.name,
                    status = %saved.status,
                    duration_ms = duration,
                    "Updated component run"
                );
                Ok(saved)
            }
            ComponentMatch::New => {
                if entry.name.is_empty() {
                    return Err(Error::InvalidArgument(
                        "component name is required to start a run".to_string(),
                    ));
                }

                self.store
                    .put_component_duration(&entry.name, &parent.name, UNKNOWN_DURATION)
                    .await?;

                let run = ComponentRun {
                    run_id: None,
                    environment_run_id: parent_run_id,
                    name: entry.name.clone(),
                    team_name: parent.team_name.clone(),
                    start_time: entry.start_date_time,
                    end_time: entry.end_date_time,
                    status,
                    approved_by: None,
                };
                let admission = self.store.admit_component_run(&run, Utc::now()).await?;
                log_superseded("component", &run.name, admission.superseded.len());

                info!(
                    run_id = ?admission.run.run_id,
                    environment_run_id = parent_run_id,
                    name = %admission.run.name,
                    "Started component run"
                );
                Ok(admission.run)
            }
            ComponentMatch::Missing(run_id) => Err(Error::not_found("component run", run_id)),
        }
    }
}

fn log_superseded(kind: &'static str, name: &str, count: usize) {
    if count == 0 {
        debug!(kind, name = %name, "No stale runs to supersede");
    } else {
        warn!(
            kind,
            name = %name,
            superseded = count,
            "Superseded runs that never reported completion"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{ListRunsOptions, SqliteStore};
    use chrono::{DateTime, TimeZone};

    fn t(minute: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 1, 10, minute, 0).unwrap()
    }

    async fn setup() -> (ReconciliationCoordinator, Arc<SqliteStore>, NotificationHub) {
        let store = Arc::new(SqliteStore::in_memory().await.expect("store"));
        let hub = NotificationHub::new(64);
        let coordinator = ReconciliationCoordinator::new(store.clone(), hub.clone());
        (coordinator, store, hub)
    }

    fn start(name: &str, minute: u32) -> RunReport {
        RunReport {
            name: name.to_string(),
            team_name: "platform".to_string(),
            start_date_time: Some(t(minute)),
            status: "running".to_string(),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_start_then_complete_environment_run() {
        let (coordinator, store, _hub) = setup().await;

        let run_id = coordinator
            .save_or_update_environment_run(&start("dev", 0))
            .await
            .unwrap();
        let duration = store.get_environment_duration("dev").await.unwrap().unwrap();
        assert_eq!(duration.duration, -1);

        let complete = RunReport {
            reconcile_id: Some(run_id),
            end_date_time: Some(t(0) + chrono::Duration::milliseconds(5000)),
            status: "succeeded".to_string(),
            ..Default::default()
        };
        let same_id = coordinator
            .save_or_update_environment_run(&complete)
            .await
            .unwrap();
        assert_eq!(same_id, run_id);

        let run = store.find_environment_run(run_id).await.unwrap().unwrap();
        assert_eq!(run.status, RunStatus::Succeeded);
        let duration = store.get_environment_duration("dev").await.unwrap().unwrap();
        assert_eq!(duration.duration, 5000);
    }

    #[tokio::test]
    async fn test_new_run_supersedes_abandoned_one() {
        let (coordinator, store, _hub) = setup().await;

        let first = coordinator
            .save_or_update_environment_run(&start("dev", 0))
            .await
            .unwrap();
        let second = coordinator
            .save_or_update_environment_run(&start("dev", 5))
            .await
            .unwrap();
        assert_ne!(first, second);

        let stale = store.find_environment_run(first).await.unwrap().unwrap();
        assert_eq!(stale.status, RunStatus::Skipped);
        assert!(stale.end_time.is_some());

        let open = store.find_unterminated_environment_runs("dev").await.unwrap();
        assert_eq!(open.len(), 1);
        assert_eq!(open[0].run_id, Some(second));
    }

    #[tokio::test]
    async fn test_unknown_environment_run_id_is_not_found() {
        let (coordinator, _store, _hub) = setup().await;
        let report = RunReport {
            reconcile_id: Some(404),
            status: "succeeded".to_string(),
            ..Default::default()
        };

        let err = coordinator
            .save_or_update_environment_run(&report)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::NotFound { .. }));
    }

    #[tokio::test]
    async fn test_reserved_status_is_rejected() {
        let (coordinator, store, _hub) = setup().await;
        let mut report = start("dev", 0);
        report.status = "skipped_reconcile".to_string();

        let err = coordinator
            .save_or_update_environment_run(&report)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::InvalidArgument(_)));
        assert!(
            store
                .list_environment_runs("dev", &ListRunsOptions::default())
                .await
                .unwrap()
                .is_empty()
        );
    }

    #[tokio::test]
    async fn test_component_batch_without_run_id_persists_nothing() {
        let (coordinator, store, _hub) = setup().await;
        let report = RunReport {
            component_reconciles: vec![ComponentRunReport {
                name: "platform-dev-vpc".to_string(),
                status: "running".to_string(),
                ..Default::default()
            }],
            ..Default::default()
        };

        let err = coordinator
            .save_or_update_component_run(&report)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::InvalidArgument(_)));
        assert!(
            store
                .find_unterminated_component_runs("platform-dev-vpc")
                .await
                .unwrap()
                .is_empty()
        );
    }

    #[tokio::test]
    async fn test_empty_component_batch_is_rejected() {
        let (coordinator, _store, _hub) = setup().await;
        let parent = coordinator
            .save_or_update_environment_run(&start("dev", 0))
            .await
            .unwrap();
        let report = RunReport {
            reconcile_id: Some(parent),
            ..Default::default()
        };

        let err = coordinator
            .save_or_update_component_run(&report)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::InvalidArgument(_)));
    }

    #[tokio::test]
    async fn test_component_start_and_complete_by_name() {
        let (coordinator, store, _hub) = setup().await;
        let parent = coordinator
            .save_or_update_environment_run(&start("dev", 0))
            .await
            .unwrap();

        let started = coordinator
            .save_or_update_component_run(&RunReport {
                reconcile_id: Some(parent),
                component_reconciles: vec![ComponentRunReport {
                    name: "platform-dev-vpc".to_string(),
                    start_date_time: Some(t(1)),
                    status: "running".to_string(),
                    ..Default::default()
                }],
                ..Default::default()
            })
            .await
            .unwrap();
        assert_eq!(started.len(), 1);

        let completed = coordinator
            .save_or_update_component_run(&RunReport {
                reconcile_id: Some(parent),
                component_reconciles: vec![ComponentRunReport {
                    name: "platform-dev-vpc".to_string(),
                    end_date_time: Some(t(3)),
                    status: "succeeded".to_string(),
                    ..Default::default()
                }],
                ..Default::default()
            })
            .await
            .unwrap();
        assert_eq!(completed, started);

        let run = store.find_component_run(started[0]).await.unwrap().unwrap();
        assert_eq!(run.status, RunStatus::Succeeded);
        assert_eq!(run.team_name, "platform");
        let duration = store
            .get_component_duration("platform-dev-vpc")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(duration.duration, 120_000);
        assert_eq!(duration.environment_name, "dev");
    }

    #[tokio::test]
    async fn test_component_needs_environment_projection() {
        let (coordinator, store, _hub) = setup().await;
        let parent = store
            .save_environment_run(&EnvironmentRun {
                run_id: None,
                name: "dev".to_string(),
                team_name: "platform".to_string(),
                start_time: Some(t(0)),
                end_time: None,
                status: RunStatus::Running,
            })
            .await
            .unwrap();

        let report = RunReport {
            reconcile_id: parent.run_id,
            component_reconciles: vec![ComponentRunReport {
                name: "platform-dev-vpc".to_string(),
                status: "running".to_string(),
                ..Default::default()
            }],
            ..Default::default()
        };
        let err = coordinator
            .save_or_update_component_run(&report)
            .await
            .unwrap_err();

        assert!(matches!(err, Error::NotFound { entity: "environment duration", .. }));
        assert!(
            store
                .find_unterminated_component_runs("platform-dev-vpc")
                .await
                .unwrap()
                .is_empty()
        );
    }

    #[tokio::test]
    async fn test_unknown_component_run_id_is_not_found() {
        let (coordinator, _store, _hub) = setup().await;
        let parent = coordinator
            .save_or_update_environment_run(&start("dev", 0))
            .await
            .unwrap();

        let err = coordinator
            .save_or_update_component_run(&RunReport {
                reconcile_id: Some(parent),
                component_reconciles: vec![ComponentRunReport {
                    reconcile_id: Some(999),
                    name: "platform-dev-vpc".to_string(),
                    status: "succeeded".to_string(),
                    ..Default::default()
                }],
                ..Default::default()
            })
            .await
            .unwrap_err();
        assert!(matches!(err, Error::NotFound { .. }));
    }

    #[tokio::test]
    async fn test_component_batch_with_unknown_id_writes_nothing() {
        let (coordinator, store, hub) = setup().await;
        let parent = coordinator
            .save_or_update_environment_run(&start("dev", 0))
            .await
            .unwrap();
        let mut runs = hub.subscribe_runs();
        let mut envs = hub.subscribe_environments();

        let err = coordinator
            .save_or_update_component_run(&RunReport {
                reconcile_id: Some(parent),
                component_reconciles: vec![
                    ComponentRunReport {
                        name: "platform-dev-vpc".to_string(),
                        start_date_time: Some(t(1)),
                        status: "running".to_string(),
                        ..Default::default()
                    },
                    ComponentRunReport {
                        reconcile_id: Some(999),
                        name: "platform-dev-db".to_string(),
                        status: "succeeded".to_string(),
                        ..Default::default()
                    },
                ],
                ..Default::default()
            })
            .await
            .unwrap_err();

        assert!(matches!(err, Error::NotFound { entity: "component run", .. }));
        assert!(
            store
                .list_component_runs("platform-dev-vpc", &ListRunsOptions::default())
                .await
                .unwrap()
                .is_empty()
        );
        assert!(
            store
                .get_component_duration("platform-dev-vpc")
                .await
                .unwrap()
                .is_none()
        );
        assert!(runs.try_recv().is_err());
        assert!(envs.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_reported_status_is_stored_verbatim() {
        let (coordinator, store, _hub) = setup().await;
        let mut report = start("dev", 0);
        report.status = "success".to_string();

        let run_id = coordinator
            .save_or_update_environment_run(&report)
            .await
            .unwrap();

        let run = store.find_environment_run(run_id).await.unwrap().unwrap();
        assert_eq!(run.status.as_str(), "success");
    }

    #[tokio::test]
    async fn test_late_progress_for_superseded_run_conflicts() {
        let (coordinator, store, _hub) = setup().await;
        let first = coordinator
            .save_or_update_environment_run(&start("dev", 0))
            .await
            .unwrap();
        let second = coordinator
            .save_or_update_environment_run(&start("dev", 5))
            .await
            .unwrap();

        let err = coordinator
            .save_or_update_environment_run(&RunReport {
                reconcile_id: Some(first),
                status: "running".to_string(),
                ..Default::default()
            })
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Conflict(_)));
        assert_eq!(err.error_code(), "CONFLICT");

        let open = store.find_unterminated_environment_runs("dev").await.unwrap();
        assert_eq!(open.len(), 1);
        assert_eq!(open[0].run_id, Some(second));
        let stale = store.find_environment_run(first).await.unwrap().unwrap();
        assert_eq!(stale.status, RunStatus::Skipped);
    }

    #[tokio::test]
    async fn test_saves_publish_upsert_and_refresh() {
        let (coordinator, _store, hub) = setup().await;
        let mut runs = hub.subscribe_runs();
        let mut envs = hub.subscribe_environments();

        coordinator
            .save_or_update_environment_run(&start("dev", 0))
            .await
            .unwrap();

        assert!(matches!(runs.recv().await.unwrap(), RunEvent::Environment(_)));
        assert_eq!(
            envs.recv().await.unwrap(),
            crate::notify::EnvironmentRefresh::Updated {
                environment_name: "dev".to_string()
            }
        );
    }
}
