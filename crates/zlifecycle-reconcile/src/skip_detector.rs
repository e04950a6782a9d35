// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Supersedes runs that never reported completion.
//!
//! When an executor starts a new run for a name while an older run for the
//! same name is still open, the older run was abandoned (executor crash,
//! rerun) and must not stay "in progress" forever. Open runs are rewritten
//! to [`RunStatus::Skipped`](crate::model::RunStatus::Skipped) with the
//! detection time as their end time.
//!
//! Store backends apply [`mark_superseded`] inside the same transaction that
//! admits the new run, so the single-active-run invariant holds even when two
//! executors start the same name concurrently.

use chrono::{DateTime, Utc};
use tracing::{debug, warn};

use crate::error::Result;
use crate::model::{RunKind, RunRecord};
use crate::store::RunStore;

/// Terminate every still-open run in `stale` as superseded at `detected_at`.
///
/// Rows that already carry an end time are dropped from the result; the
/// returned rows are exactly the ones that need to be persisted.
pub fn mark_superseded<R: RunRecord>(stale: Vec<R>, detected_at: DateTime<Utc>) -> Vec<R> {
    stale
        .into_iter()
        .filter(|run| run.end_time().is_none())
        .map(|mut run| {
            run.supersede(detected_at);
            run
        })
        .collect()
}

/// Supersede every open run for `name` without admitting a new one.
///
/// Returns the number of runs rewritten. Zero stale runs is a no-op.
pub async fn supersede_stale_runs(store: &dyn RunStore, kind: RunKind, name: &str) -> Result<usize> {
    let detected_at = Utc::now();
    let superseded = match kind {
        RunKind::Environment => store
            .supersede_stale_environment_runs(name, detected_at)
            .await?
            .len(),
        RunKind::Component => store
            .supersede_stale_component_runs(name, detected_at)
            .await?
            .len(),
    };

    if superseded == 0 {
        debug!(kind = kind.label(), name = %name, "No stale runs to supersede");
    } else {
        warn!(
            kind = kind.label(),
            name = %name,
            superseded,
            "Superseded runs that never reported completion"
        );
    }

    Ok(superseded)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{EnvironmentRun, RunStatus};
    use chrono::TimeZone;

    fn run(id: i64, end: Option<DateTime<Utc>>) -> EnvironmentRun {
        EnvironmentRun {
            run_id: Some(id),
            name: "dev".to_string(),
            team_name: "platform".to_string(),
            start_time: Some(Utc.with_ymd_and_hms(2024, 3, 1, 9, 0, 0).unwrap()),
            end_time: end,
            status: RunStatus::Running,
        }
    }

    #[test]
    fn test_marks_open_runs_skipped() {
        let at = Utc.with_ymd_and_hms(2024, 3, 1, 10, 0, 0).unwrap();
        let marked = mark_superseded(vec![run(1, None), run(2, None)], at);

        assert_eq!(marked.len(), 2);
        for run in &marked {
            assert_eq!(run.status, RunStatus::Skipped);
            assert_eq!(run.end_time, Some(at));
        }
    }

    #[test]
    fn test_ignores_terminated_runs() {
        let at = Utc.with_ymd_and_hms(2024, 3, 1, 10, 0, 0).unwrap();
        let ended = Utc.with_ymd_and_hms(2024, 3, 1, 9, 30, 0).unwrap();
        let marked = mark_superseded(vec![run(1, Some(ended)), run(2, None)], at);

        assert_eq!(marked.len(), 1);
        assert_eq!(marked[0].run_id, Some(2));
    }

    #[test]
    fn test_empty_input_is_noop() {
        let marked = mark_superseded(Vec::<EnvironmentRun>::new(), Utc::now());
        assert!(marked.is_empty());
    }
}
