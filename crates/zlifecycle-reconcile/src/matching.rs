// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Matching of reported component entries to stored component runs.

use crate::model::{ComponentRun, ComponentRunReport};

/// Outcome of matching one reported component entry.
#[derive(Debug, Clone, PartialEq)]
pub enum ComponentMatch {
    /// The entry carried a run id that exists.
    ById(ComponentRun),
    /// No run id; an open run with the same name under the same parent run exists.
    ByName(ComponentRun),
    /// No run id and no open run under this parent; admit a new run.
    New,
    /// The entry carried a run id that does not exist.
    Missing(i64),
}

/// Resolve a reported component entry against stored state.
///
/// `by_id` is the lookup result for the entry's run id (ignored when the entry
/// has none). `open_runs` are the unterminated runs for the entry's name.
/// An open run belonging to a different parent run never matches by name; it
/// is stale and gets superseded when the new run is admitted.
pub fn resolve_component_match(
    entry: &ComponentRunReport,
    parent_run_id: i64,
    by_id: Option<ComponentRun>,
    open_runs: &[ComponentRun],
) -> ComponentMatch {
    if let Some(run_id) = entry.reconcile_id {
        return match by_id {
            Some(run) if run.run_id == Some(run_id) => ComponentMatch::ById(run),
            _ => ComponentMatch::Missing(run_id),
        };
    }

    open_runs
        .iter()
        .find(|run| {
            run.name == entry.name
                && run.environment_run_id == parent_run_id
                && run.is_unterminated()
        })
        .cloned()
        .map(ComponentMatch::ByName)
        .unwrap_or(ComponentMatch::New)
}
