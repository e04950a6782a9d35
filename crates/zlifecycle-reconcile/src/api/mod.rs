// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! HTTP API for executors and the dashboard.
//!
//! - `POST /reconciliation/environment` - Save or update an environment run
//! - `POST /reconciliation/component` - Save or update a batch of component runs
//! - `GET  /reconciliation/environment/{name}/audit` - Environment run history
//! - `GET  /reconciliation/environment/{name}/latest` - Latest non-skipped environment run
//! - `GET  /reconciliation/component/{name}/audit` - Component run history
//! - `GET  /reconciliation/component/{name}/latest` - Latest non-skipped component run
//! - `GET  /reconciliation/component/{name}/approved-by/{rid}` - Approval record (`-1` = latest)
//! - `PATCH /reconciliation/component/{name}/approved-by` - Stamp approver on latest run
//! - `GET  /reconciliation/logs/{company}/{team}/{env}/{component}/{run_id}/{kind}` - Run logs
//! - `GET  /reconciliation/state/{company}/{team}/{env}/{component}` - Terraform state
//! - `PUT|GET /reconciliation/objects/{company}/{*path}` - Raw tfplan bucket objects
//! - `POST /notifications`, `GET /notifications/{company}/{team}`, `POST /notifications/seen/{id}`
//! - `GET  /health` - Store round-trip
//! - `GET  /stream/runs`, `/stream/environments`, `/stream/notifications/{company}/{team}` - SSE

mod error;
mod routes;
mod stream;

pub use error::{ApiError, ApiErrorBody};

use std::sync::Arc;

use axum::Router;
use axum::routing::{get, post, put};

use crate::engine::ReconcileEngine;

/// Build the API router over `engine`.
pub fn router(engine: Arc<ReconcileEngine>) -> Router {
    Router::new()
        .route("/health", get(routes::health))
        .route(
            "/reconciliation/environment",
            post(routes::save_environment_run),
        )
        .route(
            "/reconciliation/component",
            post(routes::save_component_runs),
        )
        .route(
            "/reconciliation/environment/{name}/audit",
            get(routes::environment_audit),
        )
        .route(
            "/reconciliation/environment/{name}/latest",
            get(routes::environment_latest),
        )
        .route(
            "/reconciliation/component/{name}/audit",
            get(routes::component_audit),
        )
        .route(
            "/reconciliation/component/{name}/latest",
            get(routes::component_latest),
        )
        .route(
            "/reconciliation/component/{name}/approved-by",
            axum::routing::patch(routes::patch_approved_by),
        )
        .route(
            "/reconciliation/component/{name}/approved-by/{rid}",
            get(routes::approved_by),
        )
        .route(
            "/reconciliation/logs/{company}/{team}/{env}/{component}/{run_id}/{kind}",
            get(routes::logs),
        )
        .route(
            "/reconciliation/state/{company}/{team}/{env}/{component}",
            get(routes::state_file),
        )
        .route(
            "/reconciliation/objects/{company}/{*path}",
            put(routes::put_object).get(routes::download_object),
        )
        .route("/notifications", post(routes::save_notification))
        .route(
            "/notifications/{company}/{team}",
            get(routes::recent_notifications),
        )
        .route("/notifications/seen/{id}", post(routes::mark_seen))
        .route("/stream/runs", get(stream::runs))
        .route("/stream/environments", get(stream::environments))
        .route(
            "/stream/notifications/{company}/{team}",
            get(stream::notifications),
        )
        .with_state(engine)
}
