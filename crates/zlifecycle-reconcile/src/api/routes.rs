// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Reconciliation, audit, log and notification handlers.

use std::sync::Arc;

use axum::Json;
use axum::body::Bytes;
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::audit::AuditEntry;
use crate::engine::ReconcileEngine;
use crate::logs::{ComponentCoordinates, LogFile, LogKind, StateFile};
use crate::model::{ComponentRun, EnvironmentRun, NewNotification, Notification, RunReport};

use super::error::ApiError;

type ApiResult<T> = Result<T, ApiError>;

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct EnvironmentSaved {
    reconcile_id: i64,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct ComponentsSaved {
    reconcile_ids: Vec<i64>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct ApproveRequest {
    email: String,
}

#[derive(Debug, Default, Deserialize)]
pub(crate) struct LogQuery {
    #[serde(default)]
    latest: bool,
}

/// `POST /reconciliation/environment`
pub(crate) async fn save_environment_run(
    State(engine): State<Arc<ReconcileEngine>>,
    Json(report): Json<RunReport>,
) -> ApiResult<Json<EnvironmentSaved>> {
    let reconcile_id = engine
        .coordinator()
        .save_or_update_environment_run(&report)
        .await?;
    Ok(Json(EnvironmentSaved { reconcile_id }))
}

/// `POST /reconciliation/component`
pub(crate) async fn save_component_runs(
    State(engine): State<Arc<ReconcileEngine>>,
    Json(report): Json<RunReport>,
) -> ApiResult<Json<ComponentsSaved>> {
    let reconcile_ids = engine
        .coordinator()
        .save_or_update_component_run(&report)
        .await?;
    Ok(Json(ComponentsSaved { reconcile_ids }))
}

/// `GET /reconciliation/environment/{name}/audit`
pub(crate) async fn environment_audit(
    State(engine): State<Arc<ReconcileEngine>>,
    Path(name): Path<String>,
) -> ApiResult<Json<Vec<AuditEntry>>> {
    Ok(Json(engine.audit().list_environment_audit(&name).await?))
}

/// `GET /reconciliation/environment/{name}/latest`
pub(crate) async fn environment_latest(
    State(engine): State<Arc<ReconcileEngine>>,
    Path(name): Path<String>,
) -> ApiResult<Json<EnvironmentRun>> {
    engine
        .audit()
        .latest_environment_audit(&name)
        .await?
        .map(Json)
        .ok_or_else(|| ApiError::not_found(format!("no completed run for environment {name}")))
}

/// `GET /reconciliation/component/{name}/audit`
pub(crate) async fn component_audit(
    State(engine): State<Arc<ReconcileEngine>>,
    Path(name): Path<String>,
) -> ApiResult<Json<Vec<AuditEntry>>> {
    Ok(Json(engine.audit().list_component_audit(&name).await?))
}

/// `GET /reconciliation/component/{name}/latest`
pub(crate) async fn component_latest(
    State(engine): State<Arc<ReconcileEngine>>,
    Path(name): Path<String>,
) -> ApiResult<Json<ComponentRun>> {
    engine
        .audit()
        .latest_audit(&name)
        .await?
        .map(Json)
        .ok_or_else(|| ApiError::not_found(format!("no completed run for component {name}")))
}

/// `GET /reconciliation/component/{name}/approved-by/{rid}`
pub(crate) async fn approved_by(
    State(engine): State<Arc<ReconcileEngine>>,
    Path((name, rid)): Path<(String, String)>,
) -> ApiResult<Json<ComponentRun>> {
    Ok(Json(engine.audit().approved_by(&name, &rid).await?))
}

/// `PATCH /reconciliation/component/{name}/approved-by`
pub(crate) async fn patch_approved_by(
    State(engine): State<Arc<ReconcileEngine>>,
    Path(name): Path<String>,
    Json(request): Json<ApproveRequest>,
) -> ApiResult<Json<ComponentRun>> {
    Ok(Json(
        engine
            .audit()
            .patch_approved_by(&request.email, &name)
            .await?,
    ))
}

/// `GET /reconciliation/logs/{company}/{team}/{env}/{component}/{run_id}/{kind}`
pub(crate) async fn logs(
    State(engine): State<Arc<ReconcileEngine>>,
    Path((company, team, env, component, run_id, kind)): Path<(
        String,
        String,
        String,
        String,
        i64,
        String,
    )>,
    Query(query): Query<LogQuery>,
) -> ApiResult<Json<Vec<LogFile>>> {
    let kind: LogKind = kind.parse()?;
    let coords = ComponentCoordinates::new(company, team, env, component);

    debug!(
        company = %coords.company_id,
        component = %coords.component_run_name(),
        run_id,
        ?kind,
        latest = query.latest,
        "Fetching logs"
    );

    engine
        .logs()
        .fetch(&coords, run_id, kind, query.latest)
        .await?
        .into_files()
        .map(Json)
        .ok_or_else(|| ApiError::not_found("no logs found"))
}

/// `GET /reconciliation/state/{company}/{team}/{env}/{component}`
pub(crate) async fn state_file(
    State(engine): State<Arc<ReconcileEngine>>,
    Path((company, team, env, component)): Path<(String, String, String, String)>,
) -> ApiResult<Json<StateFile>> {
    let coords = ComponentCoordinates::new(company, team, env, component);
    Ok(Json(engine.logs().state_file(&coords).await?))
}

/// `PUT /reconciliation/objects/{company}/{*path}`
pub(crate) async fn put_object(
    State(engine): State<Arc<ReconcileEngine>>,
    Path((company, path)): Path<(String, String)>,
    body: Bytes,
) -> ApiResult<StatusCode> {
    engine.logs().put_object(&company, &path, body).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// `GET /reconciliation/objects/{company}/{*path}`
pub(crate) async fn download_object(
    State(engine): State<Arc<ReconcileEngine>>,
    Path((company, path)): Path<(String, String)>,
) -> ApiResult<Bytes> {
    Ok(engine.logs().download_object(&company, &path).await?)
}

/// `POST /notifications`
pub(crate) async fn save_notification(
    State(engine): State<Arc<ReconcileEngine>>,
    Json(notification): Json<NewNotification>,
) -> ApiResult<impl IntoResponse> {
    let saved = engine.notifications().save_notification(&notification).await?;
    Ok((StatusCode::CREATED, Json(saved)))
}

/// `GET /notifications/{company}/{team}`
pub(crate) async fn recent_notifications(
    State(engine): State<Arc<ReconcileEngine>>,
    Path((company, team)): Path<(String, String)>,
) -> ApiResult<Json<Vec<Notification>>> {
    Ok(Json(
        engine
            .notifications()
            .recent_notifications(&company, &team)
            .await?,
    ))
}

/// `POST /notifications/seen/{id}`
pub(crate) async fn mark_seen(
    State(engine): State<Arc<ReconcileEngine>>,
    Path(notification_id): Path<i64>,
) -> ApiResult<StatusCode> {
    engine.notifications().mark_seen(notification_id).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// `GET /health`
pub(crate) async fn health(
    State(engine): State<Arc<ReconcileEngine>>,
) -> ApiResult<Json<serde_json::Value>> {
    let healthy = engine.health_check().await?;
    Ok(Json(serde_json::json!({
        "status": if healthy { "ok" } else { "degraded" },
    })))
}
