// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Server-sent event streams over the notification hub.

use std::convert::Infallible;
use std::sync::Arc;

use axum::extract::{Path, State};
use axum::response::sse::{Event, Sse};
use futures::Stream;
use serde::Serialize;
use tokio::sync::{broadcast, watch};
use tokio::sync::broadcast::error::RecvError;
use tracing::warn;

use crate::engine::ReconcileEngine;
use crate::notify::MessageEvent;

/// Forward a broadcast receiver as SSE events until the hub closes.
///
/// Lagged subscribers skip the dropped events and keep streaming.
fn sse_from<T, F>(
    mut rx: broadcast::Receiver<T>,
    mut closed: watch::Receiver<bool>,
    keep: F,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>>
where
    T: Serialize + Clone + Send + 'static,
    F: Fn(&T) -> bool + Send + 'static,
{
    let stream = async_stream::stream! {
        loop {
            let received = tokio::select! {
                biased;
                _ = closed.wait_for(|closed| *closed) => break,
                received = rx.recv() => received,
            };
            match received {
                Ok(event) if !keep(&event) => continue,
                Ok(event) => match Event::default().json_data(&event) {
                    Ok(event) => yield Ok(event),
                    Err(e) => warn!(error = %e, "Failed to encode stream event"),
                },
                Err(RecvError::Lagged(skipped)) => {
                    warn!(skipped, "Stream subscriber lagged; events dropped");
                }
                Err(RecvError::Closed) => break,
            }
        }
    };
    Sse::new(stream)
}

/// `GET /stream/runs`
pub(crate) async fn runs(
    State(engine): State<Arc<ReconcileEngine>>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    sse_from(engine.hub().subscribe_runs(), engine.hub().closed(), |_| true)
}

/// `GET /stream/environments`
pub(crate) async fn environments(
    State(engine): State<Arc<ReconcileEngine>>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    sse_from(
        engine.hub().subscribe_environments(),
        engine.hub().closed(),
        |_| true,
    )
}

/// `GET /stream/notifications/{company}/{team}`
///
/// Only the team's notifications are forwarded. Unseen ones are replayed
/// right after subscribing.
pub(crate) async fn notifications(
    State(engine): State<Arc<ReconcileEngine>>,
    Path((company, team)): Path<(String, String)>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let rx = engine.hub().subscribe_messages();
    if let Err(e) = engine.notifications().replay_unseen(&company, &team).await {
        warn!(company = %company, team = %team, error = %e, "Failed to replay unseen notifications");
    }
    sse_from(rx, engine.hub().closed(), move |event| match event {
        MessageEvent::Notification(n) => n.company_id == company && n.team_name == team,
        MessageEvent::Heartbeat => true,
    })
}
