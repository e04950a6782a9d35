// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! zlifecycle Reconcile - Run Tracking and Audit Engine
//!
//! This crate records every reconcile run that workflow executors perform on
//! environments and their components, supersedes runs that were abandoned,
//! computes durations, serves the audit trail and plan/apply logs, and fans
//! out live updates to dashboard subscribers. It never executes
//! infrastructure changes itself.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────┐        ┌──────────────────────────┐
//! │    Workflow executors    │        │        Dashboard         │
//! └──────────────────────────┘        └──────────────────────────┘
//!              │ run reports                    │ reads / SSE
//!              ▼                                ▼
//! ┌────────────────────────────────────────────────────────────────┐
//! │                    zlifecycle-reconcile                        │
//! │  ┌──────────────┐  ┌──────────────┐  ┌──────────────┐          │
//! │  │ Coordinator  │  │    Audit     │  │ Log Resolver │          │
//! │  │ + Skip Det.  │  │   Service    │  │              │          │
//! │  └──────────────┘  └──────────────┘  └──────────────┘          │
//! │          │  ▲             │                  │                 │
//! │          ▼  │             ▼                  ▼                 │
//! │  ┌──────────────┐  ┌──────────────┐  ┌──────────────┐          │
//! │  │ Notification │  │  Run Store   │  │ Object Store │          │
//! │  │     Hub      │  │ (PG/SQLite)  │  │  (fs/memory) │          │
//! │  └──────────────┘  └──────────────┘  └──────────────┘          │
//! └────────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Run lifecycle
//!
//! | Report | Effect |
//! |--------|--------|
//! | no run id | open runs for the name become `skipped_reconcile`; a new run is inserted |
//! | run id | end time and status of that run are updated; duration recomputed |
//!
//! At most one run per name is open (`end_date_time IS NULL`) at any time.
//!
//! # Modules
//!
//! - [`coordinator`] - save-or-update of environment and component runs
//! - [`skip_detector`] - supersedes abandoned runs
//! - [`audit`] - history listings, latest run, approvals
//! - [`logs`] - plan/apply logs and state files from object storage
//! - [`notify`] / [`notifications`] - live fan-out and operator messages
//! - [`store`] - PostgreSQL and SQLite persistence
//! - [`runtime`] - embeddable lifecycle (heartbeat, HTTP API)

#![deny(missing_docs)]

#[cfg(feature = "http")]
pub mod api;
pub mod audit;
pub mod config;
pub mod coordinator;
pub mod duration;
pub mod engine;
pub mod error;
pub mod heartbeat;
pub mod logs;
pub mod matching;
pub mod migrations;
pub mod model;
pub mod notifications;
pub mod notify;
pub mod object_store;
pub mod runtime;
pub mod skip_detector;
pub mod store;

pub use config::Config;
pub use engine::ReconcileEngine;
pub use error::{Error, Result};
pub use runtime::ReconcileRuntime;
