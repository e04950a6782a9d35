// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Run records, executor reports and operator notifications.
//!
//! Persisted records serialize with the column names the dashboard already
//! consumes (`reconcile_id`, `start_date_time`, ...). Executor reports use the
//! camelCase payload shape the workflow executors send.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::error::{Error, Result};

/// Persisted form of [`RunStatus::Skipped`].
pub const SKIPPED_STATUS: &str = "skipped_reconcile";

/// Any persisted status starting with this marker is not a real run.
pub const SKIP_MARKER_PREFIX: &str = "skipped";

/// Status of a reconcile run.
///
/// Executors report free-form strings; the engine only interprets the values
/// below and writes [`RunStatus::Skipped`] itself.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunStatus {
    /// Run started and has not reported completion.
    Running,
    /// Run completed successfully.
    Succeeded,
    /// Run completed with a failure.
    Failed,
    /// Run was abandoned or superseded by a newer run for the same name.
    Skipped,
    /// Any other executor-reported status, stored verbatim.
    Other(String),
}

impl RunStatus {
    /// Parse a status reported by an executor.
    ///
    /// Statuses starting with the skip marker are reserved for the engine.
    /// Everything else is stored exactly as reported; values other than the
    /// three known ones pass through as [`RunStatus::Other`].
    pub fn from_reported(raw: &str) -> Result<Self> {
        if raw.starts_with(SKIP_MARKER_PREFIX) {
            return Err(Error::InvalidArgument(format!(
                "status '{}' is reserved: statuses starting with '{}' mark superseded runs",
                raw, SKIP_MARKER_PREFIX
            )));
        }
        Ok(Self::from_stored(raw))
    }

    /// Decode a status read back from the store.
    pub fn from_stored(raw: &str) -> Self {
        match raw {
            SKIPPED_STATUS => Self::Skipped,
            "running" => Self::Running,
            "succeeded" => Self::Succeeded,
            "failed" => Self::Failed,
            other => Self::Other(other.to_string()),
        }
    }

    /// Persisted string for this status.
    pub fn as_str(&self) -> &str {
        match self {
            Self::Running => "running",
            Self::Succeeded => "succeeded",
            Self::Failed => "failed",
            Self::Skipped => SKIPPED_STATUS,
            Self::Other(raw) => raw,
        }
    }

    /// Whether audit queries treat this status as a skip marker.
    pub fn is_skip_marker(&self) -> bool {
        self.as_str().starts_with(SKIP_MARKER_PREFIX)
    }
}

impl fmt::Display for RunStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Serialize for RunStatus {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for RunStatus {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        Ok(Self::from_stored(&raw))
    }
}

/// Which table a run lives in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunKind {
    /// Environment-level run.
    Environment,
    /// Component-level run.
    Component,
}

impl RunKind {
    /// Lowercase label used in logs.
    pub fn label(self) -> &'static str {
        match self {
            Self::Environment => "environment",
            Self::Component => "component",
        }
    }
}

/// What the skip detector needs from a run, for either table.
pub trait RunRecord: Clone + Send + Sync {
    /// Reported end time.
    fn end_time(&self) -> Option<DateTime<Utc>>;
    /// Terminate the run as superseded at `at`.
    fn supersede(&mut self, at: DateTime<Utc>);
}

macro_rules! impl_run_record {
    ($ty:ty) => {
        impl RunRecord for $ty {
            fn end_time(&self) -> Option<DateTime<Utc>> {
                self.end_time
            }

            fn supersede(&mut self, at: DateTime<Utc>) {
                self.status = RunStatus::Skipped;
                self.end_time = Some(at);
            }
        }
    };
}

impl_run_record!(EnvironmentRun);
impl_run_record!(ComponentRun);

/// Environment-level reconcile run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EnvironmentRun {
    /// Server-assigned identifier (absent before insert).
    #[serde(rename = "reconcile_id")]
    pub run_id: Option<i64>,
    /// Environment name.
    pub name: String,
    /// Owning team.
    pub team_name: String,
    /// Reported start time.
    #[serde(rename = "start_date_time")]
    pub start_time: Option<DateTime<Utc>>,
    /// Reported end time; `None` while the run is in progress.
    #[serde(rename = "end_date_time")]
    pub end_time: Option<DateTime<Utc>>,
    /// Current status.
    pub status: RunStatus,
}

impl EnvironmentRun {
    /// Whether the run has not reported completion.
    pub fn is_unterminated(&self) -> bool {
        self.end_time.is_none()
    }
}

/// Component-level reconcile run, owned by an [`EnvironmentRun`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ComponentRun {
    /// Server-assigned identifier (absent before insert).
    #[serde(rename = "reconcile_id")]
    pub run_id: Option<i64>,
    /// Owning environment run.
    #[serde(rename = "environment_reconcile_id")]
    pub environment_run_id: i64,
    /// Component name, `team-environment-component`.
    pub name: String,
    /// Owning team.
    pub team_name: String,
    /// Reported start time.
    #[serde(rename = "start_date_time")]
    pub start_time: Option<DateTime<Utc>>,
    /// Reported end time; `None` while the run is in progress.
    #[serde(rename = "end_date_time")]
    pub end_time: Option<DateTime<Utc>>,
    /// Current status.
    pub status: RunStatus,
    /// Email of whoever approved the plan for this run.
    pub approved_by: Option<String>,
}

impl ComponentRun {
    /// Whether the run has not reported completion.
    pub fn is_unterminated(&self) -> bool {
        self.end_time.is_none()
    }
}

/// Run report sent by a workflow executor.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunReport {
    /// Existing environment run id; absent for a fresh run start.
    #[serde(default, deserialize_with = "lenient_run_id")]
    pub reconcile_id: Option<i64>,
    /// Environment name.
    #[serde(default)]
    pub name: String,
    /// Owning team.
    #[serde(default)]
    pub team_name: String,
    /// Start time.
    #[serde(default)]
    pub start_date_time: Option<DateTime<Utc>>,
    /// End time.
    #[serde(default)]
    pub end_date_time: Option<DateTime<Utc>>,
    /// Executor status.
    #[serde(default)]
    pub status: String,
    /// Component runs reported alongside the environment run.
    #[serde(default)]
    pub component_reconciles: Vec<ComponentRunReport>,
}

/// One component entry of a [`RunReport`].
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ComponentRunReport {
    /// Existing component run id, if the executor has one.
    #[serde(default, deserialize_with = "lenient_run_id")]
    pub reconcile_id: Option<i64>,
    /// Component name, `team-environment-component`.
    pub name: String,
    /// Start time.
    #[serde(default)]
    pub start_date_time: Option<DateTime<Utc>>,
    /// End time.
    #[serde(default)]
    pub end_date_time: Option<DateTime<Utc>>,
    /// Executor status.
    #[serde(default)]
    pub status: String,
}

/// Accepts a number or a numeric string; anything unparsable or
/// non-positive means "no run id".
fn lenient_run_id<'de, D>(deserializer: D) -> std::result::Result<Option<i64>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        Int(i64),
        Float(f64),
        Text(String),
    }

    let raw = Option::<Raw>::deserialize(deserializer)?;
    Ok(raw
        .and_then(|raw| match raw {
            Raw::Int(id) => Some(id),
            Raw::Float(id) if id.is_finite() => Some(id.trunc() as i64),
            Raw::Float(_) => None,
            Raw::Text(text) => parse_leading_int(&text),
        })
        .filter(|id| *id > 0))
}

fn parse_leading_int(text: &str) -> Option<i64> {
    let text = text.trim();
    let digits_end = text
        .char_indices()
        .find(|(i, c)| !(c.is_ascii_digit() || (*i == 0 && (*c == '-' || *c == '+'))))
        .map(|(i, _)| i)
        .unwrap_or(text.len());
    text[..digits_end].parse().ok()
}

/// Latest known duration of an environment, in milliseconds (`-1` = unknown).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, sqlx::FromRow)]
#[serde(rename_all = "camelCase")]
pub struct EnvironmentDuration {
    /// Environment name.
    pub environment_name: String,
    /// Duration of the most recent run.
    pub duration: i64,
}

/// Latest known duration of a component, in milliseconds (`-1` = unknown).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, sqlx::FromRow)]
#[serde(rename_all = "camelCase")]
pub struct ComponentDuration {
    /// Component name.
    pub component_name: String,
    /// Environment the component belongs to.
    pub environment_name: String,
    /// Duration of the most recent run.
    pub duration: i64,
}

/// Operator-facing notification.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Notification {
    /// Database primary key.
    pub notification_id: i64,
    /// Company the notification belongs to.
    pub company_id: String,
    /// Team the notification belongs to.
    pub team_name: String,
    /// Environment the notification refers to.
    pub environment_name: String,
    /// Human-readable message.
    pub message: String,
    /// Message category (info, warning, error, ...).
    pub message_type: String,
    /// When the event happened.
    pub timestamp: DateTime<Utc>,
    /// Free-form diagnostic payload.
    pub debug: Option<serde_json::Value>,
    /// Whether an operator has acknowledged it.
    pub seen: bool,
}

/// Notification as submitted by a reporter.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewNotification {
    /// Company the notification belongs to.
    pub company_id: String,
    /// Team the notification belongs to.
    pub team_name: String,
    /// Environment the notification refers to.
    #[serde(default)]
    pub environment_name: String,
    /// Human-readable message.
    pub message: String,
    /// Message category.
    #[serde(default)]
    pub message_type: String,
    /// When the event happened; defaults to the time of saving.
    #[serde(default)]
    pub timestamp: Option<DateTime<Utc>>,
    /// Free-form diagnostic payload.
    #[serde(default)]
    pub debug: Option<serde_json::Value>,
}
