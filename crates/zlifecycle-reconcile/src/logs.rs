// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Plan/apply log retrieval and state file access.
//!
//! Executors upload their output to the company's tfplan bucket under
//! `team/environment/component/run_id/`. Object keys containing
//! `plan_output` or `apply_output` classify the log. Terraform state lives in
//! the company's tfstate bucket at `team/environment/component/terraform.tfstate`.

use std::str::FromStr;
use std::sync::Arc;

use bytes::Bytes;
use futures::future::try_join_all;
use serde::Serialize;
use tracing::{debug, info};

use crate::audit::AuditService;
use crate::error::{Error, Result};
use crate::object_store::{ObjectStore, StorageError};

/// Key fragment of plan output objects.
pub const PLAN_OUTPUT_MARKER: &str = "plan_output";

/// Key fragment of apply output objects.
pub const APPLY_OUTPUT_MARKER: &str = "apply_output";

/// Derives bucket names from the deployment namespace.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BucketNaming {
    namespace: String,
}

impl BucketNaming {
    /// `namespace` is `<bucket prefix>-<deployment environment>`, e.g. `zlifecycle-multitenant`.
    pub fn new(namespace: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
        }
    }

    /// Bucket holding plan/apply output for a company.
    pub fn tfplan_bucket(&self, company_id: &str) -> String {
        format!("{}-tfplan-{}", self.namespace, company_id)
    }

    /// Bucket holding Terraform state for a company.
    pub fn tfstate_bucket(&self, company_id: &str) -> String {
        format!("{}-tfstate-{}", self.namespace, company_id)
    }
}

impl Default for BucketNaming {
    fn default() -> Self {
        Self::new("zlifecycle-multitenant")
    }
}

/// Identifies a component within a company.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ComponentCoordinates {
    /// Company id.
    pub company_id: String,
    /// Team name.
    pub team: String,
    /// Environment name.
    pub environment: String,
    /// Component name.
    pub component: String,
}

impl ComponentCoordinates {
    /// Build coordinates from their parts.
    pub fn new(
        company_id: impl Into<String>,
        team: impl Into<String>,
        environment: impl Into<String>,
        component: impl Into<String>,
    ) -> Self {
        Self {
            company_id: company_id.into(),
            team: team.into(),
            environment: environment.into(),
            component: component.into(),
        }
    }

    /// Object key prefix of one run's logs.
    pub fn run_prefix(&self, run_id: i64) -> String {
        format!(
            "{}/{}/{}/{}/",
            self.team, self.environment, self.component, run_id
        )
    }

    /// Object key of the component's state file.
    pub fn state_key(&self) -> String {
        format!(
            "{}/{}/{}/terraform.tfstate",
            self.team, self.environment, self.component
        )
    }

    /// Run-history name of the component, `team-environment-component`.
    pub fn component_run_name(&self) -> String {
        format!("{}-{}-{}", self.team, self.environment, self.component)
    }
}

/// Which log objects to return.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogKind {
    /// Every object of the run.
    #[default]
    All,
    /// Plan output only.
    Plan,
    /// Apply output only.
    Apply,
}

impl LogKind {
    /// Whether an object key belongs to this kind.
    pub fn matches(self, key: &str) -> bool {
        match self {
            Self::All => true,
            Self::Plan => key.contains(PLAN_OUTPUT_MARKER),
            Self::Apply => key.contains(APPLY_OUTPUT_MARKER),
        }
    }
}

impl FromStr for LogKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "all" => Ok(Self::All),
            "plan" => Ok(Self::Plan),
            "apply" => Ok(Self::Apply),
            other => Err(Error::InvalidArgument(format!("unknown log kind '{}'", other))),
        }
    }
}

/// One log object.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LogFile {
    /// Object key.
    pub key: String,
    /// Content, decoded as UTF-8 with invalid sequences replaced.
    pub body: String,
}

/// Outcome of a log lookup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LogLookup {
    /// Logs exist for the run; may be empty after filtering.
    Found(Vec<LogFile>),
    /// The run has no logs, or there is no latest run.
    NotFound,
}

impl LogLookup {
    fn filter(self, kind: LogKind) -> Self {
        match self {
            Self::Found(files) => Self::Found(
                files
                    .into_iter()
                    .filter(|file| kind.matches(&file.key))
                    .collect(),
            ),
            Self::NotFound => Self::NotFound,
        }
    }

    /// The files, or `None` for [`LogLookup::NotFound`].
    pub fn into_files(self) -> Option<Vec<LogFile>> {
        match self {
            Self::Found(files) => Some(files),
            Self::NotFound => None,
        }
    }
}

/// Terraform state of a component.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StateFile {
    /// Object key.
    pub key: String,
    /// State JSON, empty if no state exists yet.
    pub data: String,
}

/// Resolves run coordinates to objects in storage.
#[derive(Clone)]
pub struct LogResolver {
    store: Arc<dyn ObjectStore>,
    audit: AuditService,
    naming: BucketNaming,
}

impl LogResolver {
    /// Create a log resolver.
    pub fn new(store: Arc<dyn ObjectStore>, audit: AuditService, naming: BucketNaming) -> Self {
        Self {
            store,
            audit,
            naming,
        }
    }

    /// Every log object of one run, sorted by key.
    pub async fn logs(&self, coords: &ComponentCoordinates, run_id: i64) -> Result<LogLookup> {
        let bucket = self.naming.tfplan_bucket(&coords.company_id);
        let prefix = coords.run_prefix(run_id);

        let objects = self.store.list(&bucket, &prefix).await?;
        if objects.is_empty() {
            debug!(bucket = %bucket, prefix = %prefix, "No log objects");
            return Ok(LogLookup::NotFound);
        }

        let store = &self.store;
        let bucket_ref = bucket.as_str();
        let mut files = try_join_all(objects.into_iter().map(|meta| async move {
            let data = store.get(bucket_ref, &meta.key).await?;
            Ok::<_, StorageError>(LogFile {
                body: String::from_utf8_lossy(&data).into_owned(),
                key: meta.key,
            })
        }))
        .await?;
        files.sort_by(|a, b| a.key.cmp(&b.key));

        debug!(bucket = %bucket, prefix = %prefix, count = files.len(), "Fetched log objects");
        Ok(LogLookup::Found(files))
    }

    /// Logs of the latest non-skipped run of the component.
    ///
    /// With no such run, storage is never listed.
    pub async fn latest_logs(&self, coords: &ComponentCoordinates) -> Result<LogLookup> {
        let name = coords.component_run_name();
        let Some(run_id) = self
            .audit
            .latest_audit(&name)
            .await?
            .and_then(|run| run.run_id)
        else {
            debug!(name = %name, "No latest run to resolve logs for");
            return Ok(LogLookup::NotFound);
        };

        self.logs(coords, run_id).await
    }

    /// Logs of `kind` for `run_id`, or for the latest run when `latest` is set.
    pub async fn fetch(
        &self,
        coords: &ComponentCoordinates,
        run_id: i64,
        kind: LogKind,
        latest: bool,
    ) -> Result<LogLookup> {
        let lookup = if latest {
            self.latest_logs(coords).await?
        } else {
            self.logs(coords, run_id).await?
        };
        Ok(lookup.filter(kind))
    }

    /// Plan output of a run.
    pub async fn plan_logs(
        &self,
        coords: &ComponentCoordinates,
        run_id: i64,
        latest: bool,
    ) -> Result<LogLookup> {
        self.fetch(coords, run_id, LogKind::Plan, latest).await
    }

    /// Apply output of a run.
    pub async fn apply_logs(
        &self,
        coords: &ComponentCoordinates,
        run_id: i64,
        latest: bool,
    ) -> Result<LogLookup> {
        self.fetch(coords, run_id, LogKind::Apply, latest).await
    }

    /// Upload an object to the company's tfplan bucket.
    pub async fn put_object(&self, company_id: &str, path: &str, data: Bytes) -> Result<()> {
        let bucket = self.naming.tfplan_bucket(company_id);
        let size = data.len();
        self.store
            .put(&bucket, path, data)
            .await
            .map_err(rejected_key)?;
        info!(bucket = %bucket, key = %path, size, "Stored object");
        Ok(())
    }

    /// Download an object from the company's tfplan bucket.
    pub async fn download_object(&self, company_id: &str, path: &str) -> Result<Bytes> {
        let bucket = self.naming.tfplan_bucket(company_id);
        match self.store.get(&bucket, path).await {
            Ok(data) => Ok(data),
            Err(StorageError::NotFound { .. }) => Err(Error::not_found("object", path)),
            Err(e) => Err(rejected_key(e)),
        }
    }

    /// Terraform state of a component; empty data if none exists yet.
    pub async fn state_file(&self, coords: &ComponentCoordinates) -> Result<StateFile> {
        let bucket = self.naming.tfstate_bucket(&coords.company_id);
        let key = coords.state_key();

        let data = match self.store.get(&bucket, &key).await {
            Ok(data) => String::from_utf8_lossy(&data).into_owned(),
            Err(StorageError::NotFound { .. }) => {
                debug!(bucket = %bucket, key = %key, "No state file");
                String::new()
            }
            Err(e) => return Err(e.into()),
        };

        Ok(StateFile { key, data })
    }
}

/// Caller-supplied keys that escape their bucket are bad requests, not storage failures.
fn rejected_key(e: StorageError) -> Error {
    match e {
        StorageError::InvalidKey(key) => {
            Error::InvalidArgument(format!("invalid object key '{}'", key))
        }
        other => other.into(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bucket_names() {
        let naming = BucketNaming::default();
        assert_eq!(
            naming.tfplan_bucket("acme"),
            "zlifecycle-multitenant-tfplan-acme"
        );
        assert_eq!(
            naming.tfstate_bucket("acme"),
            "zlifecycle-multitenant-tfstate-acme"
        );
    }

    #[test]
    fn test_coordinates_keys() {
        let coords = ComponentCoordinates::new("acme", "platform", "dev", "vpc");
        assert_eq!(coords.run_prefix(12), "platform/dev/vpc/12/");
        assert_eq!(coords.state_key(), "platform/dev/vpc/terraform.tfstate");
        assert_eq!(coords.component_run_name(), "platform-dev-vpc");
    }

    #[test]
    fn test_kind_classification() {
        assert!(LogKind::Plan.matches("platform/dev/vpc/1/plan_output"));
        assert!(!LogKind::Plan.matches("platform/dev/vpc/1/apply_output"));
        assert!(LogKind::Apply.matches("platform/dev/vpc/1/apply_output.log"));
        assert!(LogKind::All.matches("platform/dev/vpc/1/anything"));
        assert_eq!("plan".parse::<LogKind>().unwrap(), LogKind::Plan);
        assert!("tail".parse::<LogKind>().is_err());
    }
}
