// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Common test infrastructure for zlifecycle-reconcile integration tests.
//!
//! Provides TestContext wiring the engine to an in-memory SQLite store and a
//! list-counting in-memory object store.

#![allow(dead_code)]

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};

use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, TimeZone, Utc};

use zlifecycle_reconcile::ReconcileEngine;
use zlifecycle_reconcile::logs::BucketNaming;
use zlifecycle_reconcile::model::{ComponentRunReport, RunReport};
use zlifecycle_reconcile::notify::NotificationHub;
use zlifecycle_reconcile::object_store::{
    MemoryObjectStore, ObjectMeta, ObjectStore, StorageResult,
};
use zlifecycle_reconcile::store::SqliteStore;

/// Object store that counts `list` calls.
#[derive(Debug, Default)]
pub struct ListCountingStore {
    inner: MemoryObjectStore,
    list_calls: AtomicUsize,
}

impl ListCountingStore {
    pub fn list_calls(&self) -> usize {
        self.list_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ObjectStore for ListCountingStore {
    async fn list(&self, bucket: &str, prefix: &str) -> StorageResult<Vec<ObjectMeta>> {
        self.list_calls.fetch_add(1, Ordering::SeqCst);
        self.inner.list(bucket, prefix).await
    }

    async fn get(&self, bucket: &str, key: &str) -> StorageResult<Bytes> {
        self.inner.get(bucket, key).await
    }

    async fn put(&self, bucket: &str, key: &str, data: Bytes) -> StorageResult<()> {
        self.inner.put(bucket, key, data).await
    }
}

/// Engine over in-memory stores.
pub struct TestContext {
    pub engine: Arc<ReconcileEngine>,
    pub store: Arc<SqliteStore>,
    pub objects: Arc<ListCountingStore>,
    pub hub: NotificationHub,
}

impl TestContext {
    pub async fn new() -> Self {
        let store = Arc::new(SqliteStore::in_memory().await.expect("sqlite store"));
        let objects = Arc::new(ListCountingStore::default());
        let hub = NotificationHub::new(64);
        let engine = Arc::new(ReconcileEngine::new(
            store.clone(),
            store.clone(),
            objects.clone(),
            BucketNaming::default(),
            hub.clone(),
        ));

        Self {
            engine,
            store,
            objects,
            hub,
        }
    }

    /// Upload a log object into the company's tfplan bucket.
    pub async fn put_log(&self, company: &str, key: &str, body: &str) {
        self.objects
            .put(
                &BucketNaming::default().tfplan_bucket(company),
                key,
                Bytes::from(body.to_string()),
            )
            .await
            .expect("put log");
    }
}

/// 2024-03-01 10:mm:00 UTC.
pub fn at(minute: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 3, 1, 10, minute, 0).unwrap()
}

/// Report starting a fresh environment run.
pub fn environment_start(name: &str, minute: u32) -> RunReport {
    RunReport {
        name: name.to_string(),
        team_name: "platform".to_string(),
        start_date_time: Some(at(minute)),
        status: "running".to_string(),
        ..Default::default()
    }
}

/// Report completing an environment run.
pub fn environment_end(run_id: i64, minute: u32, status: &str) -> RunReport {
    RunReport {
        reconcile_id: Some(run_id),
        end_date_time: Some(at(minute)),
        status: status.to_string(),
        ..Default::default()
    }
}

/// Report for a single component entry under `parent`.
pub fn component_report(parent: Option<i64>, entry: ComponentRunReport) -> RunReport {
    RunReport {
        reconcile_id: parent,
        component_reconciles: vec![entry],
        ..Default::default()
    }
}

/// Names unique across test runs against a shared database.
pub fn unique_name(prefix: &str) -> String {
    static COUNTER: AtomicU64 = AtomicU64::new(0);
    format!(
        "{}-{}-{}",
        prefix,
        Utc::now().timestamp_micros(),
        COUNTER.fetch_add(1, Ordering::SeqCst)
    )
}
