// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Log and state file resolution against the in-memory object store.

mod common;

use bytes::Bytes;
use common::*;

use zlifecycle_reconcile::Error;
use zlifecycle_reconcile::logs::{BucketNaming, ComponentCoordinates, LogKind, LogLookup};
use zlifecycle_reconcile::model::ComponentRunReport;
use zlifecycle_reconcile::object_store::ObjectStore;

fn coords() -> ComponentCoordinates {
    ComponentCoordinates::new("acme", "platform", "dev", "vpc")
}

fn keys(lookup: LogLookup) -> Vec<String> {
    lookup
        .into_files()
        .expect("logs found")
        .into_iter()
        .map(|file| file.key)
        .collect()
}

/// Start and finish a `platform-dev-vpc` run, returning its id.
async fn completed_component_run(ctx: &TestContext) -> i64 {
    let coordinator = ctx.engine.coordinator();
    let parent = coordinator
        .save_or_update_environment_run(&environment_start("dev", 0))
        .await
        .unwrap();
    let started = coordinator
        .save_or_update_component_run(&component_report(
            Some(parent),
            ComponentRunReport {
                name: "platform-dev-vpc".to_string(),
                start_date_time: Some(at(1)),
                status: "running".to_string(),
                ..Default::default()
            },
        ))
        .await
        .unwrap();
    coordinator
        .save_or_update_component_run(&component_report(
            Some(parent),
            ComponentRunReport {
                reconcile_id: Some(started[0]),
                name: "platform-dev-vpc".to_string(),
                end_date_time: Some(at(3)),
                status: "succeeded".to_string(),
                ..Default::default()
            },
        ))
        .await
        .unwrap();
    started[0]
}

#[tokio::test]
async fn test_plan_and_apply_logs_are_classified() {
    let ctx = TestContext::new().await;
    ctx.put_log("acme", "platform/dev/vpc/7/plan_output.log", "plan")
        .await;
    ctx.put_log("acme", "platform/dev/vpc/7/apply_output.log", "apply")
        .await;

    let logs = ctx.engine.logs();
    assert_eq!(
        keys(logs.plan_logs(&coords(), 7, false).await.unwrap()),
        vec!["platform/dev/vpc/7/plan_output.log"]
    );
    assert_eq!(
        keys(logs.apply_logs(&coords(), 7, false).await.unwrap()),
        vec!["platform/dev/vpc/7/apply_output.log"]
    );

    let all = logs
        .fetch(&coords(), 7, LogKind::All, false)
        .await
        .unwrap()
        .into_files()
        .unwrap();
    assert_eq!(all.len(), 2);
    assert_eq!(all[0].body, "apply");
    assert_eq!(all[1].body, "plan");
}

#[tokio::test]
async fn test_run_prefix_does_not_leak_into_other_runs() {
    let ctx = TestContext::new().await;
    ctx.put_log("acme", "platform/dev/vpc/7/plan_output.log", "seven")
        .await;
    ctx.put_log("acme", "platform/dev/vpc/70/plan_output.log", "seventy")
        .await;

    let files = ctx
        .engine
        .logs()
        .logs(&coords(), 7)
        .await
        .unwrap()
        .into_files()
        .unwrap();
    assert_eq!(files.len(), 1);
    assert_eq!(files[0].body, "seven");
}

#[tokio::test]
async fn test_empty_prefix_is_not_found() {
    let ctx = TestContext::new().await;
    let lookup = ctx.engine.logs().logs(&coords(), 7).await.unwrap();
    assert_eq!(lookup, LogLookup::NotFound);
    assert_eq!(ctx.objects.list_calls(), 1);
}

#[tokio::test]
async fn test_latest_without_audit_entry_never_lists() {
    let ctx = TestContext::new().await;
    ctx.put_log("acme", "platform/dev/vpc/1/plan_output.log", "plan")
        .await;

    let lookup = ctx.engine.logs().latest_logs(&coords()).await.unwrap();
    assert_eq!(lookup, LogLookup::NotFound);
    assert_eq!(ctx.objects.list_calls(), 0);
}

#[tokio::test]
async fn test_latest_resolves_through_audit() {
    let ctx = TestContext::new().await;
    let run_id = completed_component_run(&ctx).await;
    ctx.put_log(
        "acme",
        &format!("platform/dev/vpc/{run_id}/plan_output.log"),
        "latest plan",
    )
    .await;

    let files = ctx
        .engine
        .logs()
        .plan_logs(&coords(), 0, true)
        .await
        .unwrap()
        .into_files()
        .unwrap();
    assert_eq!(files.len(), 1);
    assert_eq!(files[0].body, "latest plan");
    assert_eq!(ctx.objects.list_calls(), 1);
}

#[tokio::test]
async fn test_state_file_defaults_to_empty() {
    let ctx = TestContext::new().await;
    let logs = ctx.engine.logs();

    let missing = logs.state_file(&coords()).await.unwrap();
    assert_eq!(missing.key, "platform/dev/vpc/terraform.tfstate");
    assert!(missing.data.is_empty());

    ctx.objects
        .put(
            &BucketNaming::default().tfstate_bucket("acme"),
            "platform/dev/vpc/terraform.tfstate",
            Bytes::from_static(br#"{"version":4}"#),
        )
        .await
        .unwrap();
    let present = logs.state_file(&coords()).await.unwrap();
    assert_eq!(present.data, r#"{"version":4}"#);
}

#[tokio::test]
async fn test_object_upload_and_download() {
    let ctx = TestContext::new().await;
    let logs = ctx.engine.logs();

    logs.put_object("acme", "platform/dev/vpc/plan.out", Bytes::from_static(b"binary"))
        .await
        .unwrap();
    let data = logs
        .download_object("acme", "platform/dev/vpc/plan.out")
        .await
        .unwrap();
    assert_eq!(&data[..], b"binary");

    let err = logs
        .download_object("acme", "platform/dev/vpc/missing.out")
        .await
        .unwrap_err();
    assert!(matches!(err, Error::NotFound { .. }));
}
