// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Integration tests for reloading instances from the store.

mod common;

use std::sync::Arc;

use common::*;
use serde_json::{Value, json};
use stratum_core::{Persistence, SqlitePersistence};
use stratum_engine::error::Error;
use stratum_engine::instance::{INTERRUPTED_BY_RESTART, InstanceStatus};
use stratum_engine::provider::MockProviderFactory;

/// Overwrite the stored document of `instance_id` after applying `edit`.
async fn tamper(ctx: &TestContext, instance_id: &str, edit: impl FnOnce(&mut Value)) {
    let record = ctx
        .persistence
        .load_instance(instance_id)
        .await
        .unwrap()
        .expect("instance stored");
    let mut document = record.document;
    edit(&mut document);
    ctx.persistence
        .save_instance(instance_id, &record.instance_type, &document)
        .await
        .unwrap();
}

#[tokio::test]
async fn test_restart_restores_state_and_shared_handles() {
    let ctx = TestContext::new().await;
    let id = ctx.manager.create("vnf", json!({}), None).await.unwrap();
    ctx.manager
        .update(&id, "increment", Value::Null)
        .await
        .unwrap();

    let restarted = ctx.restart().await;
    let inspected = restarted
        .manager
        .update(&id, "inspect", Value::Null)
        .await
        .unwrap();
    assert_eq!(inspected["counter"], json!(1));
    assert_eq!(inspected["targetShared"], json!(true));
    assert_eq!(inspected["registryShared"], json!(true));

    // Providers come back from their stored data, without a second init
    restarted
        .manager
        .update(&id, "reconfigure", json!({"playbook": "day2.yml"}))
        .await
        .expect("restored provider knows the VM");
    let operations = ctx.providers.operations_for(&id).await;
    assert_eq!(operations.iter().filter(|op| *op == "init").count(), 1);
    assert_eq!(operations.last().map(String::as_str), Some("configure_compute"));

    let document = restarted.manager.document(&id).await.unwrap();
    let playbooks: Vec<&Value> = document["registeredResources"]
        .as_object()
        .unwrap()
        .values()
        .filter(|r| r["type"] == "VmConfiguration")
        .map(|r| &r["value"]["playbook"])
        .collect();
    assert_eq!(playbooks, vec![&json!("day2.yml")]);
}

#[tokio::test]
async fn test_interrupted_operation_becomes_error() {
    let ctx = TestContext::new().await;
    let id = ctx.manager.create("vnf", json!({}), None).await.unwrap();
    tamper(&ctx, &id, |doc| {
        doc["status"] = json!({"state": "running_day2_op"});
    })
    .await;

    let restarted = ctx.restart().await;
    let summary = restarted.manager.get_summary(&id).await.unwrap();
    assert_eq!(
        summary.status,
        InstanceStatus::Error(INTERRUPTED_BY_RESTART.to_string())
    );
    assert!(!summary.corrupted);

    // The corrected status is written back at load time
    let stored = ctx.persistence.load_instance(&id).await.unwrap().unwrap();
    assert_eq!(stored.document["status"]["state"], json!("error"));

    // And the instance is usable again
    let counter = restarted
        .manager
        .update(&id, "increment", Value::Null)
        .await
        .unwrap();
    assert_eq!(counter, json!(1));
}

#[tokio::test]
async fn test_unresolved_reference_marks_instance_corrupted() {
    let ctx = TestContext::new().await;
    let id = ctx.manager.create("vnf", json!({}), None).await.unwrap();
    tamper(&ctx, &id, |doc| {
        doc["state"]["vm"] = json!("REF=missing");
    })
    .await;

    let restarted = ctx.restart().await;
    let summary = restarted.manager.get_summary(&id).await.unwrap();
    assert!(summary.corrupted);

    let err = restarted
        .manager
        .update(&id, "increment", Value::Null)
        .await
        .unwrap_err();
    assert!(matches!(err, Error::CorruptedInstance(_)));
    let err = restarted.manager.delete(&id).await.unwrap_err();
    assert!(matches!(err, Error::CorruptedInstance(_)));

    // The stored copy is left as it was
    let stored = ctx.persistence.load_instance(&id).await.unwrap().unwrap();
    assert_eq!(stored.document["state"]["vm"], json!("REF=missing"));
    assert_eq!(stored.document["corrupted"], json!(false));
}

#[tokio::test]
async fn test_child_missing_from_parent_is_relinked() {
    let ctx = TestContext::new().await;
    let service = ctx.manager.create("service", json!({}), None).await.unwrap();
    let child = ctx
        .manager
        .create("vnf", json!({}), Some(&service))
        .await
        .unwrap();
    tamper(&ctx, &service, |doc| {
        doc["childIds"] = json!([]);
    })
    .await;

    let restarted = ctx.restart().await;
    let summary = restarted.manager.get_summary(&service).await.unwrap();
    assert_eq!(summary.child_ids, vec![child]);
}

#[tokio::test]
async fn test_sqlite_backend_survives_restart() {
    let dir = tempfile::tempdir().unwrap();
    let persistence: Arc<dyn Persistence> = Arc::new(
        SqlitePersistence::from_path(dir.path().join("stratum.db"))
            .await
            .expect("Failed to open SQLite store"),
    );
    let ctx =
        TestContext::with_providers(persistence, Arc::new(MockProviderFactory::new())).await;

    let service = ctx
        .manager
        .create("service", json!({"children": 1}), None)
        .await
        .unwrap();
    assert_eq!(ctx.reserved().await, 2);

    let restarted = ctx.restart().await;
    assert_eq!(restarted.manager.list_summaries().await.unwrap().len(), 2);
    assert_eq!(restarted.reserved().await, 2);
    let results = restarted
        .manager
        .update(&service, "increment_all", Value::Null)
        .await
        .unwrap();
    assert_eq!(results, json!([1]));

    restarted.manager.delete(&service).await.unwrap();
    assert!(
        restarted
            .persistence
            .list_instance_ids()
            .await
            .unwrap()
            .is_empty()
    );
    assert_eq!(restarted.reserved().await, 0);
}
