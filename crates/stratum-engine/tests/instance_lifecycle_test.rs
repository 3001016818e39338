// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Integration tests for instance lifecycle, locking and cascade delete.

mod common;

use std::sync::Arc;

use common::*;
use futures::future::join_all;
use serde_json::{Value, json};
use stratum_engine::error::Error;
use stratum_engine::instance::InstanceStatus;
use stratum_engine::provider::MockProviderFactory;

#[tokio::test]
async fn test_create_update_delete_lifecycle() {
    let ctx = TestContext::new().await;

    let id = ctx
        .manager
        .create("vnf", json!({"area": VIM_AREA}), None)
        .await
        .expect("Failed to create instance");

    let summary = ctx.manager.get_summary(&id).await.unwrap();
    assert_eq!(summary.status, InstanceStatus::Idle);
    assert_eq!(summary.instance_type, "vnf");
    assert_eq!(summary.resource_count, 2);
    assert_eq!(summary.provider_areas, vec![VIM_AREA]);
    // The provider's management address and the blueprint's own range
    assert_eq!(ctx.reserved().await, 2);

    let counter = ctx
        .manager
        .update(&id, "increment", Value::Null)
        .await
        .unwrap();
    assert_eq!(counter, json!(1));

    let err = ctx
        .manager
        .update(&id, "fail", Value::Null)
        .await
        .unwrap_err();
    assert!(matches!(err, Error::Operation(_)));
    let summary = ctx.manager.get_summary(&id).await.unwrap();
    assert_eq!(
        summary.status,
        InstanceStatus::Error("Operation failed: requested failure".to_string())
    );

    // Error is not terminal
    let counter = ctx
        .manager
        .update(&id, "increment", Value::Null)
        .await
        .unwrap();
    assert_eq!(counter, json!(2));
    assert_eq!(
        ctx.manager.get_summary(&id).await.unwrap().status,
        InstanceStatus::Idle
    );

    ctx.manager.delete(&id).await.expect("Failed to delete");

    assert!(matches!(
        ctx.manager.get_summary(&id).await,
        Err(Error::InstanceNotFound(_))
    ));
    assert!(ctx.persistence.load_instance(&id).await.unwrap().is_none());
    assert_eq!(ctx.reserved().await, 0);

    let operations = ctx.providers.operations_for(&id).await;
    assert_eq!(
        operations,
        vec![
            "init",
            "create_compute",
            "configure_compute",
            "destroy_compute",
            "final_cleanup"
        ]
    );
}

#[tokio::test]
async fn test_unknown_blueprint_and_operation() {
    let ctx = TestContext::new().await;

    let err = ctx
        .manager
        .create("router", Value::Null, None)
        .await
        .unwrap_err();
    assert!(matches!(err, Error::UnknownBlueprintType(t) if t == "router"));
    assert!(ctx.manager.list_summaries().await.unwrap().is_empty());

    let id = ctx.manager.create("vnf", json!({}), None).await.unwrap();
    let err = ctx
        .manager
        .update(&id, "reboot", Value::Null)
        .await
        .unwrap_err();
    assert!(matches!(err, Error::UnknownOperation { operation, .. } if operation == "reboot"));

    let err = ctx
        .manager
        .update("no-such-instance", "increment", Value::Null)
        .await
        .unwrap_err();
    assert!(matches!(err, Error::InstanceNotFound(_)));
}

#[tokio::test]
async fn test_failed_create_keeps_instance_in_error() {
    let ctx = TestContext::new().await;

    let err = ctx
        .manager
        .create("vnf", json!({"fail": true}), None)
        .await
        .unwrap_err();
    assert!(matches!(err, Error::Operation(_)));

    let summaries = ctx.manager.list_summaries().await.unwrap();
    assert_eq!(summaries.len(), 1);
    assert!(matches!(summaries[0].status, InstanceStatus::Error(_)));
    let id = summaries[0].id.clone();

    // A successful operation brings it back to Idle
    let counter = ctx
        .manager
        .update(&id, "increment", Value::Null)
        .await
        .unwrap();
    assert_eq!(counter, json!(1));
    assert_eq!(
        ctx.manager.get_summary(&id).await.unwrap().status,
        InstanceStatus::Idle
    );

    // Still deletable
    ctx.manager.delete(&id).await.unwrap();
    assert!(ctx.manager.list_summaries().await.unwrap().is_empty());
}

#[tokio::test]
async fn test_unknown_area_fails_create() {
    let ctx = TestContext::new().await;

    let err = ctx
        .manager
        .create("vnf", json!({"area": 42}), None)
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        Error::Core(stratum_core::CoreError::UnknownArea { area: 42 })
    ));
    assert_eq!(ctx.reserved().await, 0);
}

#[tokio::test]
async fn test_document_uses_references() {
    let ctx = TestContext::new().await;
    let id = ctx.manager.create("vnf", json!({}), None).await.unwrap();

    let document = ctx.manager.document(&id).await.unwrap();
    assert_eq!(document["id"], json!(id));
    assert_eq!(document["type"], json!("vnf"));
    assert_eq!(document["stateType"], json!("VnfState"));
    assert_eq!(document["status"], json!({"state": "idle"}));
    assert_eq!(document["protected"], json!(false));
    assert_eq!(document["corrupted"], json!(false));
    assert_eq!(document["providers"]["1"]["providerType"], json!("mock"));
    assert_eq!(
        document["providers"]["1"]["providerDataType"],
        json!("MockProviderData")
    );

    let resources = document["registeredResources"].as_object().unwrap();
    assert_eq!(resources.len(), 2);
    let (vm_id, vm) = resources
        .iter()
        .find(|(_, r)| r["type"] == "VmResource")
        .expect("VM registered");
    let (config_id, config) = resources
        .iter()
        .find(|(_, r)| r["type"] == "VmConfiguration")
        .expect("configuration registered");

    // The VM stays inline in its own entry; everything pointing at it is a reference.
    assert_eq!(vm["value"]["id"], json!(vm_id));
    assert_eq!(vm["value"]["image"], json!("vnf:1.0"));
    assert_eq!(config["value"]["target"], json!(format!("REF={}", vm_id)));
    assert_eq!(document["state"]["vm"], json!(format!("REF={}", vm_id)));
    assert_eq!(
        document["state"]["config"],
        json!(format!("REF={}", config_id))
    );

    let stored = ctx.persistence.load_instance(&id).await.unwrap().unwrap();
    assert_eq!(stored.instance_type, "vnf");
    assert_eq!(stored.document["registeredResources"], document["registeredResources"]);
}

#[tokio::test]
async fn test_operations_on_one_instance_never_overlap() {
    let ctx = TestContext::new().await;
    let id = ctx.manager.create("vnf", json!({}), None).await.unwrap();

    let results = join_all((0..5).map(|_| {
        let manager = ctx.manager.clone();
        let id = id.clone();
        async move { manager.update(&id, "increment", Value::Null).await }
    }))
    .await;

    let mut counters: Vec<u64> = results
        .into_iter()
        .map(|r| r.unwrap().as_u64().unwrap())
        .collect();
    counters.sort();
    assert_eq!(counters, vec![1, 2, 3, 4, 5]);
    assert_eq!(ctx.gauge.peak(), 1);
}

#[tokio::test]
async fn test_distinct_instances_run_concurrently() {
    let ctx = TestContext::new().await;
    let a = ctx.manager.create("vnf", json!({}), None).await.unwrap();
    let b = ctx.manager.create("vnf", json!({}), None).await.unwrap();

    let (ra, rb) = tokio::join!(
        ctx.manager.update(&a, "increment", Value::Null),
        ctx.manager.update(&b, "increment", Value::Null)
    );
    assert_eq!(ra.unwrap(), json!(1));
    assert_eq!(rb.unwrap(), json!(1));
    assert_eq!(ctx.gauge.peak(), 2);
}

#[tokio::test]
async fn test_parent_drives_children() {
    let ctx = TestContext::new().await;
    let service = ctx
        .manager
        .create("service", json!({"children": 2}), None)
        .await
        .expect("Failed to create service");

    let summary = ctx.manager.get_summary(&service).await.unwrap();
    assert_eq!(summary.child_ids.len(), 2);
    assert_eq!(summary.provider_areas, vec![K8S_AREA]);
    for child in &summary.child_ids {
        let child = ctx.manager.get_summary(child).await.unwrap();
        assert_eq!(child.parent_id.as_deref(), Some(service.as_str()));
        assert_eq!(child.status, InstanceStatus::Idle);
    }

    let results = ctx
        .manager
        .update(&service, "increment_all", Value::Null)
        .await
        .unwrap();
    assert_eq!(results, json!([1, 1]));

    let child = &summary.child_ids[0];
    let counter = ctx
        .manager
        .call_child_function(&service, child, "increment", Value::Null)
        .await
        .unwrap();
    assert_eq!(counter, json!(2));

    let err = ctx
        .manager
        .call_child_function("someone-else", child, "increment", Value::Null)
        .await
        .unwrap_err();
    assert!(matches!(err, Error::ChildNotFound { .. }));

    let dropped = ctx
        .manager
        .update(&service, "drop_child", Value::Null)
        .await
        .unwrap();
    let dropped = dropped.as_str().unwrap().to_string();
    assert!(matches!(
        ctx.manager.get_summary(&dropped).await,
        Err(Error::InstanceNotFound(_))
    ));
    let summary = ctx.manager.get_summary(&service).await.unwrap();
    assert_eq!(summary.child_ids.len(), 1);
    assert!(!summary.child_ids.contains(&dropped));
}

#[tokio::test]
async fn test_delete_cascades_to_children() {
    let ctx = TestContext::new().await;
    let service = ctx
        .manager
        .create("service", json!({"children": 2}), None)
        .await
        .unwrap();
    assert_eq!(ctx.manager.list_summaries().await.unwrap().len(), 3);
    assert_eq!(ctx.reserved().await, 4);

    ctx.manager.delete(&service).await.expect("Cascade delete failed");

    assert!(ctx.manager.list_summaries().await.unwrap().is_empty());
    assert!(ctx.persistence.list_instance_ids().await.unwrap().is_empty());
    assert_eq!(ctx.reserved().await, 0);
    assert!(
        ctx.providers
            .operations_for(&service)
            .await
            .contains(&"uninstall_workload".to_string())
    );
}

#[tokio::test]
async fn test_protected_instance_is_not_deleted() {
    let ctx = TestContext::new().await;
    let id = ctx.manager.create("vnf", json!({}), None).await.unwrap();

    ctx.manager.set_protected(&id, true).await.unwrap();
    let err = ctx.manager.delete(&id).await.unwrap_err();
    assert!(matches!(err, Error::ProtectedInstance(_)));

    let summary = ctx.manager.get_summary(&id).await.unwrap();
    assert!(summary.protected);
    assert_eq!(summary.status, InstanceStatus::Idle);
    assert!(
        !ctx.providers
            .operations_for(&id)
            .await
            .contains(&"final_cleanup".to_string())
    );

    ctx.manager.set_protected(&id, false).await.unwrap();
    ctx.manager.delete(&id).await.unwrap();
}

#[tokio::test]
async fn test_protected_child_aborts_cascade() {
    let ctx = TestContext::new().await;
    let service = ctx
        .manager
        .create("service", json!({"children": 2}), None)
        .await
        .unwrap();
    let children = ctx.manager.get_summary(&service).await.unwrap().child_ids;
    let guarded = children[0].clone();
    ctx.manager.set_protected(&guarded, true).await.unwrap();

    let err = ctx.manager.delete(&service).await.unwrap_err();
    assert!(matches!(err, Error::ProtectedInstance(ref id) if *id == guarded));

    let summary = ctx.manager.get_summary(&service).await.unwrap();
    assert!(matches!(summary.status, InstanceStatus::Error(_)));
    assert!(summary.child_ids.contains(&guarded));
    assert_eq!(
        ctx.manager.get_summary(&guarded).await.unwrap().status,
        InstanceStatus::Idle
    );

    ctx.manager.set_protected(&guarded, false).await.unwrap();
    ctx.manager.delete(&service).await.unwrap();
    assert!(ctx.manager.list_summaries().await.unwrap().is_empty());
}

#[tokio::test]
async fn test_child_with_external_parent() {
    let ctx = TestContext::new().await;
    let service = ctx.manager.create("service", json!({}), None).await.unwrap();

    let child = ctx
        .manager
        .create("vnf", json!({}), Some(&service))
        .await
        .unwrap();
    let summary = ctx.manager.get_summary(&service).await.unwrap();
    assert_eq!(summary.child_ids, vec![child.clone()]);

    // Deleting the child directly detaches it from the parent
    ctx.manager.delete(&child).await.unwrap();
    let summary = ctx.manager.get_summary(&service).await.unwrap();
    assert!(summary.child_ids.is_empty());

    let err = ctx
        .manager
        .create("vnf", json!({}), Some("missing-parent"))
        .await
        .unwrap_err();
    assert!(matches!(err, Error::InstanceNotFound(_)));
}

async fn flaky_context() -> (Arc<FlakyStore>, TestContext) {
    let store = Arc::new(FlakyStore::new());
    let ctx = TestContext::with_providers(store.clone(), Arc::new(MockProviderFactory::new())).await;
    (store, ctx)
}

#[tokio::test]
async fn test_failed_store_delete_leaves_instance_in_error() {
    let (store, ctx) = flaky_context().await;
    let id = ctx.manager.create("vnf", json!({}), None).await.unwrap();

    store.fail_next_delete();
    let err = ctx.manager.delete(&id).await.unwrap_err();
    assert!(matches!(err, Error::Persistence(_)));

    let summary = ctx.manager.get_summary(&id).await.unwrap();
    match &summary.status {
        InstanceStatus::Error(detail) => assert!(detail.contains("disk full"), "{}", detail),
        other => panic!("expected Error after failed delete, got {:?}", other),
    }
    let stored = ctx.persistence.load_instance(&id).await.unwrap().unwrap();
    assert_eq!(stored.document["status"]["state"], json!("error"));

    // The operator can retry
    ctx.manager.delete(&id).await.unwrap();
    assert!(ctx.manager.list_summaries().await.unwrap().is_empty());
    assert_eq!(ctx.reserved().await, 0);
}

#[tokio::test]
async fn test_failed_save_after_start_moves_instance_to_error() {
    let (store, ctx) = flaky_context().await;
    let id = ctx.manager.create("vnf", json!({}), None).await.unwrap();

    store.fail_saves(true);
    let err = ctx
        .manager
        .update(&id, "increment", Value::Null)
        .await
        .unwrap_err();
    assert!(matches!(err, Error::Persistence(_)));
    assert!(matches!(
        ctx.manager.get_summary(&id).await.unwrap().status,
        InstanceStatus::Error(_)
    ));

    // The operation never ran, and the instance accepts the next one
    store.fail_saves(false);
    let counter = ctx
        .manager
        .update(&id, "increment", Value::Null)
        .await
        .unwrap();
    assert_eq!(counter, json!(1));
    assert_eq!(
        ctx.manager.get_summary(&id).await.unwrap().status,
        InstanceStatus::Idle
    );
}

#[tokio::test]
async fn test_unencodable_state_marks_instance_corrupted() {
    let ctx = TestContext::new().await;
    let id = ctx.manager.create("vnf", json!({}), None).await.unwrap();
    let before = ctx.persistence.load_instance(&id).await.unwrap().unwrap();

    // The operation itself succeeds; only its state cannot be stored
    let counter = ctx
        .manager
        .update(&id, "hold_unregistered", Value::Null)
        .await
        .unwrap();
    assert_eq!(counter, json!(1));
    assert!(ctx.manager.get_summary(&id).await.unwrap().corrupted);

    // The last good copy stays in the store
    let stored = ctx.persistence.load_instance(&id).await.unwrap().unwrap();
    assert_eq!(stored.document["state"], before.document["state"]);
    assert_eq!(
        stored.document["registeredResources"],
        before.document["registeredResources"]
    );
    assert_eq!(stored.document["corrupted"], json!(false));

    let err = ctx
        .manager
        .update(&id, "increment", Value::Null)
        .await
        .unwrap_err();
    assert!(matches!(err, Error::CorruptedInstance(_)));
    let err = ctx.manager.delete(&id).await.unwrap_err();
    assert!(matches!(err, Error::CorruptedInstance(_)));
}
