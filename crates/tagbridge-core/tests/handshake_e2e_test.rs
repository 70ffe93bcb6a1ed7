// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! E2E tests for the full runtime: handshake, buffering, drain recovery,
//! heartbeat, and the status surface.

mod common;

use std::collections::BTreeMap;
use std::time::Duration;

use common::TestContext;
use tagbridge_core::config::Limit;
use tagbridge_core::record::TagValue;
use tagbridge_core::status::{ConnectionStatus, read_status};

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_trigger_cycle_end_to_end() {
    let ctx = TestContext::new().await;
    let runtime = ctx.start().await;

    ctx.raise_trigger().await;
    ctx.wait_for_records(1, Duration::from_secs(2)).await;
    ctx.wait_for_trigger(0, Duration::from_secs(2)).await;

    let records = ctx.downstream.records().await;
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].get("RECIPE_NUMBER"), Some(&TagValue::Int(7)));
    assert_eq!(records[0].get("TOTAL_WT"), Some(&TagValue::Float(1250.5)));

    runtime.shutdown().await.unwrap();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_each_trigger_produces_exactly_one_record() {
    let ctx = TestContext::new().await;
    let runtime = ctx.start().await;

    for _ in 0..3 {
        ctx.raise_trigger().await;
        ctx.wait_for_trigger(0, Duration::from_secs(2)).await;
    }
    // Extra settling time: no spurious duplicates from polling.
    tokio::time::sleep(Duration::from_millis(100)).await;

    assert_eq!(ctx.downstream.records().await.len(), 3);
    runtime.shutdown().await.unwrap();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_outage_buffers_then_drain_recovers_in_order() {
    let ctx = TestContext::new().await;
    let runtime = ctx.start().await;

    // Outage: cycles still complete, records land in the queue.
    ctx.downstream.set_failing(true);
    for n in 1..=3i64 {
        let mut fields = BTreeMap::new();
        fields.insert("RECIPE_NUMBER".to_string(), TagValue::Int(n));
        ctx.upstream.set_structured("Recipe", fields).await;
        ctx.raise_trigger().await;
        ctx.wait_for_trigger(0, Duration::from_secs(2)).await;
    }
    assert!(ctx.downstream.records().await.is_empty());

    let mut status = runtime.status();
    let snapshot = status.borrow_and_update().clone();
    assert_eq!(
        snapshot.connection_status,
        ConnectionStatus::DownstreamBuffering
    );
    assert_eq!(snapshot.queue_depth, 3);

    // Outage ends: the drain loop uploads the backlog in arrival order.
    ctx.downstream.set_failing(false);
    ctx.wait_for_records(3, Duration::from_secs(5)).await;

    let numbers: Vec<_> = ctx
        .downstream
        .records()
        .await
        .iter()
        .map(|r| r.get("RECIPE_NUMBER").cloned().unwrap())
        .collect();
    assert_eq!(
        numbers,
        vec![TagValue::Int(1), TagValue::Int(2), TagValue::Int(3)]
    );

    // With the queue empty and the downstream back, the next snapshots
    // report healthy again.
    tokio::time::sleep(Duration::from_millis(100)).await;
    let snapshot = status.borrow_and_update().clone();
    assert_eq!(snapshot.connection_status, ConnectionStatus::AllConnected);
    assert_eq!(snapshot.queue_depth, 0);

    runtime.shutdown().await.unwrap();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_validation_reject_drops_record_without_fault() {
    let mut ctx = TestContext::new().await;
    ctx.config
        .limits
        .insert("TOTAL_WT".to_string(), Limit::range(0.0, 50000.0));
    let runtime = ctx.start().await;

    let mut fields = BTreeMap::new();
    fields.insert("TOTAL_WT".to_string(), TagValue::Float(-5.0));
    ctx.upstream.set_structured("Recipe", fields).await;

    ctx.raise_trigger().await;
    ctx.wait_for_trigger(0, Duration::from_secs(2)).await;

    // Rejected record reached neither sink and the cycle completed normally.
    assert!(ctx.downstream.records().await.is_empty());
    let snapshot = runtime.status().borrow().clone();
    assert_eq!(snapshot.queue_depth, 0);
    assert_ne!(snapshot.connection_status, ConnectionStatus::Faulted);

    runtime.shutdown().await.unwrap();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_heartbeat_advances_while_running() {
    let ctx = TestContext::new().await;
    let runtime = ctx.start().await;

    tokio::time::sleep(Duration::from_millis(200)).await;
    let counter = match ctx.upstream.value("Heartbeat").await {
        Some(TagValue::Int(v)) => v,
        other => panic!("unexpected heartbeat value: {:?}", other),
    };
    assert!(counter > 0, "heartbeat never advanced");

    runtime.shutdown().await.unwrap();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_status_file_is_written_and_fresh() {
    let ctx = TestContext::new().await;
    let status_path = ctx.dir.path().join("status.json");
    let runtime = ctx
        .runtime_builder()
        .await
        .status_path(&status_path)
        .build()
        .unwrap()
        .start()
        .await
        .unwrap();

    tokio::time::sleep(Duration::from_millis(100)).await;
    let snapshot = read_status(&status_path, Duration::from_secs(5))
        .unwrap()
        .expect("status file missing or stale");
    assert_eq!(snapshot.queue_depth, 0);

    runtime.shutdown().await.unwrap();
}
