// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Common test infrastructure for tagbridge-core E2E tests.
//!
//! Provides TestContext for wiring up an in-memory controller, a recording
//! downstream, and a file-backed durable queue.

#![allow(dead_code)]

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::{Arc, Once};
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use tempfile::TempDir;
use tokio::sync::Mutex;

use tagbridge_core::config::BridgeConfig;
use tagbridge_core::downstream::Downstream;
use tagbridge_core::error::EngineError;
use tagbridge_core::queue::DurableQueue;
use tagbridge_core::record::{RecipeRecord, TagValue};
use tagbridge_core::runtime::{BridgeRuntime, BridgeRuntimeBuilder};
use tagbridge_core::upstream::{MemoryUpstream, Upstream};

static TRACING: Once = Once::new();

/// Install a test subscriber once per process; `RUST_LOG` controls the
/// filter when a test run needs engine logs.
pub fn init_tracing() {
    TRACING.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .with_test_writer()
            .try_init();
    });
}

/// Downstream that records inserted rows and can simulate an outage.
#[derive(Default)]
pub struct RecordingDownstream {
    failing: AtomicBool,
    records: Mutex<Vec<RecipeRecord>>,
}

impl RecordingDownstream {
    /// Simulate (or end) a database outage.
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    /// Rows inserted so far, in insertion order.
    pub async fn records(&self) -> Vec<RecipeRecord> {
        self.records.lock().await.clone()
    }
}

#[async_trait]
impl Downstream for RecordingDownstream {
    async fn connect(&self) -> Result<(), EngineError> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(EngineError::Downstream {
                operation: "connect".to_string(),
                details: "simulated outage".to_string(),
            });
        }
        Ok(())
    }

    async fn disconnect(&self) {}

    async fn is_connected(&self) -> bool {
        !self.failing.load(Ordering::SeqCst)
    }

    async fn insert(&self, record: &RecipeRecord) -> Result<(), EngineError> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(EngineError::Downstream {
                operation: "insert".to_string(),
                details: "simulated outage".to_string(),
            });
        }
        self.records.lock().await.push(record.clone());
        Ok(())
    }
}

/// Test context wiring an in-memory controller, a recording downstream, and
/// a file-backed queue in a temp directory.
pub struct TestContext {
    pub upstream: Arc<MemoryUpstream>,
    pub downstream: Arc<RecordingDownstream>,
    pub config: BridgeConfig,
    pub dir: TempDir,
}

impl TestContext {
    /// New context with seeded handshake tags and a sample recipe payload.
    pub async fn new() -> Self {
        init_tracing();

        let upstream = Arc::new(MemoryUpstream::new());
        upstream.connect().await.expect("connect upstream");
        upstream.set_value("Trigger", 0i64).await;
        upstream.set_value("Heartbeat", 0i64).await;
        upstream.set_value("ErrorCode", 0i64).await;

        let mut fields = BTreeMap::new();
        fields.insert("RECIPE_NUMBER".to_string(), TagValue::Int(7));
        fields.insert("TOTAL_WT".to_string(), TagValue::Float(1250.5));
        upstream.set_structured("Recipe", fields).await;

        let mut config = BridgeConfig::default();
        config
            .mappings
            .columns
            .insert("RECIPE_NUMBER".to_string(), "Recipe_Number".to_string());
        config
            .mappings
            .columns
            .insert("TOTAL_WT".to_string(), "Total_Weight".to_string());
        // Fast cadences so the suite stays quick.
        config.intervals.poll = Duration::from_millis(10);
        config.intervals.heartbeat = Duration::from_millis(20);
        config.intervals.drain = Duration::from_millis(50);
        config.intervals.status = Duration::from_millis(20);
        config.retry.base_delay = Duration::from_millis(50);
        config.retry.max_delay = Duration::from_millis(200);

        Self {
            upstream,
            downstream: Arc::new(RecordingDownstream::default()),
            config,
            dir: TempDir::new().expect("temp dir"),
        }
    }

    /// Path of the durable queue file inside the temp directory.
    pub fn queue_path(&self) -> PathBuf {
        self.dir.path().join("pending.db")
    }

    /// Open (or reopen) the durable queue file.
    pub async fn open_queue(&self) -> DurableQueue {
        DurableQueue::from_path(self.queue_path())
            .await
            .expect("open queue")
    }

    /// Builder preloaded with this context's components.
    pub async fn runtime_builder(&self) -> BridgeRuntimeBuilder {
        BridgeRuntime::builder()
            .upstream(self.upstream.clone() as Arc<dyn Upstream>)
            .downstream(self.downstream.clone() as Arc<dyn Downstream>)
            .queue(self.open_queue().await)
            .config(self.config.clone())
    }

    /// Start a runtime over this context's components.
    pub async fn start(&self) -> BridgeRuntime {
        self.runtime_builder()
            .await
            .build()
            .expect("build runtime")
            .start()
            .await
            .expect("start runtime")
    }

    /// Raise the controller trigger.
    pub async fn raise_trigger(&self) {
        self.upstream.set_value("Trigger", 1i64).await;
    }

    /// Current trigger tag value.
    pub async fn trigger(&self) -> i64 {
        match self.upstream.value("Trigger").await {
            Some(TagValue::Int(v)) => v,
            other => panic!("unexpected trigger value: {:?}", other),
        }
    }

    /// Wait until the trigger tag reads `value`, panicking after `timeout`.
    pub async fn wait_for_trigger(&self, value: i64, timeout: Duration) {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            if self.trigger().await == value {
                return;
            }
            if tokio::time::Instant::now() >= deadline {
                panic!(
                    "trigger did not reach {} within {:?} (currently {})",
                    value,
                    timeout,
                    self.trigger().await
                );
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    }

    /// Wait until the downstream recorded `count` rows.
    pub async fn wait_for_records(&self, count: usize, timeout: Duration) {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            let n = self.downstream.records().await.len();
            if n >= count {
                return;
            }
            if tokio::time::Instant::now() >= deadline {
                panic!("downstream has {} records, expected {}", n, count);
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    }
}
