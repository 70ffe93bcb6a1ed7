// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Embeddable runtime for tagbridge-core.
//!
//! This module provides [`BridgeRuntime`] which allows embedding the bridge
//! engine into an existing tokio application.
//!
//! # Example
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use tagbridge_core::config::BridgeConfig;
//! use tagbridge_core::downstream::PostgresDownstream;
//! use tagbridge_core::queue::DurableQueue;
//! use tagbridge_core::runtime::BridgeRuntime;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = BridgeConfig::default();
//!     let pool = sqlx::PgPool::connect("postgres://...").await?;
//!     let downstream = Arc::new(PostgresDownstream::new(
//!         pool,
//!         "Batch_Records",
//!         config.mappings.clone(),
//!     ));
//!     let queue = DurableQueue::from_path(".data/pending.db").await?;
//!
//!     let runtime = BridgeRuntime::builder()
//!         .upstream(my_upstream)
//!         .downstream(downstream)
//!         .queue(queue)
//!         .config(config)
//!         .build()?
//!         .start()
//!         .await?;
//!
//!     // ... run your application ...
//!
//!     // Graceful shutdown
//!     runtime.shutdown().await?;
//!     Ok(())
//! }
//! ```

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use tokio::sync::{Notify, watch};
use tokio::task::JoinHandle;
use tracing::{error, info};

use crate::backoff::RetryPolicy;
use crate::config::BridgeConfig;
use crate::downstream::Downstream;
use crate::drain::run_drain_loop;
use crate::error::EngineError;
use crate::handshake::HandshakeStateMachine;
use crate::heartbeat::run_heartbeat_loop;
use crate::queue::DurableQueue;
use crate::status::{StatusSnapshot, run_status_writer};
use crate::upstream::Upstream;

/// Builder for creating a [`BridgeRuntime`].
pub struct BridgeRuntimeBuilder {
    upstream: Option<Arc<dyn Upstream>>,
    downstream: Option<Arc<dyn Downstream>>,
    queue: Option<DurableQueue>,
    config: BridgeConfig,
    status_path: Option<PathBuf>,
}

impl std::fmt::Debug for BridgeRuntimeBuilder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BridgeRuntimeBuilder")
            .field("upstream", &self.upstream.as_ref().map(|_| "..."))
            .field("downstream", &self.downstream.as_ref().map(|_| "..."))
            .field("queue", &self.queue.as_ref().map(|_| "..."))
            .field("status_path", &self.status_path)
            .finish()
    }
}

impl Default for BridgeRuntimeBuilder {
    fn default() -> Self {
        Self {
            upstream: None,
            downstream: None,
            queue: None,
            config: BridgeConfig::default(),
            status_path: None,
        }
    }
}

impl BridgeRuntimeBuilder {
    /// Create a new builder with default settings.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the upstream controller connector (required).
    pub fn upstream(mut self, upstream: Arc<dyn Upstream>) -> Self {
        self.upstream = Some(upstream);
        self
    }

    /// Set the downstream database connector (required).
    pub fn downstream(mut self, downstream: Arc<dyn Downstream>) -> Self {
        self.downstream = Some(downstream);
        self
    }

    /// Set the durable queue (required).
    pub fn queue(mut self, queue: DurableQueue) -> Self {
        self.queue = Some(queue);
        self
    }

    /// Set the engine configuration.
    ///
    /// Default: [`BridgeConfig::default`] (which `build` rejects, since the
    /// column mappings are empty).
    pub fn config(mut self, config: BridgeConfig) -> Self {
        self.config = config;
        self
    }

    /// Mirror status snapshots to a JSON file at this path.
    pub fn status_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.status_path = Some(path.into());
        self
    }

    /// Build the runtime configuration.
    ///
    /// Returns an error if required fields are missing or the configuration
    /// fails validation.
    pub fn build(self) -> Result<BridgeRuntimeConfig> {
        let upstream = self
            .upstream
            .ok_or_else(|| anyhow::anyhow!("upstream is required"))?;
        let downstream = self
            .downstream
            .ok_or_else(|| anyhow::anyhow!("downstream is required"))?;
        let queue = self
            .queue
            .ok_or_else(|| anyhow::anyhow!("queue is required"))?;
        self.config.validate()?;

        Ok(BridgeRuntimeConfig {
            upstream,
            downstream,
            queue,
            config: Arc::new(self.config),
            status_path: self.status_path,
        })
    }
}

/// Configuration for a [`BridgeRuntime`].
pub struct BridgeRuntimeConfig {
    upstream: Arc<dyn Upstream>,
    downstream: Arc<dyn Downstream>,
    queue: DurableQueue,
    config: Arc<BridgeConfig>,
    status_path: Option<PathBuf>,
}

impl std::fmt::Debug for BridgeRuntimeConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BridgeRuntimeConfig")
            .field("status_path", &self.status_path)
            .finish()
    }
}

impl BridgeRuntimeConfig {
    /// Start the runtime, spawning the handshake, heartbeat, drain, and
    /// status-writer tasks.
    pub async fn start(self) -> Result<BridgeRuntime> {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let (status_tx, status_rx) = watch::channel(StatusSnapshot::startup());
        let force_drain = Arc::new(Notify::new());

        let machine = HandshakeStateMachine::new(
            self.upstream.clone(),
            self.downstream.clone(),
            self.queue.clone(),
            self.config.clone(),
            status_tx,
        )
        .with_drain_notify(force_drain.clone());
        let poll_handle = tokio::spawn(run_poll_loop(
            machine,
            self.config.intervals.poll,
            shutdown_rx.clone(),
            shutdown_tx.clone(),
        ));

        let heartbeat_handle = tokio::spawn(run_heartbeat_loop(
            self.upstream.clone(),
            self.config.tags.heartbeat.clone(),
            self.config.intervals.heartbeat,
            shutdown_rx.clone(),
        ));

        let drain_handle = tokio::spawn(run_drain_loop(
            self.queue.clone(),
            self.downstream.clone(),
            RetryPolicy::new(self.config.retry),
            self.config.intervals.drain,
            force_drain.clone(),
            shutdown_rx.clone(),
            shutdown_tx.clone(),
        ));

        let status_handle = self.status_path.as_ref().map(|path| {
            tokio::spawn(run_status_writer(
                path.clone(),
                status_rx.clone(),
                self.config.intervals.status,
                shutdown_rx.clone(),
            ))
        });

        info!("BridgeRuntime started");

        Ok(BridgeRuntime {
            poll_handle,
            drain_handle,
            heartbeat_handle,
            status_handle,
            shutdown_tx,
            status_rx,
            force_drain,
            upstream: self.upstream,
            downstream: self.downstream,
        })
    }
}

/// A running bridge engine that can be embedded in an application.
///
/// The runtime manages:
/// - the handshake poll loop (the only writer of protocol state)
/// - the heartbeat emitter
/// - the background queue drain
/// - the optional status file writer
///
/// A fatal engine error (losing the durable queue) shuts the whole runtime
/// down; [`shutdown`](Self::shutdown) then surfaces it. Call
/// [`shutdown`](Self::shutdown) for graceful termination.
pub struct BridgeRuntime {
    poll_handle: JoinHandle<Result<(), EngineError>>,
    drain_handle: JoinHandle<Result<(), EngineError>>,
    heartbeat_handle: JoinHandle<()>,
    status_handle: Option<JoinHandle<()>>,
    shutdown_tx: watch::Sender<bool>,
    status_rx: watch::Receiver<StatusSnapshot>,
    force_drain: Arc<Notify>,
    upstream: Arc<dyn Upstream>,
    downstream: Arc<dyn Downstream>,
}

impl BridgeRuntime {
    /// Create a new builder for configuring the runtime.
    pub fn builder() -> BridgeRuntimeBuilder {
        BridgeRuntimeBuilder::new()
    }

    /// Watch channel carrying the latest status snapshot.
    pub fn status(&self) -> watch::Receiver<StatusSnapshot> {
        self.status_rx.clone()
    }

    /// Request an immediate drain cycle instead of waiting for the cadence.
    pub fn force_drain(&self) {
        self.force_drain.notify_one();
    }

    /// Check if the engine is still running.
    pub fn is_running(&self) -> bool {
        !self.poll_handle.is_finished()
    }

    /// Gracefully shut down the runtime.
    ///
    /// Signals every task to stop, waits for them, and disconnects both
    /// connectors. Returns the fatal engine error if one stopped the runtime.
    pub async fn shutdown(self) -> Result<()> {
        info!("BridgeRuntime shutting down...");
        let _ = self.shutdown_tx.send(true);

        let poll_result = join_engine_task("handshake", self.poll_handle).await;
        let drain_result = join_engine_task("drain", self.drain_handle).await;
        if let Err(e) = self.heartbeat_handle.await {
            error!("heartbeat task panicked: {}", e);
        }
        if let Some(handle) = self.status_handle
            && let Err(e) = handle.await
        {
            error!("status writer task panicked: {}", e);
        }

        self.upstream.disconnect().await;
        self.downstream.disconnect().await;

        poll_result?;
        drain_result?;
        info!("BridgeRuntime shutdown complete");
        Ok(())
    }
}

async fn join_engine_task(
    name: &str,
    handle: JoinHandle<Result<(), EngineError>>,
) -> Result<()> {
    match handle.await {
        Ok(Ok(())) => Ok(()),
        Ok(Err(e)) => {
            error!("{} task failed: {}", name, e);
            Err(e.into())
        }
        Err(e) => {
            error!("{} task panicked: {}", name, e);
            Err(anyhow::anyhow!("{} task panicked: {}", name, e))
        }
    }
}

/// Drive the handshake state machine on the poll cadence.
///
/// A fatal error signals shutdown to the rest of the runtime before this
/// task exits.
async fn run_poll_loop(
    mut machine: HandshakeStateMachine,
    interval: Duration,
    mut shutdown_rx: watch::Receiver<bool>,
    shutdown_tx: watch::Sender<bool>,
) -> Result<(), EngineError> {
    info!(interval_ms = interval.as_millis() as u64, "handshake loop started");
    let mut ticker = tokio::time::interval(interval);

    loop {
        tokio::select! {
            biased;

            _ = shutdown_rx.changed() => {
                if *shutdown_rx.borrow() {
                    break;
                }
            }

            _ = ticker.tick() => {
                if let Err(e) = machine.poll().await {
                    error!("fatal engine error, stopping runtime: {}", e);
                    let _ = shutdown_tx.send(true);
                    return Err(e);
                }
            }
        }
    }

    info!("handshake loop stopped");
    Ok(())
}
