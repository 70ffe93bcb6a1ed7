// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Status surface published by the engine.
//!
//! The engine recomputes a [`StatusSnapshot`] on every state transition and
//! publishes it on a `tokio::sync::watch` channel. This module also carries
//! the cross-process file form of the surface: a background writer that
//! mirrors the latest snapshot to a well-known JSON file (atomically, via
//! temp file + rename), and a reader with a staleness cutoff for UI
//! indicators.

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::watch;
use tracing::{debug, error, info};

use crate::handshake::HandshakeState;

/// Derived connectivity summary, recomputed on every state transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionStatus {
    /// Upstream and downstream both reachable, queue empty.
    AllConnected,
    /// Upstream reachable; records are being buffered for the downstream.
    DownstreamBuffering,
    /// Upstream unreachable.
    UpstreamDown,
    /// The handshake is in the Fault state.
    Faulted,
}

/// Snapshot of the engine's externally observable state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatusSnapshot {
    /// Current handshake protocol state.
    pub handshake_state: HandshakeState,
    /// Derived connectivity summary.
    pub connection_status: ConnectionStatus,
    /// Entries awaiting upload in the durable queue.
    pub queue_depth: i64,
    /// Numeric code of the last fault, 0 when none.
    pub last_error_code: u16,
    /// When this snapshot was produced.
    pub updated_at: DateTime<Utc>,
}

impl StatusSnapshot {
    /// Snapshot published before the first poll completes.
    pub fn startup() -> Self {
        Self {
            handshake_state: HandshakeState::Idle,
            connection_status: ConnectionStatus::UpstreamDown,
            queue_depth: 0,
            last_error_code: 0,
            updated_at: Utc::now(),
        }
    }
}

/// Mirror the latest status snapshot to `path` on a fixed cadence until the
/// shutdown signal fires.
///
/// Each write refreshes `updated_at`, so a reader can treat an old timestamp
/// as "bridge not running".
pub async fn run_status_writer(
    path: PathBuf,
    mut status_rx: watch::Receiver<StatusSnapshot>,
    interval: Duration,
    mut shutdown_rx: watch::Receiver<bool>,
) {
    info!(path = %path.display(), "status writer started");
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
                let mut snapshot = status_rx.borrow_and_update().clone();
                snapshot.updated_at = Utc::now();
                if let Err(e) = write_snapshot(&path, &snapshot).await {
                    error!("failed to write status file: {:#}", e);
                }
            }
        }
    }

    // Final write so readers see the last known state with a fresh timestamp.
    let mut snapshot = status_rx.borrow().clone();
    snapshot.updated_at = Utc::now();
    if let Err(e) = write_snapshot(&path, &snapshot).await {
        error!("failed to write final status file: {:#}", e);
    }
    info!("status writer stopped");
}

async fn write_snapshot(path: &Path, snapshot: &StatusSnapshot) -> Result<()> {
    let json = serde_json::to_string_pretty(snapshot).context("serialize snapshot")?;
    let tmp = path.with_extension("json.tmp");

    tokio::fs::write(&tmp, &json)
        .await
        .with_context(|| format!("write {:?}", tmp))?;
    // Rename is atomic on the same filesystem, so readers never observe a
    // half-written file.
    if let Err(e) = tokio::fs::rename(&tmp, path).await {
        let _ = tokio::fs::remove_file(&tmp).await;
        return Err(e).with_context(|| format!("rename {:?}", tmp));
    }

    debug!(path = %path.display(), "status file written");
    Ok(())
}

/// Read a status file written by [`run_status_writer`].
///
/// Returns `None` if the file does not exist or its snapshot is older than
/// `max_age` (the bridge is presumed not running).
pub fn read_status(path: impl AsRef<Path>, max_age: Duration) -> Result<Option<StatusSnapshot>> {
    let path = path.as_ref();
    if !path.exists() {
        return Ok(None);
    }

    let raw = std::fs::read_to_string(path).with_context(|| format!("read {:?}", path))?;
    let snapshot: StatusSnapshot =
        serde_json::from_str(&raw).with_context(|| format!("parse {:?}", path))?;

    let age = Utc::now().signed_duration_since(snapshot.updated_at);
    if age.num_milliseconds() > max_age.as_millis() as i64 {
        return Ok(None);
    }

    Ok(Some(snapshot))
}
