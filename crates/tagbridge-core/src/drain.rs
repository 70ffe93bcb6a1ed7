// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Background drain of the durable queue into the downstream.
//!
//! Runs independently of the handshake loop: a new trigger is never blocked
//! by a backlog upload. Entries leave the queue strictly in arrival order,
//! and only after the downstream confirms the insert committed.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{Notify, watch};
use tracing::{debug, error, info, warn};

use crate::backoff::{Backoff, RetryPolicy};
use crate::downstream::Downstream;
use crate::error::EngineError;
use crate::queue::DurableQueue;

/// Upper bound on entries delivered per cycle, so one cycle cannot hold the
/// downstream connection for an unbounded backlog.
const DRAIN_BATCH_LIMIT: i64 = 50;

/// Drive drain cycles until the shutdown signal fires.
///
/// Cycles run on the configured cadence and immediately when `force` is
/// notified (the handshake loop pokes it after buffering a record, and the
/// embedding API exposes it). Reconnect attempts toward a dead downstream
/// are paced by `policy`. The only error that escapes is a fatal
/// [`EngineError::QueueIo`]; it signals shutdown to the rest of the runtime
/// before this task exits.
pub async fn run_drain_loop(
    queue: DurableQueue,
    downstream: Arc<dyn Downstream>,
    policy: RetryPolicy,
    interval: Duration,
    force: Arc<Notify>,
    mut shutdown_rx: watch::Receiver<bool>,
    shutdown_tx: watch::Sender<bool>,
) -> Result<(), EngineError> {
    info!(interval_s = interval.as_secs(), "drain loop started");
    let mut ticker = tokio::time::interval(interval);
    let mut backoff = Backoff::new(policy);

    loop {
        let cycle = tokio::select! {
            biased;

            _ = shutdown_rx.changed() => {
                if *shutdown_rx.borrow() {
                    break;
                }
                continue;
            }

            _ = force.notified() => {
                drain_cycle(&queue, &downstream, &mut backoff).await
            }

            _ = ticker.tick() => {
                drain_cycle(&queue, &downstream, &mut backoff).await
            }
        };

        if let Err(e) = cycle {
            error!("fatal engine error, stopping runtime: {}", e);
            let _ = shutdown_tx.send(true);
            return Err(e);
        }
    }

    info!("drain loop stopped");
    Ok(())
}

/// One drain cycle: reconnect if needed, then deliver the oldest pending
/// entries in order until the batch limit or the first failure.
///
/// Returns the number of entries confirmed and destroyed.
pub async fn drain_cycle(
    queue: &DurableQueue,
    downstream: &Arc<dyn Downstream>,
    backoff: &mut Backoff,
) -> Result<u64, EngineError> {
    if queue.pending_count().await? == 0 {
        return Ok(0);
    }

    if !backoff.ready() {
        return Ok(0);
    }

    if !downstream.is_connected().await {
        match downstream.connect().await {
            Ok(()) => {
                backoff.reset();
                info!("downstream reconnected, draining backlog");
            }
            Err(e) => {
                let delay = backoff.failure();
                warn!(
                    retry_in_s = delay.as_secs(),
                    "downstream reconnect failed: {}", e
                );
                return Ok(0);
            }
        }
    }

    let batch = queue.peek_batch(DRAIN_BATCH_LIMIT).await?;
    let mut synced = 0u64;

    for entry in batch {
        match downstream.insert(&entry.record).await {
            Ok(()) => {
                // Destroy only after the insert committed. A crash between
                // the two delivers the entry again, which beats losing it.
                queue.mark_synced(entry.id).await?;
                backoff.reset();
                synced += 1;
                debug!(
                    entry_id = entry.id,
                    sequence = entry.record.sequence,
                    "backlog entry delivered"
                );
            }
            Err(e) => {
                // Strict FIFO: never skip past a failed entry.
                queue.increment_attempts(entry.id).await?;
                let delay = backoff.failure();
                error!(
                    entry_id = entry.id,
                    attempts = entry.attempts + 1,
                    retry_in_s = delay.as_secs(),
                    "backlog delivery failed, stopping cycle: {}", e
                );
                break;
            }
        }
    }

    if synced > 0 {
        info!(synced, "drain cycle complete");
    }
    Ok(synced)
}
