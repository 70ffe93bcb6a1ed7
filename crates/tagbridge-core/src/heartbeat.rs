// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Liveness counter written back to the controller.
//!
//! The controller watches the heartbeat tag with its own watchdog timer; a
//! stalled counter means the bridge is gone. The counter wraps at the 16-bit
//! signed boundary so it fits a controller word register.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::record::TagValue;
use crate::upstream::Upstream;

/// Exclusive upper bound of the counter; the value after 32767 is 0.
pub const HEARTBEAT_WRAP: i64 = 32768;

/// Increment the heartbeat tag on a fixed cadence until the shutdown signal
/// fires.
///
/// Failures are logged and the next tick retries; heartbeat trouble never
/// faults the handshake. Keeps a local shadow of the counter so a failed
/// read does not reset the sequence.
pub async fn run_heartbeat_loop(
    upstream: Arc<dyn Upstream>,
    tag: String,
    interval: Duration,
    mut shutdown_rx: watch::Receiver<bool>,
) {
    info!(tag = %tag, interval_s = interval.as_secs(), "heartbeat loop started");
    let mut ticker = tokio::time::interval(interval);
    let mut counter: i64 = 0;

    loop {
        tokio::select! {
            biased;

            _ = shutdown_rx.changed() => {
                if *shutdown_rx.borrow() {
                    break;
                }
            }

            _ = ticker.tick() => {
                if !upstream.is_connected().await {
                    continue;
                }

                // Prefer the controller's value so a bridge restart continues
                // the sequence instead of jumping back to zero.
                if let Ok(TagValue::Int(current)) = upstream.read_value(&tag).await {
                    counter = current;
                }

                counter = (counter + 1) % HEARTBEAT_WRAP;
                match upstream.write_value(&tag, TagValue::Int(counter)).await {
                    Ok(()) => debug!(counter, "heartbeat written"),
                    Err(e) => warn!("heartbeat write failed: {}", e),
                }
            }
        }
    }

    info!("heartbeat loop stopped");
}
