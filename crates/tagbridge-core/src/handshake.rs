// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Handshake state machine coordinating one controller-originated event.
//!
//! The protocol mirrors the state onto the controller's trigger tag:
//!
//! ```text
//!  trigger   state          meaning
//!  -------   ------------   -------------------------------------------
//!  0         Idle           wait for the controller to raise the trigger
//!  1         Triggered      controller requests logging
//!  2         Acknowledging  bridge claimed the cycle, validate + persist
//!  99        Fault          error code written, waiting for operator reset
//! ```
//!
//! The bridge writes 2 before the slow operations run, so a concurrent
//! re-trigger cannot be mistaken for a new event (the controller only ever
//! raises the trigger from 0). The reset to 0 is written only after a
//! crash-durable sink accepted the record; between payload read and trigger
//! reset the record exists in exactly one durable place.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::sync::{Notify, watch};
use tracing::{error, info, warn};

use crate::backoff::{Backoff, RetryPolicy};
use crate::config::BridgeConfig;
use crate::downstream::Downstream;
use crate::error::{EngineError, FaultCode};
use crate::queue::DurableQueue;
use crate::record::{RecipeRecord, TagValue};
use crate::status::{ConnectionStatus, StatusSnapshot};
use crate::upstream::Upstream;
use crate::validate::validate;

/// Handshake protocol state. The discriminants are the trigger tag values.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
#[repr(i64)]
pub enum HandshakeState {
    /// Waiting for the controller to raise the trigger.
    Idle = 0,
    /// Controller requested logging.
    Triggered = 1,
    /// Cycle claimed by the bridge; validate and persist in progress.
    Acknowledging = 2,
    /// Unrecoverable cycle error; waiting for an operator reset.
    Fault = 99,
}

impl HandshakeState {
    /// The trigger tag value mirroring this state.
    pub fn trigger_value(self) -> i64 {
        self as i64
    }
}

/// The orchestrator: polls the upstream trigger and drives the protocol.
///
/// Exactly one instance exists per controller session; `poll` is the only
/// entry point that mutates the state.
pub struct HandshakeStateMachine {
    upstream: Arc<dyn Upstream>,
    downstream: Arc<dyn Downstream>,
    queue: DurableQueue,
    config: Arc<BridgeConfig>,
    status_tx: watch::Sender<StatusSnapshot>,
    drain_notify: Option<Arc<Notify>>,
    state: HandshakeState,
    last_fault: FaultCode,
    upstream_backoff: Backoff,
}

impl HandshakeStateMachine {
    /// Create the machine in the Idle state.
    pub fn new(
        upstream: Arc<dyn Upstream>,
        downstream: Arc<dyn Downstream>,
        queue: DurableQueue,
        config: Arc<BridgeConfig>,
        status_tx: watch::Sender<StatusSnapshot>,
    ) -> Self {
        let policy = RetryPolicy::new(config.retry);
        Self {
            upstream,
            downstream,
            queue,
            config,
            status_tx,
            drain_notify: None,
            state: HandshakeState::Idle,
            last_fault: FaultCode::None,
            upstream_backoff: Backoff::new(policy),
        }
    }

    /// Poke this notifier after buffering a record, so the drain loop can
    /// start the upload without waiting for its cadence.
    pub fn with_drain_notify(mut self, notify: Arc<Notify>) -> Self {
        self.drain_notify = Some(notify);
        self
    }

    /// Current protocol state.
    pub fn state(&self) -> HandshakeState {
        self.state
    }

    /// Code of the last fault, `None` after recovery.
    pub fn last_fault(&self) -> FaultCode {
        self.last_fault
    }

    /// Read the trigger and advance the state machine by one step.
    ///
    /// Upstream I/O failures are absorbed here: they mark the session
    /// unreachable (or fault the cycle) and reconnection is paced by the
    /// retry policy on subsequent polls. The only error that escapes is a
    /// fatal one ([`EngineError::QueueIo`]).
    pub async fn poll(&mut self) -> Result<(), EngineError> {
        if !self.upstream.is_connected().await {
            if !self.upstream_backoff.ready() {
                return self.publish_status().await;
            }
            match self.upstream.connect().await {
                Ok(()) => {
                    self.upstream_backoff.reset();
                    info!("upstream connected");
                }
                Err(e) => {
                    let delay = self.upstream_backoff.failure();
                    warn!(retry_in_s = delay.as_secs(), "upstream connect failed: {}", e);
                    return self.publish_status().await;
                }
            }
        }

        let trigger = match self.read_trigger().await {
            Ok(v) => v,
            Err(e) => {
                let delay = self.upstream_backoff.failure();
                warn!(retry_in_s = delay.as_secs(), "trigger read failed: {}", e);
                return self.publish_status().await;
            }
        };
        self.upstream_backoff.reset();

        match self.state {
            HandshakeState::Idle => {
                if trigger == HandshakeState::Triggered.trigger_value() {
                    self.handle_trigger().await?;
                }
            }
            HandshakeState::Fault => {
                if trigger == HandshakeState::Idle.trigger_value() {
                    self.recover_fault().await;
                }
            }
            // Triggered/Acknowledging are transient within handle_trigger and
            // never observed across polls.
            HandshakeState::Triggered | HandshakeState::Acknowledging => {}
        }

        self.publish_status().await
    }

    /// Manually clear a fault without waiting for the controller reset.
    ///
    /// Normally the controller acknowledges the fault by resetting the
    /// trigger; this exists for operator intervention only.
    pub async fn force_clear_fault(&mut self) -> Result<(), EngineError> {
        if self.state == HandshakeState::Fault {
            warn!("force clearing fault state");
            self.write_error_code(FaultCode::None).await;
            self.write_trigger(HandshakeState::Idle.trigger_value()).await;
            self.state = HandshakeState::Idle;
            self.last_fault = FaultCode::None;
            self.publish_status().await?;
        }
        Ok(())
    }

    async fn handle_trigger(&mut self) -> Result<(), EngineError> {
        info!("trigger detected, reading recipe payload");
        self.state = HandshakeState::Triggered;

        let record = match self.read_payload().await {
            Ok(record) => record,
            Err(e) => {
                error!("payload read failed: {}", e);
                self.set_fault(FaultCode::UpstreamReadFailed).await;
                return Ok(());
            }
        };

        // Claim the cycle before the slow operations run. The controller
        // only raises the trigger from 0, so a re-trigger cannot race this.
        if !self
            .write_trigger(HandshakeState::Acknowledging.trigger_value())
            .await
        {
            self.set_fault(FaultCode::UpstreamWriteFailed).await;
            return Ok(());
        }
        self.state = HandshakeState::Acknowledging;

        let violations = validate(&record, &self.config.limits);
        if !violations.is_empty() {
            // A rejected record can never become valid: it is dropped with a
            // diagnostic rather than faulting the handshake or retrying
            // forever. The trigger is still reset so the cycle completes.
            let rejection = EngineError::Validation { violations };
            error!(
                sequence = record.sequence,
                "record rejected, discarding: {}", rejection
            );
            if !self.write_trigger(HandshakeState::Idle.trigger_value()).await {
                self.set_fault(FaultCode::UpstreamWriteFailed).await;
                return Ok(());
            }
            self.state = HandshakeState::Idle;
            return Ok(());
        }

        match self.downstream.insert(&record).await {
            Ok(()) => {
                info!(sequence = record.sequence, "record inserted downstream");
            }
            Err(e) => {
                warn!(
                    sequence = record.sequence,
                    "downstream insert failed, buffering: {}", e
                );
                if let Err(queue_err) = self.queue.enqueue(&record).await {
                    // Neither sink accepted the record: the no-loss guarantee
                    // is broken. Leave a fault on the controller, then stop
                    // the process.
                    self.set_fault(FaultCode::QueueWriteFailed).await;
                    return Err(queue_err);
                }
                if let Some(notify) = &self.drain_notify {
                    notify.notify_one();
                }
            }
        }

        // Only now is it safe to tell the controller "trigger again": the
        // record is durable in exactly one place.
        if !self.write_trigger(HandshakeState::Idle.trigger_value()).await {
            error!("failed to reset trigger after durable accept; record is safe");
        }
        self.state = HandshakeState::Idle;
        info!("handshake complete");
        Ok(())
    }

    async fn recover_fault(&mut self) {
        info!("fault acknowledged by controller, recovering from {}", self.last_fault);
        self.write_error_code(FaultCode::None).await;
        self.state = HandshakeState::Idle;
        self.last_fault = FaultCode::None;
    }

    async fn set_fault(&mut self, code: FaultCode) {
        error!("entering fault state: {}", code);
        self.last_fault = code;
        // Best effort: if the session is gone these writes fail too, and the
        // controller's own heartbeat watchdog raises the alarm instead.
        self.write_error_code(code).await;
        self.write_trigger(HandshakeState::Fault.trigger_value()).await;
        self.state = HandshakeState::Fault;
    }

    async fn read_trigger(&self) -> Result<i64, EngineError> {
        let value = self.upstream.read_value(&self.config.tags.trigger).await?;
        match value {
            TagValue::Int(v) => Ok(v),
            other => Err(EngineError::UpstreamIo {
                operation: format!("read {}", self.config.tags.trigger),
                details: format!("trigger tag holds a non-integer value: {:?}", other),
            }),
        }
    }

    /// Read the structured payload plus the configured auxiliary tags and
    /// stamp the result with the host clock.
    async fn read_payload(&self) -> Result<RecipeRecord, EngineError> {
        let mut fields = self.upstream.read_structured(&self.config.tags.recipe).await?;

        for (field, tag) in &self.config.mappings.extra_tags {
            match self.upstream.read_value(tag).await {
                Ok(value) => {
                    fields.insert(field.clone(), value);
                }
                Err(e) => {
                    // Auxiliary tags are optional enrichment; a missing one
                    // does not abort the cycle.
                    warn!(tag = %tag, "extra tag read failed, skipping: {}", e);
                }
            }
        }

        Ok(RecipeRecord::capture(fields))
    }

    async fn write_trigger(&self, value: i64) -> bool {
        match self
            .upstream
            .write_value(&self.config.tags.trigger, TagValue::Int(value))
            .await
        {
            Ok(()) => true,
            Err(e) => {
                error!(value, "trigger write failed: {}", e);
                false
            }
        }
    }

    async fn write_error_code(&self, code: FaultCode) {
        if let Err(e) = self
            .upstream
            .write_value(
                &self.config.tags.error_code,
                TagValue::Int(code.value() as i64),
            )
            .await
        {
            error!("error code write failed: {}", e);
        }
    }

    /// Derived on every snapshot, never stored: once the drain loop empties
    /// the queue and the downstream is back, the next poll reports healthy.
    async fn connection_status(&self, queue_depth: i64) -> ConnectionStatus {
        if self.state == HandshakeState::Fault {
            return ConnectionStatus::Faulted;
        }
        if !self.upstream.is_connected().await {
            return ConnectionStatus::UpstreamDown;
        }
        if queue_depth > 0 || !self.downstream.is_connected().await {
            return ConnectionStatus::DownstreamBuffering;
        }
        ConnectionStatus::AllConnected
    }

    /// Recompute and publish the status snapshot. Queue failures propagate:
    /// losing the durable buffer is fatal.
    async fn publish_status(&mut self) -> Result<(), EngineError> {
        let queue_depth = self.queue.pending_count().await?;
        let snapshot = StatusSnapshot {
            handshake_state: self.state,
            connection_status: self.connection_status(queue_depth).await,
            queue_depth,
            last_error_code: self.last_fault.value(),
            updated_at: chrono::Utc::now(),
        };
        self.status_tx.send_replace(snapshot);
        Ok(())
    }
}
