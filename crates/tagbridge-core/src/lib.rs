// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Tagbridge Core - Controller-to-Database Reliability Bridge
//!
//! This crate bridges batch records from an industrial controller into a SQL
//! database without losing a record across database outages, crashes, and
//! restarts. It owns the handshake protocol with the controller, a durable
//! store-and-forward queue, and the retry discipline between the two.
//!
//! # Architecture
//!
//! ```text
//! ┌───────────────────────┐
//! │      Controller       │  trigger / heartbeat / error-code tags
//! │  (batch production)   │  + structured recipe payload
//! └──────────┬────────────┘
//!            │ Upstream trait
//!            ▼
//! ┌───────────────────────┐      ┌─────────────────────────┐
//! │    tagbridge-core     │─────▶│   Status surface        │
//! │  (This Crate)         │      │ (watch channel + JSON)  │
//! │  Handshake / Validate │      └─────────────────────────┘
//! └──────────┬────────────┘
//!            │
//!     insert │ fallback on failure
//!            ▼
//! ┌───────────────┐      ┌─────────────────────────┐
//! │  PostgreSQL   │◀─────│   Durable queue (SQLite)│
//! │ (Destination) │ drain│   store-and-forward     │
//! └───────────────┘      └─────────────────────────┘
//! ```
//!
//! # Handshake Protocol
//!
//! The controller and the bridge share a trigger tag whose value encodes the
//! protocol state:
//!
//! ```text
//!                ┌──────┐
//!     ┌─────────▶│ Idle │◀────────────────┐
//!     │          └──┬───┘                 │
//!     │   trigger=1 │                     │ trigger reset by
//!     │             ▼                     │ controller (0)
//!     │      ┌───────────┐          ┌─────┴─────┐
//!     │      │ Triggered │─────────▶│   Fault   │
//!     │      └─────┬─────┘  error   │ (code=99) │
//!     │            │ claim (2)      └───────────┘
//!     │            ▼                      ▲
//!     │    ┌───────────────┐              │
//!     └────│ Acknowledging │──────────────┘
//!  durable └───────────────┘    error
//!  accept (0)
//! ```
//!
//! One trigger cycle produces exactly one record. The trigger is reset to 0
//! only after the record landed in a crash-durable sink (the database or the
//! queue), so a crash at any point re-delivers instead of losing the record.
//!
//! # Fault Codes
//!
//! On a cycle error the bridge writes a numeric code to the controller's
//! error-code tag and sets the trigger to 99:
//!
//! | Code | Meaning |
//! |------|---------|
//! | `0` | No fault |
//! | `1` | Reading the recipe payload or a handshake tag failed |
//! | `2` | The record violated the configured validation limits |
//! | `3` | Both the database insert and the durable queue append failed |
//! | `4` | Writing a handshake tag failed |
//!
//! The controller recovers the bridge by resetting the trigger to 0. Code 2
//! is diagnostic only: validation rejects drop the record and complete the
//! cycle without faulting.
//!
//! # Independent Loops
//!
//! The runtime runs four loops that never block each other:
//!
//! | Loop | Cadence | Purpose |
//! |------|---------|---------|
//! | Handshake | 100ms | Poll the trigger, capture and persist records |
//! | Heartbeat | 2s | Increment the controller's liveness counter |
//! | Drain | 30s + on demand | Upload the queue backlog in arrival order |
//! | Status | 1s | Mirror the status snapshot to a JSON file |
//!
//! # Configuration
//!
//! Scalar settings load from environment variables via
//! [`config::Settings::from_env`]:
//!
//! | Variable | Required | Default | Description |
//! |----------|----------|---------|-------------|
//! | `TAGBRIDGE_QUEUE_PATH` | Yes | - | SQLite durable queue file path |
//! | `TAGBRIDGE_DATABASE_URL` | No | - | Downstream connection string |
//! | `TAGBRIDGE_STATUS_PATH` | No | - | Status snapshot file path |
//! | `TAGBRIDGE_POLL_INTERVAL_MS` | No | `100` | Handshake poll cadence |
//! | `TAGBRIDGE_HEARTBEAT_INTERVAL_S` | No | `2` | Heartbeat cadence |
//! | `TAGBRIDGE_DRAIN_INTERVAL_S` | No | `30` | Drain cadence |
//! | `TAGBRIDGE_RETRY_BASE_S` | No | `1` | First retry delay |
//! | `TAGBRIDGE_RETRY_MAX_S` | No | `60` | Retry delay cap |
//!
//! # Modules
//!
//! - [`config`]: Configuration structures and environment loading
//! - [`error`]: Engine errors and controller fault codes
//! - [`record`]: Captured record types
//! - [`upstream`]: Controller connector trait and in-memory backend
//! - [`downstream`]: Database connector trait and Postgres backend
//! - [`queue`]: SQLite durable store-and-forward queue
//! - [`backoff`]: Exponential retry pacing
//! - [`validate`]: Range validation of captured records
//! - [`handshake`]: The trigger handshake state machine
//! - [`drain`]: Background queue drain loop
//! - [`heartbeat`]: Liveness counter loop
//! - [`status`]: Status snapshots, watch channel, and file mirror
//! - [`runtime`]: Embeddable runtime tying the loops together

#![deny(missing_docs)]

/// Exponential retry pacing shared by both connectors.
pub mod backoff;

/// Configuration structures and environment variable loading.
pub mod config;

/// Database connector trait and the Postgres implementation.
pub mod downstream;

/// Background drain of the durable queue into the downstream.
pub mod drain;

/// Engine errors and the numeric controller fault codes.
pub mod error;

/// The trigger handshake state machine.
pub mod handshake;

/// Liveness counter written back to the controller.
pub mod heartbeat;

/// SQLite-backed durable store-and-forward queue.
pub mod queue;

/// Record types captured from the controller.
pub mod record;

/// Embeddable runtime running the handshake, heartbeat, drain, and status
/// loops.
pub mod runtime;

/// Status snapshots, the watch channel, and the JSON file mirror.
pub mod status;

/// Controller connector trait and the in-memory backend.
pub mod upstream;

/// Range validation of captured records.
pub mod validate;
