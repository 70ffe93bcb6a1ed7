// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Error types for tagbridge-core.
//!
//! Provides a unified engine error plus the numeric fault codes mirrored
//! onto the controller's error-code tag.

use std::fmt;

/// Result type using EngineError
pub type Result<T> = std::result::Result<T, EngineError>;

/// Engine errors that can occur while bridging records.
#[derive(Debug, Clone)]
#[non_exhaustive]
pub enum EngineError {
    /// Upstream (controller) read/write failure, timeout, or disconnect.
    ///
    /// Recoverable: drives reconnect + backoff. Inside the handshake's own
    /// Triggered/Acknowledging path it forces the Fault state.
    UpstreamIo {
        /// The operation that failed (e.g. "read Trigger").
        operation: String,
        /// Error details.
        details: String,
    },

    /// Downstream (database) connection failure, constraint violation, or timeout.
    ///
    /// Recoverable at the system level: the record falls back to the durable
    /// queue and is retried by the drain loop.
    Downstream {
        /// The operation that failed.
        operation: String,
        /// Error details.
        details: String,
    },

    /// A record violated the configured validation limits.
    ///
    /// Never retried: the record is permanently rejected with a diagnostic.
    Validation {
        /// One description per violated field.
        violations: Vec<String>,
    },

    /// Invalid or incomplete configuration. Fatal at startup only.
    Configuration {
        /// What is wrong.
        details: String,
    },

    /// Durable queue storage unavailable.
    ///
    /// Fatal to the whole process: the no-loss guarantee cannot be upheld
    /// without a working durable buffer.
    QueueIo {
        /// The operation that failed.
        operation: String,
        /// Error details.
        details: String,
    },
}

impl EngineError {
    /// Get the stable error code string for this error type.
    pub fn error_code(&self) -> &'static str {
        match self {
            Self::UpstreamIo { .. } => "UPSTREAM_IO",
            Self::Downstream { .. } => "DOWNSTREAM",
            Self::Validation { .. } => "VALIDATION",
            Self::Configuration { .. } => "CONFIGURATION",
            Self::QueueIo { .. } => "QUEUE_IO",
        }
    }

    /// Whether this error must stop the process instead of degrading it.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::Configuration { .. } | Self::QueueIo { .. })
    }
}

impl fmt::Display for EngineError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::UpstreamIo { operation, details } => {
                write!(f, "Upstream I/O error during '{}': {}", operation, details)
            }
            Self::Downstream { operation, details } => {
                write!(f, "Downstream error during '{}': {}", operation, details)
            }
            Self::Validation { violations } => {
                write!(f, "Validation failed: {}", violations.join("; "))
            }
            Self::Configuration { details } => {
                write!(f, "Configuration error: {}", details)
            }
            Self::QueueIo { operation, details } => {
                write!(f, "Durable queue error during '{}': {}", operation, details)
            }
        }
    }
}

impl std::error::Error for EngineError {}

impl From<serde_json::Error> for EngineError {
    fn from(err: serde_json::Error) -> Self {
        EngineError::QueueIo {
            operation: "json".to_string(),
            details: err.to_string(),
        }
    }
}

/// Numeric fault codes written to the controller's error-code tag.
///
/// The values are part of the wire contract with the controller program and
/// must never be renumbered.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u16)]
pub enum FaultCode {
    /// No fault.
    None = 0,
    /// Reading the recipe payload or a handshake tag failed.
    UpstreamReadFailed = 1,
    /// The record violated the configured validation limits.
    ValidationFailed = 2,
    /// Both the downstream insert and the durable queue append failed.
    QueueWriteFailed = 3,
    /// Writing a handshake tag failed.
    UpstreamWriteFailed = 4,
}

impl FaultCode {
    /// The numeric value written to the controller and the status surface.
    pub fn value(self) -> u16 {
        self as u16
    }
}

impl fmt::Display for FaultCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::None => "NONE",
            Self::UpstreamReadFailed => "UPSTREAM_READ_FAILED",
            Self::ValidationFailed => "VALIDATION_FAILED",
            Self::QueueWriteFailed => "QUEUE_WRITE_FAILED",
            Self::UpstreamWriteFailed => "UPSTREAM_WRITE_FAILED",
        };
        write!(f, "{} ({})", name, self.value())
    }
}
