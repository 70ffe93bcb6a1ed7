// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Retry/backoff policy shared by the upstream and downstream connectors.

use std::time::Duration;

use tokio::time::Instant;

use crate::config::RetrySettings;

/// Exponential backoff policy: `delay = min(base * 2^attempt, max)`.
///
/// Pure timing function; each connector keeps its own attempt counter in a
/// [`Backoff`].
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    base: Duration,
    max: Duration,
}

impl RetryPolicy {
    /// Build a policy from the configured retry settings.
    pub fn new(settings: RetrySettings) -> Self {
        Self {
            base: settings.base_delay,
            max: settings.max_delay,
        }
    }

    /// Delay before retry number `attempt` (zero-based), capped at the
    /// configured maximum. Monotonic in `attempt`.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let factor = 2u32.checked_pow(attempt.min(31)).unwrap_or(u32::MAX);
        self.base.checked_mul(factor).unwrap_or(self.max).min(self.max)
    }
}

/// Per-connector attempt counter applying a [`RetryPolicy`].
///
/// `failure()` records an attempt and schedules the next one; `ready()`
/// reports whether that moment has passed; `reset()` is called after any
/// successful operation.
#[derive(Debug)]
pub struct Backoff {
    policy: RetryPolicy,
    attempt: u32,
    next_at: Option<Instant>,
}

impl Backoff {
    /// New counter starting at attempt zero, immediately ready.
    pub fn new(policy: RetryPolicy) -> Self {
        Self {
            policy,
            attempt: 0,
            next_at: None,
        }
    }

    /// Whether the next attempt is due.
    pub fn ready(&self) -> bool {
        match self.next_at {
            None => true,
            Some(at) => Instant::now() >= at,
        }
    }

    /// Record a failed attempt and return the delay until the next one.
    pub fn failure(&mut self) -> Duration {
        let delay = self.policy.delay_for(self.attempt);
        self.attempt = self.attempt.saturating_add(1);
        self.next_at = Some(Instant::now() + delay);
        delay
    }

    /// Reset after a successful operation.
    pub fn reset(&mut self) {
        self.attempt = 0;
        self.next_at = None;
    }

    /// Number of consecutive failures recorded since the last reset.
    pub fn attempts(&self) -> u32 {
        self.attempt
    }
}
