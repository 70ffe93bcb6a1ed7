// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Configuration structures for the bridge engine.
//!
//! The engine never reads ambient configuration: the embedder loads a
//! [`BridgeConfig`] once (typically via [`Settings::from_env`] plus its own
//! mapping source), validates it, and passes it by reference into each
//! component. An invalid configuration fails fast at startup.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::Duration;

use crate::error::EngineError;

/// Names of the handshake tags on the controller.
#[derive(Debug, Clone)]
pub struct TagNames {
    /// Trigger tag driving the handshake protocol.
    pub trigger: String,
    /// Heartbeat counter tag.
    pub heartbeat: String,
    /// Error code tag written on fault.
    pub error_code: String,
    /// Structured recipe payload tag.
    pub recipe: String,
}

impl Default for TagNames {
    fn default() -> Self {
        Self {
            trigger: "Trigger".to_string(),
            heartbeat: "Heartbeat".to_string(),
            error_code: "ErrorCode".to_string(),
            recipe: "Recipe".to_string(),
        }
    }
}

/// Field-to-column mappings plus auxiliary single-value tags.
///
/// `columns` maps a captured field name to its database column. `extra_tags`
/// maps a field name to a standalone controller tag read alongside the
/// structured payload; those fields flow through the same column mapping.
#[derive(Debug, Clone, Default)]
pub struct FieldMappings {
    /// Captured field name -> database column name.
    pub columns: BTreeMap<String, String>,
    /// Extra field name -> controller tag name.
    pub extra_tags: BTreeMap<String, String>,
    /// Column receiving the host-assigned capture timestamp.
    pub timestamp_column: Option<String>,
}

/// Inclusive numeric range for one field.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Limit {
    /// Inclusive lower bound, unconstrained if absent.
    pub min: Option<f64>,
    /// Inclusive upper bound, unconstrained if absent.
    pub max: Option<f64>,
}

impl Limit {
    /// A fully bounded inclusive range.
    pub fn range(min: f64, max: f64) -> Self {
        Self {
            min: Some(min),
            max: Some(max),
        }
    }
}

/// Field name -> inclusive numeric range. A field absent from the map is
/// unconstrained.
pub type ValidationLimits = BTreeMap<String, Limit>;

/// Timing for the retry/backoff policy shared by both connectors.
#[derive(Debug, Clone, Copy)]
pub struct RetrySettings {
    /// First retry delay.
    pub base_delay: Duration,
    /// Cap on the exponential growth.
    pub max_delay: Duration,
}

impl Default for RetrySettings {
    fn default() -> Self {
        Self {
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(60),
        }
    }
}

/// Cadence of the independent loops.
#[derive(Debug, Clone, Copy)]
pub struct Intervals {
    /// Handshake poll cadence.
    pub poll: Duration,
    /// Heartbeat emit cadence.
    pub heartbeat: Duration,
    /// Drain loop cadence.
    pub drain: Duration,
    /// Status file write cadence.
    pub status: Duration,
}

impl Default for Intervals {
    fn default() -> Self {
        Self {
            poll: Duration::from_millis(100),
            heartbeat: Duration::from_secs(2),
            drain: Duration::from_secs(30),
            status: Duration::from_secs(1),
        }
    }
}

/// Complete validated configuration for the engine.
#[derive(Debug, Clone, Default)]
pub struct BridgeConfig {
    /// Handshake tag names.
    pub tags: TagNames,
    /// Field and column mappings.
    pub mappings: FieldMappings,
    /// Validation limits, read-only after startup.
    pub limits: ValidationLimits,
    /// Retry/backoff timing.
    pub retry: RetrySettings,
    /// Loop cadences.
    pub intervals: Intervals,
}

impl BridgeConfig {
    /// Fail-fast configuration check, run once at startup.
    ///
    /// Rejects empty column mappings, inverted validation ranges, and
    /// zero-length cadences or delays.
    pub fn validate(&self) -> Result<(), EngineError> {
        if self.mappings.columns.is_empty() {
            return Err(EngineError::Configuration {
                details: "field-to-column mappings must not be empty".to_string(),
            });
        }

        for (field, limit) in &self.limits {
            if let (Some(min), Some(max)) = (limit.min, limit.max)
                && min > max
            {
                return Err(EngineError::Configuration {
                    details: format!("limits for '{}': min {} > max {}", field, min, max),
                });
            }
        }

        if self.retry.base_delay.is_zero() || self.retry.max_delay < self.retry.base_delay {
            return Err(EngineError::Configuration {
                details: "retry delays must satisfy 0 < base <= max".to_string(),
            });
        }

        if self.intervals.poll.is_zero() {
            return Err(EngineError::Configuration {
                details: "poll interval must be non-zero".to_string(),
            });
        }

        Ok(())
    }
}

/// Host-side settings loaded from environment variables.
///
/// Covers the scalar knobs an embedder usually sets per deployment; the
/// mapping tables come from the embedder's own configuration source.
#[derive(Debug, Clone)]
pub struct Settings {
    /// Path to the SQLite durable queue file.
    pub queue_path: PathBuf,
    /// Downstream database connection URL, if the built-in Postgres
    /// downstream is used.
    pub database_url: Option<String>,
    /// Path for the status snapshot file, if one should be written.
    pub status_path: Option<PathBuf>,
    /// Loop cadences.
    pub intervals: Intervals,
    /// Retry/backoff timing.
    pub retry: RetrySettings,
}

impl Settings {
    /// Load settings from environment variables.
    ///
    /// Required:
    /// - `TAGBRIDGE_QUEUE_PATH`: SQLite durable queue file path
    ///
    /// Optional (with defaults):
    /// - `TAGBRIDGE_DATABASE_URL`: downstream connection string
    /// - `TAGBRIDGE_STATUS_PATH`: status snapshot file path
    /// - `TAGBRIDGE_POLL_INTERVAL_MS`: handshake poll cadence (default: 100)
    /// - `TAGBRIDGE_HEARTBEAT_INTERVAL_S`: heartbeat cadence (default: 2)
    /// - `TAGBRIDGE_DRAIN_INTERVAL_S`: drain cadence (default: 30)
    /// - `TAGBRIDGE_RETRY_BASE_S`: first retry delay (default: 1)
    /// - `TAGBRIDGE_RETRY_MAX_S`: retry delay cap (default: 60)
    pub fn from_env() -> Result<Self, ConfigError> {
        let queue_path = std::env::var("TAGBRIDGE_QUEUE_PATH")
            .map_err(|_| ConfigError::Missing("TAGBRIDGE_QUEUE_PATH"))?;

        let database_url = std::env::var("TAGBRIDGE_DATABASE_URL").ok();
        let status_path = std::env::var("TAGBRIDGE_STATUS_PATH").ok().map(PathBuf::from);

        let poll_ms = parse_var("TAGBRIDGE_POLL_INTERVAL_MS", 100)?;
        let heartbeat_s = parse_var("TAGBRIDGE_HEARTBEAT_INTERVAL_S", 2)?;
        let drain_s = parse_var("TAGBRIDGE_DRAIN_INTERVAL_S", 30)?;
        let retry_base_s = parse_var("TAGBRIDGE_RETRY_BASE_S", 1)?;
        let retry_max_s = parse_var("TAGBRIDGE_RETRY_MAX_S", 60)?;

        Ok(Self {
            queue_path: PathBuf::from(queue_path),
            database_url,
            status_path,
            intervals: Intervals {
                poll: Duration::from_millis(poll_ms),
                heartbeat: Duration::from_secs(heartbeat_s),
                drain: Duration::from_secs(drain_s),
                ..Intervals::default()
            },
            retry: RetrySettings {
                base_delay: Duration::from_secs(retry_base_s),
                max_delay: Duration::from_secs(retry_max_s),
            },
        })
    }
}

fn parse_var(name: &'static str, default: u64) -> Result<u64, ConfigError> {
    match std::env::var(name) {
        Err(_) => Ok(default),
        Ok(raw) => raw
            .parse()
            .map_err(|_| ConfigError::Invalid(name, "must be a positive integer")),
    }
}

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// A required environment variable is missing.
    #[error("missing required environment variable: {0}")]
    Missing(&'static str),

    /// An environment variable has an invalid value.
    #[error("invalid value for {0}: {1}")]
    Invalid(&'static str, &'static str),
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::env;
    use std::sync::Mutex;

    // Mutex to serialize tests that modify environment variables
    static ENV_MUTEX: Mutex<()> = Mutex::new(());

    /// Helper to set env vars for a test and restore them after
    struct EnvGuard {
        vars: Vec<(String, Option<String>)>,
    }

    impl EnvGuard {
        fn new() -> Self {
            Self { vars: Vec::new() }
        }

        fn set(&mut self, key: &str, value: &str) {
            let old = env::var(key).ok();
            self.vars.push((key.to_string(), old));
            // SAFETY: Tests are serialized via ENV_MUTEX, so no concurrent access
            unsafe { env::set_var(key, value) };
        }

        fn remove(&mut self, key: &str) {
            let old = env::var(key).ok();
            self.vars.push((key.to_string(), old));
            // SAFETY: Tests are serialized via ENV_MUTEX, so no concurrent access
            unsafe { env::remove_var(key) };
        }
    }

    impl Drop for EnvGuard {
        fn drop(&mut self) {
            for (key, value) in self.vars.drain(..).rev() {
                // SAFETY: Tests are serialized via ENV_MUTEX, so no concurrent access
                unsafe {
                    match value {
                        Some(v) => env::set_var(&key, v),
                        None => env::remove_var(&key),
                    }
                }
            }
        }
    }

    fn clear_all(guard: &mut EnvGuard) {
        for key in [
            "TAGBRIDGE_QUEUE_PATH",
            "TAGBRIDGE_DATABASE_URL",
            "TAGBRIDGE_STATUS_PATH",
            "TAGBRIDGE_POLL_INTERVAL_MS",
            "TAGBRIDGE_HEARTBEAT_INTERVAL_S",
            "TAGBRIDGE_DRAIN_INTERVAL_S",
            "TAGBRIDGE_RETRY_BASE_S",
            "TAGBRIDGE_RETRY_MAX_S",
        ] {
            guard.remove(key);
        }
    }

    #[test]
    fn test_settings_from_env_with_defaults() {
        let _lock = ENV_MUTEX.lock().unwrap();
        let mut guard = EnvGuard::new();
        clear_all(&mut guard);

        guard.set("TAGBRIDGE_QUEUE_PATH", ".data/pending.db");

        let settings = Settings::from_env().unwrap();

        assert_eq!(settings.queue_path, PathBuf::from(".data/pending.db"));
        assert!(settings.database_url.is_none());
        assert!(settings.status_path.is_none());
        assert_eq!(settings.intervals.poll, Duration::from_millis(100));
        assert_eq!(settings.intervals.heartbeat, Duration::from_secs(2));
        assert_eq!(settings.intervals.drain, Duration::from_secs(30));
        assert_eq!(settings.retry.base_delay, Duration::from_secs(1));
        assert_eq!(settings.retry.max_delay, Duration::from_secs(60));
    }

    #[test]
    fn test_settings_from_env_all_custom() {
        let _lock = ENV_MUTEX.lock().unwrap();
        let mut guard = EnvGuard::new();
        clear_all(&mut guard);

        guard.set("TAGBRIDGE_QUEUE_PATH", "/var/lib/tagbridge/pending.db");
        guard.set("TAGBRIDGE_DATABASE_URL", "postgres://user:pass@db:5432/batch");
        guard.set("TAGBRIDGE_STATUS_PATH", "/run/tagbridge/status.json");
        guard.set("TAGBRIDGE_POLL_INTERVAL_MS", "250");
        guard.set("TAGBRIDGE_HEARTBEAT_INTERVAL_S", "5");
        guard.set("TAGBRIDGE_DRAIN_INTERVAL_S", "10");
        guard.set("TAGBRIDGE_RETRY_BASE_S", "2");
        guard.set("TAGBRIDGE_RETRY_MAX_S", "120");

        let settings = Settings::from_env().unwrap();

        assert_eq!(
            settings.database_url.as_deref(),
            Some("postgres://user:pass@db:5432/batch")
        );
        assert_eq!(
            settings.status_path,
            Some(PathBuf::from("/run/tagbridge/status.json"))
        );
        assert_eq!(settings.intervals.poll, Duration::from_millis(250));
        assert_eq!(settings.intervals.heartbeat, Duration::from_secs(5));
        assert_eq!(settings.intervals.drain, Duration::from_secs(10));
        assert_eq!(settings.retry.base_delay, Duration::from_secs(2));
        assert_eq!(settings.retry.max_delay, Duration::from_secs(120));
    }

    #[test]
    fn test_settings_missing_queue_path() {
        let _lock = ENV_MUTEX.lock().unwrap();
        let mut guard = EnvGuard::new();
        clear_all(&mut guard);

        let result = Settings::from_env();
        assert!(result.is_err());

        let err = result.unwrap_err();
        assert!(matches!(err, ConfigError::Missing("TAGBRIDGE_QUEUE_PATH")));
        assert!(err.to_string().contains("TAGBRIDGE_QUEUE_PATH"));
    }

    #[test]
    fn test_settings_invalid_interval() {
        let _lock = ENV_MUTEX.lock().unwrap();
        let mut guard = EnvGuard::new();
        clear_all(&mut guard);

        guard.set("TAGBRIDGE_QUEUE_PATH", "pending.db");
        guard.set("TAGBRIDGE_POLL_INTERVAL_MS", "not_a_number");

        let result = Settings::from_env();
        assert!(result.is_err());

        let err = result.unwrap_err();
        assert!(matches!(
            err,
            ConfigError::Invalid("TAGBRIDGE_POLL_INTERVAL_MS", _)
        ));
    }

    fn minimal_config() -> BridgeConfig {
        let mut config = BridgeConfig::default();
        config
            .mappings
            .columns
            .insert("RECIPE_NUMBER".to_string(), "Recipe_Number".to_string());
        config
    }

    #[test]
    fn test_validate_accepts_minimal_config() {
        assert!(minimal_config().validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_empty_mappings() {
        let config = BridgeConfig::default();
        let err = config.validate().unwrap_err();
        assert_eq!(err.error_code(), "CONFIGURATION");
        assert!(err.is_fatal());
    }

    #[test]
    fn test_validate_rejects_inverted_limits() {
        let mut config = minimal_config();
        config
            .limits
            .insert("TOTAL_WT".to_string(), Limit::range(100.0, 0.0));

        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("TOTAL_WT"));
    }

    #[test]
    fn test_validate_rejects_zero_retry_base() {
        let mut config = minimal_config();
        config.retry.base_delay = Duration::ZERO;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_default_tag_names() {
        let tags = TagNames::default();
        assert_eq!(tags.trigger, "Trigger");
        assert_eq!(tags.heartbeat, "Heartbeat");
        assert_eq!(tags.error_code, "ErrorCode");
        assert_eq!(tags.recipe, "Recipe");
    }
}
