// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Record types captured from the controller.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A scalar value read from a controller tag.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum TagValue {
    /// Integer tag value.
    Int(i64),
    /// Floating point tag value.
    Float(f64),
    /// Text tag value.
    Text(String),
}

impl TagValue {
    /// Numeric view of the value, if it has one. Text values have none.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Self::Int(v) => Some(*v as f64),
            Self::Float(v) => Some(*v),
            Self::Text(_) => None,
        }
    }
}

impl From<i64> for TagValue {
    fn from(v: i64) -> Self {
        Self::Int(v)
    }
}

impl From<f64> for TagValue {
    fn from(v: f64) -> Self {
        Self::Float(v)
    }
}

impl From<&str> for TagValue {
    fn from(v: &str) -> Self {
        Self::Text(v.to_string())
    }
}

static NEXT_SEQUENCE: AtomicU64 = AtomicU64::new(1);

/// One batch event captured from the controller.
///
/// Immutable once built. The capture timestamp comes from the host clock at
/// read time; controller-side timestamps are never trusted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecipeRecord {
    /// Monotonically assigned local sequence id (generation order, not a
    /// business key).
    pub sequence: u64,
    /// Host-assigned capture timestamp.
    pub captured_at: DateTime<Utc>,
    /// Field name to scalar value, in field-name order.
    pub fields: BTreeMap<String, TagValue>,
}

impl RecipeRecord {
    /// Build a record from captured fields, assigning the next sequence id
    /// and stamping it with the host clock.
    pub fn capture(fields: BTreeMap<String, TagValue>) -> Self {
        Self {
            sequence: NEXT_SEQUENCE.fetch_add(1, Ordering::Relaxed),
            captured_at: Utc::now(),
            fields,
        }
    }

    /// Look up a field value by name.
    pub fn get(&self, field: &str) -> Option<&TagValue> {
        self.fields.get(field)
    }
}
