// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Record validation against configured numeric limits.

use tracing::warn;

use crate::config::ValidationLimits;
use crate::record::RecipeRecord;

/// Check a record's fields against the configured limits.
///
/// Returns one description per violation; an empty list means the record is
/// valid. A field absent from `limits` (or absent from the record) is
/// unconstrained; text fields carry no numeric value and are skipped. Any
/// violation is a hard rejection of the whole record.
pub fn validate(record: &RecipeRecord, limits: &ValidationLimits) -> Vec<String> {
    let mut violations = Vec::new();

    for (field, limit) in limits {
        let Some(value) = record.get(field).and_then(|v| v.as_f64()) else {
            continue;
        };

        if let Some(min) = limit.min
            && value < min
        {
            violations.push(format!("{} value {} is below minimum {}", field, value, min));
        }

        if let Some(max) = limit.max
            && value > max
        {
            violations.push(format!("{} value {} is above maximum {}", field, value, max));
        }
    }

    for violation in &violations {
        warn!(sequence = record.sequence, "validation: {}", violation);
    }

    violations
}
