//! Canonical byte form of a prediction payload.
//!
//! Key-sorted, whitespace-free UTF-8 JSON of [`PredictionPayload`]. These bytes
//! are what gets signed, so the encoding here is frozen for
//! `PAYLOAD_SCHEMA_VERSION` 1.

use serde_json::{Map, Value};

use crate::error::{RegimeError, Result};
use crate::types::PredictionPayload;

pub fn canonical_bytes(payload: &PredictionPayload) -> Result<Vec<u8>> {
    canonical_string(payload).map(String::into_bytes)
}

pub fn canonical_string(payload: &PredictionPayload) -> Result<String> {
    ensure_finite(payload)?;
    let value = sort_keys(serde_json::to_value(payload)?);
    Ok(serde_json::to_string(&value)?)
}

// Rebuilds objects in sorted key order so the output does not depend on the
// map implementation serde_json was built with.
fn sort_keys(value: Value) -> Value {
    match value {
        Value::Object(map) => {
            let mut entries: Vec<(String, Value)> = map.into_iter().collect();
            entries.sort_by(|a, b| a.0.cmp(&b.0));
            let mut sorted = Map::new();
            for (key, v) in entries {
                sorted.insert(key, sort_keys(v));
            }
            Value::Object(sorted)
        }
        Value::Array(items) => Value::Array(items.into_iter().map(sort_keys).collect()),
        other => other,
    }
}

fn ensure_finite(payload: &PredictionPayload) -> Result<()> {
    let p = &payload.probabilities;
    let f = &payload.features;
    let fields = [
        ("probabilities.bull", p.bull),
        ("probabilities.bear", p.bear),
        ("probabilities.neutral", p.neutral),
        ("features.return_z", f.return_z),
        ("features.volatility_z", f.volatility_z),
        ("features.drawdown_z", f.drawdown_z),
        ("features.macd_diff_z", f.macd_diff_z),
        ("features.bb_width_z", f.bb_width_z),
        ("features.rsi_z", f.rsi_z),
        ("features.roc_z", f.roc_z),
    ];
    match fields.iter().find(|(_, v)| !v.is_finite()) {
        Some((field, _)) => Err(RegimeError::NonFinitePayload { field: *field }),
        None => Ok(()),
    }
}
