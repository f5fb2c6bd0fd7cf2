//! Decoding of one newline-delimited telemetry record.
//!
//! Wire shape: `{"bpm": [time, value], "uterus": [time, value]}`. Values may be
//! JSON numbers or strings; strings are trimmed and accept `,` as the decimal
//! separator.

use serde_json::Value;
use thiserror::Error;

use crate::models::{BPM_RANGE, UTERUS_RANGE};

#[derive(Debug, Error)]
pub enum TelemetryError {
    #[error("invalid JSON: {0}")]
    InvalidJson(#[from] serde_json::Error),

    #[error("malformed record: {0}")]
    Shape(String),

    #[error("{field} value {raw} is not a finite number")]
    Unconvertible { field: &'static str, raw: String },

    #[error("{field} value {value} is out of range")]
    OutOfRange { field: &'static str, value: f64 },
}

impl TelemetryError {
    pub fn is_out_of_range(&self) -> bool {
        matches!(self, TelemetryError::OutOfRange { .. })
    }
}

/// A validated reading, not yet stamped with a sequence id or arrival time.
#[derive(Debug, Clone, PartialEq)]
pub struct TelemetryReading {
    pub device_time_bpm: String,
    pub bpm: f64,
    pub device_time_uterus: String,
    pub uterus: f64,
}

pub fn parse_line(line: &str) -> Result<TelemetryReading, TelemetryError> {
    let record: Value = serde_json::from_str(line)?;
    let object = record
        .as_object()
        .ok_or_else(|| TelemetryError::Shape("record is not a JSON object".into()))?;

    let (device_time_bpm, bpm) = channel(object.get("bpm"), "bpm")?;
    let (device_time_uterus, uterus) = channel(object.get("uterus"), "uterus")?;

    if !BPM_RANGE.contains(&bpm) {
        return Err(TelemetryError::OutOfRange {
            field: "bpm",
            value: bpm,
        });
    }
    if !UTERUS_RANGE.contains(&uterus) {
        return Err(TelemetryError::OutOfRange {
            field: "uterus",
            value: uterus,
        });
    }

    Ok(TelemetryReading {
        device_time_bpm,
        bpm,
        device_time_uterus,
        uterus,
    })
}

fn channel(value: Option<&Value>, field: &'static str) -> Result<(String, f64), TelemetryError> {
    let items = value
        .and_then(Value::as_array)
        .ok_or_else(|| TelemetryError::Shape(format!("`{field}` must be an array")))?;
    if items.len() < 2 {
        return Err(TelemetryError::Shape(format!(
            "`{field}` needs [time, value], got {} element(s)",
            items.len()
        )));
    }

    let device_time = match &items[0] {
        Value::String(text) => text.clone(),
        other => other.to_string(),
    };
    Ok((device_time, numeric(&items[1], field)?))
}

fn numeric(value: &Value, field: &'static str) -> Result<f64, TelemetryError> {
    let parsed = match value {
        Value::Number(number) => number.as_f64(),
        Value::String(text) => text.trim().replace(',', ".").parse::<f64>().ok(),
        _ => None,
    };

    match parsed {
        Some(number) if number.is_finite() => Ok(number),
        _ => Err(TelemetryError::Unconvertible {
            field,
            raw: value.to_string(),
        }),
    }
}
