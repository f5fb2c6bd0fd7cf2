use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::ops::RangeInclusive;

/// Accepted fetal heart-rate values (bpm). Anything else never reaches storage.
pub const BPM_RANGE: RangeInclusive<f64> = 50.0..=201.0;

/// Accepted uterine-activity values.
pub const UTERUS_RANGE: RangeInclusive<f64> = 0.0..=120.0;

/// One validated telemetry record.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Sample {
    pub sequence_id: u64,
    pub capture_time: DateTime<Utc>,
    /// Device clock for the FHR channel, kept verbatim.
    pub device_time_bpm: String,
    pub bpm_value: f64,
    pub device_time_uterus: String,
    pub uterus_value: f64,
}

/// Aggregate figures over everything buffered for the current session.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct SessionStats {
    pub total_records: u64,
    pub first_capture: Option<DateTime<Utc>>,
    pub last_capture: Option<DateTime<Utc>>,
    pub avg_bpm: f64,
    pub avg_uterus: f64,
}

impl SessionStats {
    pub fn duration_seconds(&self) -> i64 {
        match (self.first_capture, self.last_capture) {
            (Some(first), Some(last)) => (last - first).num_seconds().max(0),
            _ => 0,
        }
    }
}
