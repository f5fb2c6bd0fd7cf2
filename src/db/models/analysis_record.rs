//! Row of the `analysis_results` log.
//!
//! The headline numbers are stored in their own columns for querying; the
//! complete score document is kept alongside as JSON.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AnalysisRecord {
    pub id: Option<i64>,
    pub timestamp: DateTime<Utc>,
    pub session_id: String,
    pub wellbeing_index: f64,
    pub priority: String,
    pub urgency: u8,
    pub baseline: f64,
    pub variability: f64,
    pub accelerations: u32,
    pub decelerations: u32,
    pub signal_quality: f64,
    pub risk_probability: f64,
    pub rule_score: u32,
    pub trend_status: String,
    pub full_result: serde_json::Value,
}
