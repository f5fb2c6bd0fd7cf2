use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::Sample;

/// Name of the metadata field holding the delivery endpoint. It is stripped
/// from the document before it leaves the process.
pub const DESTINATION_FIELD: &str = "destination_url";

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ArchiveMetadata {
    pub destination_url: Option<String>,
    pub created_at: DateTime<Utc>,
    pub operator_name: Option<String>,
    pub notes: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SessionInfo {
    pub start_time: Option<DateTime<Utc>>,
    pub end_time: DateTime<Utc>,
    pub total_records: u64,
    pub duration_seconds: i64,
    pub avg_bpm: f64,
    pub avg_uterus: f64,
}

/// Snapshot of the clinical record taken when the session is archived.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct PatientInfo {
    pub name: Option<String>,
    pub age: Option<u32>,
    pub pregnancy_week: Option<u32>,
    #[serde(default)]
    pub risk_factors: Vec<String>,
    #[serde(default)]
    pub medications: Vec<String>,
    pub previous_pregnancies: Option<u32>,
}

/// Everything recorded during one session, as delivered to the record system.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SessionArchive {
    pub session_id: String,
    pub metadata: ArchiveMetadata,
    pub session_info: SessionInfo,
    pub patient_info: PatientInfo,
    pub samples: Vec<Sample>,
}
