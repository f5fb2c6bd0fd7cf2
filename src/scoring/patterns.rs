//! Timestamped clinical findings derived from a feature set.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::features::FeatureSet;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum FindingKind {
    Deceleration,
    ProlongedDeceleration,
    RepeatedDeepDecelerations,
    ReducedVariability,
    AbsentAccelerations,
    Bradycardia,
    Tachycardia,
    PoorSignalQuality,
}

impl FindingKind {
    pub fn significance(&self) -> &'static str {
        match self {
            FindingKind::Deceleration => "Transient drop below baseline",
            FindingKind::ProlongedDeceleration => "Requires immediate attention",
            FindingKind::RepeatedDeepDecelerations => "Possible umbilical cord compression",
            FindingKind::ReducedVariability => "Possible fetal CNS depression",
            FindingKind::AbsentAccelerations => "Reduced fetal reactivity",
            FindingKind::Bradycardia => "Possible hypoxia",
            FindingKind::Tachycardia => "Possible infection or hypoxia",
            FindingKind::PoorSignalQuality => "Transducer repositioning required",
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord)]
#[serde(rename_all = "snake_case")]
pub enum FindingSeverity {
    Low,
    Moderate,
    High,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Finding {
    pub id: Uuid,
    pub kind: FindingKind,
    pub severity: FindingSeverity,
    pub count: Option<u32>,
    pub value: Option<f64>,
    pub detected_at: DateTime<Utc>,
    pub significance: String,
}

impl Finding {
    fn new(kind: FindingKind, severity: FindingSeverity, at: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::new_v4(),
            kind,
            severity,
            count: None,
            value: None,
            detected_at: at,
            significance: kind.significance().to_string(),
        }
    }

    fn with_count(mut self, count: u32) -> Self {
        self.count = Some(count);
        self
    }

    fn with_value(mut self, value: f64) -> Self {
        self.value = Some(value);
        self
    }
}

/// Full-pass findings, computed over the most recent fifteen seconds.
pub fn detect_findings(features: &FeatureSet, signal_quality: f64, at: DateTime<Utc>) -> Vec<Finding> {
    let mut findings = deceleration_patterns(features, at);

    let variability = features.variability;
    if variability < 4.0 {
        let severity = if variability < 2.0 {
            FindingSeverity::High
        } else {
            FindingSeverity::Moderate
        };
        findings.push(
            Finding::new(FindingKind::ReducedVariability, severity, at).with_value(variability),
        );
    }

    if features.accelerations == 0 {
        findings.push(Finding::new(
            FindingKind::AbsentAccelerations,
            FindingSeverity::Moderate,
            at,
        ));
    }

    let baseline = features.baseline;
    if baseline > 0.0 && baseline < 110.0 {
        let severity = if baseline < 100.0 {
            FindingSeverity::High
        } else {
            FindingSeverity::Moderate
        };
        findings.push(Finding::new(FindingKind::Bradycardia, severity, at).with_value(baseline));
    }
    if baseline > 160.0 {
        let severity = if baseline > 170.0 {
            FindingSeverity::High
        } else {
            FindingSeverity::Moderate
        };
        findings.push(Finding::new(FindingKind::Tachycardia, severity, at).with_value(baseline));
    }

    if signal_quality < 0.6 {
        findings.push(
            Finding::new(FindingKind::PoorSignalQuality, FindingSeverity::Low, at)
                .with_value(signal_quality),
        );
    }

    findings
}

/// Short-window findings for the fast pass: every deceleration-type pattern.
pub fn deceleration_findings(features: &FeatureSet, at: DateTime<Utc>) -> Vec<Finding> {
    let mut findings = Vec::new();
    if features.decelerations > 0 {
        let severity = if features.deep_decelerations > 0 {
            FindingSeverity::High
        } else {
            FindingSeverity::Moderate
        };
        findings.push(
            Finding::new(FindingKind::Deceleration, severity, at)
                .with_count(features.decelerations),
        );
    }
    findings.extend(deceleration_patterns(features, at));
    findings
}

fn deceleration_patterns(features: &FeatureSet, at: DateTime<Utc>) -> Vec<Finding> {
    let mut findings = Vec::new();
    if features.prolonged_decelerations > 0 {
        findings.push(
            Finding::new(FindingKind::ProlongedDeceleration, FindingSeverity::High, at)
                .with_count(features.prolonged_decelerations),
        );
    }
    if features.deep_decelerations > 1 {
        findings.push(
            Finding::new(
                FindingKind::RepeatedDeepDecelerations,
                FindingSeverity::High,
                at,
            )
            .with_count(features.deep_decelerations),
        );
    }
    findings
}
