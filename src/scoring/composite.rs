use serde::{Deserialize, Serialize};

use super::config::ScoringConfig;
use super::estimator::{EstimatorMethod, FactorWeight, RiskAssessment};
use super::fischer::FischerScore;
use super::trend::TrendResult;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Priority {
    Normal,
    Attention,
    Warning,
    Urgent,
    Critical,
}

impl Priority {
    pub fn from_index(index: f64) -> Self {
        if index >= 80.0 {
            Priority::Normal
        } else if index >= 65.0 {
            Priority::Attention
        } else if index >= 50.0 {
            Priority::Warning
        } else if index >= 35.0 {
            Priority::Urgent
        } else {
            Priority::Critical
        }
    }

    /// 1 (routine) to 5 (emergency).
    pub fn urgency(&self) -> u8 {
        match self {
            Priority::Normal => 1,
            Priority::Attention => 2,
            Priority::Warning => 3,
            Priority::Urgent => 4,
            Priority::Critical => 5,
        }
    }

    pub fn recommendation(&self) -> &'static str {
        match self {
            Priority::Normal => "Continue standard monitoring",
            Priority::Attention => "Increase observation, reassess in 5 minutes",
            Priority::Warning => "Physician review required within 10 minutes",
            Priority::Urgent => "Immediate physician review",
            Priority::Critical => "Emergency intervention",
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Priority::Normal => "NORMAL",
            Priority::Attention => "ATTENTION",
            Priority::Warning => "WARNING",
            Priority::Urgent => "URGENT",
            Priority::Critical => "CRITICAL",
        }
    }
}

/// Inputs to the well-being index besides the configuration.
pub struct CompositeInputs<'a> {
    pub fischer: &'a FischerScore,
    pub risk: &'a RiskAssessment,
    pub trend: &'a TrendResult,
    pub signal_quality: f64,
    pub clinical_risk_factors: usize,
}

/// Fetal well-being index in `[0, 100]`; 100 is a fully reassuring trace.
pub fn wellbeing_index(inputs: &CompositeInputs<'_>, config: &ScoringConfig) -> f64 {
    let (estimator_weight, fischer_weight) = match inputs.risk.method {
        EstimatorMethod::Model => (config.model_estimator_weight, config.model_fischer_weight),
        EstimatorMethod::Rules => (config.rule_estimator_weight, config.rule_fischer_weight),
    };

    let mut index = 100.0;

    let missing_points = f64::from(10u32.saturating_sub(inputs.fischer.total));
    index -= missing_points * config.fischer_point_penalty * fischer_weight;
    index -= inputs.risk.probability * 100.0 * estimator_weight;

    if inputs.trend.is_sufficient() {
        index -= inputs.trend.trend_score * config.trend_scale * config.trend_weight;
    }

    for factor in &inputs.risk.risk_factors {
        index -= match factor.weight() {
            Some(FactorWeight::Critical) => config.critical_factor_penalty,
            Some(FactorWeight::Marked) => config.marked_factor_penalty,
            Some(FactorWeight::ReducedVariability) => config.reduced_variability_penalty,
            None => 0.0,
        };
    }

    if inputs.signal_quality < config.poor_signal_threshold {
        index -= config.poor_signal_penalty;
    } else if inputs.signal_quality < config.weak_signal_threshold {
        index -= config.weak_signal_penalty;
    }

    index -= inputs.clinical_risk_factors as f64 * config.clinical_factor_penalty;

    index.clamp(0.0, 100.0)
}
