//! Hypoxia risk estimation.
//!
//! Two strategies share the [`RiskEstimator`] seam: a fitted logistic model
//! loaded from a JSON artifact, and a fixed rule table. The rule table is also
//! the per-call fallback whenever the model cannot answer.

use std::{fmt, fs, path::Path};

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};

use crate::features::FeatureSet;

const ENABLE_LOGS: bool = true;
use crate::{log_info, log_warn};

use super::config::ScoringConfig;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum EstimatorMethod {
    Model,
    Rules,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RiskLevel {
    Low,
    Moderate,
    High,
    Critical,
}

/// Probability cut-points for [`RiskLevel`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RiskTiers {
    pub moderate: f64,
    pub high: f64,
    pub critical: f64,
}

impl RiskTiers {
    pub fn for_model(config: &ScoringConfig) -> Self {
        Self {
            moderate: config.moderate_risk,
            high: config.high_risk,
            critical: config.model_critical_risk,
        }
    }

    pub fn for_rules(config: &ScoringConfig) -> Self {
        Self {
            moderate: config.moderate_risk,
            high: config.high_risk,
            critical: config.rule_critical_risk,
        }
    }

    pub fn level(&self, probability: f64) -> RiskLevel {
        if probability >= self.critical {
            RiskLevel::Critical
        } else if probability >= self.high {
            RiskLevel::High
        } else if probability >= self.moderate {
            RiskLevel::Moderate
        } else {
            RiskLevel::Low
        }
    }
}

/// How heavily a risk factor weighs on the composite index.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FactorWeight {
    Critical,
    Marked,
    ReducedVariability,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum RiskFactor {
    CriticalBradycardia { baseline: f64 },
    Bradycardia { baseline: f64 },
    MarkedTachycardia { baseline: f64 },
    Tachycardia { baseline: f64 },
    CriticallyLowVariability { variability: f64 },
    ReducedVariability { variability: f64 },
    BorderlineVariability { variability: f64 },
    AbsentAccelerations,
    RecurrentDecelerations { count: u32 },
    Decelerations { count: u32 },
    DeepDecelerations { count: u32 },
    ProlongedDecelerations { count: u32 },
}

impl RiskFactor {
    pub fn weight(&self) -> Option<FactorWeight> {
        match self {
            RiskFactor::CriticalBradycardia { .. } => Some(FactorWeight::Critical),
            RiskFactor::MarkedTachycardia { .. } => Some(FactorWeight::Marked),
            RiskFactor::ReducedVariability { .. } => Some(FactorWeight::ReducedVariability),
            _ => None,
        }
    }
}

impl fmt::Display for RiskFactor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RiskFactor::CriticalBradycardia { baseline } => {
                write!(f, "critical bradycardia: {baseline:.0} bpm")
            }
            RiskFactor::Bradycardia { baseline } => write!(f, "bradycardia: {baseline:.0} bpm"),
            RiskFactor::MarkedTachycardia { baseline } => {
                write!(f, "marked tachycardia: {baseline:.0} bpm")
            }
            RiskFactor::Tachycardia { baseline } => write!(f, "tachycardia: {baseline:.0} bpm"),
            RiskFactor::CriticallyLowVariability { variability } => {
                write!(f, "critically low variability: {variability:.1} bpm")
            }
            RiskFactor::ReducedVariability { variability } => {
                write!(f, "reduced variability: {variability:.1} bpm")
            }
            RiskFactor::BorderlineVariability { variability } => {
                write!(f, "borderline variability: {variability:.1} bpm")
            }
            RiskFactor::AbsentAccelerations => write!(f, "absent accelerations"),
            RiskFactor::RecurrentDecelerations { count } => {
                write!(f, "recurrent decelerations: {count}")
            }
            RiskFactor::Decelerations { count } => write!(f, "decelerations: {count}"),
            RiskFactor::DeepDecelerations { count } => write!(f, "deep decelerations: {count}"),
            RiskFactor::ProlongedDecelerations { count } => {
                write!(f, "prolonged decelerations: {count}")
            }
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RiskAssessment {
    pub probability: f64,
    pub level: RiskLevel,
    pub confidence: f64,
    pub method: EstimatorMethod,
    pub risk_factors: Vec<RiskFactor>,
}

pub trait RiskEstimator: Send + Sync {
    fn method(&self) -> EstimatorMethod;

    /// `None` when this estimator cannot score the given features.
    fn estimate(&self, features: &FeatureSet) -> Option<RiskAssessment>;
}

pub struct RuleEstimator {
    tiers: RiskTiers,
}

impl RuleEstimator {
    pub const CONFIDENCE: f64 = 0.85;

    pub fn new(tiers: RiskTiers) -> Self {
        Self { tiers }
    }

    pub fn assess(&self, features: &FeatureSet) -> RiskAssessment {
        let mut risk = 0.0;
        let mut factors = Vec::new();
        let baseline = features.baseline;
        let variability = features.variability;

        if baseline < 100.0 {
            risk += 0.8;
            factors.push(RiskFactor::CriticalBradycardia { baseline });
        } else if baseline < 110.0 {
            risk += 0.5;
            factors.push(RiskFactor::Bradycardia { baseline });
        }
        if baseline > 170.0 {
            risk += 0.7;
            factors.push(RiskFactor::MarkedTachycardia { baseline });
        } else if baseline > 160.0 {
            risk += 0.4;
            factors.push(RiskFactor::Tachycardia { baseline });
        }

        if variability < 2.0 {
            risk += 0.7;
            factors.push(RiskFactor::CriticallyLowVariability { variability });
        } else if variability < 3.0 {
            risk += 0.5;
            factors.push(RiskFactor::ReducedVariability { variability });
        } else if variability < 5.0 {
            risk += 0.3;
            factors.push(RiskFactor::BorderlineVariability { variability });
        }

        if features.accelerations == 0 {
            risk += 0.4;
            factors.push(RiskFactor::AbsentAccelerations);
        }

        let decelerations = features.decelerations;
        if decelerations >= 3 {
            risk += 0.5;
            factors.push(RiskFactor::RecurrentDecelerations {
                count: decelerations,
            });
        } else if decelerations >= 1 {
            risk += 0.3;
            factors.push(RiskFactor::Decelerations {
                count: decelerations,
            });
        }
        if features.deep_decelerations > 0 {
            risk += 0.5;
            factors.push(RiskFactor::DeepDecelerations {
                count: features.deep_decelerations,
            });
        }
        if features.prolonged_decelerations > 0 {
            risk += 0.6;
            factors.push(RiskFactor::ProlongedDecelerations {
                count: features.prolonged_decelerations,
            });
        }

        let probability = f64::min(1.0, risk);
        RiskAssessment {
            probability,
            level: self.tiers.level(probability),
            confidence: Self::CONFIDENCE,
            method: EstimatorMethod::Rules,
            risk_factors: factors,
        }
    }
}

impl RiskEstimator for RuleEstimator {
    fn method(&self) -> EstimatorMethod {
        EstimatorMethod::Rules
    }

    fn estimate(&self, features: &FeatureSet) -> Option<RiskAssessment> {
        Some(self.assess(features))
    }
}

/// Serialized logistic-regression model with its standard scaler.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ModelArtifact {
    pub feature_names: Vec<String>,
    pub scaler_mean: Vec<f64>,
    pub scaler_scale: Vec<f64>,
    pub coefficients: Vec<f64>,
    pub intercept: f64,
}

impl ModelArtifact {
    fn validate(&self) -> Result<()> {
        let n = self.feature_names.len();
        if n == 0 {
            bail!("model declares no features");
        }
        if self.scaler_mean.len() != n || self.scaler_scale.len() != n || self.coefficients.len() != n
        {
            bail!(
                "model shape mismatch: {n} features, {} means, {} scales, {} coefficients",
                self.scaler_mean.len(),
                self.scaler_scale.len(),
                self.coefficients.len()
            );
        }
        let all_finite = self
            .scaler_mean
            .iter()
            .chain(&self.scaler_scale)
            .chain(&self.coefficients)
            .chain(std::iter::once(&self.intercept))
            .all(|value| value.is_finite());
        if !all_finite {
            bail!("model contains non-finite parameters");
        }
        if self.scaler_scale.iter().any(|scale| *scale == 0.0) {
            bail!("model contains a zero scaler scale");
        }
        Ok(())
    }
}

pub struct ModelEstimator {
    artifact: ModelArtifact,
    tiers: RiskTiers,
}

impl ModelEstimator {
    pub const CONFIDENCE: f64 = 0.95;

    pub fn load(path: &Path, tiers: RiskTiers) -> Result<Self> {
        let contents = fs::read_to_string(path)
            .with_context(|| format!("failed to read model artifact {}", path.display()))?;
        let artifact: ModelArtifact = serde_json::from_str(&contents)
            .with_context(|| format!("failed to decode model artifact {}", path.display()))?;
        let estimator = Self::from_artifact(artifact, tiers)?;
        log_info!(
            "loaded risk model from {} ({} features)",
            path.display(),
            estimator.artifact.feature_names.len()
        );
        Ok(estimator)
    }

    pub fn from_artifact(artifact: ModelArtifact, tiers: RiskTiers) -> Result<Self> {
        artifact.validate().context("invalid model artifact")?;
        Ok(Self { artifact, tiers })
    }

    fn probability(&self, features: &FeatureSet) -> Option<f64> {
        let mut logit = self.artifact.intercept;
        for (i, name) in self.artifact.feature_names.iter().enumerate() {
            let Some(raw) = features.value(name) else {
                log_warn!("model feature '{name}' is not produced by the extractor");
                return None;
            };
            if !raw.is_finite() {
                log_warn!("model feature '{name}' is not finite ({raw})");
                return None;
            }
            let scaled = (raw - self.artifact.scaler_mean[i]) / self.artifact.scaler_scale[i];
            logit += scaled * self.artifact.coefficients[i];
        }
        let probability = 1.0 / (1.0 + (-logit).exp());
        probability.is_finite().then_some(probability)
    }
}

impl RiskEstimator for ModelEstimator {
    fn method(&self) -> EstimatorMethod {
        EstimatorMethod::Model
    }

    fn estimate(&self, features: &FeatureSet) -> Option<RiskAssessment> {
        let probability = self.probability(features)?;
        Some(RiskAssessment {
            probability,
            level: self.tiers.level(probability),
            confidence: Self::CONFIDENCE,
            method: EstimatorMethod::Model,
            risk_factors: Vec::new(),
        })
    }
}
