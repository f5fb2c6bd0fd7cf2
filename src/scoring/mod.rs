mod composite;
mod config;
mod estimator;
mod fischer;
mod patterns;
mod trend;

use std::path::Path;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::features::{anomaly_timeline, AnomalyZone, FeatureSet};
use crate::models::SessionContext;

const ENABLE_LOGS: bool = true;
use crate::{log_error, log_info, log_warn};

pub use composite::{wellbeing_index, CompositeInputs, Priority};
pub use config::ScoringConfig;
pub use estimator::{
    EstimatorMethod, FactorWeight, ModelArtifact, ModelEstimator, RiskAssessment, RiskEstimator,
    RiskFactor, RiskLevel, RiskTiers, RuleEstimator,
};
pub use fischer::{fischer_score, FischerInterpretation, FischerScore, FischerSubScores};
pub use patterns::{deceleration_findings, detect_findings, Finding, FindingKind, FindingSeverity};
pub use trend::{analyze_trend, TrendResult, TrendStatus};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ScoreComponents {
    pub fischer: FischerScore,
    pub risk: RiskAssessment,
    pub trend: TrendResult,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct KeyMetrics {
    pub baseline: f64,
    pub variability: f64,
    pub stv: f64,
    pub accelerations: u32,
    pub decelerations: u32,
    pub deep_decelerations: u32,
    pub prolonged_decelerations: u32,
    pub signal_quality: f64,
    pub uc_mean: f64,
    pub uc_max: f64,
}

impl From<&FeatureSet> for KeyMetrics {
    fn from(features: &FeatureSet) -> Self {
        Self {
            baseline: features.baseline,
            variability: features.variability,
            stv: features.stv,
            accelerations: features.accelerations,
            decelerations: features.decelerations,
            deep_decelerations: features.deep_decelerations,
            prolonged_decelerations: features.prolonged_decelerations,
            signal_quality: features.signal_quality(),
            uc_mean: features.uc_mean,
            uc_max: features.uc_max,
        }
    }
}

impl KeyMetrics {
    /// Level, variability and signal quality from the long window; pattern
    /// counts from the short one.
    pub fn blended(long: &FeatureSet, short: &FeatureSet) -> Self {
        Self {
            accelerations: short.accelerations,
            decelerations: short.decelerations,
            deep_decelerations: short.deep_decelerations,
            prolonged_decelerations: short.prolonged_decelerations,
            ..Self::from(long)
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ProcessingMetadata {
    pub method: EstimatorMethod,
    pub long_window_samples: usize,
    pub short_window_samples: usize,
    pub clinical_risk_factors: usize,
    pub processing_ms: u64,
    pub version: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ScoreResult {
    pub session_id: String,
    pub timestamp: DateTime<Utc>,
    pub wellbeing_index: f64,
    pub priority: Priority,
    pub urgency: u8,
    pub recommendation: String,
    pub components: ScoreComponents,
    pub key_metrics: KeyMetrics,
    pub short_term: KeyMetrics,
    pub findings: Vec<Finding>,
    pub anomaly_zones: Vec<AnomalyZone>,
    pub metadata: ProcessingMetadata,
}

/// Everything about the moment of scoring that is not a feature.
pub struct ScoreContext<'a> {
    pub session: &'a SessionContext,
    pub analysed_at: DateTime<Utc>,
    /// Number of risk factors in the patient's clinical record.
    pub clinical_risk_factors: usize,
    /// Analysis-rate FHR of the long window, for the anomaly timeline.
    pub long_fhr: &'a [f64],
    /// Wall-clock time of `long_fhr[0]`.
    pub window_start: DateTime<Utc>,
}

/// Combines rule score, risk estimate and trend into one [`ScoreResult`].
pub struct ScoringEngine {
    config: ScoringConfig,
    estimator: Box<dyn RiskEstimator>,
    fallback: RuleEstimator,
}

impl ScoringEngine {
    pub fn new(config: ScoringConfig, estimator: Box<dyn RiskEstimator>) -> Self {
        let fallback = RuleEstimator::new(RiskTiers::for_rules(&config));
        Self {
            config,
            estimator,
            fallback,
        }
    }

    pub fn with_rules(config: ScoringConfig) -> Self {
        let rules = RuleEstimator::new(RiskTiers::for_rules(&config));
        Self::new(config, Box::new(rules))
    }

    /// Picks the estimator once: the fitted model when `model_path` names a
    /// loadable artifact, the rule table otherwise.
    pub fn from_model_path(config: ScoringConfig, model_path: Option<&Path>) -> Self {
        let Some(path) = model_path else {
            log_info!("no risk model configured; using rule estimator");
            return Self::with_rules(config);
        };

        match ModelEstimator::load(path, RiskTiers::for_model(&config)) {
            Ok(model) => Self::new(config, Box::new(model)),
            Err(err) => {
                log_error!("risk model unavailable, using rule estimator: {err:?}");
                Self::with_rules(config)
            }
        }
    }

    pub fn method(&self) -> EstimatorMethod {
        self.estimator.method()
    }

    pub fn config(&self) -> &ScoringConfig {
        &self.config
    }

    pub fn assess_risk(&self, features: &FeatureSet) -> RiskAssessment {
        self.estimator.estimate(features).unwrap_or_else(|| {
            log_warn!("risk estimator could not score this window; falling back to rules");
            self.fallback.assess(features)
        })
    }

    pub fn score(
        &self,
        long: &FeatureSet,
        short: &FeatureSet,
        trend: &TrendResult,
        ctx: &ScoreContext<'_>,
    ) -> ScoreResult {
        let started = std::time::Instant::now();

        let fischer = fischer_score(long);
        let risk = self.assess_risk(long);
        let signal_quality = long.signal_quality();

        let index = wellbeing_index(
            &CompositeInputs {
                fischer: &fischer,
                risk: &risk,
                trend,
                signal_quality,
                clinical_risk_factors: ctx.clinical_risk_factors,
            },
            &self.config,
        );
        let priority = Priority::from_index(index);

        let findings = detect_findings(short, signal_quality, ctx.window_start);
        let anomaly_zones = anomaly_timeline(ctx.long_fhr, long.baseline, ctx.window_start);

        ScoreResult {
            session_id: ctx.session.session_id.clone(),
            timestamp: ctx.analysed_at,
            wellbeing_index: index,
            priority,
            urgency: priority.urgency(),
            recommendation: priority.recommendation().to_string(),
            key_metrics: KeyMetrics::blended(long, short),
            short_term: KeyMetrics::from(short),
            metadata: ProcessingMetadata {
                method: risk.method,
                long_window_samples: long.sample_count,
                short_window_samples: short.sample_count,
                clinical_risk_factors: ctx.clinical_risk_factors,
                processing_ms: started.elapsed().as_millis() as u64,
                version: env!("CARGO_PKG_VERSION").to_string(),
            },
            components: ScoreComponents {
                fischer,
                risk,
                trend: trend.clone(),
            },
            findings,
            anomaly_zones,
        }
    }
}
