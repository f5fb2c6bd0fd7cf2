/// Constants for the composite well-being index.
#[derive(Debug, Clone)]
pub struct ScoringConfig {
    /// Estimator and rule-score weights when the fitted classifier answered.
    pub model_estimator_weight: f64,
    pub model_fischer_weight: f64,

    /// Estimator and rule-score weights for the rule-based estimator.
    pub rule_estimator_weight: f64,
    pub rule_fischer_weight: f64,

    /// Penalty per missing rule-score point before weighting.
    pub fischer_point_penalty: f64,
    /// Trend score scale and weight.
    pub trend_scale: f64,
    pub trend_weight: f64,

    /// Fixed deductions per severe risk factor.
    pub critical_factor_penalty: f64,
    pub marked_factor_penalty: f64,
    pub reduced_variability_penalty: f64,

    /// Signal quality deductions.
    pub poor_signal_threshold: f64,
    pub poor_signal_penalty: f64,
    pub weak_signal_threshold: f64,
    pub weak_signal_penalty: f64,

    /// Deduction per risk factor recorded in the clinical record.
    pub clinical_factor_penalty: f64,

    /// Risk tier boundaries; the critical boundary depends on the estimator.
    pub moderate_risk: f64,
    pub high_risk: f64,
    pub model_critical_risk: f64,
    pub rule_critical_risk: f64,
}

impl Default for ScoringConfig {
    fn default() -> Self {
        Self {
            model_estimator_weight: 0.6,
            model_fischer_weight: 0.2,
            rule_estimator_weight: 0.7,
            rule_fischer_weight: 0.3,
            fischer_point_penalty: 2.0,
            trend_scale: 40.0,
            trend_weight: 0.2,
            critical_factor_penalty: 20.0,
            marked_factor_penalty: 15.0,
            reduced_variability_penalty: 10.0,
            poor_signal_threshold: 0.5,
            poor_signal_penalty: 10.0,
            weak_signal_threshold: 0.7,
            weak_signal_penalty: 5.0,
            clinical_factor_penalty: 3.0,
            moderate_risk: 0.25,
            high_risk: 0.5,
            model_critical_risk: 0.75,
            rule_critical_risk: 0.6,
        }
    }
}
