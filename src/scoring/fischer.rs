//! Modified Fischer rule score (0–10).

use serde::{Deserialize, Serialize};

use crate::features::FeatureSet;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum FischerInterpretation {
    Normal,
    Suspicious,
    Pathological,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct FischerSubScores {
    pub baseline: u32,
    pub variability: u32,
    pub accelerations: u32,
    pub decelerations: u32,
    pub movements: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct FischerScore {
    pub total: u32,
    pub max: u32,
    pub interpretation: FischerInterpretation,
    pub sub_scores: FischerSubScores,
}

pub fn fischer_score(features: &FeatureSet) -> FischerScore {
    let baseline = features.baseline;
    let baseline_score = if (110.0..=160.0).contains(&baseline) {
        2
    } else if (100.0..110.0).contains(&baseline) || (baseline > 160.0 && baseline <= 170.0) {
        1
    } else {
        0
    };

    let variability_score = variability_points(features.variability);

    let accelerations_score = match features.accelerations {
        0 => 0,
        1 => 1,
        _ => 2,
    };

    let decelerations_score = match features.decelerations {
        0 => 2,
        1 if features.deep_decelerations == 0 && features.prolonged_decelerations == 0 => 1,
        _ => 0,
    };

    let sub_scores = FischerSubScores {
        baseline: baseline_score,
        variability: variability_score,
        accelerations: accelerations_score,
        decelerations: decelerations_score,
        movements: accelerations_score,
    };
    let total = sub_scores.baseline
        + sub_scores.variability
        + sub_scores.accelerations
        + sub_scores.decelerations
        + sub_scores.movements;

    let interpretation = match total {
        8.. => FischerInterpretation::Normal,
        6..=7 => FischerInterpretation::Suspicious,
        _ => FischerInterpretation::Pathological,
    };

    FischerScore {
        total,
        max: 10,
        interpretation,
        sub_scores,
    }
}

fn variability_points(variability: f64) -> u32 {
    if variability >= 5.0 {
        2
    } else if variability >= 3.0 {
        1
    } else {
        0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::features::WindowKind;

    fn features(baseline: f64, variability: f64, accels: u32, decels: u32) -> FeatureSet {
        FeatureSet {
            baseline,
            variability,
            accelerations: accels,
            decelerations: decels,
            ..FeatureSet::empty(WindowKind::Long)
        }
    }

    #[test]
    fn reactive_trace_scores_full_marks() {
        let score = fischer_score(&features(140.0, 8.0, 3, 0));
        assert_eq!(score.total, 10);
        assert_eq!(score.interpretation, FischerInterpretation::Normal);
    }

    #[test]
    fn missing_accelerations_cost_both_reactivity_points() {
        let score = fischer_score(&features(140.0, 6.0, 0, 0));
        assert_eq!(score.sub_scores.accelerations, 0);
        assert_eq!(score.sub_scores.movements, 0);
        assert_eq!(score.total, 6);
        assert_eq!(score.interpretation, FischerInterpretation::Suspicious);

        let single = fischer_score(&features(140.0, 6.0, 1, 0));
        assert_eq!(single.sub_scores.accelerations, 1);
        assert_eq!(single.total, 8);
        assert_eq!(single.interpretation, FischerInterpretation::Normal);
    }

    #[test]
    fn flat_trace_without_accelerations_is_suspicious_or_worse() {
        let score = fischer_score(&features(140.0, 4.0, 0, 0));
        assert_eq!(score.total, 5);
        assert_eq!(score.interpretation, FischerInterpretation::Pathological);
    }

    #[test]
    fn single_deep_deceleration_scores_zero() {
        let mut input = features(140.0, 8.0, 2, 1);
        assert_eq!(fischer_score(&input).sub_scores.decelerations, 1);

        input.deep_decelerations = 1;
        assert_eq!(fischer_score(&input).sub_scores.decelerations, 0);
    }

    #[test]
    fn baseline_bands() {
        assert_eq!(fischer_score(&features(105.0, 8.0, 2, 0)).sub_scores.baseline, 1);
        assert_eq!(fischer_score(&features(165.0, 8.0, 2, 0)).sub_scores.baseline, 1);
        assert_eq!(fischer_score(&features(95.0, 8.0, 2, 0)).sub_scores.baseline, 0);
        assert_eq!(fischer_score(&features(175.0, 8.0, 2, 0)).sub_scores.baseline, 0);
        assert_eq!(fischer_score(&features(160.0, 8.0, 2, 0)).sub_scores.baseline, 2);
    }
}
