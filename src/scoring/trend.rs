use serde::{Deserialize, Serialize};

use crate::features::{stats, LONG_WINDOW_ANALYSIS_SAMPLES};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum TrendStatus {
    Stable,
    Increasing,
    Decreasing,
    Deteriorating,
    InsufficientData,
}

impl TrendStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TrendStatus::Stable => "stable",
            TrendStatus::Increasing => "increasing",
            TrendStatus::Decreasing => "decreasing",
            TrendStatus::Deteriorating => "deteriorating",
            TrendStatus::InsufficientData => "insufficient_data",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TrendResult {
    pub status: TrendStatus,
    pub trend_score: f64,
    pub confidence: f64,
    pub total_change: f64,
    pub recent_change: f64,
}

impl TrendResult {
    pub fn is_sufficient(&self) -> bool {
        self.status != TrendStatus::InsufficientData
    }
}

/// Compares medians of the first, middle and last thirds of the long window.
pub fn analyze_trend(fhr: &[f64]) -> TrendResult {
    let n = fhr.len();
    if n < LONG_WINDOW_ANALYSIS_SAMPLES {
        return TrendResult {
            status: TrendStatus::InsufficientData,
            trend_score: 0.5,
            confidence: 0.0,
            total_change: 0.0,
            recent_change: 0.0,
        };
    }

    let third = n / 3;
    let first = stats::median(&fhr[..third]);
    let middle = stats::median(&fhr[third..2 * third]);
    let last = stats::median(&fhr[n - third..]);

    let total_change = last - first;
    let recent_change = last - middle;

    let (status, trend_score) = if total_change.abs() < 5.0 {
        (TrendStatus::Stable, 0.0)
    } else if total_change > 10.0 {
        (TrendStatus::Increasing, 0.3)
    } else if total_change < -10.0 {
        (TrendStatus::Decreasing, 0.4)
    } else if recent_change < -5.0 {
        (TrendStatus::Deteriorating, 0.5)
    } else {
        (TrendStatus::Stable, 0.1)
    };

    TrendResult {
        status,
        trend_score,
        confidence: f64::min(1.0, n as f64 / LONG_WINDOW_ANALYSIS_SAMPLES as f64),
        total_change,
        recent_change,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn thirds(first: f64, middle: f64, last: f64) -> Vec<f64> {
        let mut fhr = vec![first; 800];
        fhr.extend(vec![middle; 800]);
        fhr.extend(vec![last; 800]);
        fhr
    }

    #[test]
    fn short_history_is_insufficient() {
        let trend = analyze_trend(&[140.0; 100]);
        assert_eq!(trend.status, TrendStatus::InsufficientData);
        assert!(!trend.is_sufficient());
    }

    #[test]
    fn classifies_direction() {
        assert_eq!(analyze_trend(&thirds(140.0, 141.0, 142.0)).status, TrendStatus::Stable);
        assert_eq!(analyze_trend(&thirds(130.0, 140.0, 145.0)).status, TrendStatus::Increasing);
        assert_eq!(analyze_trend(&thirds(150.0, 140.0, 135.0)).status, TrendStatus::Decreasing);

        let deteriorating = analyze_trend(&thirds(140.0, 153.0, 147.0));
        assert_eq!(deteriorating.status, TrendStatus::Deteriorating);
        assert_eq!(deteriorating.trend_score, 0.5);

        let drifting = analyze_trend(&thirds(140.0, 144.0, 147.0));
        assert_eq!(drifting.status, TrendStatus::Stable);
        assert_eq!(drifting.trend_score, 0.1);
        assert_eq!(drifting.confidence, 1.0);
    }
}
