use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use super::extractor::is_signal_loss;
use super::stats;

const SAMPLE_PERIOD_MS: i64 = 250;
/// One second at the analysis rate.
const MIN_ZONE_SAMPLES: usize = 4;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum AnomalyKind {
    SignalLoss,
    CriticalBradycardia,
    Bradycardia,
    SevereTachycardia,
    Tachycardia,
    Acceleration,
    DeepDeceleration,
    Deceleration,
}

impl AnomalyKind {
    fn classify(value: f64, baseline: f64) -> Option<Self> {
        if is_signal_loss(value) {
            Some(Self::SignalLoss)
        } else if value < 100.0 {
            Some(Self::CriticalBradycardia)
        } else if value < 110.0 {
            Some(Self::Bradycardia)
        } else if value > 170.0 {
            Some(Self::SevereTachycardia)
        } else if value > 160.0 {
            Some(Self::Tachycardia)
        } else if value > baseline + 15.0 {
            Some(Self::Acceleration)
        } else if value < baseline - 30.0 {
            Some(Self::DeepDeceleration)
        } else if value < baseline - 15.0 {
            Some(Self::Deceleration)
        } else {
            None
        }
    }
}

/// A contiguous stretch of analysis samples sharing one anomaly class.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AnomalyZone {
    pub kind: AnomalyKind,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    pub start_index: usize,
    pub end_index: usize,
    pub duration_seconds: f64,
    pub min_value: f64,
    pub max_value: f64,
}

/// Classifies every 4 Hz sample and merges equal runs lasting at least 1 s.
///
/// `start` is the wall-clock time of `fhr[0]`.
pub fn anomaly_timeline(fhr: &[f64], baseline: f64, start: DateTime<Utc>) -> Vec<AnomalyZone> {
    let mut zones = Vec::new();
    let mut current: Option<(AnomalyKind, usize)> = None;

    for (i, value) in fhr.iter().enumerate() {
        let kind = AnomalyKind::classify(*value, baseline);
        match current {
            Some((open, _)) if Some(open) == kind => continue,
            Some((open, begin)) => push_zone(&mut zones, fhr, open, begin, i - 1, start),
            None => {}
        }
        current = kind.map(|kind| (kind, i));
    }
    if let Some((open, begin)) = current {
        push_zone(&mut zones, fhr, open, begin, fhr.len() - 1, start);
    }
    zones
}

fn push_zone(
    zones: &mut Vec<AnomalyZone>,
    fhr: &[f64],
    kind: AnomalyKind,
    begin: usize,
    end: usize,
    start: DateTime<Utc>,
) {
    let len = end - begin + 1;
    if len < MIN_ZONE_SAMPLES {
        return;
    }
    let slice = &fhr[begin..=end];
    zones.push(AnomalyZone {
        kind,
        start_time: start + Duration::milliseconds(begin as i64 * SAMPLE_PERIOD_MS),
        end_time: start + Duration::milliseconds(end as i64 * SAMPLE_PERIOD_MS),
        start_index: begin,
        end_index: end,
        duration_seconds: len as f64 * SAMPLE_PERIOD_MS as f64 / 1000.0,
        min_value: stats::min(slice),
        max_value: stats::max(slice),
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn merges_runs_and_drops_blips() {
        let start = Utc.with_ymd_and_hms(2024, 5, 1, 8, 0, 0).unwrap();
        let mut fhr = vec![140.0; 40];
        // 2 s deceleration
        for value in fhr.iter_mut().skip(8).take(8) {
            *value = 120.0;
        }
        // 0.5 s spike, too short
        fhr[30] = 180.0;
        fhr[31] = 181.0;

        let zones = anomaly_timeline(&fhr, 140.0, start);

        assert_eq!(zones.len(), 1);
        let zone = &zones[0];
        assert_eq!(zone.kind, AnomalyKind::Deceleration);
        assert_eq!(zone.start_index, 8);
        assert_eq!(zone.end_index, 15);
        assert_eq!(zone.duration_seconds, 2.0);
        assert_eq!(zone.start_time, start + Duration::seconds(2));
        assert_eq!(zone.min_value, 120.0);
    }

    #[test]
    fn open_run_at_end_is_closed() {
        let start = Utc.with_ymd_and_hms(2024, 5, 1, 8, 0, 0).unwrap();
        let mut fhr = vec![140.0; 12];
        for value in fhr.iter_mut().skip(6) {
            *value = 0.0;
        }

        let zones = anomaly_timeline(&fhr, 140.0, start);
        assert_eq!(zones.len(), 1);
        assert_eq!(zones[0].kind, AnomalyKind::SignalLoss);
        assert_eq!(zones[0].end_index, 11);
    }

    #[test]
    fn classification_order() {
        assert_eq!(AnomalyKind::classify(95.0, 140.0), Some(AnomalyKind::CriticalBradycardia));
        assert_eq!(AnomalyKind::classify(105.0, 140.0), Some(AnomalyKind::Bradycardia));
        assert_eq!(AnomalyKind::classify(175.0, 140.0), Some(AnomalyKind::SevereTachycardia));
        assert_eq!(AnomalyKind::classify(165.0, 140.0), Some(AnomalyKind::Tachycardia));
        assert_eq!(AnomalyKind::classify(158.0, 140.0), Some(AnomalyKind::Acceleration));
        assert_eq!(AnomalyKind::classify(145.0, 155.0), None);
        assert_eq!(AnomalyKind::classify(115.0, 150.0), Some(AnomalyKind::DeepDeceleration));
        assert_eq!(AnomalyKind::classify(120.0, 140.0), Some(AnomalyKind::Deceleration));
    }
}
