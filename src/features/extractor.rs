//! Sliding-window CTG feature extraction.
//!
//! Device telemetry arrives at 1 Hz and is linearly upsampled to a 4 Hz
//! analysis rate before any statistic is computed. All thresholds below are in
//! analysis samples.

use serde::{Deserialize, Serialize};

use super::stats;

/// Analysis samples per device sample.
pub const ANALYSIS_RATE_FACTOR: usize = 4;
/// Ten minutes at the analysis rate.
pub const LONG_WINDOW_ANALYSIS_SAMPLES: usize = 2400;
/// Fifteen seconds at the analysis rate.
pub const SHORT_WINDOW_ANALYSIS_SAMPLES: usize = 60;

const NEUTRAL_BASELINE: f64 = 140.0;
const SIGNAL_MIN: f64 = 50.0;
const SIGNAL_MAX: f64 = 210.0;
const PATTERN_DELTA: f64 = 15.0;
const DEEP_DELTA: f64 = 30.0;
const ENTROPY_BINS: usize = 10;
const MIN_LTV_SAMPLES: usize = 10;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum WindowKind {
    Long,
    Short,
}

impl WindowKind {
    /// Shortest run that counts as an acceleration or deceleration.
    pub fn min_pattern_samples(self) -> usize {
        match self {
            WindowKind::Long => 60,
            WindowKind::Short => 20,
        }
    }

    /// Run length at which a deceleration is prolonged.
    pub fn prolonged_samples(self) -> usize {
        match self {
            WindowKind::Long => 360,
            WindowKind::Short => 120,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct FeatureSet {
    pub window: WindowKind,
    pub sample_count: usize,
    pub baseline: f64,
    pub mean: f64,
    pub std: f64,
    pub min: f64,
    pub max: f64,
    pub q25: f64,
    pub q75: f64,
    pub iqr: f64,
    pub stv: f64,
    pub ltv: f64,
    pub variability: f64,
    pub entropy: f64,
    pub skewness: f64,
    pub kurtosis: f64,
    pub accelerations: u32,
    pub decelerations: u32,
    pub deep_decelerations: u32,
    pub prolonged_decelerations: u32,
    pub signal_loss_ratio: f64,
    pub uc_mean: f64,
    pub uc_max: f64,
    pub uc_std: f64,
}

impl FeatureSet {
    pub fn empty(window: WindowKind) -> Self {
        Self {
            window,
            sample_count: 0,
            baseline: NEUTRAL_BASELINE,
            mean: 0.0,
            std: 0.0,
            min: 0.0,
            max: 0.0,
            q25: 0.0,
            q75: 0.0,
            iqr: 0.0,
            stv: 0.0,
            ltv: 0.0,
            variability: 0.0,
            entropy: 0.0,
            skewness: 0.0,
            kurtosis: 0.0,
            accelerations: 0,
            decelerations: 0,
            deep_decelerations: 0,
            prolonged_decelerations: 0,
            signal_loss_ratio: 0.0,
            uc_mean: 0.0,
            uc_max: 0.0,
            uc_std: 0.0,
        }
    }

    pub fn signal_quality(&self) -> f64 {
        1.0 - self.signal_loss_ratio
    }

    /// Looks a feature up by name, for building classifier input vectors.
    pub fn value(&self, name: &str) -> Option<f64> {
        let value = match name {
            "baseline" => self.baseline,
            "mean" => self.mean,
            "std" => self.std,
            "min" => self.min,
            "max" => self.max,
            "q25" => self.q25,
            "q75" => self.q75,
            "iqr" => self.iqr,
            "stv" => self.stv,
            "ltv" => self.ltv,
            "variability" => self.variability,
            "entropy" => self.entropy,
            "skewness" => self.skewness,
            "kurtosis" => self.kurtosis,
            "accelerations" => f64::from(self.accelerations),
            "decelerations" => f64::from(self.decelerations),
            "deep_decelerations" => f64::from(self.deep_decelerations),
            "prolonged_decelerations" => f64::from(self.prolonged_decelerations),
            "signal_loss_ratio" => self.signal_loss_ratio,
            "signal_quality" => self.signal_quality(),
            "uc_mean" => self.uc_mean,
            "uc_max" => self.uc_max,
            "uc_std" => self.uc_std,
            _ => return None,
        };
        Some(value)
    }
}

/// Linear interpolation onto `4·n` evenly spaced points over `[0, n-1]`.
pub fn upsample(values: &[f64]) -> Vec<f64> {
    let n = values.len();
    let target = n * ANALYSIS_RATE_FACTOR;
    match n {
        0 => Vec::new(),
        1 => vec![values[0]; target],
        _ => {
            let step = (n - 1) as f64 / (target - 1) as f64;
            (0..target)
                .map(|i| {
                    let position = i as f64 * step;
                    let left = (position.floor() as usize).min(n - 1);
                    let right = (left + 1).min(n - 1);
                    let fraction = position - left as f64;
                    values[left] + (values[right] - values[left]) * fraction
                })
                .collect()
        }
    }
}

/// Extracts features from device-rate FHR and UC windows.
pub fn extract(fhr: &[f64], uc: &[f64], window: WindowKind) -> FeatureSet {
    extract_analysis_rate(&upsample(fhr), &upsample(uc), window)
}

/// Extracts features from windows already at the analysis rate.
pub fn extract_analysis_rate(fhr: &[f64], uc: &[f64], window: WindowKind) -> FeatureSet {
    if fhr.is_empty() {
        let mut features = FeatureSet::empty(window);
        apply_uc(&mut features, uc);
        return features;
    }

    let (clean, loss_ratio) = clean_signal(fhr);
    let baseline = baseline(&clean);
    let stv = short_term_variability(&clean);
    let ltv = long_term_variability(&clean);
    let variability = match window {
        WindowKind::Long => ltv,
        WindowKind::Short => 2.0 * stv,
    };
    let q25 = stats::percentile(&clean, 25.0);
    let q75 = stats::percentile(&clean, 75.0);
    let patterns = detect_patterns(&clean, baseline, window);

    let mut features = FeatureSet {
        window,
        sample_count: fhr.len(),
        baseline,
        mean: stats::mean(&clean),
        std: stats::std_dev(&clean),
        min: stats::min(&clean),
        max: stats::max(&clean),
        q25,
        q75,
        iqr: q75 - q25,
        stv,
        ltv: if window == WindowKind::Short { 2.0 * stv } else { ltv },
        variability,
        entropy: stats::histogram_entropy(&clean, ENTROPY_BINS),
        skewness: stats::skewness(&clean),
        kurtosis: stats::kurtosis(&clean),
        accelerations: patterns.accelerations,
        decelerations: patterns.decelerations,
        deep_decelerations: patterns.deep,
        prolonged_decelerations: patterns.prolonged,
        signal_loss_ratio: loss_ratio,
        uc_mean: 0.0,
        uc_max: 0.0,
        uc_std: 0.0,
    };
    apply_uc(&mut features, uc);
    features
}

pub(crate) fn is_signal_loss(value: f64) -> bool {
    value == 0.0 || !(SIGNAL_MIN..=SIGNAL_MAX).contains(&value)
}

/// Replaces lost samples with the median of the valid ones, keeping length.
fn clean_signal(fhr: &[f64]) -> (Vec<f64>, f64) {
    let valid: Vec<f64> = fhr.iter().copied().filter(|v| !is_signal_loss(*v)).collect();
    let lost = fhr.len() - valid.len();
    let loss_ratio = lost as f64 / fhr.len() as f64;
    if lost == 0 || valid.is_empty() {
        return (fhr.to_vec(), loss_ratio);
    }

    let fill = stats::median(&valid);
    let clean = fhr
        .iter()
        .map(|v| if is_signal_loss(*v) { fill } else { *v })
        .collect();
    (clean, loss_ratio)
}

/// Median of the 10th–90th percentile band.
fn baseline(fhr: &[f64]) -> f64 {
    if fhr.is_empty() {
        return NEUTRAL_BASELINE;
    }
    let trimmed = stats::trim_to_percentiles(fhr, 10.0, 90.0);
    if trimmed.is_empty() {
        stats::median(fhr)
    } else {
        stats::median(&trimmed)
    }
}

fn short_term_variability(fhr: &[f64]) -> f64 {
    if fhr.len() < 2 {
        return 0.0;
    }
    let diffs: Vec<f64> = fhr.windows(2).map(|w| (w[1] - w[0]).abs()).collect();
    stats::mean(&diffs)
}

fn long_term_variability(fhr: &[f64]) -> f64 {
    if fhr.len() < MIN_LTV_SAMPLES {
        return 2.0 * short_term_variability(fhr);
    }
    let trimmed = stats::trim_to_percentiles(fhr, 5.0, 95.0);
    if trimmed.len() > MIN_LTV_SAMPLES {
        stats::std_dev(&trimmed)
    } else {
        stats::std_dev(fhr)
    }
}

#[derive(Debug, Default, PartialEq)]
struct PatternCounts {
    accelerations: u32,
    decelerations: u32,
    deep: u32,
    prolonged: u32,
}

/// Half-open `[start, end)` runs where `predicate` holds for at least `min_len` samples.
fn runs<F>(values: &[f64], min_len: usize, predicate: F) -> Vec<(usize, usize)>
where
    F: Fn(f64) -> bool,
{
    let mut segments = Vec::new();
    let mut start: Option<usize> = None;
    for (i, value) in values.iter().enumerate() {
        match (predicate(*value), start) {
            (true, None) => start = Some(i),
            (false, Some(begin)) => {
                if i - begin >= min_len {
                    segments.push((begin, i));
                }
                start = None;
            }
            _ => {}
        }
    }
    if let Some(begin) = start {
        if values.len() - begin >= min_len {
            segments.push((begin, values.len()));
        }
    }
    segments
}

fn detect_patterns(fhr: &[f64], baseline: f64, window: WindowKind) -> PatternCounts {
    let min_len = window.min_pattern_samples();
    let accel_threshold = baseline + PATTERN_DELTA;
    let decel_threshold = baseline - PATTERN_DELTA;
    let deep_threshold = baseline - DEEP_DELTA;

    let accelerations = runs(fhr, min_len, |v| v > accel_threshold);
    let decelerations = runs(fhr, min_len, |v| v < decel_threshold);

    let mut counts = PatternCounts {
        accelerations: accelerations.len() as u32,
        decelerations: decelerations.len() as u32,
        ..PatternCounts::default()
    };
    for (start, end) in decelerations {
        if stats::min(&fhr[start..end]) < deep_threshold {
            counts.deep += 1;
        }
        if end - start >= window.prolonged_samples() {
            counts.prolonged += 1;
        }
    }
    counts
}

/// UC statistics over strictly positive values only.
fn apply_uc(features: &mut FeatureSet, uc: &[f64]) {
    let mut positive: Vec<f64> = uc.iter().copied().filter(|v| *v > 0.0).collect();
    if positive.is_empty() {
        positive.push(0.0);
    }
    features.uc_mean = stats::mean(&positive);
    features.uc_max = stats::max(&positive);
    features.uc_std = stats::std_dev(&positive);
}
