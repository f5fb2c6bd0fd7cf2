//! Descriptive statistics over `f64` slices.
//!
//! Percentiles use linear interpolation between closest ranks; variance-based
//! moments are population (biased) estimates. Every function returns 0 on an
//! empty slice.

pub fn mean(values: &[f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    values.iter().sum::<f64>() / values.len() as f64
}

/// Population standard deviation.
pub fn std_dev(values: &[f64]) -> f64 {
    central_moment(values, 2).sqrt()
}

pub fn min(values: &[f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    values.iter().copied().fold(f64::INFINITY, f64::min)
}

pub fn max(values: &[f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    values.iter().copied().fold(f64::NEG_INFINITY, f64::max)
}

fn sorted(values: &[f64]) -> Vec<f64> {
    let mut sorted = values.to_vec();
    sorted.sort_by(|a, b| a.total_cmp(b));
    sorted
}

/// `q` in `[0, 100]`.
pub fn percentile(values: &[f64], q: f64) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    percentile_sorted(&sorted(values), q)
}

fn percentile_sorted(sorted: &[f64], q: f64) -> f64 {
    let rank = (q.clamp(0.0, 100.0) / 100.0) * (sorted.len() - 1) as f64;
    let lower = rank.floor() as usize;
    let upper = rank.ceil() as usize;
    let fraction = rank - lower as f64;
    sorted[lower] + (sorted[upper] - sorted[lower]) * fraction
}

pub fn median(values: &[f64]) -> f64 {
    percentile(values, 50.0)
}

/// Values lying inside the `[lower_q, upper_q]` percentile band, in input order.
pub fn trim_to_percentiles(values: &[f64], lower_q: f64, upper_q: f64) -> Vec<f64> {
    if values.is_empty() {
        return Vec::new();
    }
    let sorted = sorted(values);
    let low = percentile_sorted(&sorted, lower_q);
    let high = percentile_sorted(&sorted, upper_q);
    values
        .iter()
        .copied()
        .filter(|value| *value >= low && *value <= high)
        .collect()
}

fn central_moment(values: &[f64], order: i32) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    let centre = mean(values);
    values.iter().map(|v| (v - centre).powi(order)).sum::<f64>() / values.len() as f64
}

/// Biased sample skewness; 0 when the variance vanishes.
pub fn skewness(values: &[f64]) -> f64 {
    if values.len() < 2 {
        return 0.0;
    }
    let m2 = central_moment(values, 2);
    if m2 <= f64::EPSILON {
        return 0.0;
    }
    central_moment(values, 3) / m2.powf(1.5)
}

/// Fisher (excess) kurtosis; 0 when the variance vanishes.
pub fn kurtosis(values: &[f64]) -> f64 {
    if values.len() < 2 {
        return 0.0;
    }
    let m2 = central_moment(values, 2);
    if m2 <= f64::EPSILON {
        return 0.0;
    }
    central_moment(values, 4) / (m2 * m2) - 3.0
}

/// Shannon entropy in bits of an equal-width histogram spanning the data range.
pub fn histogram_entropy(values: &[f64], bins: usize) -> f64 {
    if values.is_empty() || bins == 0 {
        return 0.0;
    }

    let low = min(values);
    let high = max(values);
    let width = high - low;
    let mut counts = vec![0usize; bins];
    for value in values {
        let index = if width <= 0.0 {
            bins / 2
        } else {
            (((value - low) / width) * bins as f64).floor() as usize
        };
        counts[index.min(bins - 1)] += 1;
    }

    let total = values.len() as f64;
    counts
        .into_iter()
        .filter(|count| *count > 0)
        .map(|count| {
            let p = count as f64 / total;
            -p * p.log2()
        })
        .sum()
}
