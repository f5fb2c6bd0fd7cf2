mod extractor;
pub mod stats;
mod timeline;

pub use extractor::{
    extract, extract_analysis_rate, upsample, FeatureSet, WindowKind, ANALYSIS_RATE_FACTOR,
    LONG_WINDOW_ANALYSIS_SAMPLES, SHORT_WINDOW_ANALYSIS_SAMPLES,
};
pub use timeline::{anomaly_timeline, AnomalyKind, AnomalyZone};
