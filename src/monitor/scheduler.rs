//! Sample-driven analysis passes.
//!
//! Called after every accepted sample with the current instant. A fast pass
//! looks for decelerations in the last fifteen seconds; a full pass scores the
//! last ten minutes. Both only read the buffer.

use std::{
    collections::VecDeque,
    sync::{Arc, Mutex, MutexGuard},
};

use anyhow::{Context, Result};
use chrono::Utc;
use tokio::time::{Duration, Instant};

use crate::buffer::SampleBuffer;
use crate::db::{models::AnalysisRecord, Database};
use crate::features::{
    extract_analysis_rate, upsample, FeatureSet, WindowKind, ANALYSIS_RATE_FACTOR,
    LONG_WINDOW_ANALYSIS_SAMPLES, SHORT_WINDOW_ANALYSIS_SAMPLES,
};
use crate::models::{Sample, SessionContext};
use crate::notifier::{AlertSeverity, Event, Notifier, PredictionPayload};
use crate::scoring::{
    analyze_trend, deceleration_findings, Priority, ScoreContext, ScoreResult, ScoringEngine,
};
use crate::settings::AnalysisSettings;

// Set to true to enable verbose logging in this module
const ENABLE_LOGS: bool = true;

use crate::{log_debug, log_error, log_info, log_warn};

pub const HISTORY_CAPACITY: usize = 100;
/// Device samples read by the fast pass.
const FAST_PASS_SAMPLES: usize = 120;
const ALERT_INDEX_THRESHOLD: f64 = 70.0;
const HIGH_SEVERITY_INDEX: f64 = 50.0;

struct Timing {
    last_fast: Instant,
    last_full: Instant,
}

pub struct AnalysisScheduler {
    settings: AnalysisSettings,
    buffer: Arc<SampleBuffer>,
    engine: Arc<ScoringEngine>,
    db: Database,
    notifier: Arc<Notifier>,
    timing: Mutex<Timing>,
    history: Mutex<VecDeque<ScoreResult>>,
}

/// Short-term priority from fast-pass deceleration counts.
pub fn short_term_priority(features: &FeatureSet) -> Priority {
    if features.prolonged_decelerations > 0 || features.deep_decelerations > 1 {
        Priority::Critical
    } else if features.deep_decelerations > 0 || features.decelerations > 2 {
        Priority::Warning
    } else if features.decelerations > 0 {
        Priority::Attention
    } else {
        Priority::Normal
    }
}

fn channels(samples: &[Sample]) -> (Vec<f64>, Vec<f64>) {
    samples
        .iter()
        .map(|sample| (sample.bpm_value, sample.uterus_value))
        .unzip()
}

fn tail(values: &[f64], len: usize) -> &[f64] {
    &values[values.len().saturating_sub(len)..]
}

impl AnalysisScheduler {
    pub fn new(
        settings: AnalysisSettings,
        buffer: Arc<SampleBuffer>,
        engine: Arc<ScoringEngine>,
        db: Database,
        notifier: Arc<Notifier>,
        now: Instant,
    ) -> Self {
        Self {
            settings,
            buffer,
            engine,
            db,
            notifier,
            timing: Mutex::new(Timing {
                last_fast: now,
                last_full: now,
            }),
            history: Mutex::new(VecDeque::with_capacity(HISTORY_CAPACITY)),
        }
    }

    /// Restarts both pass clocks, e.g. after a session switch.
    pub fn reset(&self, now: Instant) {
        let mut timing = self.timing();
        timing.last_fast = now;
        timing.last_full = now;
    }

    /// Runs whichever passes are due at `now`. Failures are logged, never
    /// propagated.
    pub async fn on_sample(
        &self,
        now: Instant,
        session: &SessionContext,
        clinical_risk_factors: usize,
    ) {
        let (fast_due, full_due) = {
            let mut timing = self.timing();
            let fast_due = now.saturating_duration_since(timing.last_fast)
                >= Duration::from_secs(self.settings.fast_interval_secs);
            let full_due = now.saturating_duration_since(timing.last_full)
                >= Duration::from_secs(self.settings.full_interval_secs);
            if fast_due {
                timing.last_fast = now;
            }
            if full_due {
                timing.last_full = now;
            }
            (fast_due, full_due)
        };

        if fast_due {
            if let Err(err) = self.fast_pass(session).await {
                log_error!("fast analysis pass failed: {err:?}");
            }
        }
        if full_due {
            if let Err(err) = self.full_pass(session, clinical_risk_factors).await {
                log_error!("full analysis pass failed: {err:?}");
            }
        }
    }

    async fn fast_pass(&self, session: &SessionContext) -> Result<()> {
        let count = self.buffer.len().await?;
        if count < self.settings.fast_min_samples as u64 {
            log_debug!("fast pass skipped: {count} samples buffered");
            return Ok(());
        }

        let samples = self.buffer.recent(FAST_PASS_SAMPLES).await?;
        let (fhr, uc) = channels(&samples);
        let (fhr4, uc4) = (upsample(&fhr), upsample(&uc));
        let short = extract_analysis_rate(
            tail(&fhr4, SHORT_WINDOW_ANALYSIS_SAMPLES),
            tail(&uc4, SHORT_WINDOW_ANALYSIS_SAMPLES),
            WindowKind::Short,
        );

        if short.decelerations == 0
            && short.deep_decelerations == 0
            && short.prolonged_decelerations == 0
        {
            return Ok(());
        }

        let severity = if short.deep_decelerations > 0 || short.prolonged_decelerations > 0 {
            AlertSeverity::High
        } else {
            AlertSeverity::Medium
        };
        let priority = short_term_priority(&short);
        log_warn!(
            "short-term decelerations in session {}: {} (deep {}, prolonged {})",
            session.session_id,
            short.decelerations,
            short.deep_decelerations,
            short.prolonged_decelerations
        );

        self.notifier.publish(Event::ShortTermAlert {
            session_id: session.session_id.clone(),
            severity,
            priority,
            decelerations: short.decelerations,
            deep_decelerations: short.deep_decelerations,
            prolonged_decelerations: short.prolonged_decelerations,
            message: format!(
                "Deceleration detected in the last {}s",
                SHORT_WINDOW_ANALYSIS_SAMPLES / ANALYSIS_RATE_FACTOR
            ),
        });
        self.notifier.publish(Event::Prediction {
            session_id: session.session_id.clone(),
            analysis: PredictionPayload::Fast {
                priority,
                findings: deceleration_findings(&short, Utc::now()),
            },
        });
        Ok(())
    }

    async fn full_pass(&self, session: &SessionContext, clinical_risk_factors: usize) -> Result<()> {
        let required = self.settings.full_min_samples as u64;
        let count = self.buffer.len().await?;
        if count < required {
            let progress = (count as f64 / required.max(1) as f64 * 1000.0).round() / 10.0;
            log_info!("collecting data for full analysis: {count}/{required}");
            self.notifier.publish(Event::AnalysisInfo {
                session_id: session.session_id.clone(),
                records_collected: count,
                records_required: required,
                progress_percent: progress.min(100.0),
            });
            return Ok(());
        }

        let samples = self.buffer.recent(self.settings.full_min_samples).await?;
        let (fhr, uc) = channels(&samples);
        let (fhr4, uc4) = (upsample(&fhr), upsample(&uc));
        let long_fhr = tail(&fhr4, LONG_WINDOW_ANALYSIS_SAMPLES);
        let long = extract_analysis_rate(
            long_fhr,
            tail(&uc4, LONG_WINDOW_ANALYSIS_SAMPLES),
            WindowKind::Long,
        );
        let short = extract_analysis_rate(
            tail(&fhr4, SHORT_WINDOW_ANALYSIS_SAMPLES),
            tail(&uc4, SHORT_WINDOW_ANALYSIS_SAMPLES),
            WindowKind::Short,
        );
        let trend = analyze_trend(long_fhr);

        let skipped = (fhr4.len() - long_fhr.len()) / ANALYSIS_RATE_FACTOR;
        let window_start = samples
            .get(skipped)
            .map(|sample| sample.capture_time)
            .unwrap_or_else(Utc::now);

        let result = self.engine.score(
            &long,
            &short,
            &trend,
            &ScoreContext {
                session,
                analysed_at: Utc::now(),
                clinical_risk_factors,
                long_fhr,
                window_start,
            },
        );

        log_info!(
            "session {}: well-being index {:.1} ({}), rule score {}",
            session.session_id,
            result.wellbeing_index,
            result.priority.as_str(),
            result.components.fischer.total
        );

        if let Err(err) = self.persist(&result).await {
            log_error!("failed to store analysis result: {err:?}");
        }
        self.remember(result.clone());

        let index = result.wellbeing_index;
        let priority = result.priority;
        self.notifier.publish(Event::Prediction {
            session_id: session.session_id.clone(),
            analysis: PredictionPayload::Full {
                result: Box::new(result),
            },
        });

        if priority >= Priority::Urgent || index < ALERT_INDEX_THRESHOLD {
            let severity = if index < HIGH_SEVERITY_INDEX {
                AlertSeverity::High
            } else {
                AlertSeverity::Medium
            };
            self.notifier.publish(Event::Alert {
                session_id: session.session_id.clone(),
                severity,
                priority,
                wellbeing_index: index,
                message: format!(
                    "Fetal well-being index {index:.0}: {}",
                    priority.recommendation()
                ),
            });
        }
        Ok(())
    }

    async fn persist(&self, result: &ScoreResult) -> Result<()> {
        let record = AnalysisRecord {
            id: None,
            timestamp: result.timestamp,
            session_id: result.session_id.clone(),
            wellbeing_index: result.wellbeing_index,
            priority: result.priority.as_str().to_string(),
            urgency: result.urgency,
            baseline: result.key_metrics.baseline,
            variability: result.key_metrics.variability,
            accelerations: result.key_metrics.accelerations,
            decelerations: result.key_metrics.decelerations,
            signal_quality: result.key_metrics.signal_quality,
            risk_probability: result.components.risk.probability,
            rule_score: result.components.fischer.total,
            trend_status: result.components.trend.status.as_str().to_string(),
            full_result: serde_json::to_value(result)
                .context("failed to serialize analysis result")?,
        };
        self.db.insert_analysis_result(&record).await?;
        Ok(())
    }

    fn remember(&self, result: ScoreResult) {
        let mut history = match self.history.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        if history.len() == HISTORY_CAPACITY {
            history.pop_front();
        }
        history.push_back(result);
    }

    /// Full-pass results, oldest first.
    pub fn history(&self) -> Vec<ScoreResult> {
        match self.history.lock() {
            Ok(guard) => guard.iter().cloned().collect(),
            Err(poisoned) => poisoned.into_inner().iter().cloned().collect(),
        }
    }

    pub fn latest(&self) -> Option<ScoreResult> {
        match self.history.lock() {
            Ok(guard) => guard.back().cloned(),
            Err(poisoned) => poisoned.into_inner().back().cloned(),
        }
    }

    pub fn clear_history(&self) {
        match self.history.lock() {
            Ok(mut guard) => guard.clear(),
            Err(poisoned) => poisoned.into_inner().clear(),
        }
    }

    fn timing(&self) -> MutexGuard<'_, Timing> {
        match self.timing.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}
