use std::{f64::consts::PI, sync::Arc};

use chrono::{Duration as ChronoDuration, TimeZone, Utc};
use ctg_guardian_lib::{
    buffer::SampleBuffer,
    clinical::ClinicalStore,
    db::Database,
    models::{Sample, SessionContext},
    monitor::{AnalysisScheduler, MonitorService},
    notifier::{AlertSeverity, Event, Notifier, PredictionPayload},
    outbox::Outbox,
    scoring::{Priority, RiskFactor, ScoreResult, ScoringConfig, ScoringEngine},
    settings::{AnalysisSettings, OutboxSettings},
};
use tempfile::TempDir;
use tokio::{
    sync::mpsc::Receiver,
    time::{Duration, Instant},
};

struct Harness {
    _dir: TempDir,
    db: Database,
    service: MonitorService,
    events: Receiver<Event>,
    started: Instant,
}

fn harness() -> Harness {
    let dir = TempDir::new().unwrap();
    let db = Database::new(dir.path().join("ctg.sqlite3")).unwrap();
    let notifier = Arc::new(Notifier::new(4096));
    let events = notifier.subscribe();
    let buffer = Arc::new(SampleBuffer::new(db.clone(), 50));
    let started = Instant::now();

    let scheduler = AnalysisScheduler::new(
        AnalysisSettings::default(),
        buffer.clone(),
        Arc::new(ScoringEngine::with_rules(ScoringConfig::default())),
        db.clone(),
        notifier.clone(),
        started,
    );
    let outbox = Outbox::open(
        &dir.path().join("outbox"),
        &OutboxSettings::default(),
        notifier.clone(),
    )
    .unwrap();
    let service = MonitorService::new(
        SessionContext::new("ward-1", Utc.with_ymd_and_hms(2024, 3, 1, 8, 0, 0).unwrap()),
        buffer,
        scheduler,
        Arc::new(outbox),
        Arc::new(ClinicalStore::new()),
        notifier,
    );

    Harness {
        _dir: dir,
        db,
        service,
        events,
        started,
    }
}

impl Harness {
    /// Feeds one sample per second, the `k`-th arriving `k` seconds in.
    async fn feed(&self, from: u64, bpm: impl Iterator<Item = f64>) {
        let origin = Utc.with_ymd_and_hms(2024, 3, 1, 8, 0, 0).unwrap();
        for (offset, bpm) in bpm.enumerate() {
            let k = from + offset as u64;
            let sample = Sample {
                sequence_id: k,
                capture_time: origin + ChronoDuration::seconds(k as i64),
                device_time_bpm: format!("t{k}"),
                bpm_value: bpm,
                device_time_uterus: format!("t{k}"),
                uterus_value: 10.0,
            };
            self.service
                .ingest(sample, self.started + Duration::from_secs(k))
                .await
                .unwrap();
        }
    }

    fn drain(&mut self) -> Vec<Event> {
        let mut events = Vec::new();
        while let Ok(event) = self.events.try_recv() {
            events.push(event);
        }
        events
    }
}

/// ±8 bpm oscillation around 140 with a 20 s acceleration to 165 every three
/// minutes.
fn reactive(from: u64, count: u64) -> impl Iterator<Item = f64> {
    (from..from + count).map(|k| {
        if (60..80).contains(&(k % 180)) {
            165.0
        } else {
            140.0 + 8.0 * (2.0 * PI * k as f64 / 30.0).sin()
        }
    })
}

/// 140 ± 2 bpm with nothing else going on.
fn narrow(from: u64, count: u64) -> impl Iterator<Item = f64> {
    (from..from + count).map(|k| 140.0 + 2.0 * (2.0 * PI * k as f64 / 30.0).sin())
}

fn full_results(events: &[Event]) -> Vec<&ScoreResult> {
    events
        .iter()
        .filter_map(|event| match event {
            Event::Prediction {
                analysis: PredictionPayload::Full { result },
                ..
            } => Some(result.as_ref()),
            _ => None,
        })
        .collect()
}

#[tokio::test]
async fn reactive_trace_reports_progress_then_scores_normal() {
    let mut h = harness();

    h.feed(1, reactive(1, 120)).await;
    let events = h.drain();
    let progress: Vec<_> = events
        .iter()
        .filter_map(|event| match event {
            Event::AnalysisInfo {
                records_collected,
                records_required,
                progress_percent,
                ..
            } => Some((*records_collected, *records_required, *progress_percent)),
            _ => None,
        })
        .collect();
    assert_eq!(progress, vec![(120, 600, 20.0)]);
    assert!(events.iter().all(|e| !matches!(e, Event::ShortTermAlert { .. })));

    h.feed(121, reactive(121, 480)).await;
    let events = h.drain();

    let results = full_results(&events);
    assert_eq!(results.len(), 1);
    let result = results[0];
    assert_eq!(result.session_id, "ward-1");
    assert_eq!(result.priority, Priority::Normal);
    assert_eq!(result.components.fischer.total, 10);
    assert!(result.wellbeing_index >= 80.0);
    assert!(events.iter().all(|e| !matches!(e, Event::Alert { .. })));

    let stored = h.db.recent_analysis_results("ward-1", 10).await.unwrap();
    assert_eq!(stored.len(), 1);
    assert_eq!(stored[0].priority, "NORMAL");
    assert_eq!(h.service.scheduler().history().len(), 1);
}

#[tokio::test]
async fn narrow_trace_scores_critical_on_low_variability() {
    let mut h = harness();

    h.feed(1, narrow(1, 600)).await;
    let events = h.drain();

    let results = full_results(&events);
    assert_eq!(results.len(), 1);
    let result = results[0];
    assert!(result.key_metrics.variability < 2.0);
    assert_eq!(result.components.fischer.total, 4);
    assert_eq!(result.components.risk.probability, 1.0);
    assert!(result
        .components
        .risk
        .risk_factors
        .contains(&RiskFactor::AbsentAccelerations));
    // No fixed penalty for low variability: 100 - 3.6 - 70.
    assert!((result.wellbeing_index - 26.4).abs() < 0.5);
    assert_eq!(result.priority, Priority::Critical);

    assert!(events.iter().any(|event| matches!(
        event,
        Event::Alert {
            severity: AlertSeverity::High,
            priority: Priority::Critical,
            ..
        }
    )));
}

#[tokio::test]
async fn sudden_dip_raises_short_term_alert() {
    let mut h = harness();

    h.feed(1, std::iter::repeat(140.0).take(113)).await;
    assert!(h
        .drain()
        .iter()
        .all(|e| !matches!(e, Event::ShortTermAlert { .. })));

    h.feed(114, std::iter::repeat(95.0).take(7)).await;
    let events = h.drain();

    let alert = events
        .iter()
        .find_map(|event| match event {
            Event::ShortTermAlert {
                severity,
                priority,
                decelerations,
                deep_decelerations,
                ..
            } => Some((*severity, *priority, *decelerations, *deep_decelerations)),
            _ => None,
        })
        .expect("short-term alert");
    assert_eq!(alert, (AlertSeverity::High, Priority::Warning, 1, 1));

    let findings = events.iter().find_map(|event| match event {
        Event::Prediction {
            analysis: PredictionPayload::Fast { findings, .. },
            ..
        } => Some(findings.len()),
        _ => None,
    });
    assert!(findings.unwrap_or(0) >= 1);
}

#[tokio::test]
async fn too_few_samples_skip_fast_pass() {
    let mut h = harness();

    h.feed(1, std::iter::repeat(95.0).take(20)).await;

    assert!(h
        .drain()
        .iter()
        .all(|e| matches!(e, Event::CtgData { .. })));
}
