use std::sync::{Arc, RwLock};

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::Utc;
use tokio::{sync::Mutex, time::Instant};

use crate::buffer::SampleBuffer;
use crate::clinical::ClinicalStore;
use crate::models::{ArchiveMetadata, Sample, SessionArchive, SessionContext, SessionInfo};
use crate::notifier::{Event, Notifier};
use crate::outbox::Outbox;
use crate::telemetry::SampleSink;

use super::scheduler::AnalysisScheduler;

const ENABLE_LOGS: bool = true;
use crate::{log_error, log_info, log_warn};

/// Operator input attached to a session archive.
#[derive(Debug, Clone, Default)]
pub struct EndSessionRequest {
    pub destination_url: Option<String>,
    pub operator_name: Option<String>,
    pub notes: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum EndSessionOutcome {
    /// The buffer was empty; nothing was archived and the session is unchanged.
    NoData,
    Archived {
        session_id: String,
        archive_file: String,
        total_records: u64,
        next_session_id: String,
    },
}

/// The bedside monitor: buffers accepted samples, drives analysis and turns
/// finished sessions into queued archives.
pub struct MonitorService {
    session: RwLock<SessionContext>,
    buffer: Arc<SampleBuffer>,
    scheduler: AnalysisScheduler,
    outbox: Arc<Outbox>,
    clinical: Arc<ClinicalStore>,
    notifier: Arc<Notifier>,
    // Serializes ingestion with session end so no sample lands between the
    // archive snapshot and the buffer clear.
    ingest_gate: Mutex<()>,
}

impl MonitorService {
    pub fn new(
        session: SessionContext,
        buffer: Arc<SampleBuffer>,
        scheduler: AnalysisScheduler,
        outbox: Arc<Outbox>,
        clinical: Arc<ClinicalStore>,
        notifier: Arc<Notifier>,
    ) -> Self {
        Self {
            session: RwLock::new(session),
            buffer,
            scheduler,
            outbox,
            clinical,
            notifier,
            ingest_gate: Mutex::new(()),
        }
    }

    pub fn current_session(&self) -> SessionContext {
        match self.session.read() {
            Ok(guard) => guard.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    pub fn scheduler(&self) -> &AnalysisScheduler {
        &self.scheduler
    }

    pub fn clinical(&self) -> &ClinicalStore {
        &self.clinical
    }

    /// Accepts a sample as if it arrived at `now`.
    pub async fn ingest(&self, sample: Sample, now: Instant) -> Result<()> {
        let _gate = self.ingest_gate.lock().await;

        self.buffer
            .append(sample.clone())
            .await
            .context("failed to buffer sample")?;

        self.notifier.publish(Event::CtgData {
            sequence_id: sample.sequence_id,
            timestamp: sample.capture_time,
            bpm_value: sample.bpm_value,
            uterus_value: sample.uterus_value,
            device_time_bpm: sample.device_time_bpm,
            device_time_uterus: sample.device_time_uterus,
        });

        let session = self.current_session();
        let risk_factors = self.clinical.risk_factor_count(&session.session_id);
        self.scheduler.on_sample(now, &session, risk_factors).await;
        Ok(())
    }

    /// Archives the active session into the outbox and starts a fresh one.
    ///
    /// The buffer is only cleared after the archive is safely in `pending/`.
    pub async fn end_session(&self, request: EndSessionRequest) -> Result<EndSessionOutcome> {
        let _gate = self.ingest_gate.lock().await;
        let session = self.current_session();

        let samples = self.buffer.all().await.context("failed to read buffered samples")?;
        if samples.is_empty() {
            log_warn!("end of session {} requested with no data", session.session_id);
            return Ok(EndSessionOutcome::NoData);
        }
        let stats = self
            .buffer
            .statistics()
            .await
            .context("failed to compute session statistics")?;

        let now = Utc::now();
        let destination_url = request
            .destination_url
            .filter(|url| !url.trim().is_empty());
        let archive = SessionArchive {
            session_id: session.session_id.clone(),
            metadata: ArchiveMetadata {
                destination_url,
                created_at: now,
                operator_name: request.operator_name,
                notes: request.notes,
            },
            session_info: SessionInfo {
                start_time: stats.first_capture,
                end_time: now,
                total_records: stats.total_records,
                duration_seconds: stats.duration_seconds(),
                avg_bpm: stats.avg_bpm,
                avg_uterus: stats.avg_uterus,
            },
            patient_info: self.clinical.get(&session.session_id).unwrap_or_default(),
            samples,
        };

        let archive_file = self.outbox.enqueue(&archive)?;
        let total_records = archive.samples.len() as u64;

        if let Err(err) = self.buffer.clear().await {
            log_error!("archive {archive_file} queued but buffer clear failed: {err:?}");
            return Err(err.context("failed to clear sample buffer"));
        }
        self.clinical.remove(&session.session_id);

        let mut next = SessionContext::fresh(now);
        if next.session_id == session.session_id {
            next.session_id = format!("session_{}", now.timestamp_millis());
        }
        let next_session_id = next.session_id.clone();
        self.replace_session(next);
        self.scheduler.reset(Instant::now());
        self.scheduler.clear_history();

        log_info!(
            "session {} archived as {archive_file} ({total_records} records); now {next_session_id}",
            session.session_id
        );
        self.notifier.publish(Event::SessionEnded {
            session_id: session.session_id.clone(),
            archive_file: archive_file.clone(),
            total_records,
        });
        self.notifier.publish(Event::SessionSwitched {
            previous_session_id: session.session_id.clone(),
            session_id: next_session_id.clone(),
        });

        Ok(EndSessionOutcome::Archived {
            session_id: session.session_id,
            archive_file,
            total_records,
            next_session_id,
        })
    }

    /// Points subsequent samples and analyses at `session_id`. Buffered data
    /// is left alone.
    pub fn switch_session(&self, session_id: &str) -> SessionContext {
        let next = SessionContext::new(session_id, Utc::now());
        let previous = self.replace_session(next.clone());
        self.scheduler.reset(Instant::now());

        log_info!("switched session {} -> {}", previous.session_id, next.session_id);
        self.notifier.publish(Event::SessionSwitched {
            previous_session_id: previous.session_id,
            session_id: next.session_id.clone(),
        });
        next
    }

    fn replace_session(&self, next: SessionContext) -> SessionContext {
        let mut guard = match self.session.write() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        std::mem::replace(&mut *guard, next)
    }
}

#[async_trait]
impl SampleSink for MonitorService {
    async fn accept(&self, sample: Sample) -> Result<()> {
        self.ingest(sample, Instant::now()).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::Database;
    use crate::models::PatientInfo;
    use crate::scoring::{ScoringConfig, ScoringEngine};
    use crate::settings::{AnalysisSettings, OutboxSettings};
    use tempfile::TempDir;

    fn service(dir: &TempDir, notifier: Arc<Notifier>) -> MonitorService {
        let db = Database::new(dir.path().join("ctg.db")).unwrap();
        let buffer = Arc::new(SampleBuffer::new(db.clone(), 50));
        let scheduler = AnalysisScheduler::new(
            AnalysisSettings::default(),
            buffer.clone(),
            Arc::new(ScoringEngine::with_rules(ScoringConfig::default())),
            db,
            notifier.clone(),
            Instant::now(),
        );
        let outbox = Outbox::open(
            &dir.path().join("outbox"),
            &OutboxSettings::default(),
            notifier.clone(),
        )
        .unwrap();
        MonitorService::new(
            SessionContext::new("bed-3", Utc::now()),
            buffer,
            scheduler,
            Arc::new(outbox),
            Arc::new(ClinicalStore::new()),
            notifier,
        )
    }

    fn sample(sequence_id: u64, bpm: f64) -> Sample {
        Sample {
            sequence_id,
            capture_time: Utc::now(),
            device_time_bpm: format!("00:00:{sequence_id:02}"),
            bpm_value: bpm,
            device_time_uterus: format!("00:00:{sequence_id:02}"),
            uterus_value: 12.0,
        }
    }

    #[tokio::test]
    async fn end_session_without_samples_is_no_data() {
        let dir = TempDir::new().unwrap();
        let service = service(&dir, Arc::new(Notifier::default()));

        let outcome = service.end_session(EndSessionRequest::default()).await.unwrap();

        assert_eq!(outcome, EndSessionOutcome::NoData);
        assert_eq!(service.current_session().session_id, "bed-3");
    }

    #[tokio::test]
    async fn end_session_archives_and_switches() {
        let dir = TempDir::new().unwrap();
        let notifier = Arc::new(Notifier::new(64));
        let service = service(&dir, notifier.clone());
        service.clinical().upsert(
            "bed-3",
            PatientInfo {
                name: Some("A. Patient".into()),
                risk_factors: vec!["preeclampsia".into()],
                ..PatientInfo::default()
            },
        );
        let mut events = notifier.subscribe();

        for i in 1..=5 {
            service.accept(sample(i, 140.0)).await.unwrap();
        }
        let outcome = service
            .end_session(EndSessionRequest {
                destination_url: Some("http://archive.local/ctg".into()),
                operator_name: Some("midwife".into()),
                notes: None,
            })
            .await
            .unwrap();

        let EndSessionOutcome::Archived {
            session_id,
            archive_file,
            total_records,
            next_session_id,
        } = outcome
        else {
            panic!("expected an archive");
        };
        assert_eq!(session_id, "bed-3");
        assert_eq!(total_records, 5);
        assert!(next_session_id.starts_with("session_"));
        assert_eq!(service.current_session().session_id, next_session_id);
        assert!(service.clinical().get("bed-3").is_none());

        let stored = std::fs::read_to_string(
            dir.path().join("outbox").join("pending").join(&archive_file),
        )
        .unwrap();
        let archive: SessionArchive = serde_json::from_str(&stored).unwrap();
        assert_eq!(archive.samples.len(), 5);
        assert_eq!(archive.patient_info.risk_factors, vec!["preeclampsia"]);

        let mut kinds = Vec::new();
        while let Ok(event) = events.try_recv() {
            kinds.push(event.kind());
        }
        assert_eq!(kinds.iter().filter(|k| **k == "ctg_data").count(), 5);
        assert_eq!(&kinds[kinds.len() - 2..], &["session_ended", "session_switched"]);

        let again = service.end_session(EndSessionRequest::default()).await.unwrap();
        assert_eq!(again, EndSessionOutcome::NoData);
    }

    #[tokio::test]
    async fn switch_session_keeps_buffer() {
        let dir = TempDir::new().unwrap();
        let service = service(&dir, Arc::new(Notifier::default()));
        service.accept(sample(1, 140.0)).await.unwrap();

        let next = service.switch_session("bed-4");

        assert_eq!(next.session_id, "bed-4");
        assert_eq!(service.current_session().session_id, "bed-4");
        assert_eq!(service.buffer.len().await.unwrap(), 1);
    }
}
