//! Directory-backed outbox for session archives.
//!
//! An entry's state is the directory it sits in: `pending/`, `sent/` or
//! `error/`. Files are only ever moved between them with `rename`, so an entry
//! is never in two states at once and external tools can inspect the queue.

use std::{
    fs,
    path::{Path, PathBuf},
    sync::{Arc, Mutex},
    time::Duration,
};

use anyhow::{bail, Context, Result};
use chrono::Utc;
use serde::Serialize;
use serde_json::Value;
use tokio_util::sync::CancellationToken;

use crate::models::{SessionArchive, DESTINATION_FIELD};
use crate::notifier::{Event, Notifier};
use crate::settings::OutboxSettings;

use super::transport::ArchiveTransport;

const ENABLE_LOGS: bool = true;
use crate::{log_error, log_info, log_warn};

const SUCCESS_STATUSES: [u16; 3] = [200, 201, 202];

#[derive(Debug, Clone, Default, Serialize, PartialEq, Eq)]
pub struct CycleReport {
    pub attempted: usize,
    pub sent: usize,
    pub failed: usize,
    pub missing_destination: usize,
    pub undecodable: usize,
    pub remaining: usize,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct PendingEntry {
    pub filename: String,
    pub session_id: Option<String>,
    pub destination: Option<String>,
    pub size_bytes: u64,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct QueueStatus {
    pub pending: usize,
    pub sent: usize,
    pub error: usize,
    pub pending_entries: Vec<PendingEntry>,
}

/// Outcome of trying to deliver one pending file.
enum Delivery {
    Sent { session_id: String, status: u16 },
    Rejected,
    MissingDestination,
    Undecodable,
    Unreadable,
}

pub struct Outbox {
    pending_dir: PathBuf,
    sent_dir: PathBuf,
    error_dir: PathBuf,
    send_timeout: Duration,
    send_pause: Duration,
    notifier: Arc<Notifier>,
    last_millis: Mutex<i64>,
}

impl Outbox {
    pub fn open(root: &Path, settings: &OutboxSettings, notifier: Arc<Notifier>) -> Result<Self> {
        let outbox = Self {
            pending_dir: root.join("pending"),
            sent_dir: root.join("sent"),
            error_dir: root.join("error"),
            send_timeout: settings.send_timeout(),
            send_pause: settings.send_pause(),
            notifier,
            last_millis: Mutex::new(0),
        };
        for dir in [&outbox.pending_dir, &outbox.sent_dir, &outbox.error_dir] {
            fs::create_dir_all(dir)
                .with_context(|| format!("failed to create outbox directory {}", dir.display()))?;
        }
        Ok(outbox)
    }

    /// Writes `archive` to `pending/` and returns its filename. Never touches
    /// the network.
    pub fn enqueue(&self, archive: &SessionArchive) -> Result<String> {
        let serialized =
            serde_json::to_vec_pretty(archive).context("failed to serialize session archive")?;

        let filename = self.next_filename(&archive.session_id);
        let target = self.pending_dir.join(&filename);
        let temp = self.pending_dir.join(format!(".{filename}.tmp"));

        fs::write(&temp, serialized)
            .with_context(|| format!("failed to write {}", temp.display()))?;
        fs::rename(&temp, &target)
            .with_context(|| format!("failed to publish {}", target.display()))?;

        log_info!(
            "queued archive {filename} ({} samples)",
            archive.samples.len()
        );
        Ok(filename)
    }

    fn next_filename(&self, session_id: &str) -> String {
        let safe_id: String = session_id
            .chars()
            .map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '_' { c } else { '_' })
            .collect();

        let mut last = match self.last_millis.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        let mut millis = Utc::now().timestamp_millis().max(*last + 1);
        while self
            .pending_dir
            .join(format!("archive_{safe_id}_{millis}.json"))
            .exists()
        {
            millis += 1;
        }
        *last = millis;
        format!("archive_{safe_id}_{millis}.json")
    }

    /// Attempts every pending entry once, in filename order.
    ///
    /// Cancellation is honoured between entries; an upload already in flight
    /// completes or times out first.
    pub async fn run_cycle(
        &self,
        transport: &dyn ArchiveTransport,
        cancel_token: &CancellationToken,
    ) -> CycleReport {
        let mut report = CycleReport::default();
        let entries = match list_json(&self.pending_dir) {
            Ok(entries) => entries,
            Err(err) => {
                log_error!("failed to list pending archives: {err:?}");
                return report;
            }
        };

        let mut first_upload = true;
        for path in entries {
            if cancel_token.is_cancelled() {
                break;
            }
            let filename = file_name(&path);

            let document = match self.load(&path).await {
                Ok(document) => document,
                Err(delivery) => {
                    self.settle(&path, &filename, delivery, &mut report);
                    continue;
                }
            };
            let Some(url) = destination(&document) else {
                self.settle(&path, &filename, Delivery::MissingDestination, &mut report);
                continue;
            };

            if !first_upload {
                tokio::select! {
                    _ = tokio::time::sleep(self.send_pause) => {}
                    _ = cancel_token.cancelled() => break,
                }
            }
            first_upload = false;

            report.attempted += 1;
            let delivery = self.deliver(transport, &filename, &url, document).await;
            self.settle(&path, &filename, delivery, &mut report);
        }

        report.remaining = list_json(&self.pending_dir).map(|e| e.len()).unwrap_or(0);
        report
    }

    async fn load(&self, path: &Path) -> std::result::Result<Value, Delivery> {
        let bytes = match tokio::fs::read(path).await {
            Ok(bytes) => bytes,
            Err(err) => {
                log_error!("failed to read {}: {err}", path.display());
                return Err(Delivery::Unreadable);
            }
        };
        match serde_json::from_slice::<Value>(&bytes) {
            Ok(document) if document.is_object() => Ok(document),
            Ok(_) => Err(Delivery::Undecodable),
            Err(err) => {
                log_warn!("archive {} is not valid JSON: {err}", path.display());
                Err(Delivery::Undecodable)
            }
        }
    }

    async fn deliver(
        &self,
        transport: &dyn ArchiveTransport,
        filename: &str,
        url: &str,
        mut document: Value,
    ) -> Delivery {
        if let Some(metadata) = document.get_mut("metadata").and_then(Value::as_object_mut) {
            metadata.remove(DESTINATION_FIELD);
        }
        let session_id = document
            .get("session_id")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();

        match tokio::time::timeout(self.send_timeout, transport.send(url, &document)).await {
            Ok(Ok(status)) if SUCCESS_STATUSES.contains(&status) => {
                Delivery::Sent { session_id, status }
            }
            Ok(Ok(status)) => {
                log_warn!("archive {filename} rejected with HTTP {status}; will retry");
                Delivery::Rejected
            }
            Ok(Err(err)) => {
                log_warn!("archive {filename} delivery failed: {err:#}; will retry");
                Delivery::Rejected
            }
            Err(_) => {
                log_warn!(
                    "archive {filename} delivery timed out after {}s; will retry",
                    self.send_timeout.as_secs()
                );
                Delivery::Rejected
            }
        }
    }

    fn settle(&self, path: &Path, filename: &str, delivery: Delivery, report: &mut CycleReport) {
        match delivery {
            Delivery::Sent { session_id, status } => {
                if let Err(err) = move_into(path, &self.sent_dir) {
                    log_error!("archive {filename} was delivered but could not be moved: {err:?}");
                    report.failed += 1;
                    return;
                }
                report.sent += 1;
                log_info!("archive {filename} delivered (HTTP {status})");
                self.notifier.publish(Event::ArchiveSent {
                    session_id,
                    filename: filename.to_string(),
                    status,
                });
            }
            Delivery::Rejected | Delivery::Unreadable => report.failed += 1,
            Delivery::MissingDestination => {
                log_warn!("archive {filename} has no destination; moving to error/");
                report.missing_destination += 1;
                if let Err(err) = move_into(path, &self.error_dir) {
                    log_error!("failed to quarantine {filename}: {err:?}");
                }
            }
            Delivery::Undecodable => {
                log_warn!("archive {filename} cannot be decoded; moving to error/");
                report.undecodable += 1;
                if let Err(err) = move_into(path, &self.error_dir) {
                    log_error!("failed to quarantine {filename}: {err:?}");
                }
            }
        }
    }

    pub fn queue_status(&self) -> Result<QueueStatus> {
        let pending = list_json(&self.pending_dir)?;
        let mut pending_entries = Vec::with_capacity(pending.len());
        for path in &pending {
            let size_bytes = fs::metadata(path).map(|m| m.len()).unwrap_or(0);
            let document = fs::read(path)
                .ok()
                .and_then(|bytes| serde_json::from_slice::<Value>(&bytes).ok());
            pending_entries.push(PendingEntry {
                filename: file_name(path),
                session_id: document
                    .as_ref()
                    .and_then(|d| d.get("session_id"))
                    .and_then(Value::as_str)
                    .map(str::to_string),
                destination: document.as_ref().and_then(destination),
                size_bytes,
            });
        }

        Ok(QueueStatus {
            pending: pending.len(),
            sent: list_json(&self.sent_dir)?.len(),
            error: list_json(&self.error_dir)?.len(),
            pending_entries,
        })
    }

    /// Moves an entry from `error/` back to `pending/`.
    pub fn retry(&self, filename: &str) -> Result<()> {
        if filename.contains(['/', '\\']) || filename.starts_with('.') {
            bail!("invalid archive filename {filename}");
        }
        let source = self.error_dir.join(filename);
        if !source.is_file() {
            bail!("no archive named {filename} in error/");
        }
        move_into(&source, &self.pending_dir)?;
        log_info!("archive {filename} re-queued");
        Ok(())
    }

    /// Deletes delivered archives; returns how many were removed.
    pub fn clear_sent(&self) -> Result<usize> {
        let entries = list_json(&self.sent_dir)?;
        for path in &entries {
            fs::remove_file(path)
                .with_context(|| format!("failed to remove {}", path.display()))?;
        }
        Ok(entries.len())
    }
}

fn destination(document: &Value) -> Option<String> {
    document
        .get("metadata")
        .and_then(|metadata| metadata.get(DESTINATION_FIELD))
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|url| !url.is_empty())
        .map(str::to_string)
}

fn file_name(path: &Path) -> String {
    path.file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_default()
}

/// `*.json` files directly inside `dir`, sorted by name.
fn list_json(dir: &Path) -> Result<Vec<PathBuf>> {
    let mut entries = Vec::new();
    for entry in
        fs::read_dir(dir).with_context(|| format!("failed to list {}", dir.display()))?
    {
        let path = entry?.path();
        let visible = path
            .file_name()
            .and_then(|name| name.to_str())
            .map(|name| !name.starts_with('.'))
            .unwrap_or(false);
        if visible && path.is_file() && path.extension().and_then(|e| e.to_str()) == Some("json") {
            entries.push(path);
        }
    }
    entries.sort();
    Ok(entries)
}

fn move_into(path: &Path, dir: &Path) -> Result<()> {
    let name = path
        .file_name()
        .with_context(|| format!("{} has no file name", path.display()))?;
    let target = dir.join(name);
    fs::rename(path, &target)
        .with_context(|| format!("failed to move {} to {}", path.display(), target.display()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{ArchiveMetadata, PatientInfo, Sample, SessionInfo};
    use async_trait::async_trait;
    use std::collections::VecDeque;
    use tempfile::TempDir;

    struct ScriptedTransport {
        responses: Mutex<VecDeque<Result<u16>>>,
        calls: Mutex<Vec<(String, Value)>>,
    }

    impl ScriptedTransport {
        fn new(responses: Vec<Result<u16>>) -> Self {
            Self {
                responses: Mutex::new(responses.into()),
                calls: Mutex::new(Vec::new()),
            }
        }

        fn calls(&self) -> Vec<(String, Value)> {
            self.calls.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl ArchiveTransport for ScriptedTransport {
        async fn send(&self, url: &str, document: &Value) -> Result<u16> {
            self.calls
                .lock()
                .unwrap()
                .push((url.to_string(), document.clone()));
            self.responses
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or(Ok(200))
        }
    }

    fn settings() -> OutboxSettings {
        OutboxSettings {
            retry_interval_secs: 300,
            send_timeout_secs: 5,
            send_pause_secs: 0,
        }
    }

    fn archive(session_id: &str, destination: Option<&str>) -> SessionArchive {
        let now = Utc::now();
        SessionArchive {
            session_id: session_id.into(),
            metadata: ArchiveMetadata {
                destination_url: destination.map(str::to_string),
                created_at: now,
                operator_name: Some("midwife".into()),
                notes: None,
            },
            session_info: SessionInfo {
                start_time: Some(now),
                end_time: now,
                total_records: 1,
                duration_seconds: 0,
                avg_bpm: 140.0,
                avg_uterus: 10.0,
            },
            patient_info: PatientInfo::default(),
            samples: vec![Sample {
                sequence_id: 1,
                capture_time: now,
                device_time_bpm: "0".into(),
                bpm_value: 140.0,
                device_time_uterus: "0".into(),
                uterus_value: 10.0,
            }],
        }
    }

    fn outbox(dir: &TempDir) -> (Outbox, tokio::sync::mpsc::Receiver<Event>) {
        let notifier = Arc::new(Notifier::default());
        let events = notifier.subscribe();
        (Outbox::open(dir.path(), &settings(), notifier).unwrap(), events)
    }

    #[tokio::test]
    async fn missing_destination_goes_to_error_without_http() {
        let dir = TempDir::new().unwrap();
        let (outbox, _events) = outbox(&dir);
        outbox.enqueue(&archive("s1", None)).unwrap();
        outbox.enqueue(&archive("s2", Some("   "))).unwrap();

        let transport = ScriptedTransport::new(vec![]);
        let report = outbox.run_cycle(&transport, &CancellationToken::new()).await;

        assert!(transport.calls().is_empty());
        assert_eq!(report.missing_destination, 2);
        let status = outbox.queue_status().unwrap();
        assert_eq!((status.pending, status.sent, status.error), (0, 0, 2));
    }

    #[tokio::test]
    async fn unavailable_endpoint_keeps_entry_pending_until_it_succeeds() {
        let dir = TempDir::new().unwrap();
        let (outbox, mut events) = outbox(&dir);
        let filename = outbox
            .enqueue(&archive("s1", Some("http://records.local/archive")))
            .unwrap();

        let transport = ScriptedTransport::new(vec![Ok(503), Ok(200)]);

        let first = outbox.run_cycle(&transport, &CancellationToken::new()).await;
        assert_eq!(first.failed, 1);
        assert_eq!(first.remaining, 1);
        assert!(events.try_recv().is_err());

        let second = outbox.run_cycle(&transport, &CancellationToken::new()).await;
        assert_eq!(second.sent, 1);
        assert_eq!(second.remaining, 0);
        assert!(dir.path().join("sent").join(&filename).exists());

        match events.try_recv() {
            Ok(Event::ArchiveSent {
                session_id,
                filename: sent,
                status,
            }) => {
                assert_eq!(session_id, "s1");
                assert_eq!(sent, filename);
                assert_eq!(status, 200);
            }
            other => panic!("expected archive_sent, got {other:?}"),
        }
        assert!(events.try_recv().is_err());

        // Nothing left to send: a further cycle is a no-op.
        let third = outbox.run_cycle(&transport, &CancellationToken::new()).await;
        assert_eq!(third, CycleReport::default());
        assert_eq!(transport.calls().len(), 2);
    }

    #[tokio::test]
    async fn destination_is_stripped_before_sending() {
        let dir = TempDir::new().unwrap();
        let (outbox, _events) = outbox(&dir);
        outbox
            .enqueue(&archive("s1", Some(" http://records.local/a ")))
            .unwrap();

        let transport = ScriptedTransport::new(vec![Ok(201)]);
        outbox.run_cycle(&transport, &CancellationToken::new()).await;

        let calls = transport.calls();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].0, "http://records.local/a");
        assert!(calls[0].1["metadata"].get(DESTINATION_FIELD).is_none());
        assert_eq!(calls[0].1["metadata"]["operator_name"], "midwife");
        assert_eq!(calls[0].1["samples"].as_array().map(Vec::len), Some(1));
    }

    #[tokio::test]
    async fn transport_errors_and_undecodable_files() {
        let dir = TempDir::new().unwrap();
        let (outbox, _events) = outbox(&dir);
        outbox
            .enqueue(&archive("s1", Some("http://records.local/a")))
            .unwrap();
        fs::write(dir.path().join("pending").join("archive_zz_1.json"), "{broken").unwrap();

        let transport = ScriptedTransport::new(vec![Err(anyhow::anyhow!("connection refused"))]);
        let report = outbox.run_cycle(&transport, &CancellationToken::new()).await;

        assert_eq!(report.failed, 1);
        assert_eq!(report.undecodable, 1);
        let status = outbox.queue_status().unwrap();
        assert_eq!((status.pending, status.error), (1, 1));
        assert_eq!(status.pending_entries[0].session_id.as_deref(), Some("s1"));
        assert_eq!(
            status.pending_entries[0].destination.as_deref(),
            Some("http://records.local/a")
        );
    }

    #[tokio::test]
    async fn cancelled_cycle_sends_nothing() {
        let dir = TempDir::new().unwrap();
        let (outbox, _events) = outbox(&dir);
        outbox
            .enqueue(&archive("s1", Some("http://records.local/a")))
            .unwrap();

        let cancel = CancellationToken::new();
        cancel.cancel();
        let transport = ScriptedTransport::new(vec![]);
        let report = outbox.run_cycle(&transport, &cancel).await;

        assert_eq!(report.attempted, 0);
        assert_eq!(report.remaining, 1);
    }

    #[test]
    fn filenames_are_strictly_increasing() {
        let dir = TempDir::new().unwrap();
        let (outbox, _events) = outbox(&dir);

        let names: Vec<String> = (0..5)
            .map(|_| outbox.enqueue(&archive("bed 4/a", None)).unwrap())
            .collect();

        assert!(names.iter().all(|n| n.starts_with("archive_bed_4_a_")));
        let mut sorted = names.clone();
        sorted.sort();
        sorted.dedup();
        assert_eq!(sorted, names);
    }

    #[test]
    fn retry_and_clear_sent() {
        let dir = TempDir::new().unwrap();
        let (outbox, _events) = outbox(&dir);
        fs::write(dir.path().join("error").join("archive_s_1.json"), "{}").unwrap();
        fs::write(dir.path().join("sent").join("archive_s_2.json"), "{}").unwrap();

        outbox.retry("archive_s_1.json").unwrap();
        assert!(dir.path().join("pending").join("archive_s_1.json").exists());
        assert!(outbox.retry("archive_s_1.json").is_err());
        assert!(outbox.retry("../sent/archive_s_2.json").is_err());

        assert_eq!(outbox.clear_sent().unwrap(), 1);
        assert_eq!(outbox.queue_status().unwrap().sent, 0);
    }
}
