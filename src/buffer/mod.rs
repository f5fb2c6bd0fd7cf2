//! Durable time-series buffer for accepted samples.
//!
//! Writes collect in a small in-memory batch and reach SQLite in one
//! transaction, either when the batch fills or on the periodic flusher. The
//! batch lock is held for the whole flush and for every read, so readers see
//! either none or all of a batch.

use std::sync::Arc;

use anyhow::{Context, Result};
use tokio::{
    sync::Mutex,
    task::JoinHandle,
    time::{Duration, MissedTickBehavior},
};
use tokio_util::sync::CancellationToken;

use crate::db::Database;
use crate::models::{Sample, SessionStats};

const ENABLE_LOGS: bool = true;
use crate::{log_debug, log_error, log_info};

pub struct SampleBuffer {
    db: Database,
    batch: Mutex<Vec<Sample>>,
    max_batch: usize,
}

impl SampleBuffer {
    pub fn new(db: Database, max_batch: usize) -> Self {
        let max_batch = max_batch.max(1);
        Self {
            db,
            batch: Mutex::new(Vec::with_capacity(max_batch)),
            max_batch,
        }
    }

    pub async fn append(&self, sample: Sample) -> Result<()> {
        let mut batch = self.batch.lock().await;
        batch.push(sample);
        if batch.len() >= self.max_batch {
            self.flush_locked(&mut batch).await?;
        }
        Ok(())
    }

    /// Writes the pending batch; returns how many samples were persisted.
    pub async fn flush(&self) -> Result<usize> {
        let mut batch = self.batch.lock().await;
        self.flush_locked(&mut batch).await
    }

    async fn flush_locked(&self, batch: &mut Vec<Sample>) -> Result<usize> {
        if batch.is_empty() {
            return Ok(0);
        }
        let written = self
            .db
            .insert_samples(batch.clone())
            .await
            .context("failed to flush sample batch")?;
        batch.clear();
        log_debug!("flushed {written} samples");
        Ok(written)
    }

    /// The newest `limit` samples, oldest first.
    pub async fn recent(&self, limit: usize) -> Result<Vec<Sample>> {
        let batch = self.batch.lock().await;
        if limit <= batch.len() {
            return Ok(batch[batch.len() - limit..].to_vec());
        }
        let mut samples = self.db.recent_samples(limit - batch.len()).await?;
        samples.extend(batch.iter().cloned());
        Ok(samples)
    }

    pub async fn all(&self) -> Result<Vec<Sample>> {
        let batch = self.batch.lock().await;
        let mut samples = self.db.all_samples().await?;
        samples.extend(batch.iter().cloned());
        Ok(samples)
    }

    pub async fn len(&self) -> Result<u64> {
        let batch = self.batch.lock().await;
        Ok(self.db.count_samples().await? + batch.len() as u64)
    }

    pub async fn is_empty(&self) -> Result<bool> {
        Ok(self.len().await? == 0)
    }

    pub async fn statistics(&self) -> Result<SessionStats> {
        let mut batch = self.batch.lock().await;
        self.flush_locked(&mut batch).await?;
        self.db.sample_stats().await
    }

    /// Drops every buffered sample, pending and stored.
    pub async fn clear(&self) -> Result<usize> {
        let mut batch = self.batch.lock().await;
        let pending = batch.len();
        batch.clear();
        let stored = self.db.clear_samples().await?;
        Ok(pending + stored)
    }

    /// Flushes every `interval` until cancelled, then flushes once more.
    pub fn spawn_flusher(
        self: Arc<Self>,
        interval: Duration,
        cancel_token: CancellationToken,
    ) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        if let Err(err) = self.flush().await {
                            log_error!("periodic sample flush failed: {err:?}");
                        }
                    }
                    _ = cancel_token.cancelled() => {
                        if let Err(err) = self.flush().await {
                            log_error!("final sample flush failed: {err:?}");
                        }
                        log_info!("sample flusher shutting down");
                        break;
                    }
                }
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration as ChronoDuration, TimeZone, Utc};
    use tempfile::TempDir;

    fn sample(sequence_id: u64, bpm: f64) -> Sample {
        let start = Utc.with_ymd_and_hms(2024, 5, 1, 8, 0, 0).unwrap();
        Sample {
            sequence_id,
            capture_time: start + ChronoDuration::seconds(sequence_id as i64),
            device_time_bpm: sequence_id.to_string(),
            bpm_value: bpm,
            device_time_uterus: sequence_id.to_string(),
            uterus_value: 10.0,
        }
    }

    fn buffer(dir: &TempDir, max_batch: usize) -> SampleBuffer {
        let db = Database::new(dir.path().join("ctg.db")).unwrap();
        SampleBuffer::new(db, max_batch)
    }

    #[tokio::test]
    async fn batch_is_flushed_when_full() {
        let dir = TempDir::new().unwrap();
        let buffer = buffer(&dir, 3);

        for id in 1..=4 {
            buffer.append(sample(id, 140.0)).await.unwrap();
        }

        assert_eq!(buffer.db.count_samples().await.unwrap(), 3);
        assert_eq!(buffer.len().await.unwrap(), 4);
        assert_eq!(buffer.flush().await.unwrap(), 1);
        assert_eq!(buffer.flush().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn recent_merges_stored_and_pending_in_order() {
        let dir = TempDir::new().unwrap();
        let buffer = buffer(&dir, 4);

        for id in 1..=6 {
            buffer.append(sample(id, 130.0 + id as f64)).await.unwrap();
        }

        let ids: Vec<u64> = buffer
            .recent(5)
            .await
            .unwrap()
            .iter()
            .map(|s| s.sequence_id)
            .collect();
        assert_eq!(ids, vec![2, 3, 4, 5, 6]);

        let pending_only: Vec<u64> = buffer
            .recent(1)
            .await
            .unwrap()
            .iter()
            .map(|s| s.sequence_id)
            .collect();
        assert_eq!(pending_only, vec![6]);

        assert_eq!(buffer.all().await.unwrap().len(), 6);
        assert_eq!(buffer.recent(100).await.unwrap().len(), 6);
    }

    #[tokio::test]
    async fn statistics_cover_pending_samples() {
        let dir = TempDir::new().unwrap();
        let buffer = buffer(&dir, 50);

        buffer.append(sample(1, 130.0)).await.unwrap();
        buffer.append(sample(11, 150.0)).await.unwrap();

        let stats = buffer.statistics().await.unwrap();
        assert_eq!(stats.total_records, 2);
        assert_eq!(stats.avg_bpm, 140.0);
        assert_eq!(stats.duration_seconds(), 10);
    }

    #[tokio::test]
    async fn clear_removes_everything() {
        let dir = TempDir::new().unwrap();
        let buffer = buffer(&dir, 2);
        for id in 1..=3 {
            buffer.append(sample(id, 140.0)).await.unwrap();
        }

        assert_eq!(buffer.clear().await.unwrap(), 3);
        assert!(buffer.is_empty().await.unwrap());
    }

    #[tokio::test]
    async fn flusher_persists_on_cancel() {
        let dir = TempDir::new().unwrap();
        let buffer = Arc::new(buffer(&dir, 50));
        buffer.append(sample(1, 140.0)).await.unwrap();

        let cancel = CancellationToken::new();
        let handle = buffer
            .clone()
            .spawn_flusher(Duration::from_secs(3600), cancel.clone());
        cancel.cancel();
        handle.await.unwrap();

        assert_eq!(buffer.db.count_samples().await.unwrap(), 1);
    }
}
