use anyhow::{Context, Result};
use rusqlite::{params, Row};

use crate::db::{
    connection::Database,
    helpers::{from_column, parse_optional_timestamp, parse_timestamp, row_limit, to_i64},
};
use crate::models::{Sample, SessionStats};

const SAMPLE_COLUMNS: &str =
    "sequence_id, capture_time, device_time_bpm, bpm_value, device_time_uterus, uterus_value";

fn row_to_sample(row: &Row) -> Result<Sample> {
    let sequence_id: i64 = row.get("sequence_id")?;
    let capture_time: String = row.get("capture_time")?;

    Ok(Sample {
        sequence_id: from_column(sequence_id, "sequence_id")?,
        capture_time: parse_timestamp(&capture_time, "capture_time")?,
        device_time_bpm: row.get("device_time_bpm")?,
        bpm_value: row.get("bpm_value")?,
        device_time_uterus: row.get("device_time_uterus")?,
        uterus_value: row.get("uterus_value")?,
    })
}

impl Database {
    /// Writes a batch of samples in a single transaction.
    pub async fn insert_samples(&self, samples: Vec<Sample>) -> Result<usize> {
        if samples.is_empty() {
            return Ok(0);
        }

        self.execute(move |conn| {
            let tx = conn
                .transaction()
                .context("failed to open sample transaction")?;
            {
                let mut stmt = tx.prepare_cached(&format!(
                    "INSERT INTO samples ({SAMPLE_COLUMNS}) VALUES (?1, ?2, ?3, ?4, ?5, ?6)"
                ))?;
                for sample in &samples {
                    stmt.execute(params![
                        to_i64(sample.sequence_id)?,
                        sample.capture_time.to_rfc3339(),
                        sample.device_time_bpm,
                        sample.bpm_value,
                        sample.device_time_uterus,
                        sample.uterus_value,
                    ])?;
                }
            }
            tx.commit().context("failed to commit sample batch")?;
            Ok(samples.len())
        })
        .await
    }

    /// The newest `limit` stored samples, oldest first.
    pub async fn recent_samples(&self, limit: usize) -> Result<Vec<Sample>> {
        let limit = row_limit(limit)?;
        self.execute(move |conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {SAMPLE_COLUMNS} FROM (
                    SELECT id, {SAMPLE_COLUMNS} FROM samples ORDER BY id DESC LIMIT ?1
                 ) ORDER BY id ASC"
            ))?;

            let mut rows = stmt.query(params![limit])?;
            let mut samples = Vec::new();
            while let Some(row) = rows.next()? {
                samples.push(row_to_sample(row)?);
            }
            Ok(samples)
        })
        .await
    }

    pub async fn all_samples(&self) -> Result<Vec<Sample>> {
        self.execute(|conn| {
            let mut stmt =
                conn.prepare(&format!("SELECT {SAMPLE_COLUMNS} FROM samples ORDER BY id ASC"))?;

            let mut rows = stmt.query([])?;
            let mut samples = Vec::new();
            while let Some(row) = rows.next()? {
                samples.push(row_to_sample(row)?);
            }
            Ok(samples)
        })
        .await
    }

    pub async fn count_samples(&self) -> Result<u64> {
        self.execute(|conn| {
            let count: i64 = conn.query_row("SELECT COUNT(*) FROM samples", [], |row| row.get(0))?;
            from_column(count, "sample count")
        })
        .await
    }

    pub async fn clear_samples(&self) -> Result<usize> {
        self.execute(|conn| {
            let removed = conn
                .execute("DELETE FROM samples", [])
                .context("failed to clear samples")?;
            Ok(removed)
        })
        .await
    }

    pub async fn sample_stats(&self) -> Result<SessionStats> {
        self.execute(|conn| {
            let (count, first, last, avg_bpm, avg_uterus): (
                i64,
                Option<String>,
                Option<String>,
                Option<f64>,
                Option<f64>,
            ) = conn.query_row(
                "SELECT COUNT(*), MIN(capture_time), MAX(capture_time), AVG(bpm_value), AVG(uterus_value)
                 FROM samples",
                [],
                |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?, row.get(4)?)),
            )?;

            Ok(SessionStats {
                total_records: from_column(count, "sample count")?,
                first_capture: parse_optional_timestamp(first, "capture_time")?,
                last_capture: parse_optional_timestamp(last, "capture_time")?,
                avg_bpm: avg_bpm.unwrap_or(0.0),
                avg_uterus: avg_uterus.unwrap_or(0.0),
            })
        })
        .await
    }
}
