use anyhow::{Context, Result};
use rusqlite::{params, Row};

use crate::db::{
    connection::Database,
    helpers::{from_column, parse_timestamp, row_limit},
    models::AnalysisRecord,
};

fn row_to_record(row: &Row) -> Result<AnalysisRecord> {
    let ts: String = row.get("ts")?;
    let urgency: i64 = row.get("urgency")?;
    let accelerations: i64 = row.get("accelerations")?;
    let decelerations: i64 = row.get("decelerations")?;
    let rule_score: i64 = row.get("rule_score")?;
    let full_result: String = row.get("full_result")?;

    Ok(AnalysisRecord {
        id: row.get("id")?,
        timestamp: parse_timestamp(&ts, "ts")?,
        session_id: row.get("session_id")?,
        wellbeing_index: row.get("wellbeing_index")?,
        priority: row.get("priority")?,
        urgency: from_column(urgency, "urgency")?,
        baseline: row.get("baseline")?,
        variability: row.get("variability")?,
        accelerations: from_column(accelerations, "accelerations")?,
        decelerations: from_column(decelerations, "decelerations")?,
        signal_quality: row.get("signal_quality")?,
        risk_probability: row.get("risk_probability")?,
        rule_score: from_column(rule_score, "rule_score")?,
        trend_status: row.get("trend_status")?,
        full_result: serde_json::from_str(&full_result)
            .context("failed to decode stored analysis result")?,
    })
}

impl Database {
    pub async fn insert_analysis_result(&self, record: &AnalysisRecord) -> Result<i64> {
        let record = record.clone();
        self.execute(move |conn| {
            let full_result = serde_json::to_string(&record.full_result)
                .context("failed to serialize analysis result")?;
            conn.execute(
                "INSERT INTO analysis_results (
                    ts,
                    session_id,
                    wellbeing_index,
                    priority,
                    urgency,
                    baseline,
                    variability,
                    accelerations,
                    decelerations,
                    signal_quality,
                    risk_probability,
                    rule_score,
                    trend_status,
                    full_result
                ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14)",
                params![
                    record.timestamp.to_rfc3339(),
                    record.session_id,
                    record.wellbeing_index,
                    record.priority,
                    i64::from(record.urgency),
                    record.baseline,
                    record.variability,
                    i64::from(record.accelerations),
                    i64::from(record.decelerations),
                    record.signal_quality,
                    record.risk_probability,
                    i64::from(record.rule_score),
                    record.trend_status,
                    full_result,
                ],
            )
            .context("failed to insert analysis result")?;
            Ok(conn.last_insert_rowid())
        })
        .await
    }

    /// Most recent analysis rows for a session, newest first.
    pub async fn recent_analysis_results(
        &self,
        session_id: &str,
        limit: usize,
    ) -> Result<Vec<AnalysisRecord>> {
        let session_id = session_id.to_string();
        let limit = row_limit(limit)?;
        self.execute(move |conn| {
            let mut stmt = conn.prepare(
                "SELECT id, ts, session_id, wellbeing_index, priority, urgency, baseline,
                        variability, accelerations, decelerations, signal_quality,
                        risk_probability, rule_score, trend_status, full_result
                 FROM analysis_results
                 WHERE session_id = ?1
                 ORDER BY id DESC
                 LIMIT ?2",
            )?;

            let mut rows = stmt.query(params![session_id, limit])?;
            let mut records = Vec::new();
            while let Some(row) = rows.next()? {
                records.push(row_to_record(row)?);
            }
            Ok(records)
        })
        .await
    }
}
