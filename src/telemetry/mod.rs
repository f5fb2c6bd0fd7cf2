mod client;
mod controller;
mod parser;

use anyhow::Result;
use async_trait::async_trait;

use crate::models::Sample;

pub use client::{ConnectionState, IngestionClient, IngestionStats, IngestionStatsSnapshot};
pub use controller::IngestionController;
pub use parser::{parse_line, TelemetryError, TelemetryReading};

/// Receives every sample the ingestion client accepts, in arrival order.
#[async_trait]
pub trait SampleSink: Send + Sync {
    async fn accept(&self, sample: Sample) -> Result<()>;
}
