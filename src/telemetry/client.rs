use std::sync::{
    atomic::{AtomicU64, Ordering},
    Arc,
};

use anyhow::{Context, Result};
use chrono::Utc;
use serde::Serialize;
use tokio::{
    io::{AsyncReadExt, AsyncWriteExt},
    net::TcpStream,
    sync::watch,
};
use tokio_util::sync::CancellationToken;

use crate::models::Sample;
use crate::notifier::{Event, Notifier};
use crate::settings::DeviceSettings;

use super::{parse_line, SampleSink};

// Set to true to enable verbose logging in this module
const ENABLE_LOGS: bool = true;

use crate::{log_debug, log_error, log_info, log_warn};

const READ_CHUNK: usize = 4096;

#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Streaming,
}

#[derive(Debug, Default)]
pub struct IngestionStats {
    lines_received: AtomicU64,
    samples_accepted: AtomicU64,
    malformed_lines: AtomicU64,
    out_of_range_lines: AtomicU64,
    reconnects: AtomicU64,
}

#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
pub struct IngestionStatsSnapshot {
    pub lines_received: u64,
    pub samples_accepted: u64,
    pub malformed_lines: u64,
    pub out_of_range_lines: u64,
    pub reconnects: u64,
}

impl IngestionStats {
    pub fn snapshot(&self) -> IngestionStatsSnapshot {
        IngestionStatsSnapshot {
            lines_received: self.lines_received.load(Ordering::Relaxed),
            samples_accepted: self.samples_accepted.load(Ordering::Relaxed),
            malformed_lines: self.malformed_lines.load(Ordering::Relaxed),
            out_of_range_lines: self.out_of_range_lines.load(Ordering::Relaxed),
            reconnects: self.reconnects.load(Ordering::Relaxed),
        }
    }

    fn bump(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }
}

/// Why a streaming connection ended.
enum StreamEnd {
    Cancelled,
    Lost(String),
}

/// Long-lived TCP reader for the bedside device.
///
/// Reconnects after a fixed delay on any failure; only cancellation ends
/// [`IngestionClient::run`].
pub struct IngestionClient {
    settings: DeviceSettings,
    sink: Arc<dyn SampleSink>,
    notifier: Arc<Notifier>,
    state_tx: watch::Sender<ConnectionState>,
    stats: Arc<IngestionStats>,
    next_sequence: u64,
}

impl IngestionClient {
    pub fn new(
        settings: DeviceSettings,
        sink: Arc<dyn SampleSink>,
        notifier: Arc<Notifier>,
    ) -> Self {
        let (state_tx, _) = watch::channel(ConnectionState::Disconnected);
        Self {
            settings,
            sink,
            notifier,
            state_tx,
            stats: Arc::new(IngestionStats::default()),
            next_sequence: 1,
        }
    }

    pub fn state(&self) -> watch::Receiver<ConnectionState> {
        self.state_tx.subscribe()
    }

    pub fn stats(&self) -> Arc<IngestionStats> {
        Arc::clone(&self.stats)
    }

    pub async fn run(mut self, cancel_token: CancellationToken) {
        let address = format!("{}:{}", self.settings.host, self.settings.port);
        let reconnect_delay = self.settings.reconnect_delay();

        loop {
            self.set_state(ConnectionState::Connecting);
            let reason = match self.connect_and_stream(&address, &cancel_token).await {
                Ok(StreamEnd::Cancelled) => break,
                Ok(StreamEnd::Lost(reason)) => reason,
                Err(err) => format!("{err:#}"),
            };

            self.set_state(ConnectionState::Disconnected);
            IngestionStats::bump(&self.stats.reconnects);
            log_warn!(
                "telemetry connection to {address} lost: {reason}; retrying in {}s",
                reconnect_delay.as_secs()
            );
            self.notifier.publish(Event::system(format!(
                "Telemetry connection lost ({reason}), reconnecting in {}s",
                reconnect_delay.as_secs()
            )));

            tokio::select! {
                _ = tokio::time::sleep(reconnect_delay) => {}
                _ = cancel_token.cancelled() => break,
            }
        }

        self.set_state(ConnectionState::Disconnected);
        log_info!("telemetry ingestion shutting down");
    }

    fn set_state(&self, state: ConnectionState) {
        self.state_tx.send_replace(state);
    }

    async fn connect_and_stream(
        &mut self,
        address: &str,
        cancel_token: &CancellationToken,
    ) -> Result<StreamEnd> {
        let mut stream = tokio::select! {
            connected = TcpStream::connect(address) => {
                connected.with_context(|| format!("failed to connect to {address}"))?
            }
            _ = cancel_token.cancelled() => return Ok(StreamEnd::Cancelled),
        };

        self.set_state(ConnectionState::Streaming);
        log_info!("connected to telemetry source {address}");
        self.notifier
            .publish(Event::system(format!("Connected to telemetry source {address}")));

        let read_timeout = self.settings.read_timeout();
        let mut pending: Vec<u8> = Vec::new();
        let mut chunk = [0u8; READ_CHUNK];

        loop {
            let read = tokio::select! {
                read = tokio::time::timeout(read_timeout, stream.read(&mut chunk)) => read,
                _ = cancel_token.cancelled() => return Ok(StreamEnd::Cancelled),
            };

            match read {
                Err(_) => {
                    log_debug!("no telemetry for {}s, probing connection", read_timeout.as_secs());
                    if let Err(err) = stream.write_all(b"\n").await {
                        return Ok(StreamEnd::Lost(format!("liveness probe failed: {err}")));
                    }
                }
                Ok(Ok(0)) => return Ok(StreamEnd::Lost("connection closed by device".into())),
                Ok(Ok(read)) => {
                    pending.extend_from_slice(&chunk[..read]);
                    self.drain_lines(&mut pending).await;
                }
                Ok(Err(err)) => return Ok(StreamEnd::Lost(format!("read error: {err}"))),
            }
        }
    }

    /// Handles every complete line in `pending`, leaving any partial tail.
    async fn drain_lines(&mut self, pending: &mut Vec<u8>) {
        while let Some(newline) = pending.iter().position(|byte| *byte == b'\n') {
            let raw: Vec<u8> = pending.drain(..=newline).collect();
            let line = match std::str::from_utf8(&raw[..newline]) {
                Ok(line) => line.trim(),
                Err(err) => {
                    IngestionStats::bump(&self.stats.malformed_lines);
                    log_warn!("dropping non-UTF-8 telemetry line: {err}");
                    continue;
                }
            };
            if line.is_empty() {
                continue;
            }
            self.handle_line(line).await;
        }
    }

    async fn handle_line(&mut self, line: &str) {
        IngestionStats::bump(&self.stats.lines_received);

        let reading = match parse_line(line) {
            Ok(reading) => reading,
            Err(err) => {
                if err.is_out_of_range() {
                    IngestionStats::bump(&self.stats.out_of_range_lines);
                } else {
                    IngestionStats::bump(&self.stats.malformed_lines);
                }
                log_warn!("dropping telemetry line: {err}");
                return;
            }
        };

        let sample = Sample {
            sequence_id: self.next_sequence,
            capture_time: Utc::now(),
            device_time_bpm: reading.device_time_bpm,
            bpm_value: reading.bpm,
            device_time_uterus: reading.device_time_uterus,
            uterus_value: reading.uterus,
        };
        self.next_sequence += 1;

        match self.sink.accept(sample).await {
            Ok(()) => IngestionStats::bump(&self.stats.samples_accepted),
            Err(err) => log_error!("sample sink rejected sample: {err:?}"),
        }
    }
}
