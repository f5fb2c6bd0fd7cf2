use std::sync::Arc;

use anyhow::{bail, Context, Result};
use log::info;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::notifier::Notifier;
use crate::settings::DeviceSettings;

use super::client::{ConnectionState, IngestionClient, IngestionStats, IngestionStatsSnapshot};
use super::SampleSink;

/// Owns the ingestion task and its cancellation token.
pub struct IngestionController {
    handle: Option<JoinHandle<()>>,
    cancel_token: Option<CancellationToken>,
    state_rx: Option<watch::Receiver<ConnectionState>>,
    stats: Option<Arc<IngestionStats>>,
}

impl Default for IngestionController {
    fn default() -> Self {
        Self::new()
    }
}

impl IngestionController {
    pub fn new() -> Self {
        Self {
            handle: None,
            cancel_token: None,
            state_rx: None,
            stats: None,
        }
    }

    pub fn start_ingestion(
        &mut self,
        settings: DeviceSettings,
        sink: Arc<dyn SampleSink>,
        notifier: Arc<Notifier>,
    ) -> Result<()> {
        if self.handle.is_some() {
            bail!("ingestion already active");
        }

        info!(
            "starting telemetry ingestion from {}:{}",
            settings.host, settings.port
        );

        let client = IngestionClient::new(settings, sink, notifier);
        let cancel_token = CancellationToken::new();

        self.state_rx = Some(client.state());
        self.stats = Some(client.stats());
        self.handle = Some(tokio::spawn(client.run(cancel_token.clone())));
        self.cancel_token = Some(cancel_token);
        Ok(())
    }

    pub fn is_running(&self) -> bool {
        self.handle.is_some()
    }

    pub fn connection_state(&self) -> ConnectionState {
        self.state_rx
            .as_ref()
            .map(|rx| *rx.borrow())
            .unwrap_or(ConnectionState::Disconnected)
    }

    pub fn stats(&self) -> Option<IngestionStatsSnapshot> {
        self.stats.as_ref().map(|stats| stats.snapshot())
    }

    pub async fn stop_ingestion(&mut self) -> Result<()> {
        if let Some(token) = self.cancel_token.take() {
            token.cancel();
        }

        if let Some(handle) = self.handle.take() {
            handle
                .await
                .context("ingestion task failed to join")
                .map(|_| ())
        } else {
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Sample;

    struct NullSink;

    #[async_trait::async_trait]
    impl SampleSink for NullSink {
        async fn accept(&self, _sample: Sample) -> Result<()> {
            Ok(())
        }
    }

    #[tokio::test]
    async fn start_twice_is_rejected_and_stop_is_idempotent() {
        let mut controller = IngestionController::new();
        let settings = DeviceSettings {
            // Nothing listens here; the client keeps retrying until stopped.
            port: 1,
            ..DeviceSettings::default()
        };
        let notifier = Arc::new(Notifier::default());

        controller
            .start_ingestion(settings.clone(), Arc::new(NullSink), notifier.clone())
            .unwrap();
        assert!(controller.is_running());
        assert!(controller
            .start_ingestion(settings, Arc::new(NullSink), notifier)
            .is_err());

        controller.stop_ingestion().await.unwrap();
        assert!(!controller.is_running());
        assert_eq!(controller.connection_state(), ConnectionState::Disconnected);
        controller.stop_ingestion().await.unwrap();
    }
}
