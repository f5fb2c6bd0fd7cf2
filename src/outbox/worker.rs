use std::{sync::Arc, time::Duration};

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use super::{queue::Outbox, transport::ArchiveTransport};

const ENABLE_LOGS: bool = true;
use crate::{log_debug, log_info};

/// Background delivery loop: one cycle, then wait for the retry interval.
pub struct OutboxWorker {
    outbox: Arc<Outbox>,
    transport: Arc<dyn ArchiveTransport>,
    interval: Duration,
}

impl OutboxWorker {
    pub fn new(outbox: Arc<Outbox>, transport: Arc<dyn ArchiveTransport>, interval: Duration) -> Self {
        Self {
            outbox,
            transport,
            interval,
        }
    }

    pub fn spawn(self, cancel_token: CancellationToken) -> JoinHandle<()> {
        tokio::spawn(self.run(cancel_token))
    }

    pub async fn run(self, cancel_token: CancellationToken) {
        loop {
            let report = self
                .outbox
                .run_cycle(self.transport.as_ref(), &cancel_token)
                .await;
            if report.attempted > 0 || report.missing_destination > 0 || report.undecodable > 0 {
                log_info!(
                    "outbox cycle: {} sent, {} failed, {} without destination, {} undecodable, {} pending",
                    report.sent,
                    report.failed,
                    report.missing_destination,
                    report.undecodable,
                    report.remaining
                );
            } else {
                log_debug!("outbox cycle: nothing to send");
            }

            tokio::select! {
                _ = tokio::time::sleep(self.interval) => {}
                _ = cancel_token.cancelled() => break,
            }
        }
        log_info!("outbox worker shutting down");
    }
}
