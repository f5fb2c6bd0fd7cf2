mod utils;

pub mod buffer;
pub mod clinical;
pub mod db;
pub mod features;
pub mod models;
pub mod monitor;
pub mod notifier;
pub mod outbox;
pub mod scoring;
pub mod settings;
pub mod telemetry;

use std::{path::PathBuf, sync::Arc};

use anyhow::{Context, Result};
use tokio::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;

use buffer::SampleBuffer;
use clinical::ClinicalStore;
use db::Database;
use models::SessionContext;
use monitor::{AnalysisScheduler, MonitorService};
use notifier::{Event, Notifier};
use outbox::{HttpTransport, Outbox, OutboxWorker};
use scoring::{ScoringConfig, ScoringEngine};
use settings::SettingsStore;
use telemetry::IngestionController;

const DATA_DIR_ENV: &str = "CTG_DATA_DIR";
const DEFAULT_DATA_DIR: &str = "ctg-data";

fn data_dir() -> PathBuf {
    std::env::var_os(DATA_DIR_ENV)
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from(DEFAULT_DATA_DIR))
}

pub fn run() {
    // Initialize logging (reads RUST_LOG env var)
    env_logger::Builder::from_default_env()
        .filter_level(log::LevelFilter::Info)
        .init();

    log::info!("CTG guardian starting up...");

    let runtime = match tokio::runtime::Runtime::new() {
        Ok(runtime) => runtime,
        Err(err) => {
            log::error!("failed to start async runtime: {err}");
            std::process::exit(1);
        }
    };

    if let Err(err) = runtime.block_on(serve(data_dir())) {
        log::error!("CTG guardian stopped with error: {err:?}");
        std::process::exit(1);
    }
}

/// Wires every component under `data_dir` and runs until Ctrl-C.
pub async fn serve(data_dir: PathBuf) -> Result<()> {
    std::fs::create_dir_all(&data_dir)
        .with_context(|| format!("failed to create data directory {}", data_dir.display()))?;

    let settings = SettingsStore::new(data_dir.join("guardian.json"))?.snapshot();
    let database = Database::new(data_dir.join("ctg.sqlite3"))?;
    let notifier = Arc::new(Notifier::default());

    let buffer = Arc::new(SampleBuffer::new(
        database.clone(),
        settings.buffer.max_batch,
    ));
    let engine = Arc::new(ScoringEngine::from_model_path(
        ScoringConfig::default(),
        settings.analysis.model_path.as_deref(),
    ));
    let scheduler = AnalysisScheduler::new(
        settings.analysis.clone(),
        buffer.clone(),
        engine,
        database.clone(),
        notifier.clone(),
        Instant::now(),
    );
    let outbox = Arc::new(Outbox::open(
        &data_dir.join("outbox"),
        &settings.outbox,
        notifier.clone(),
    )?);
    let transport = Arc::new(HttpTransport::new(settings.outbox.send_timeout())?);

    let service = Arc::new(MonitorService::new(
        SessionContext::default(),
        buffer.clone(),
        scheduler,
        outbox.clone(),
        Arc::new(ClinicalStore::new()),
        notifier.clone(),
    ));

    let cancel_token = CancellationToken::new();
    let flusher = buffer.clone().spawn_flusher(
        Duration::from_secs(settings.buffer.flush_interval_secs),
        cancel_token.clone(),
    );
    let outbox_worker = OutboxWorker::new(outbox, transport, settings.outbox.retry_interval())
        .spawn(cancel_token.clone());

    let mut ingestion = IngestionController::new();
    ingestion.start_ingestion(settings.device.clone(), service.clone(), notifier.clone())?;
    notifier.publish(Event::system(format!(
        "monitoring session {}",
        service.current_session().session_id
    )));

    tokio::signal::ctrl_c()
        .await
        .context("failed to listen for shutdown signal")?;
    log::info!("shutdown requested");

    ingestion.stop_ingestion().await?;
    cancel_token.cancel();
    if let Err(err) = outbox_worker.await {
        log::error!("outbox worker task failed: {err}");
    }
    if let Err(err) = flusher.await {
        log::error!("sample flusher task failed: {err}");
    }
    buffer.flush().await?;

    log::info!("CTG guardian stopped");
    Ok(())
}
