use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};
use log::info;
use tokio_util::sync::CancellationToken;

use dutywatch::alerts::AlertDispatcher;
use dutywatch::config::AppConfig;
use dutywatch::db::Database;
use dutywatch::pipeline::{PipelineController, SyntheticFrameSource};
use dutywatch::state::SharedState;
use dutywatch::stats::{DutyStats, WorkHours};
use dutywatch::timesync::{self, SntpTimeSource, SyncedClock};

const CONFIG_PATH: &str = "dutywatch.json";

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging (reads RUST_LOG env var)
    env_logger::Builder::from_default_env()
        .filter_level(log::LevelFilter::Info)
        .init();

    let run_id = uuid::Uuid::new_v4();
    info!("DutyWatch starting up (run {run_id})...");

    let config = AppConfig::load(Path::new(CONFIG_PATH))
        .with_context(|| format!("failed to load {CONFIG_PATH}"))?;
    config.validate().context("invalid configuration")?;

    let database = Database::new(config.database_path())?;
    let clock = Arc::new(SyncedClock::new());
    let work_hours = WorkHours::new(&config.work_hours)?;
    let stats = DutyStats::new(work_hours, &config.stats);
    let state = Arc::new(SharedState::new(stats, clock.clone(), database));
    let dispatcher = Arc::new(AlertDispatcher::new());

    let shutdown = CancellationToken::new();

    if config.time_sync.enabled {
        let source = Arc::new(SntpTimeSource::new(&config.time_sync));
        tokio::spawn(timesync::sync_loop(
            clock,
            source,
            config.time_sync.clone(),
            shutdown.clone(),
        ));
    }

    let mut pipeline = PipelineController::new();
    pipeline.start(
        Box::new(SyntheticFrameSource::new(0.9)),
        config,
        state,
        dispatcher,
    )?;

    tokio::signal::ctrl_c()
        .await
        .context("failed to listen for shutdown signal")?;
    info!("Shutdown requested");

    shutdown.cancel();
    pipeline.stop().await?;
    info!("DutyWatch stopped");
    Ok(())
}
