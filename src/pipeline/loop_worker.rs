use std::sync::Arc;

use anyhow::{Context, Result};
use tokio::time::{Duration, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use crate::alerts::{AlertDispatcher, AlertEngine};
use crate::behavior::{extract_features, BehaviorFuser, LinearPredictor, SequencePredictor};
use crate::config::{AppConfig, StatsConfig};
use crate::detect::{DutyClassifier, StatusWindow};
use crate::state::SharedState;
use crate::stats::StatsExporter;

use super::source::FrameSource;

// Set to true to enable verbose logging in this module
const ENABLE_LOGS: bool = true;

use crate::{log_error, log_info, log_warn};

pub async fn duty_loop(
    mut source: Box<dyn FrameSource>,
    config: AppConfig,
    state: Arc<SharedState>,
    dispatcher: Arc<AlertDispatcher>,
    cancel_token: CancellationToken,
) {
    let classifier = DutyClassifier::new(config.detection.clone());
    let mut smoother = StatusWindow::new(config.smoothing.window_size, config.smoothing.ratio_threshold);
    let predictor: Option<Box<dyn SequencePredictor>> = if config.behavior.enabled {
        Some(Box::new(LinearPredictor::new()))
    } else {
        None
    };
    let mut fuser = BehaviorFuser::new(config.behavior.clone(), predictor);
    let mut engine = AlertEngine::new(config.alerts.clone());

    let mut ticker = tokio::time::interval(Duration::from_millis(config.pipeline.frame_interval_ms));
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                if state.is_paused() {
                    tokio::time::sleep(Duration::from_millis(config.pipeline.pause_poll_ms)).await;
                    continue;
                }

                if let Err(err) = process_frame(
                    source.as_mut(),
                    &classifier,
                    &mut smoother,
                    &mut fuser,
                    &mut engine,
                    &state,
                    &dispatcher,
                )
                .await
                {
                    log_error!("frame processing failed, skipping frame: {err:?}");
                }
            }
            _ = cancel_token.cancelled() => {
                log_info!("duty loop shutting down");
                break;
            }
        }
    }
}

async fn process_frame(
    source: &mut dyn FrameSource,
    classifier: &DutyClassifier,
    smoother: &mut StatusWindow,
    fuser: &mut BehaviorFuser,
    engine: &mut AlertEngine,
    state: &Arc<SharedState>,
    dispatcher: &Arc<AlertDispatcher>,
) -> Result<()> {
    let now = state.clock.now();
    let observation = source
        .next_frame(now)
        .context("frame source failed")?;

    let frame = classifier.evaluate_frame(&observation);
    let smoothed = smoother.push(frame.on_duty);
    let features = extract_features(&frame, classifier.config());
    let verdict = fuser.observe(features, smoothed);

    state.update_status(&frame, &verdict, now);

    // Alerting follows the raw per-person evaluations; a single alert's
    // persistence failure must not stop its delivery.
    for mut alert in engine.process_frame(&frame, now) {
        match state.db.insert_alert(&alert).await {
            Ok(id) => alert.id = Some(id),
            Err(err) => log_warn!("failed to persist alert for {}: {err:?}", alert.person_id),
        }
        dispatcher.dispatch(&alert);
    }

    let warned = {
        let mut stats = state.stats.lock().unwrap_or_else(|e| e.into_inner());
        stats.update(verdict.on_duty, frame.on_duty, now)
    };
    if warned {
        log_warn!("continuous on-duty time crossed the overwork warning threshold");
    }

    Ok(())
}

/// Persists and exports a stats snapshot on a fixed interval. Both sinks are
/// best effort.
pub async fn stats_persist_loop(
    state: Arc<SharedState>,
    config: StatsConfig,
    cancel_token: CancellationToken,
) {
    let interval_secs = config.persist_interval_secs.max(1);
    let exporter = StatsExporter::new(&config.export_path);

    let mut ticker = tokio::time::interval(Duration::from_secs(interval_secs));
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                let now = state.clock.now();
                let snapshot = {
                    let stats = state.stats.lock().unwrap_or_else(|e| e.into_inner());
                    stats.snapshot(now)
                };

                if let Err(err) = state.db.insert_stats_snapshot(&snapshot).await {
                    log_warn!("failed to persist stats snapshot: {err:?}");
                }
                if let Err(err) = exporter.append(&snapshot) {
                    log_warn!("failed to export stats snapshot: {err:?}");
                }
            }
            _ = cancel_token.cancelled() => {
                log_info!("stats persister shutting down");
                break;
            }
        }
    }
}
