use anyhow::{bail, Context, Result};
use log::info;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::alerts::AlertDispatcher;
use crate::config::AppConfig;
use crate::state::SharedState;

use super::loop_worker::{duty_loop, stats_persist_loop};
use super::source::FrameSource;

/// Owns the duty loop and stats persister tasks. Start is rejected while a
/// previous run is still active; stop cancels and joins both tasks.
pub struct PipelineController {
    handles: Vec<JoinHandle<()>>,
    cancel_token: Option<CancellationToken>,
}

impl PipelineController {
    pub fn new() -> Self {
        Self {
            handles: Vec::new(),
            cancel_token: None,
        }
    }

    pub fn start(
        &mut self,
        source: Box<dyn FrameSource>,
        config: AppConfig,
        state: Arc<SharedState>,
        dispatcher: Arc<AlertDispatcher>,
    ) -> Result<()> {
        if !self.handles.is_empty() {
            bail!("pipeline already active");
        }

        let cancel_token = CancellationToken::new();

        self.handles.push(tokio::spawn(duty_loop(
            source,
            config.clone(),
            state.clone(),
            dispatcher,
            cancel_token.clone(),
        )));
        self.handles.push(tokio::spawn(stats_persist_loop(
            state,
            config.stats,
            cancel_token.clone(),
        )));

        self.cancel_token = Some(cancel_token);
        info!("Pipeline started");
        Ok(())
    }

    pub fn is_running(&self) -> bool {
        !self.handles.is_empty()
    }

    pub async fn stop(&mut self) -> Result<()> {
        if let Some(token) = self.cancel_token.take() {
            token.cancel();
        }

        for handle in self.handles.drain(..) {
            handle.await.context("pipeline task failed to join")?;
        }
        info!("Pipeline stopped");
        Ok(())
    }
}

impl Default for PipelineController {
    fn default() -> Self {
        Self::new()
    }
}
