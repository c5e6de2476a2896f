//! Channel dispatch for triggered alerts. Handlers are looked up by channel
//! name; unknown or unwired channels degrade to a log line so an
//! unimplemented channel can never break alerting.

use log::{info, warn};
use tokio::sync::broadcast;

use super::record::AlertRecord;

const PUSH_BUFFER: usize = 64;

pub struct AlertDispatcher {
    push_tx: broadcast::Sender<serde_json::Value>,
}

impl AlertDispatcher {
    pub fn new() -> Self {
        let (push_tx, _) = broadcast::channel(PUSH_BUFFER);
        Self { push_tx }
    }

    /// Subscribes to push-channel alert payloads. Subscribers that fall
    /// behind miss messages rather than blocking dispatch.
    pub fn subscribe(&self) -> broadcast::Receiver<serde_json::Value> {
        self.push_tx.subscribe()
    }

    pub fn dispatch(&self, record: &AlertRecord) {
        for channel in &record.channels {
            match channel.as_str() {
                "log" => log_line(record, "[alert]"),
                "push" | "socket" => self.send_push(record),
                other => log_line(record, &format!("[channel {other} not implemented]")),
            }
        }
    }

    fn send_push(&self, record: &AlertRecord) {
        let payload = record.to_payload();
        if let Err(err) = self.push_tx.send(payload) {
            // No live subscribers; fall back to the log channel.
            warn!("push channel has no subscribers: {err}");
            log_line(record, "[push fallback]");
        }
    }
}

impl Default for AlertDispatcher {
    fn default() -> Self {
        Self::new()
    }
}

fn log_line(record: &AlertRecord, prefix: &str) {
    info!(
        "{prefix} {} - {}",
        record.triggered_at.format("%H:%M:%S"),
        record.message
    );
}
