//! Clock synchronization. The pipeline stamps everything through a
//! [`SyncedClock`], which tracks an offset against an external time source
//! and falls back to the local clock when synchronization fails.

use std::net::UdpSocket;
use std::sync::{Arc, Mutex};
use std::time::Duration as StdDuration;

use anyhow::{bail, Context, Result};
use chrono::{DateTime, Duration, TimeZone, Utc};
use log::{info, warn};
use tokio_util::sync::CancellationToken;

use crate::config::TimeSyncConfig;

/// Seconds between the NTP epoch (1900) and the Unix epoch (1970).
const NTP_UNIX_OFFSET: u64 = 2_208_988_800;

pub trait TimeSource: Send + Sync {
    fn name(&self) -> &str;
    fn fetch(&self) -> Result<DateTime<Utc>>;
}

/// Single-packet SNTP client over a blocking UDP socket with a hard read
/// timeout. One query per sync is enough at the accuracy the alert
/// thresholds need.
pub struct SntpTimeSource {
    server: String,
    timeout: StdDuration,
}

impl SntpTimeSource {
    pub fn new(config: &TimeSyncConfig) -> Self {
        Self {
            server: config.server.clone(),
            timeout: StdDuration::from_secs(config.timeout_secs.max(1)),
        }
    }
}

impl TimeSource for SntpTimeSource {
    fn name(&self) -> &str {
        "sntp"
    }

    fn fetch(&self) -> Result<DateTime<Utc>> {
        let socket = UdpSocket::bind("0.0.0.0:0").context("failed to bind UDP socket")?;
        socket
            .set_read_timeout(Some(self.timeout))
            .context("failed to set socket timeout")?;

        // LI = 0, VN = 3, mode = 3 (client).
        let mut request = [0u8; 48];
        request[0] = 0x1B;
        socket
            .send_to(&request, &self.server)
            .with_context(|| format!("failed to send SNTP request to {}", self.server))?;

        let mut reply = [0u8; 48];
        let received = socket
            .recv(&mut reply)
            .with_context(|| format!("no SNTP reply from {}", self.server))?;
        if received < 48 {
            bail!("short SNTP reply ({received} bytes) from {}", self.server);
        }

        parse_transmit_timestamp(&reply)
    }
}

/// Extracts the transmit timestamp (bytes 40..48) from an SNTP reply.
fn parse_transmit_timestamp(reply: &[u8; 48]) -> Result<DateTime<Utc>> {
    let seconds = u32::from_be_bytes([reply[40], reply[41], reply[42], reply[43]]) as u64;
    let fraction = u32::from_be_bytes([reply[44], reply[45], reply[46], reply[47]]) as u64;
    if seconds < NTP_UNIX_OFFSET {
        bail!("SNTP transmit timestamp predates the Unix epoch");
    }

    let unix_seconds = (seconds - NTP_UNIX_OFFSET) as i64;
    let millis = (fraction * 1000) >> 32;
    Utc.timestamp_opt(unix_seconds, (millis as u32) * 1_000_000)
        .single()
        .context("SNTP timestamp out of range")
}

struct ClockState {
    offset: Duration,
    source: String,
    last_sync: Option<DateTime<Utc>>,
}

/// Offset-corrected clock, shared across the pipeline. Never blocks readers
/// on a sync in flight.
pub struct SyncedClock {
    state: Mutex<ClockState>,
}

impl SyncedClock {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(ClockState {
                offset: Duration::zero(),
                source: "local".to_string(),
                last_sync: None,
            }),
        }
    }

    pub fn now(&self) -> DateTime<Utc> {
        let state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        Utc::now() + state.offset
    }

    /// One synchronization attempt. A failure keeps the previous offset and
    /// downgrades the reported source to the local clock.
    pub fn sync_once(&self, source: &dyn TimeSource) -> Result<()> {
        let local_before = Utc::now();
        match source.fetch() {
            Ok(remote) => {
                let offset = remote - local_before;
                let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
                state.offset = offset;
                state.source = source.name().to_string();
                state.last_sync = Some(Utc::now());
                info!(
                    "clock synced against {} (offset {} ms)",
                    source.name(),
                    offset.num_milliseconds()
                );
                Ok(())
            }
            Err(err) => {
                let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
                state.source = "local".to_string();
                Err(err)
            }
        }
    }

    pub fn report(&self) -> serde_json::Value {
        let state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        let now = Utc::now() + state.offset;
        serde_json::json!({
            "epoch": now.timestamp_millis() as f64 / 1000.0,
            "iso": now.to_rfc3339(),
            "source": state.source,
            "offset_ms": state.offset.num_milliseconds(),
            "last_sync_epoch": state.last_sync.map(|t| t.timestamp_millis() as f64 / 1000.0),
        })
    }
}

impl Default for SyncedClock {
    fn default() -> Self {
        Self::new()
    }
}

/// Periodic resync task. Failures are logged and retried on the next tick.
pub async fn sync_loop(
    clock: Arc<SyncedClock>,
    source: Arc<dyn TimeSource>,
    config: TimeSyncConfig,
    cancel: CancellationToken,
) {
    let mut interval =
        tokio::time::interval(StdDuration::from_secs(config.interval_secs.max(1)));
    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = interval.tick() => {
                let clock = clock.clone();
                let source = source.clone();
                let result =
                    tokio::task::spawn_blocking(move || clock.sync_once(source.as_ref())).await;
                match result {
                    Ok(Ok(())) => {}
                    Ok(Err(err)) => warn!("time sync failed, staying on local clock: {err:#}"),
                    Err(err) => warn!("time sync task panicked: {err}"),
                }
            }
        }
    }
}
