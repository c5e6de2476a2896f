//! State shared between the pipeline and the report surfaces. The pipeline
//! is the sole writer of the latest frame verdict; readers copy it out under
//! a short-lived lock.

use std::sync::{Arc, Mutex};

use anyhow::{anyhow, Result};
use chrono::{DateTime, Utc};

use crate::behavior::FusedVerdict;
use crate::db::Database;
use crate::detect::FrameStatus;
use crate::stats::DutyStats;
use crate::timesync::SyncedClock;

const DEFAULT_HISTORY_LIMIT: usize = 200;
const MAX_HISTORY_LIMIT: usize = 1000;

#[derive(Debug, Clone)]
struct LatestStatus {
    status: String,
    on_duty: bool,
    person_count: usize,
    probability: Option<f64>,
    score: Option<f64>,
    updated_at: Option<DateTime<Utc>>,
}

impl LatestStatus {
    fn initial() -> Self {
        Self {
            status: "starting".to_string(),
            on_duty: false,
            person_count: 0,
            probability: None,
            score: None,
            updated_at: None,
        }
    }
}

/// Time-bounded history request. Bounds accept epoch seconds or RFC 3339.
#[derive(Debug, Clone, Default)]
pub struct HistoryQuery {
    pub start: Option<String>,
    pub end: Option<String>,
    pub limit: Option<usize>,
}

pub struct SharedState {
    latest: Mutex<LatestStatus>,
    paused: Mutex<bool>,
    pub stats: Mutex<DutyStats>,
    pub clock: Arc<SyncedClock>,
    pub db: Database,
}

impl SharedState {
    pub fn new(stats: DutyStats, clock: Arc<SyncedClock>, db: Database) -> Self {
        Self {
            latest: Mutex::new(LatestStatus::initial()),
            paused: Mutex::new(false),
            stats: Mutex::new(stats),
            clock,
            db,
        }
    }

    pub fn update_status(&self, frame: &FrameStatus, verdict: &FusedVerdict, now: DateTime<Utc>) {
        let mut latest = self.latest.lock().unwrap_or_else(|e| e.into_inner());
        *latest = LatestStatus {
            status: frame.status.clone(),
            on_duty: verdict.on_duty,
            person_count: frame.persons.len(),
            probability: verdict.probability,
            score: verdict.score,
            updated_at: Some(now),
        };
    }

    pub fn status_report(&self) -> serde_json::Value {
        let latest = self
            .latest
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone();
        let paused = self.is_paused();
        let now = self.clock.now();
        let (snapshot, warning_active, warning_threshold) = {
            let stats = self.stats.lock().unwrap_or_else(|e| e.into_inner());
            (
                stats.snapshot(now),
                stats.warning_active(),
                stats.warning_threshold_secs(),
            )
        };

        serde_json::json!({
            "status": if paused { "paused".to_string() } else { latest.status },
            "on_duty": latest.on_duty,
            "person_count": latest.person_count,
            "probability": latest.probability,
            "score": latest.score,
            "updated_at": latest.updated_at.map(|t| t.timestamp_millis() as f64 / 1000.0),
            "paused": paused,
            "on_duty_seconds": snapshot.on_duty_seconds,
            "off_duty_seconds": snapshot.off_duty_seconds,
            "total_seconds": snapshot.total_seconds,
            "continuous_warning": {
                "active": warning_active,
                "threshold_seconds": warning_threshold,
                "continuous_seconds": snapshot.continuous_on_duty_seconds,
            },
            "work_hours_active": snapshot.within_work_hours,
            "server_time": self.clock.report(),
        })
    }

    pub async fn analytics_report(&self) -> Result<serde_json::Value> {
        let now = self.clock.now();
        let snapshot = {
            let stats = self.stats.lock().unwrap_or_else(|e| e.into_inner());
            stats.snapshot(now)
        };
        let alerts_last_hour = self
            .db
            .count_alerts_since(now - chrono::Duration::hours(1))
            .await?;

        Ok(serde_json::json!({
            "on_duty_seconds": snapshot.on_duty_seconds,
            "off_duty_seconds": snapshot.off_duty_seconds,
            "total_seconds": snapshot.total_seconds,
            "continuous_on_duty_seconds": snapshot.continuous_on_duty_seconds,
            "within_work_hours": snapshot.within_work_hours,
            "alerts_last_hour": alerts_last_hour,
            "server_time": self.clock.report(),
        }))
    }

    /// Persisted snapshot history with a per-range summary.
    pub async fn history(&self, query: &HistoryQuery) -> Result<serde_json::Value> {
        let start = query.start.as_deref().map(parse_time_bound).transpose()?;
        let end = query.end.as_deref().map(parse_time_bound).transpose()?;
        let limit = clamp_limit(query.limit);

        let snapshots = self.db.query_stats_snapshots(start, end, limit).await?;

        let count = snapshots.len();
        let on_duty: f64 = snapshots.iter().map(|s| s.on_duty_seconds).sum();
        let off_duty: f64 = snapshots.iter().map(|s| s.off_duty_seconds).sum();
        let total: f64 = snapshots.iter().map(|s| s.total_seconds).sum();
        let max_continuous = snapshots
            .iter()
            .map(|s| s.continuous_on_duty_seconds)
            .fold(0.0_f64, f64::max);

        Ok(serde_json::json!({
            "snapshots": snapshots,
            "summary": {
                "count": count,
                "on_duty_seconds": on_duty,
                "off_duty_seconds": off_duty,
                "total_seconds": total,
                "max_continuous_on_duty_seconds": max_continuous,
            },
        }))
    }

    pub async fn recent_alerts(&self, limit: usize) -> Result<Vec<serde_json::Value>> {
        let alerts = self.db.list_alerts(clamp_limit(Some(limit))).await?;
        Ok(alerts.iter().map(|a| a.to_payload()).collect())
    }

    /// Returns the resulting paused state.
    pub fn set_paused(&self, paused: bool) -> bool {
        let mut guard = self.paused.lock().unwrap_or_else(|e| e.into_inner());
        *guard = paused;
        paused
    }

    pub fn is_paused(&self) -> bool {
        *self.paused.lock().unwrap_or_else(|e| e.into_inner())
    }
}

fn clamp_limit(limit: Option<usize>) -> usize {
    limit.unwrap_or(DEFAULT_HISTORY_LIMIT).clamp(1, MAX_HISTORY_LIMIT)
}

/// Accepts epoch seconds (possibly fractional) or an RFC 3339 timestamp.
fn parse_time_bound(value: &str) -> Result<DateTime<Utc>> {
    if let Ok(epoch) = value.parse::<f64>() {
        let millis = (epoch * 1000.0) as i64;
        return DateTime::<Utc>::from_timestamp_millis(millis)
            .ok_or_else(|| anyhow!("epoch {value} out of range"));
    }
    DateTime::parse_from_rfc3339(value)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|err| anyhow!("invalid time bound '{value}': {err}"))
}
