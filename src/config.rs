use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Thresholds for the multi-condition duty classifier.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DetectionConfig {
    /// Minimum person/chair IoU for the chair-overlap condition.
    pub chair_iou_threshold: f64,
    /// Minimum person/desk IoU for the desk-overlap condition.
    pub desk_iou_threshold: f64,
    /// Maximum centroid distance (px) for the monitor-proximity condition.
    pub monitor_distance_threshold: f64,
    /// Pixels the head must sit above the chair top.
    pub head_above_margin: f64,
    pub head_pose_pitch_range: (f64, f64),
    pub head_pose_yaw_range: (f64, f64),
    /// Minimum IoU to associate a pose detection with a person box.
    pub pose_association_iou: f64,
}

impl Default for DetectionConfig {
    fn default() -> Self {
        Self {
            chair_iou_threshold: 0.2,
            desk_iou_threshold: 0.1,
            monitor_distance_threshold: 200.0,
            head_above_margin: 15.0,
            head_pose_pitch_range: (-25.0, 25.0),
            head_pose_yaw_range: (-30.0, 30.0),
            pose_association_iou: 0.3,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SmoothingConfig {
    pub window_size: usize,
    /// Fraction of recent frames that must be on-duty.
    pub ratio_threshold: f64,
}

impl Default for SmoothingConfig {
    fn default() -> Self {
        Self {
            window_size: 10,
            ratio_threshold: 0.6,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BehaviorConfig {
    pub enabled: bool,
    pub sequence_length: usize,
    /// Blend weight for the sequence predictor's probability, in [0, 1].
    pub fusion_weight: f64,
    pub fusion_threshold: f64,
}

impl Default for BehaviorConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            sequence_length: 30,
            fusion_weight: 0.4,
            fusion_threshold: 0.5,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AlertConfig {
    /// Seconds off-duty before the first alert fires.
    pub off_duty_threshold_secs: f64,
    /// Minimum spacing between alerts for the same identity.
    pub cooldown_secs: f64,
    /// Seconds an unseen identity's state is retained before eviction.
    pub person_grace_secs: f64,
    pub channels: Vec<String>,
}

impl Default for AlertConfig {
    fn default() -> Self {
        Self {
            off_duty_threshold_secs: 30.0,
            cooldown_secs: 5.0,
            person_grace_secs: 30.0,
            channels: vec!["log".to_string()],
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkHoursConfig {
    /// Days of week that count toward on/off-duty totals, 0 = Monday.
    pub days: Vec<u8>,
    /// "HH:MM"; a range with start == end covers the whole day, and
    /// start > end wraps past midnight.
    pub start: String,
    pub end: String,
}

impl Default for WorkHoursConfig {
    fn default() -> Self {
        Self {
            days: vec![0, 1, 2, 3, 4],
            start: "09:00".to_string(),
            end: "22:00".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StatsConfig {
    /// Seconds between persisted snapshots.
    pub persist_interval_secs: u64,
    /// Continuous on-duty seconds before the overwork warning; <= 0 disables.
    pub continuous_warning_secs: f64,
    /// Human-readable append-only export of the snapshots.
    pub export_path: PathBuf,
}

impl Default for StatsConfig {
    fn default() -> Self {
        Self {
            persist_interval_secs: 60,
            continuous_warning_secs: 3600.0,
            export_path: PathBuf::from("data/stats_export.csv"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TimeSyncConfig {
    pub enabled: bool,
    pub server: String,
    pub interval_secs: u64,
    /// Bound on the network call; a slow server must never stall the loop.
    pub timeout_secs: u64,
}

impl Default for TimeSyncConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            server: "pool.ntp.org:123".to_string(),
            interval_secs: 900,
            timeout_secs: 3,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Milliseconds between processed frames.
    pub frame_interval_ms: u64,
    /// Idle sleep while paused, polled once per iteration.
    pub pause_poll_ms: u64,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            frame_interval_ms: 200,
            pause_poll_ms: 500,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct AppConfig {
    pub detection: DetectionConfig,
    pub smoothing: SmoothingConfig,
    pub behavior: BehaviorConfig,
    pub alerts: AlertConfig,
    pub work_hours: WorkHoursConfig,
    pub stats: StatsConfig,
    pub time_sync: TimeSyncConfig,
    pub pipeline: PipelineConfig,
    pub db_path: Option<PathBuf>,
}

impl AppConfig {
    /// Loads config from a JSON file, falling back to defaults when the file
    /// does not exist. A present-but-malformed file is an error rather than a
    /// silent fallback.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config from {}", path.display()))?;
        let config: Self = serde_json::from_str(&contents)
            .with_context(|| format!("invalid config file {}", path.display()))?;
        Ok(config)
    }

    pub fn database_path(&self) -> PathBuf {
        if let Ok(path) = std::env::var("DUTYWATCH_DB") {
            return PathBuf::from(path);
        }
        self.db_path
            .clone()
            .unwrap_or_else(|| PathBuf::from("data/dutywatch.sqlite3"))
    }

    /// Startup validation. Misconfigured thresholds are the only fatal
    /// condition in the system.
    pub fn validate(&self) -> Result<()> {
        if !(0.0..=1.0).contains(&self.detection.chair_iou_threshold) {
            bail!("detection.chair_iou_threshold must be in [0, 1]");
        }
        if !(0.0..=1.0).contains(&self.detection.desk_iou_threshold) {
            bail!("detection.desk_iou_threshold must be in [0, 1]");
        }
        if self.detection.monitor_distance_threshold < 0.0 {
            bail!("detection.monitor_distance_threshold must be non-negative");
        }
        if !(0.0..=1.0).contains(&self.detection.pose_association_iou) {
            bail!("detection.pose_association_iou must be in [0, 1]");
        }
        if self.smoothing.window_size == 0 {
            bail!("smoothing.window_size must be at least 1");
        }
        if !(0.0..=1.0).contains(&self.smoothing.ratio_threshold) {
            bail!("smoothing.ratio_threshold must be in [0, 1]");
        }
        if self.behavior.sequence_length == 0 {
            bail!("behavior.sequence_length must be at least 1");
        }
        if !(0.0..=1.0).contains(&self.behavior.fusion_weight) {
            bail!("behavior.fusion_weight must be in [0, 1]");
        }
        if self.alerts.off_duty_threshold_secs < 0.0 || self.alerts.cooldown_secs < 0.0 {
            bail!("alert threshold and cooldown must be non-negative");
        }
        if self.alerts.person_grace_secs < 0.0 {
            bail!("alerts.person_grace_secs must be non-negative");
        }
        if self.work_hours.days.iter().any(|d| *d > 6) {
            bail!("work_hours.days entries must be in 0..=6 (0 = Monday)");
        }
        if self.pipeline.frame_interval_ms == 0 {
            bail!("pipeline.frame_interval_ms must be at least 1");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_validate() {
        AppConfig::default().validate().expect("defaults are valid");
    }

    #[test]
    fn partial_json_uses_defaults_for_the_rest() {
        let config: AppConfig = serde_json::from_str(
            r#"{"alerts": {"off_duty_threshold_secs": 60.0}, "smoothing": {"window_size": 5}}"#,
        )
        .unwrap();
        assert_eq!(config.alerts.off_duty_threshold_secs, 60.0);
        assert_eq!(config.alerts.cooldown_secs, 5.0);
        assert_eq!(config.smoothing.window_size, 5);
        assert_eq!(config.detection.chair_iou_threshold, 0.2);
    }

    #[test]
    fn out_of_range_threshold_is_rejected() {
        let mut config = AppConfig::default();
        config.smoothing.ratio_threshold = 1.5;
        assert!(config.validate().is_err());

        let mut config = AppConfig::default();
        config.work_hours.days = vec![0, 7];
        assert!(config.validate().is_err());
    }
}
