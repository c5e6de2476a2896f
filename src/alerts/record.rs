use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A structured alert, shared between the database and the push channels.
/// Immutable once persisted, except for `status` transitions applied through
/// the store.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AlertRecord {
    /// Auto-assigned by the store on insert.
    pub id: Option<i64>,
    pub person_id: String,
    pub person_label: String,
    pub alert_type: String,
    pub message: String,
    pub duration_seconds: f64,
    pub triggered_at: DateTime<Utc>,
    pub channels: Vec<String>,
    pub status: String,
}

pub const ALERT_TYPE_OFF_DUTY: &str = "off_duty";
pub const ALERT_STATUS_NEW: &str = "new";

impl AlertRecord {
    /// Payload form consumed by push subscribers and the web layer, with the
    /// duration rounded to one decimal.
    pub fn to_payload(&self) -> serde_json::Value {
        serde_json::json!({
            "id": self.id,
            "person_id": self.person_id,
            "person_label": self.person_label,
            "alert_type": self.alert_type,
            "message": self.message,
            "duration_seconds": (self.duration_seconds * 10.0).round() / 10.0,
            "triggered_at": self.triggered_at.timestamp_millis() as f64 / 1000.0,
            "channels": self.channels,
            "status": self.status,
        })
    }
}
