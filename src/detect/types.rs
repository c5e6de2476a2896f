use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::geometry::{BoundingBox, HeadPose};

/// One detection from the upstream object model. Ephemeral; discarded once
/// the frame's derived state has been computed.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Detection {
    pub bbox: BoundingBox,
    pub confidence: f64,
    pub class_name: String,
}

impl Detection {
    pub fn new(bbox: BoundingBox, confidence: f64, class_name: impl Into<String>) -> Self {
        Self {
            bbox,
            confidence,
            class_name: class_name.into(),
        }
    }
}

/// Named facial/upper-body landmarks from the pose model. Missing joints
/// stay `None`; the derived neck falls back to the shoulder midpoint.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct KeypointSet {
    pub nose: Option<(f64, f64)>,
    pub left_eye: Option<(f64, f64)>,
    pub right_eye: Option<(f64, f64)>,
    pub left_ear: Option<(f64, f64)>,
    pub right_ear: Option<(f64, f64)>,
    pub left_shoulder: Option<(f64, f64)>,
    pub right_shoulder: Option<(f64, f64)>,
    pub neck: Option<(f64, f64)>,
}

impl KeypointSet {
    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }

    /// The neck joint, or the shoulder midpoint when the pose model did not
    /// emit one.
    pub fn neck_or_midpoint(&self) -> Option<(f64, f64)> {
        if self.neck.is_some() {
            return self.neck;
        }
        match (self.left_shoulder, self.right_shoulder) {
            (Some(l), Some(r)) => Some(((l.0 + r.0) / 2.0, (l.1 + r.1) / 2.0)),
            _ => None,
        }
    }

    /// Best available head reference point: the nose, falling back to the
    /// neck estimate.
    pub fn head_point(&self) -> Option<(f64, f64)> {
        self.nose.or_else(|| self.neck_or_midpoint())
    }
}

/// A pose detection paired with the keypoints the model attached to it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PoseDetection {
    pub bbox: BoundingBox,
    pub confidence: f64,
    pub keypoints: KeypointSet,
}

/// Which of the five duty conditions a person satisfied. The overall verdict
/// is always derived from these flags via [`DutyConditions::any`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DutyConditions {
    pub chair_overlap: bool,
    pub head_above_chair: bool,
    pub desk_overlap: bool,
    pub monitor_proximity: bool,
    pub head_pose_ok: bool,
}

impl DutyConditions {
    pub fn any(&self) -> bool {
        self.chair_overlap
            || self.head_above_chair
            || self.desk_overlap
            || self.monitor_proximity
            || self.head_pose_ok
    }
}

/// Numeric inputs behind the condition flags, kept for drawing, feature
/// extraction, and diagnostics.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct DutyMetrics {
    pub chair_iou: f64,
    pub desk_iou: f64,
    pub monitor_distance: Option<f64>,
}

/// Everything the classifier derived for one person in one frame. Built once
/// and consumed by value downstream.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PersonEvaluation {
    pub bbox: BoundingBox,
    pub confidence: f64,
    pub keypoints: KeypointSet,
    pub head_pose: Option<HeadPose>,
    pub conditions: DutyConditions,
    pub on_duty: bool,
    pub metrics: DutyMetrics,
}

/// Frame-level verdict: the status string, the all-persons-on-duty flag,
/// and the ordered per-person breakdown.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FrameStatus {
    pub status: String,
    pub on_duty: bool,
    pub persons: Vec<PersonEvaluation>,
}

/// One frame's worth of upstream detections, the boundary to the
/// out-of-scope object/pose models.
#[derive(Debug, Clone)]
pub struct FrameObservation {
    pub persons: Vec<Detection>,
    pub chairs: Vec<Detection>,
    pub desks: Vec<Detection>,
    pub monitors: Vec<Detection>,
    pub poses: Vec<PoseDetection>,
    pub captured_at: DateTime<Utc>,
}

impl FrameObservation {
    pub fn empty(captured_at: DateTime<Utc>) -> Self {
        Self {
            persons: Vec::new(),
            chairs: Vec::new(),
            desks: Vec::new(),
            monitors: Vec::new(),
            poses: Vec::new(),
            captured_at,
        }
    }
}
