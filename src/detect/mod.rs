mod classifier;
mod smoothing;
mod types;

pub use classifier::{aggregate_frame, DutyClassifier};
pub use smoothing::StatusWindow;
pub use types::{
    Detection, DutyConditions, DutyMetrics, FrameObservation, FrameStatus, KeypointSet,
    PersonEvaluation, PoseDetection,
};
