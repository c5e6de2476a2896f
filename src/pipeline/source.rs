use anyhow::Result;
use chrono::{DateTime, Utc};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::detect::{Detection, FrameObservation, KeypointSet, PoseDetection};
use crate::geometry::BoundingBox;

/// Boundary to the upstream object and pose models. One call per pipeline
/// tick, returning everything detected in the current frame.
pub trait FrameSource: Send {
    fn next_frame(&mut self, captured_at: DateTime<Utc>) -> Result<FrameObservation>;
}

/// Stand-in source that renders a fixed desk scene with a jittered seated
/// person. Used when no camera stack is wired in, and for soak-testing the
/// pipeline.
pub struct SyntheticFrameSource {
    rng: StdRng,
    /// Chance per frame that the person is at the desk.
    presence_probability: f64,
}

impl SyntheticFrameSource {
    pub fn new(presence_probability: f64) -> Self {
        Self {
            rng: StdRng::from_entropy(),
            presence_probability: presence_probability.clamp(0.0, 1.0),
        }
    }

    pub fn with_seed(presence_probability: f64, seed: u64) -> Self {
        Self {
            rng: StdRng::seed_from_u64(seed),
            presence_probability: presence_probability.clamp(0.0, 1.0),
        }
    }

    fn jitter(&mut self) -> f64 {
        self.rng.gen_range(-4.0..4.0)
    }
}

impl FrameSource for SyntheticFrameSource {
    fn next_frame(&mut self, captured_at: DateTime<Utc>) -> Result<FrameObservation> {
        let mut observation = FrameObservation::empty(captured_at);

        observation.chairs.push(Detection::new(
            BoundingBox::new(120.0, 220.0, 280.0, 430.0),
            0.85,
            "chair",
        ));
        observation.desks.push(Detection::new(
            BoundingBox::new(60.0, 260.0, 440.0, 440.0),
            0.80,
            "desk",
        ));
        observation.monitors.push(Detection::new(
            BoundingBox::new(180.0, 80.0, 340.0, 250.0),
            0.90,
            "monitor",
        ));

        if self.rng.gen::<f64>() >= self.presence_probability {
            return Ok(observation);
        }

        let dx = self.jitter();
        let dy = self.jitter();
        let person = BoundingBox::new(130.0 + dx, 140.0 + dy, 270.0 + dx, 420.0 + dy);
        observation
            .persons
            .push(Detection::new(person, 0.92, "person"));

        let (cx, cy) = (200.0 + dx, 170.0 + dy);
        observation.poses.push(PoseDetection {
            bbox: person,
            confidence: 0.88,
            keypoints: KeypointSet {
                nose: Some((cx, cy)),
                left_eye: Some((cx - 14.0, cy - 10.0)),
                right_eye: Some((cx + 14.0, cy - 10.0)),
                left_ear: Some((cx - 30.0, cy - 4.0)),
                right_ear: Some((cx + 30.0, cy - 4.0)),
                left_shoulder: Some((cx - 45.0, cy + 60.0)),
                right_shoulder: Some((cx + 45.0, cy + 60.0)),
                neck: None,
            },
        });

        Ok(observation)
    }
}
