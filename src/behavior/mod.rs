//! Behavior-sequence fusion: per-frame feature extraction, a bounded
//! sequence buffer, and weighted blending of the black-box sequence
//! predictor's probability with the smoothed heuristic verdict.

use std::collections::VecDeque;

use anyhow::Result;
use log::warn;
use serde::{Deserialize, Serialize};

use crate::config::{BehaviorConfig, DetectionConfig};
use crate::detect::FrameStatus;

/// Number of per-frame features fed to the sequence predictor.
pub const FEATURE_SIZE: usize = 11;

pub type FeatureVector = [f64; FEATURE_SIZE];

/// Black-box predictor of an on-duty probability for a fixed-length feature
/// sequence. The model architecture is out of scope; only this contract is.
pub trait SequencePredictor: Send {
    fn predict(&self, sequence: &[FeatureVector]) -> Result<f64>;
}

/// Stand-in predictor used until a trained sequence model is wired in:
/// a logistic squash of the mean feature activation. High activations
/// (seated, overlapping, facing forward) map above 0.5.
pub struct LinearPredictor {
    steepness: f64,
}

impl LinearPredictor {
    pub fn new() -> Self {
        Self { steepness: 8.0 }
    }
}

impl Default for LinearPredictor {
    fn default() -> Self {
        Self::new()
    }
}

impl SequencePredictor for LinearPredictor {
    fn predict(&self, sequence: &[FeatureVector]) -> Result<f64> {
        let count = (sequence.len() * FEATURE_SIZE) as f64;
        if count == 0.0 {
            return Ok(0.5);
        }
        let mean: f64 = sequence.iter().flatten().sum::<f64>() / count;
        Ok(1.0 / (1.0 + (-self.steepness * (mean - 0.5)).exp()))
    }
}

/// Summarizes one frame into the fixed-length feature vector.
pub fn extract_features(frame: &FrameStatus, config: &DetectionConfig) -> FeatureVector {
    let count = frame.persons.len();
    if count == 0 {
        let mut features = [0.0; FEATURE_SIZE];
        features[5] = 0.5;
        features[6] = 0.5;
        return features;
    }

    let n = count as f64;
    let on_duty_ratio = frame.persons.iter().filter(|p| p.on_duty).count() as f64 / n;
    let avg_chair_iou = frame.persons.iter().map(|p| p.metrics.chair_iou).sum::<f64>() / n;
    let avg_desk_iou = frame.persons.iter().map(|p| p.metrics.desk_iou).sum::<f64>() / n;

    // 1 at the monitor, decaying to 0 at the proximity threshold.
    let monitor_score = frame
        .persons
        .iter()
        .map(|p| match p.metrics.monitor_distance {
            Some(d) => 1.0 - (d / config.monitor_distance_threshold.max(1.0)).min(1.0),
            None => 0.0,
        })
        .sum::<f64>()
        / n;

    let poses: Vec<_> = frame.persons.iter().filter_map(|p| p.head_pose).collect();
    let (pitch, yaw) = if poses.is_empty() {
        (0.5, 0.5)
    } else {
        let pn = poses.len() as f64;
        (
            poses
                .iter()
                .map(|p| normalize_angle(p.pitch, config.head_pose_pitch_range))
                .sum::<f64>()
                / pn,
            poses
                .iter()
                .map(|p| normalize_angle(p.yaw, config.head_pose_yaw_range))
                .sum::<f64>()
                / pn,
        )
    };

    let pose_ok_ratio =
        frame.persons.iter().filter(|p| p.conditions.head_pose_ok).count() as f64 / n;
    let chair_present = frame.persons.iter().any(|p| p.metrics.chair_iou > 0.0);
    let monitor_present = frame
        .persons
        .iter()
        .any(|p| p.metrics.monitor_distance.is_some());

    [
        (n / 4.0).min(1.0),
        on_duty_ratio,
        avg_chair_iou,
        avg_desk_iou,
        monitor_score,
        pitch,
        yaw,
        pose_ok_ratio,
        if frame.on_duty { 1.0 } else { 0.0 },
        if chair_present { 1.0 } else { 0.0 },
        if monitor_present { 1.0 } else { 0.0 },
    ]
}

fn normalize_angle(value: f64, (lo, hi): (f64, f64)) -> f64 {
    if hi <= lo {
        return 0.5;
    }
    ((value - lo) / (hi - lo)).clamp(0.0, 1.0)
}

/// The fused per-frame decision. `probability` and `score` are present only
/// when the predictor actually ran.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct FusedVerdict {
    pub on_duty: bool,
    pub probability: Option<f64>,
    pub score: Option<f64>,
}

impl FusedVerdict {
    fn heuristic_only(smoothed: bool) -> Self {
        Self {
            on_duty: smoothed,
            probability: None,
            score: None,
        }
    }
}

/// Accumulates a fixed-length window of feature vectors and blends the
/// predictor's probability with the smoothed heuristic. Fusion never reduces
/// availability: disabled, warming up, or failing predictors all fall back
/// to the heuristic verdict unmodified.
pub struct BehaviorFuser {
    config: BehaviorConfig,
    buffer: VecDeque<FeatureVector>,
    predictor: Option<Box<dyn SequencePredictor>>,
}

impl BehaviorFuser {
    pub fn new(config: BehaviorConfig, predictor: Option<Box<dyn SequencePredictor>>) -> Self {
        let capacity = config.sequence_length.max(1);
        Self {
            config,
            buffer: VecDeque::with_capacity(capacity),
            predictor,
        }
    }

    pub fn is_ready(&self) -> bool {
        self.buffer.len() >= self.config.sequence_length.max(1)
    }

    /// Records this frame's features and returns the fused verdict given the
    /// temporal smoother's output.
    pub fn observe(&mut self, features: FeatureVector, smoothed: bool) -> FusedVerdict {
        let capacity = self.config.sequence_length.max(1);
        if self.buffer.len() == capacity {
            self.buffer.pop_front();
        }
        self.buffer.push_back(features);

        if !self.config.enabled {
            return FusedVerdict::heuristic_only(smoothed);
        }
        let Some(predictor) = self.predictor.as_ref() else {
            return FusedVerdict::heuristic_only(smoothed);
        };
        if !self.is_ready() {
            return FusedVerdict::heuristic_only(smoothed);
        }

        let sequence: Vec<FeatureVector> = self.buffer.iter().copied().collect();
        match predictor.predict(&sequence) {
            Ok(probability) => {
                let heuristic = if smoothed { 1.0 } else { 0.0 };
                let w = self.config.fusion_weight.clamp(0.0, 1.0);
                let score = (1.0 - w) * heuristic + w * probability;
                FusedVerdict {
                    on_duty: score >= self.config.fusion_threshold,
                    probability: Some(probability),
                    score: Some(score),
                }
            }
            Err(err) => {
                warn!("sequence predictor failed, using heuristic only: {err:#}");
                FusedVerdict::heuristic_only(smoothed)
            }
        }
    }

    pub fn reset(&mut self) {
        self.buffer.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::anyhow;

    struct FixedPredictor(f64);

    impl SequencePredictor for FixedPredictor {
        fn predict(&self, _sequence: &[FeatureVector]) -> Result<f64> {
            Ok(self.0)
        }
    }

    struct FailingPredictor;

    impl SequencePredictor for FailingPredictor {
        fn predict(&self, _sequence: &[FeatureVector]) -> Result<f64> {
            Err(anyhow!("model unavailable"))
        }
    }

    fn config(enabled: bool, weight: f64, sequence_length: usize) -> BehaviorConfig {
        BehaviorConfig {
            enabled,
            sequence_length,
            fusion_weight: weight,
            fusion_threshold: 0.5,
        }
    }

    fn fill(fuser: &mut BehaviorFuser, frames: usize, smoothed: bool) -> FusedVerdict {
        let mut last = FusedVerdict::heuristic_only(smoothed);
        for _ in 0..frames {
            last = fuser.observe([0.5; FEATURE_SIZE], smoothed);
        }
        last
    }

    #[test]
    fn weight_zero_matches_heuristic_regardless_of_predictor() {
        let mut fuser = BehaviorFuser::new(config(true, 0.0, 4), Some(Box::new(FixedPredictor(1.0))));
        let verdict = fill(&mut fuser, 4, false);
        assert!(!verdict.on_duty);
        assert_eq!(verdict.score, Some(0.0));

        let mut fuser = BehaviorFuser::new(config(true, 0.0, 4), Some(Box::new(FixedPredictor(0.0))));
        let verdict = fill(&mut fuser, 4, true);
        assert!(verdict.on_duty);
    }

    #[test]
    fn weight_one_matches_predictor_threshold() {
        let mut fuser = BehaviorFuser::new(config(true, 1.0, 4), Some(Box::new(FixedPredictor(0.7))));
        let verdict = fill(&mut fuser, 4, false);
        assert!(verdict.on_duty);
        assert_eq!(verdict.probability, Some(0.7));

        let mut fuser = BehaviorFuser::new(config(true, 1.0, 4), Some(Box::new(FixedPredictor(0.3))));
        let verdict = fill(&mut fuser, 4, true);
        assert!(!verdict.on_duty);
    }

    #[test]
    fn falls_back_until_buffer_is_full() {
        let mut fuser = BehaviorFuser::new(config(true, 1.0, 5), Some(Box::new(FixedPredictor(1.0))));
        let verdict = fill(&mut fuser, 4, false);
        assert!(!verdict.on_duty, "warm-up must use the heuristic");
        assert!(verdict.probability.is_none());

        let verdict = fuser.observe([0.5; FEATURE_SIZE], false);
        assert!(verdict.on_duty, "full buffer engages the predictor");
    }

    #[test]
    fn predictor_failure_degrades_to_heuristic() {
        let mut fuser = BehaviorFuser::new(config(true, 1.0, 2), Some(Box::new(FailingPredictor)));
        let verdict = fill(&mut fuser, 3, true);
        assert!(verdict.on_duty);
        assert!(verdict.probability.is_none());
    }

    #[test]
    fn disabled_fuser_is_passthrough() {
        let mut fuser = BehaviorFuser::new(config(false, 1.0, 2), Some(Box::new(FixedPredictor(0.0))));
        let verdict = fill(&mut fuser, 5, true);
        assert!(verdict.on_duty);
    }

    #[test]
    fn empty_frame_features_are_neutral() {
        let frame = crate::detect::aggregate_frame(Vec::new());
        let features = extract_features(&frame, &DetectionConfig::default());
        assert_eq!(features[0], 0.0);
        assert_eq!(features[5], 0.5);
        assert_eq!(features[8], 0.0);
    }

    #[test]
    fn linear_predictor_orders_sequences() {
        let predictor = LinearPredictor::new();
        let high = predictor.predict(&[[0.9; FEATURE_SIZE]; 4]).unwrap();
        let low = predictor.predict(&[[0.1; FEATURE_SIZE]; 4]).unwrap();
        assert!(high > 0.5);
        assert!(low < 0.5);
    }
}
