//! Multi-condition duty classification: pose association, per-person
//! condition evaluation, and frame-level aggregation.

use crate::config::DetectionConfig;
use crate::geometry::{self, BoundingBox, HeadPose};

use super::types::{
    Detection, DutyConditions, DutyMetrics, FrameObservation, FrameStatus, KeypointSet,
    PersonEvaluation, PoseDetection,
};

pub struct DutyClassifier {
    config: DetectionConfig,
}

impl DutyClassifier {
    pub fn new(config: DetectionConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &DetectionConfig {
        &self.config
    }

    /// Evaluates one frame's detections into a [`FrameStatus`].
    pub fn evaluate_frame(&self, observation: &FrameObservation) -> FrameStatus {
        let associated = self.associate_poses(&observation.persons, &observation.poses);

        let persons: Vec<PersonEvaluation> = associated
            .into_iter()
            .map(|(detection, keypoints)| {
                self.evaluate_person(
                    &detection,
                    keypoints,
                    &observation.chairs,
                    &observation.desks,
                    &observation.monitors,
                )
            })
            .collect();

        aggregate_frame(persons)
    }

    /// Matches each person box to at most one pose detection by greatest IoU,
    /// accepted only above the association threshold. When the object model
    /// found no persons at all, pose detections are promoted to synthetic
    /// person records so pose-only frames are not dropped.
    fn associate_poses(
        &self,
        persons: &[Detection],
        poses: &[PoseDetection],
    ) -> Vec<(Detection, KeypointSet)> {
        if persons.is_empty() && !poses.is_empty() {
            return poses
                .iter()
                .map(|pose| {
                    (
                        Detection::new(pose.bbox, pose.confidence, "person"),
                        pose.keypoints.clone(),
                    )
                })
                .collect();
        }

        persons
            .iter()
            .map(|person| {
                let best = poses
                    .iter()
                    .map(|pose| (geometry::iou(&person.bbox, &pose.bbox), pose))
                    .filter(|(score, _)| *score >= self.config.pose_association_iou)
                    .max_by(|a, b| a.0.partial_cmp(&b.0).unwrap_or(std::cmp::Ordering::Equal));

                let keypoints = best
                    .map(|(_, pose)| pose.keypoints.clone())
                    .unwrap_or_default();
                (person.clone(), keypoints)
            })
            .collect()
    }

    /// Evaluates the five duty conditions for one person. The verdict is the
    /// OR of the flags; any single satisfied condition is sufficient, which
    /// deliberately tolerates partial model misses.
    pub fn evaluate_person(
        &self,
        person: &Detection,
        keypoints: KeypointSet,
        chairs: &[Detection],
        desks: &[Detection],
        monitors: &[Detection],
    ) -> PersonEvaluation {
        let (chair_iou, best_chair) = best_overlap(&person.bbox, chairs);
        let (desk_iou, _) = best_overlap(&person.bbox, desks);
        let monitor_distance = nearest_distance(&person.bbox, monitors);

        let head_pose = estimate_pose(&keypoints);

        let head_above_chair = match (keypoints.head_point(), best_chair) {
            (Some((_, head_y)), Some(chair)) => {
                // Smaller y is higher in image coordinates.
                head_y < chair.bbox.y1 - self.config.head_above_margin
            }
            _ => false,
        };

        let head_pose_ok = head_pose
            .map(|pose| {
                in_range(pose.pitch, self.config.head_pose_pitch_range)
                    && in_range(pose.yaw, self.config.head_pose_yaw_range)
            })
            .unwrap_or(false);

        let conditions = DutyConditions {
            chair_overlap: chair_iou >= self.config.chair_iou_threshold && chair_iou > 0.0,
            head_above_chair,
            desk_overlap: desk_iou >= self.config.desk_iou_threshold && desk_iou > 0.0,
            monitor_proximity: monitor_distance
                .map(|d| d <= self.config.monitor_distance_threshold)
                .unwrap_or(false),
            head_pose_ok,
        };

        PersonEvaluation {
            bbox: person.bbox,
            confidence: person.confidence,
            keypoints,
            head_pose,
            on_duty: conditions.any(),
            conditions,
            metrics: DutyMetrics {
                chair_iou,
                desk_iou,
                monitor_distance,
            },
        }
    }
}

/// Combines per-person verdicts into the frame-level status. Zero persons is
/// a distinct non-alerting state, not off-duty.
pub fn aggregate_frame(persons: Vec<PersonEvaluation>) -> FrameStatus {
    let total = persons.len();
    let on_duty_count = persons.iter().filter(|p| p.on_duty).count();

    let (status, on_duty) = if total == 0 {
        ("no person detected".to_string(), false)
    } else if on_duty_count == total {
        (format!("on-duty ({on_duty_count}/{total})"), true)
    } else if on_duty_count > 0 {
        (format!("partially on-duty ({on_duty_count}/{total})"), false)
    } else {
        (format!("off-duty (0/{total})"), false)
    };

    FrameStatus {
        status,
        on_duty,
        persons,
    }
}

/// Best IoU against a detection list, with the winning detection. Empty list
/// yields the "max of empty" default of 0.
fn best_overlap<'a>(bbox: &BoundingBox, candidates: &'a [Detection]) -> (f64, Option<&'a Detection>) {
    let mut best = 0.0;
    let mut winner = None;
    for candidate in candidates {
        let score = geometry::iou(bbox, &candidate.bbox);
        if score > best {
            best = score;
            winner = Some(candidate);
        }
    }
    (best, winner)
}

fn nearest_distance(bbox: &BoundingBox, candidates: &[Detection]) -> Option<f64> {
    candidates
        .iter()
        .map(|c| geometry::centroid_distance(bbox, &c.bbox))
        .min_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal))
}

fn estimate_pose(keypoints: &KeypointSet) -> Option<HeadPose> {
    geometry::estimate_head_pose(
        keypoints.nose,
        keypoints.left_eye,
        keypoints.right_eye,
        keypoints.left_ear,
        keypoints.right_ear,
    )
}

fn in_range(value: f64, (lo, hi): (f64, f64)) -> bool {
    lo <= value && value <= hi
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn bbox(x1: f64, y1: f64, x2: f64, y2: f64) -> BoundingBox {
        BoundingBox::new(x1, y1, x2, y2)
    }

    fn classifier() -> DutyClassifier {
        DutyClassifier::new(DetectionConfig::default())
    }

    fn person_at(b: BoundingBox) -> Detection {
        Detection::new(b, 0.9, "person")
    }

    #[test]
    fn on_duty_is_derived_from_conditions() {
        let classifier = classifier();
        // Chair with IoU 0.25 against the person, nothing else around.
        let person = person_at(bbox(100.0, 100.0, 200.0, 300.0));
        let chair = Detection::new(bbox(100.0, 220.0, 200.0, 340.0), 0.8, "chair");

        let eval = classifier.evaluate_person(
            &person,
            KeypointSet::default(),
            &[chair],
            &[],
            &[],
        );

        assert_eq!(eval.on_duty, eval.conditions.any());
        assert!(eval.conditions.chair_overlap);
        assert!(!eval.conditions.desk_overlap);
        assert!(!eval.conditions.monitor_proximity);
        assert!(eval.on_duty);
    }

    #[test]
    fn absent_furniture_yields_zeroed_metrics_and_off_duty() {
        let classifier = classifier();
        let eval = classifier.evaluate_person(
            &person_at(bbox(0.0, 0.0, 100.0, 200.0)),
            KeypointSet::default(),
            &[],
            &[],
            &[],
        );
        assert_eq!(eval.metrics.chair_iou, 0.0);
        assert_eq!(eval.metrics.desk_iou, 0.0);
        assert!(eval.metrics.monitor_distance.is_none());
        assert!(!eval.on_duty);
    }

    #[test]
    fn monitor_proximity_condition() {
        let classifier = classifier();
        let person = person_at(bbox(100.0, 100.0, 200.0, 300.0)); // center (150, 200)
        let near = Detection::new(bbox(200.0, 150.0, 300.0, 250.0), 0.9, "monitor"); // center (250, 200)

        let eval = classifier.evaluate_person(&person, KeypointSet::default(), &[], &[], &[near]);
        assert!(eval.conditions.monitor_proximity);
        assert_eq!(eval.metrics.monitor_distance, Some(100.0));

        let far = Detection::new(bbox(800.0, 150.0, 900.0, 250.0), 0.9, "monitor");
        let eval = classifier.evaluate_person(&person, KeypointSet::default(), &[], &[], &[far]);
        assert!(!eval.conditions.monitor_proximity);
    }

    #[test]
    fn head_above_chair_uses_image_coordinates() {
        let classifier = classifier();
        let person = person_at(bbox(100.0, 50.0, 200.0, 300.0));
        let chair = Detection::new(bbox(100.0, 200.0, 200.0, 320.0), 0.8, "chair");
        let keypoints = KeypointSet {
            nose: Some((150.0, 100.0)), // 100 < 200 - 15
            ..Default::default()
        };
        let eval =
            classifier.evaluate_person(&person, keypoints, std::slice::from_ref(&chair), &[], &[]);
        assert!(eval.conditions.head_above_chair);

        let low_head = KeypointSet {
            nose: Some((150.0, 190.0)), // inside the margin band
            ..Default::default()
        };
        let eval = classifier.evaluate_person(&person, low_head, &[chair], &[], &[]);
        assert!(!eval.conditions.head_above_chair);
    }

    #[test]
    fn frame_aggregation_statuses() {
        let on = PersonEvaluation {
            bbox: bbox(0.0, 0.0, 10.0, 10.0),
            confidence: 0.9,
            keypoints: KeypointSet::default(),
            head_pose: None,
            conditions: DutyConditions {
                chair_overlap: true,
                ..Default::default()
            },
            on_duty: true,
            metrics: DutyMetrics::default(),
        };
        let off = PersonEvaluation {
            on_duty: false,
            conditions: DutyConditions::default(),
            ..on.clone()
        };

        let frame = aggregate_frame(vec![on.clone()]);
        assert_eq!(frame.status, "on-duty (1/1)");
        assert!(frame.on_duty);

        let frame = aggregate_frame(vec![on.clone(), off.clone()]);
        assert_eq!(frame.status, "partially on-duty (1/2)");
        assert!(!frame.on_duty);

        let frame = aggregate_frame(vec![off.clone(), off]);
        assert_eq!(frame.status, "off-duty (0/2)");
        assert!(!frame.on_duty);

        let frame = aggregate_frame(Vec::new());
        assert_eq!(frame.status, "no person detected");
        assert!(!frame.on_duty);
    }

    #[test]
    fn pose_association_requires_minimum_iou() {
        let classifier = classifier();
        let keypoints = KeypointSet {
            nose: Some((150.0, 120.0)),
            ..Default::default()
        };
        let mut observation = FrameObservation::empty(Utc::now());
        observation.persons = vec![person_at(bbox(100.0, 100.0, 200.0, 300.0))];
        observation.poses = vec![PoseDetection {
            bbox: bbox(105.0, 100.0, 205.0, 300.0), // heavy overlap
            confidence: 0.7,
            keypoints: keypoints.clone(),
        }];

        let frame = classifier.evaluate_frame(&observation);
        assert_eq!(frame.persons[0].keypoints, keypoints);

        // A distant pose box stays unmatched.
        observation.poses[0].bbox = bbox(500.0, 100.0, 600.0, 300.0);
        let frame = classifier.evaluate_frame(&observation);
        assert!(frame.persons[0].keypoints.is_empty());
    }

    #[test]
    fn pose_only_frames_promote_synthetic_persons() {
        let classifier = classifier();
        let mut observation = FrameObservation::empty(Utc::now());
        observation.poses = vec![PoseDetection {
            bbox: bbox(100.0, 100.0, 200.0, 300.0),
            confidence: 0.6,
            keypoints: KeypointSet::default(),
        }];

        let frame = classifier.evaluate_frame(&observation);
        assert_eq!(frame.persons.len(), 1);
        assert_eq!(frame.persons[0].bbox, bbox(100.0, 100.0, 200.0, 300.0));
    }

    #[test]
    fn end_to_end_chair_iou_scenario() {
        // Person overlapping a chair with IoU ~0.25, above the 0.2 default.
        let classifier = classifier();
        let mut observation = FrameObservation::empty(Utc::now());
        observation.persons = vec![person_at(bbox(0.0, 0.0, 100.0, 100.0))];
        observation.chairs = vec![Detection::new(bbox(0.0, 60.0, 100.0, 160.0), 0.8, "chair")];

        let frame = classifier.evaluate_frame(&observation);
        let person = &frame.persons[0];
        assert!((person.metrics.chair_iou - 0.25).abs() < 1e-9);
        assert!(person.conditions.chair_overlap);
        assert!(person.on_duty);
        assert_eq!(frame.status, "on-duty (1/1)");
        assert!(frame.on_duty);
    }
}
