//! Per-person identity tracking and the off-duty alert state machine:
//! threshold, cooldown, and grace-period eviction.

use std::collections::{HashMap, HashSet};

use chrono::{DateTime, Utc};

use crate::config::AlertConfig;
use crate::detect::{FrameStatus, PersonEvaluation};

use super::record::{AlertRecord, ALERT_STATUS_NEW, ALERT_TYPE_OFF_DUTY};

/// Maps a detected person to a heuristic identity key. The default is a
/// quantized-centroid scheme; a real tracker can be substituted without
/// touching the alert engine. Identities are only stable while the person's
/// centroid is; large motion silently creates a new identity.
pub trait IdentityResolver: Send {
    fn resolve(&self, person: &PersonEvaluation, index: usize) -> String;
}

/// Identity from the bounding-box centroid quantized to integer pixels,
/// combined with the positional index. Malformed boxes fall back to an
/// index-derived synthetic centroid.
pub struct CentroidIdentity;

impl IdentityResolver for CentroidIdentity {
    fn resolve(&self, person: &PersonEvaluation, index: usize) -> String {
        let (cx, cy) = person.bbox.center();
        let (cx, cy) = if cx.is_finite() && cy.is_finite() {
            (cx, cy)
        } else {
            (index as f64 * 50.0, 0.0)
        };
        format!("p{}_{}_{}", index, cx as i64, cy as i64)
    }
}

#[derive(Debug, Clone, Copy)]
struct PersonState {
    last_seen: DateTime<Utc>,
    last_on_duty: DateTime<Utc>,
    last_alert: Option<DateTime<Utc>>,
}

/// Stateful alert engine. Pure state machine over simulated or wall-clock
/// timestamps; persistence and dispatch happen at the caller.
pub struct AlertEngine {
    config: AlertConfig,
    identity: Box<dyn IdentityResolver>,
    states: HashMap<String, PersonState>,
}

impl AlertEngine {
    pub fn new(config: AlertConfig) -> Self {
        Self::with_identity(config, Box::new(CentroidIdentity))
    }

    pub fn with_identity(config: AlertConfig, identity: Box<dyn IdentityResolver>) -> Self {
        Self {
            config,
            identity,
            states: HashMap::new(),
        }
    }

    /// Processes one frame's evaluations at `now`, returning alerts that
    /// crossed the threshold outside their cooldown window. Guarantees at
    /// most one alert per identity per cooldown interval, independent of
    /// frame rate.
    pub fn process_frame(&mut self, frame: &FrameStatus, now: DateTime<Utc>) -> Vec<AlertRecord> {
        let mut seen: HashSet<String> = HashSet::with_capacity(frame.persons.len());
        let mut triggered = Vec::new();

        for (index, person) in frame.persons.iter().enumerate() {
            let person_id = self.identity.resolve(person, index);
            seen.insert(person_id.clone());

            let state = self.states.entry(person_id.clone()).or_insert(PersonState {
                last_seen: now,
                last_on_duty: now,
                last_alert: None,
            });
            state.last_seen = now;

            if person.on_duty {
                state.last_on_duty = now;
                continue;
            }

            let elapsed = seconds_between(state.last_on_duty, now);
            if elapsed < self.config.off_duty_threshold_secs {
                continue;
            }
            if let Some(last_alert) = state.last_alert {
                if seconds_between(last_alert, now) < self.config.cooldown_secs {
                    continue;
                }
            }

            state.last_alert = Some(now);
            triggered.push(AlertRecord {
                id: None,
                person_id,
                person_label: format!("person {}", index + 1),
                alert_type: ALERT_TYPE_OFF_DUTY.to_string(),
                message: format!(
                    "off duty for {:.0} s, beyond the {:.0} s threshold",
                    elapsed, self.config.off_duty_threshold_secs
                ),
                duration_seconds: elapsed,
                triggered_at: now,
                channels: self.config.channels.clone(),
                status: ALERT_STATUS_NEW.to_string(),
            });
        }

        self.evict_stale(&seen, now);
        triggered
    }

    /// Drops identities unseen for longer than the grace period. A long
    /// absence means "this is a different person now" rather than stale
    /// state carried forward.
    fn evict_stale(&mut self, seen: &HashSet<String>, now: DateTime<Utc>) {
        let grace = self.config.person_grace_secs;
        self.states
            .retain(|id, state| seen.contains(id) || seconds_between(state.last_seen, now) <= grace);
    }

    pub fn tracked_identities(&self) -> usize {
        self.states.len()
    }
}

fn seconds_between(earlier: DateTime<Utc>, later: DateTime<Utc>) -> f64 {
    (later - earlier).num_milliseconds() as f64 / 1000.0
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detect::{aggregate_frame, DutyConditions, DutyMetrics, KeypointSet};
    use crate::geometry::BoundingBox;
    use chrono::{Duration, TimeZone};

    fn person(on_duty: bool, bbox: BoundingBox) -> crate::detect::PersonEvaluation {
        crate::detect::PersonEvaluation {
            bbox,
            confidence: 0.9,
            keypoints: KeypointSet::default(),
            head_pose: None,
            conditions: DutyConditions {
                chair_overlap: on_duty,
                ..Default::default()
            },
            on_duty,
            metrics: DutyMetrics::default(),
        }
    }

    fn frame(on_duty: bool) -> FrameStatus {
        aggregate_frame(vec![person(on_duty, BoundingBox::new(100.0, 100.0, 200.0, 300.0))])
    }

    fn engine(threshold: f64, cooldown: f64, grace: f64) -> AlertEngine {
        AlertEngine::new(AlertConfig {
            off_duty_threshold_secs: threshold,
            cooldown_secs: cooldown,
            person_grace_secs: grace,
            channels: vec!["log".to_string()],
        })
    }

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 10, 20, 9, 0, 0).unwrap()
    }

    #[test]
    fn exactly_two_alerts_over_threshold_plus_cooldown() {
        // threshold 30 s, cooldown 5 s, frames every 1 s, continuously
        // off-duty for threshold + cooldown + 1 = 36 s.
        let mut engine = engine(30.0, 5.0, 300.0);
        let mut alerts = Vec::new();
        for second in 0..=36 {
            let now = t0() + Duration::seconds(second);
            alerts.extend(engine.process_frame(&frame(false), now));
        }
        assert_eq!(alerts.len(), 2, "one at the threshold, one after cooldown");
        assert_eq!(alerts[0].triggered_at, t0() + Duration::seconds(30));
        assert_eq!(alerts[1].triggered_at, t0() + Duration::seconds(35));
        assert_eq!(alerts[0].alert_type, "off_duty");
    }

    #[test]
    fn on_duty_frames_reset_the_clock() {
        let mut engine = engine(30.0, 5.0, 300.0);
        for second in 0..60 {
            let now = t0() + Duration::seconds(second);
            // On duty every 10th frame keeps elapsed below threshold.
            let on = second % 10 == 0;
            let alerts = engine.process_frame(&frame(on), now);
            assert!(alerts.is_empty(), "alert fired at second {second}");
        }
    }

    #[test]
    fn off_chair_for_31_seconds_single_alert() {
        // 30 s threshold, 5 s cooldown: one alert with duration around 31 s.
        let mut engine = engine(30.0, 5.0, 300.0);
        let mut alerts = Vec::new();
        // On duty at t = 0, then off for 31 consecutive 1 s frames.
        alerts.extend(engine.process_frame(&frame(true), t0()));
        for second in 1..=31 {
            let now = t0() + Duration::seconds(second);
            alerts.extend(engine.process_frame(&frame(false), now));
        }
        assert_eq!(alerts.len(), 1);
        assert_eq!(alerts[0].alert_type, "off_duty");
        assert!(
            (30.0..=31.0).contains(&alerts[0].duration_seconds),
            "duration was {}",
            alerts[0].duration_seconds
        );
    }

    #[test]
    fn stale_identity_is_evicted_and_reappears_fresh() {
        let grace = 30.0;
        let mut engine = engine(30.0, 5.0, grace);

        engine.process_frame(&frame(false), t0());
        assert_eq!(engine.tracked_identities(), 1);

        // Empty frames while the identity ages past the grace period.
        let empty = aggregate_frame(Vec::new());
        engine.process_frame(&empty, t0() + Duration::seconds(31));
        assert_eq!(engine.tracked_identities(), 0);

        // Re-appearance is a new identity with fresh counters: no alert even
        // though wall-clock elapsed exceeds the threshold.
        let alerts = engine.process_frame(&frame(false), t0() + Duration::seconds(62));
        assert!(alerts.is_empty());
        assert_eq!(engine.tracked_identities(), 1);
    }

    #[test]
    fn identity_survives_within_grace() {
        let mut engine = engine(30.0, 5.0, 30.0);
        engine.process_frame(&frame(false), t0());
        let empty = aggregate_frame(Vec::new());
        engine.process_frame(&empty, t0() + Duration::seconds(29));
        assert_eq!(engine.tracked_identities(), 1);
    }

    #[test]
    fn centroid_identity_is_stable_for_stable_boxes() {
        let resolver = CentroidIdentity;
        let a = person(false, BoundingBox::new(100.0, 100.0, 200.0, 300.0));
        let b = person(true, BoundingBox::new(100.0, 100.0, 200.0, 300.0));
        assert_eq!(resolver.resolve(&a, 0), resolver.resolve(&b, 0));

        // Malformed box falls back to the index-derived key.
        let bad = person(false, BoundingBox::new(f64::NAN, 0.0, f64::NAN, 0.0));
        assert_eq!(resolver.resolve(&bad, 2), "p2_100_0");
    }
}
