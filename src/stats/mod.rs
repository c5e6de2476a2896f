//! Work-hours gating and duty-time accumulation. Totals accrue from the
//! wall-clock gap between updates, so the numbers stay correct at any frame
//! rate.

use anyhow::{bail, Context, Result};
use chrono::{DateTime, Datelike, Duration, Timelike, Utc};
use serde::{Deserialize, Serialize};

use crate::config::{StatsConfig, WorkHoursConfig};

mod export;

pub use export::StatsExporter;

/// Weekly on-duty schedule. Days use 0 = Monday. A range whose start equals
/// its end covers the whole day; start after end wraps past midnight, with
/// the wrapped portion attributed to the day the shift started.
#[derive(Debug, Clone)]
pub struct WorkHours {
    days: Vec<u8>,
    start_minute: u32,
    end_minute: u32,
}

impl WorkHours {
    pub fn new(config: &WorkHoursConfig) -> Result<Self> {
        Ok(Self {
            days: config.days.clone(),
            start_minute: parse_hhmm(&config.start)
                .with_context(|| format!("invalid work_hours.start '{}'", config.start))?,
            end_minute: parse_hhmm(&config.end)
                .with_context(|| format!("invalid work_hours.end '{}'", config.end))?,
        })
    }

    pub fn contains(&self, at: DateTime<Utc>) -> bool {
        let day = at.weekday().num_days_from_monday() as u8;
        let minute = at.hour() * 60 + at.minute();

        if self.start_minute == self.end_minute {
            return self.days.contains(&day);
        }
        if self.start_minute < self.end_minute {
            return self.days.contains(&day)
                && minute >= self.start_minute
                && minute < self.end_minute;
        }
        // Wrapped shift. Minutes before the end belong to the shift that
        // started the previous day.
        if minute >= self.start_minute {
            return self.days.contains(&day);
        }
        if minute < self.end_minute {
            let previous = (day + 6) % 7;
            return self.days.contains(&previous);
        }
        false
    }
}

fn parse_hhmm(value: &str) -> Result<u32> {
    let (hours, minutes) = value
        .split_once(':')
        .with_context(|| format!("expected HH:MM, got '{value}'"))?;
    let hours: u32 = hours.parse().context("hours are not a number")?;
    let minutes: u32 = minutes.parse().context("minutes are not a number")?;
    if hours > 23 || minutes > 59 {
        bail!("time '{value}' out of range");
    }
    Ok(hours * 60 + minutes)
}

/// Point-in-time copy of the accumulated duty totals, as persisted and
/// exported.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatsSnapshot {
    pub id: Option<i64>,
    pub captured_at: DateTime<Utc>,
    pub on_duty_seconds: f64,
    pub off_duty_seconds: f64,
    pub total_seconds: f64,
    pub continuous_on_duty_seconds: f64,
    pub within_work_hours: bool,
}

/// Running duty totals. On/off-duty time follows the fused verdict and only
/// accrues inside work hours; the continuous streak follows the raw per-frame
/// flag so a single real break resets it even while smoothing still reports
/// on-duty.
pub struct DutyStats {
    work_hours: WorkHours,
    warning_secs: f64,
    on_duty_seconds: f64,
    off_duty_seconds: f64,
    total_seconds: f64,
    continuous_on_duty_seconds: f64,
    last_update: Option<DateTime<Utc>>,
    warned: bool,
}

/// Gaps longer than this are treated as a restart, not as elapsed duty time.
const MAX_GAP: Duration = Duration::seconds(60);

impl DutyStats {
    pub fn new(work_hours: WorkHours, config: &StatsConfig) -> Self {
        Self {
            work_hours,
            warning_secs: config.continuous_warning_secs,
            on_duty_seconds: 0.0,
            off_duty_seconds: 0.0,
            total_seconds: 0.0,
            continuous_on_duty_seconds: 0.0,
            last_update: None,
            warned: false,
        }
    }

    /// Accrues time since the previous update and returns true exactly once
    /// per streak when the continuous on-duty warning threshold is crossed.
    pub fn update(&mut self, fused_on_duty: bool, frame_on_duty: bool, now: DateTime<Utc>) -> bool {
        let elapsed = match self.last_update {
            Some(previous) => now - previous,
            None => Duration::zero(),
        };
        self.last_update = Some(now);

        if elapsed < Duration::zero() || elapsed > MAX_GAP {
            // A stall or clock step ends the unbroken streak.
            self.continuous_on_duty_seconds = 0.0;
            self.warned = false;
            return false;
        }
        let seconds = elapsed.num_milliseconds() as f64 / 1000.0;

        self.total_seconds += seconds;
        if self.work_hours.contains(now) {
            if fused_on_duty {
                self.on_duty_seconds += seconds;
            } else {
                self.off_duty_seconds += seconds;
            }
        }

        if frame_on_duty {
            self.continuous_on_duty_seconds += seconds;
        } else {
            self.continuous_on_duty_seconds = 0.0;
            self.warned = false;
        }

        if self.warning_secs > 0.0
            && !self.warned
            && self.continuous_on_duty_seconds >= self.warning_secs
        {
            self.warned = true;
            return true;
        }
        false
    }

    pub fn snapshot(&self, now: DateTime<Utc>) -> StatsSnapshot {
        StatsSnapshot {
            id: None,
            captured_at: now,
            on_duty_seconds: self.on_duty_seconds,
            off_duty_seconds: self.off_duty_seconds,
            total_seconds: self.total_seconds,
            continuous_on_duty_seconds: self.continuous_on_duty_seconds,
            within_work_hours: self.work_hours.contains(now),
        }
    }

    pub fn within_work_hours(&self, at: DateTime<Utc>) -> bool {
        self.work_hours.contains(at)
    }

    pub fn warning_threshold_secs(&self) -> f64 {
        self.warning_secs
    }

    pub fn warning_active(&self) -> bool {
        self.warning_secs > 0.0 && self.continuous_on_duty_seconds >= self.warning_secs
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn hours(days: Vec<u8>, start: &str, end: &str) -> WorkHours {
        WorkHours::new(&WorkHoursConfig {
            days,
            start: start.to_string(),
            end: end.to_string(),
        })
        .unwrap()
    }

    // 2025-10-21 is a Tuesday, 2025-10-25 a Saturday.
    fn tuesday(hour: u32, minute: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 10, 21, hour, minute, 0).unwrap()
    }

    #[test]
    fn weekday_daytime_schedule() {
        let schedule = hours(vec![0, 1, 2, 3, 4], "09:00", "22:00");
        assert!(schedule.contains(tuesday(10, 0)));
        assert!(schedule.contains(tuesday(9, 0)));
        assert!(!schedule.contains(tuesday(22, 0)));
        assert!(!schedule.contains(tuesday(8, 59)));

        let saturday = Utc.with_ymd_and_hms(2025, 10, 25, 10, 0, 0).unwrap();
        assert!(!schedule.contains(saturday));
    }

    #[test]
    fn wrapped_shift_belongs_to_its_start_day() {
        // Tuesday-only night shift, 22:00 to 06:00.
        let schedule = hours(vec![1], "22:00", "06:00");
        assert!(schedule.contains(tuesday(23, 0)));

        // Wednesday 05:00 is still Tuesday's shift; Wednesday 07:00 is not.
        let wednesday_5 = Utc.with_ymd_and_hms(2025, 10, 22, 5, 0, 0).unwrap();
        let wednesday_7 = Utc.with_ymd_and_hms(2025, 10, 22, 7, 0, 0).unwrap();
        assert!(schedule.contains(wednesday_5));
        assert!(!schedule.contains(wednesday_7));

        // Tuesday 05:00 would be Monday's shift, which is not scheduled.
        assert!(!schedule.contains(tuesday(5, 0)));
    }

    #[test]
    fn equal_start_and_end_covers_the_day() {
        let schedule = hours(vec![1], "00:00", "00:00");
        assert!(schedule.contains(tuesday(0, 0)));
        assert!(schedule.contains(tuesday(23, 59)));
    }

    #[test]
    fn malformed_times_are_rejected() {
        assert!(WorkHours::new(&WorkHoursConfig {
            days: vec![0],
            start: "25:00".to_string(),
            end: "09:00".to_string(),
        })
        .is_err());
        assert!(parse_hhmm("nine").is_err());
    }

    fn stats(warning_secs: f64) -> DutyStats {
        let config = StatsConfig {
            continuous_warning_secs: warning_secs,
            ..Default::default()
        };
        DutyStats::new(hours(vec![0, 1, 2, 3, 4], "09:00", "22:00"), &config)
    }

    #[test]
    fn totals_accrue_and_stay_consistent() {
        let mut stats = stats(0.0);
        let mut now = tuesday(10, 0);
        stats.update(true, true, now);
        for _ in 0..10 {
            now += Duration::seconds(1);
            stats.update(true, true, now);
        }
        for _ in 0..5 {
            now += Duration::seconds(1);
            stats.update(false, false, now);
        }

        let snapshot = stats.snapshot(now);
        assert_eq!(snapshot.on_duty_seconds, 10.0);
        assert_eq!(snapshot.off_duty_seconds, 5.0);
        assert_eq!(snapshot.total_seconds, 15.0);
        assert!(snapshot.on_duty_seconds + snapshot.off_duty_seconds <= snapshot.total_seconds);
        assert!(snapshot.within_work_hours);
    }

    #[test]
    fn outside_work_hours_only_total_accrues() {
        let mut stats = stats(0.0);
        let mut now = tuesday(23, 0);
        stats.update(true, true, now);
        for _ in 0..10 {
            now += Duration::seconds(1);
            stats.update(true, true, now);
        }

        let snapshot = stats.snapshot(now);
        assert_eq!(snapshot.on_duty_seconds, 0.0);
        assert_eq!(snapshot.total_seconds, 10.0);
        // The overwork streak is schedule-independent.
        assert_eq!(snapshot.continuous_on_duty_seconds, 10.0);
    }

    #[test]
    fn single_off_frame_resets_the_streak() {
        let mut stats = stats(0.0);
        let mut now = tuesday(10, 0);
        stats.update(true, true, now);
        for _ in 0..10 {
            now += Duration::seconds(1);
            stats.update(true, true, now);
        }
        now += Duration::seconds(1);
        // Smoothed verdict still on-duty, raw frame off.
        stats.update(true, false, now);
        assert_eq!(stats.snapshot(now).continuous_on_duty_seconds, 0.0);
    }

    #[test]
    fn warning_fires_once_per_streak() {
        let mut stats = stats(5.0);
        let mut now = tuesday(10, 0);
        let mut warnings = 0;
        stats.update(true, true, now);
        for _ in 0..20 {
            now += Duration::seconds(1);
            if stats.update(true, true, now) {
                warnings += 1;
            }
        }
        assert_eq!(warnings, 1);

        // Break, then a new streak warns again.
        now += Duration::seconds(1);
        stats.update(false, false, now);
        for _ in 0..10 {
            now += Duration::seconds(1);
            if stats.update(true, true, now) {
                warnings += 1;
            }
        }
        assert_eq!(warnings, 2);
    }

    #[test]
    fn zero_threshold_disables_the_warning() {
        let mut stats = stats(0.0);
        let mut now = tuesday(10, 0);
        stats.update(true, true, now);
        for _ in 0..100 {
            now += Duration::seconds(1);
            assert!(!stats.update(true, true, now));
        }
    }

    #[test]
    fn long_gaps_do_not_count_as_duty_time() {
        let mut stats = stats(0.0);
        let now = tuesday(10, 0);
        stats.update(true, true, now);
        stats.update(true, true, now + Duration::minutes(30));
        assert_eq!(stats.snapshot(now).total_seconds, 0.0);
    }

    #[test]
    fn long_gap_ends_the_continuous_streak() {
        let mut stats = stats(5.0);
        let mut now = tuesday(10, 0);
        stats.update(true, true, now);
        for _ in 0..10 {
            now += Duration::seconds(1);
            stats.update(true, true, now);
        }
        assert_eq!(stats.snapshot(now).continuous_on_duty_seconds, 10.0);

        // The stall itself resets the streak, even before the next frame.
        now += Duration::minutes(5);
        stats.update(true, true, now);
        assert_eq!(stats.snapshot(now).continuous_on_duty_seconds, 0.0);

        // And the warning can fire again on the post-gap streak.
        let mut warnings = 0;
        for _ in 0..10 {
            now += Duration::seconds(1);
            if stats.update(true, true, now) {
                warnings += 1;
            }
        }
        assert_eq!(warnings, 1);
    }
}
