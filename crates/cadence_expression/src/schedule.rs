//! Day schedule for the simulated person.
//!
//! Replies slow down at night and much more during sleep hours, when the very
//! first reaction to a message also gets a long initial delay.

use cadence_core::config::ScheduleConfig;
use chrono::{DateTime, FixedOffset, Offset, Timelike, Utc};
use rand::Rng;
use std::time::Duration;

/// Floor and ceiling for the sleep-hours initial delay.
const SLEEP_DELAY_FLOOR_MS: i64 = 10_000;
const SLEEP_DELAY_CAP_MS: i64 = 60_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DayPhase {
    Day,
    Night,
    Sleep,
}

impl DayPhase {
    pub fn as_str(self) -> &'static str {
        match self {
            DayPhase::Day => "day",
            DayPhase::Night => "night",
            DayPhase::Sleep => "sleep",
        }
    }
}

#[derive(Debug, Clone)]
pub struct DaySchedule {
    config: ScheduleConfig,
    offset: FixedOffset,
}

impl DaySchedule {
    pub fn new(config: &ScheduleConfig) -> Self {
        let offset = FixedOffset::east_opt(config.utc_offset_minutes.saturating_mul(60))
            .unwrap_or_else(|| Utc.fix());
        Self {
            config: config.clone(),
            offset,
        }
    }

    /// Local hour (0-23) of the simulated person at `now`.
    pub fn local_hour(&self, now: DateTime<Utc>) -> u32 {
        now.with_timezone(&self.offset).hour()
    }

    /// Phase for a given local hour.
    pub fn phase_at(&self, hour: u32) -> DayPhase {
        if !self.config.enabled {
            return DayPhase::Day;
        }
        if in_window(hour, self.config.sleep_start_hour, self.config.sleep_end_hour) {
            return DayPhase::Sleep;
        }
        if in_window(hour, self.config.night_start_hour, self.config.night_end_hour) {
            return DayPhase::Night;
        }
        DayPhase::Day
    }

    pub fn phase(&self) -> DayPhase {
        self.phase_at(self.local_hour(Utc::now()))
    }

    pub fn factor_for(&self, phase: DayPhase) -> f64 {
        match phase {
            DayPhase::Day => 1.0,
            DayPhase::Night => self.config.night_slowdown,
            DayPhase::Sleep => self.config.sleep_slowdown,
        }
    }

    /// Current time-of-day multiplier (1.0 during the day).
    pub fn time_of_day_factor(&self) -> f64 {
        self.factor_for(self.phase())
    }

    /// Extra delay before handling anything during sleep hours, `None` otherwise.
    pub fn sleep_delay<R: Rng + ?Sized>(&self, phase: DayPhase, rng: &mut R) -> Option<Duration> {
        if phase != DayPhase::Sleep {
            return None;
        }
        let range = self.config.sleep_initial_delay_ms;
        let base = i64::try_from(rng.gen_range(range.min()..=range.max())).unwrap_or(i64::MAX);
        let variation = rng.gen_range(-5_000i64..=10_000);
        let ms = base
            .saturating_add(variation)
            .max(SLEEP_DELAY_FLOOR_MS)
            .min(SLEEP_DELAY_CAP_MS);
        Some(Duration::from_millis(ms as u64))
    }
}

impl Default for DaySchedule {
    fn default() -> Self {
        Self::new(&ScheduleConfig::default())
    }
}

/// Half-open `[start, end)` hour window that may wrap past midnight.
fn in_window(hour: u32, start: u32, end: u32) -> bool {
    if start <= end {
        hour >= start && hour < end
    } else {
        hour >= start || hour < end
    }
}
