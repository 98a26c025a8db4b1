//! Drift-corrected wake schedule for periodic aggregation
//!
//! Every target is derived from the previous target, never from the clock
//! reading taken after waking, so sleep overhead does not accumulate. When a
//! cycle overruns, whole periods are skipped instead of firing catch-up cycles.
//!
//! Targets are absolute instants, so local clock changes (DST) move neither
//! the sleep length nor the period count.

use chrono::{DateTime, DurationRound, TimeDelta, Utc};
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WakeSchedule {
    wake: DateTime<Utc>,
    delay: TimeDelta,
}

impl WakeSchedule {
    /// First wake is `start + delay`, truncated to the whole minute when
    /// `delay` is a minute or longer. Saturates at the latest representable
    /// instant when the addition leaves chrono's range.
    pub fn starting_at(start: DateTime<Utc>, delay: TimeDelta) -> Self {
        let mut wake = start
            .checked_add_signed(delay)
            .unwrap_or(DateTime::<Utc>::MAX_UTC);
        if delay >= TimeDelta::minutes(1) {
            wake = wake.duration_trunc(TimeDelta::minutes(1)).unwrap_or(wake);
        }
        Self { wake, delay }
    }

    pub fn wake_time(&self) -> DateTime<Utc> {
        self.wake
    }

    pub fn delay(&self) -> TimeDelta {
        self.delay
    }

    /// Time left until the current target, zero when already past it
    pub fn sleep_duration(&self, now: DateTime<Utc>) -> Duration {
        (self.wake - now).to_std().unwrap_or(Duration::ZERO)
    }

    /// Move to the next target after a cycle finished at `now`:
    /// `wake + floor((now - wake) / delay) * delay + delay`.
    ///
    /// Returns the number of whole periods skipped because of an overrun.
    pub fn advance(&mut self, now: DateTime<Utc>) -> u64 {
        let delay_us = self.delay.num_microseconds().unwrap_or(i64::MAX).max(1);
        let elapsed_us = (now - self.wake).num_microseconds().unwrap_or(i64::MAX);
        let periods = elapsed_us.div_euclid(delay_us);

        let step = periods.saturating_add(1).saturating_mul(delay_us);
        self.wake = self
            .wake
            .checked_add_signed(TimeDelta::microseconds(step))
            .unwrap_or(DateTime::<Utc>::MAX_UTC);
        periods.max(0) as u64
    }
}
