//! Trailing time window over timestamped delivery durations

use chrono::{NaiveDateTime, TimeDelta};
use std::collections::VecDeque;

/// How an in-window event without a `duration` takes part in the mean
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, clap::ValueEnum)]
pub enum MissingDuration {
    /// Left out of both sum and count
    #[default]
    Exclude,
    /// Counted as a zero-second delivery
    Zero,
}

#[derive(Debug, Clone, Copy, PartialEq)]
struct Sample {
    timestamp: NaiveDateTime,
    duration: Option<f64>,
}

/// Events ordered by timestamp; eviction pops from the front only.
#[derive(Debug, Clone)]
pub struct TrailingWindow {
    samples: VecDeque<Sample>,
    window: TimeDelta,
    missing_duration: MissingDuration,
}

impl TrailingWindow {
    pub fn new(window: TimeDelta, missing_duration: MissingDuration) -> Self {
        Self {
            samples: VecDeque::with_capacity(100),
            window,
            missing_duration,
        }
    }

    /// Insert at its time position; arrival order is kept among equal timestamps
    pub fn push(&mut self, timestamp: NaiveDateTime, duration: Option<f64>) {
        let sample = Sample { timestamp, duration };
        let at_end = self
            .samples
            .back()
            .map_or(true, |last| last.timestamp <= timestamp);
        if at_end {
            self.samples.push_back(sample);
        } else {
            let idx = self.samples.partition_point(|s| s.timestamp <= timestamp);
            self.samples.insert(idx, sample);
        }
    }

    /// Drop every sample whose age at `now` is not strictly below the window.
    /// Returns how many were dropped.
    pub fn evict_stale(&mut self, now: NaiveDateTime) -> usize {
        let mut evicted = 0;
        while let Some(front) = self.samples.front() {
            if now - front.timestamp < self.window {
                break;
            }
            self.samples.pop_front();
            evicted += 1;
        }
        evicted
    }

    /// Number of samples that enter the mean under the configured policy
    pub fn sample_count(&self) -> usize {
        self.contributions().count()
    }

    /// Mean of the samples currently held, `None` when the sample set is
    /// empty. Summed afresh on every call so evicted values leave no residue.
    pub fn average(&self) -> Option<f64> {
        let (sum, count) = self
            .contributions()
            .fold((0.0, 0usize), |(sum, count), d| (sum + d, count + 1));
        if count == 0 {
            return None;
        }
        Some(sum / count as f64)
    }

    fn contributions(&self) -> impl Iterator<Item = f64> + '_ {
        let missing_duration = self.missing_duration;
        self.samples
            .iter()
            .filter_map(move |s| match (s.duration, missing_duration) {
                (Some(d), _) => Some(d),
                (None, MissingDuration::Zero) => Some(0.0),
                (None, MissingDuration::Exclude) => None,
            })
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

}
