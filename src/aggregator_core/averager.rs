//! Averager - periodic trailing-window mean of delivery durations
//!
//! Each cycle sleeps until the next [`WakeSchedule`] target, drains a snapshot
//! of the hand-off queue into the [`TrailingWindow`], evicts everything whose
//! age is no longer strictly below the window and emits one [`AverageRecord`].
//!
//! Wake times run on UTC instants. Local naive time is only used where events
//! are compared against it: ages and the record `date`.

use super::event::{local_now, DeliveryEvent};
use super::jsonl_writer::AverageRecord;
use super::schedule::WakeSchedule;
use super::window::{MissingDuration, TrailingWindow};
use chrono::{Local, NaiveDateTime, TimeDelta, Utc};
use std::time::Duration;
use tokio::sync::mpsc::{self, error::SendTimeoutError};
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;

/// What a cycle without any sample emits
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, clap::ValueEnum)]
pub enum EmptyCycle {
    /// A record whose `average_delivery_time` is null
    #[default]
    EmitNull,
    /// Nothing
    Skip,
}

#[derive(Debug, Clone)]
pub struct AveragerSettings {
    pub frequency: TimeDelta,
    pub window: TimeDelta,
    pub missing_duration: MissingDuration,
    pub empty_cycle: EmptyCycle,
    /// Bound on the blocking put onto the output queue
    pub emit_timeout: Duration,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AveragerStats {
    pub cycles: u64,
    pub received: u64,
    pub evicted: u64,
    pub emitted: u64,
    pub skipped_empty: u64,
    pub emit_timeouts: u64,
    pub overrun_periods: u64,
}

/// Move what is queued right now into `window`. Events that arrive while
/// draining are left for the next cycle.
fn drain_snapshot(
    rx: &mut mpsc::Receiver<DeliveryEvent>,
    window: &mut TrailingWindow,
    now: NaiveDateTime,
) -> usize {
    let pending = rx.len();
    let mut drained = 0;
    for _ in 0..pending {
        let Ok(event) = rx.try_recv() else {
            break;
        };
        window.push(event.timestamp.unwrap_or(now), event.duration);
        drained += 1;
    }
    drained
}

/// One Aggregating state pass. Returns the record to emit, if any.
fn run_cycle(
    rx: &mut mpsc::Receiver<DeliveryEvent>,
    window: &mut TrailingWindow,
    now: NaiveDateTime,
    settings: &AveragerSettings,
    stats: &mut AveragerStats,
) -> Option<AverageRecord> {
    stats.cycles += 1;
    stats.received += drain_snapshot(rx, window, now) as u64;
    stats.evicted += window.evict_stale(now) as u64;

    let average = window.average();
    log::debug!(
        "Cycle {}: {} samples in window, average {:?}",
        stats.cycles,
        window.sample_count(),
        average
    );

    if average.is_none() && settings.empty_cycle == EmptyCycle::Skip {
        stats.skipped_empty += 1;
        return None;
    }
    Some(AverageRecord::new(now, average))
}

/// Alternate between Sleeping and Aggregating until `cancel` fires
pub async fn run_averager(
    mut rx: mpsc::Receiver<DeliveryEvent>,
    tx: mpsc::Sender<AverageRecord>,
    settings: AveragerSettings,
    cancel: CancellationToken,
) -> AveragerStats {
    let mut window = TrailingWindow::new(settings.window, settings.missing_duration);
    let mut schedule = WakeSchedule::starting_at(Utc::now(), settings.frequency);
    let mut stats = AveragerStats::default();

    log::info!(
        "⏰ Averager started (frequency: {}s, window: {}s, first cycle at {})",
        settings.frequency.num_seconds(),
        settings.window.num_seconds(),
        schedule.wake_time().with_timezone(&Local)
    );

    while !cancel.is_cancelled() {
        let pause = schedule.sleep_duration(Utc::now());
        log::trace!("Sleeping for {:?}", pause);
        tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            _ = sleep(pause) => {}
        }

        let now = local_now();
        if let Some(record) = run_cycle(&mut rx, &mut window, now, &settings, &mut stats) {
            let sent = tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                sent = tx.send_timeout(record, settings.emit_timeout) => sent,
            };
            match sent {
                Ok(()) => stats.emitted += 1,
                Err(SendTimeoutError::Timeout(record)) => {
                    stats.emit_timeouts += 1;
                    log::warn!(
                        "⚠️  Output queue full for {:?}, dropping average for {}",
                        settings.emit_timeout,
                        record.date
                    );
                }
                Err(SendTimeoutError::Closed(_)) => {
                    log::warn!("Output queue closed, averager exiting");
                    break;
                }
            }
        }

        let skipped = schedule.advance(Utc::now());
        if skipped > 0 {
            stats.overrun_periods += skipped;
            log::warn!(
                "⏱️  Cycle overran {} period(s), next cycle at {}",
                skipped,
                schedule.wake_time().with_timezone(&Local)
            );
        }
    }

    log::info!("⏰ Averager stopped: {:?}", stats);
    stats
}

#[cfg(test)]
mod tests {
    use super::*;

    fn settings(frequency_ms: i64, window_secs: i64, empty_cycle: EmptyCycle) -> AveragerSettings {
        AveragerSettings {
            frequency: TimeDelta::milliseconds(frequency_ms),
            window: TimeDelta::seconds(window_secs),
            missing_duration: MissingDuration::Exclude,
            empty_cycle,
            emit_timeout: Duration::from_secs(window_secs as u64),
        }
    }

    fn event(timestamp: NaiveDateTime, duration: f64) -> DeliveryEvent {
        DeliveryEvent {
            timestamp: Some(timestamp),
            duration: Some(duration),
        }
    }

    #[test]
    fn test_cycle_drains_and_filters() {
        let now = local_now();
        let (tx, mut rx) = mpsc::channel(8);
        tx.try_send(event(now - TimeDelta::seconds(10), 99.0)).unwrap();
        tx.try_send(event(now - TimeDelta::seconds(1), 20.0)).unwrap();
        tx.try_send(event(now, 30.0)).unwrap();

        let s = settings(1000, 4, EmptyCycle::EmitNull);
        let mut window = TrailingWindow::new(s.window, s.missing_duration);
        let mut stats = AveragerStats::default();

        let record = run_cycle(&mut rx, &mut window, now, &s, &mut stats).unwrap();
        assert_eq!(record.average_delivery_time, Some(25.0));
        assert_eq!(record.date, now);
        assert_eq!(stats.received, 3);
        assert_eq!(stats.evicted, 1);

        // Nothing new, the window still holds both fresh samples
        let record = run_cycle(&mut rx, &mut window, now, &s, &mut stats).unwrap();
        assert_eq!(record.average_delivery_time, Some(25.0));
    }

    #[test]
    fn test_empty_cycle_policies() {
        let now = local_now();
        let (_tx, mut rx) = mpsc::channel::<DeliveryEvent>(1);
        let mut stats = AveragerStats::default();

        let emit = settings(1000, 1, EmptyCycle::EmitNull);
        let mut window = TrailingWindow::new(emit.window, emit.missing_duration);
        for _ in 0..3 {
            let record = run_cycle(&mut rx, &mut window, now, &emit, &mut stats).unwrap();
            assert_eq!(record.average_delivery_time, None);
        }

        let skip = settings(1000, 1, EmptyCycle::Skip);
        assert!(run_cycle(&mut rx, &mut window, now, &skip, &mut stats).is_none());
        assert_eq!(stats.skipped_empty, 1);
    }

    #[tokio::test]
    async fn test_single_event_average() {
        let (in_tx, in_rx) = mpsc::channel(8);
        let (out_tx, mut out_rx) = mpsc::channel(8);
        let cancel = CancellationToken::new();

        let task = tokio::spawn(run_averager(
            in_rx,
            out_tx,
            settings(1000, 4, EmptyCycle::EmitNull),
            cancel.clone(),
        ));
        in_tx.send(event(local_now(), 54.0)).await.unwrap();

        let record = tokio::time::timeout(Duration::from_secs(3), out_rx.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(record.average_delivery_time, Some(54.0));

        cancel.cancel();
        let stats = task.await.unwrap();
        assert!(stats.emitted >= 1);
    }

    #[tokio::test]
    async fn test_cycles_keep_order_and_cadence() {
        let (_in_tx, in_rx) = mpsc::channel::<DeliveryEvent>(8);
        let (out_tx, mut out_rx) = mpsc::channel(8);
        let cancel = CancellationToken::new();

        let task = tokio::spawn(run_averager(
            in_rx,
            out_tx,
            settings(100, 1, EmptyCycle::EmitNull),
            cancel.clone(),
        ));

        let mut dates = Vec::new();
        for _ in 0..4 {
            let record = tokio::time::timeout(Duration::from_secs(2), out_rx.recv())
                .await
                .unwrap()
                .unwrap();
            assert_eq!(record.average_delivery_time, None);
            dates.push(record.date);
        }
        cancel.cancel();
        task.await.unwrap();

        for pair in dates.windows(2) {
            assert!(pair[1] > pair[0]);
        }
        // Three periods on a 100ms grid, minus any lateness of the first wake
        assert!(dates[3] - dates[0] >= TimeDelta::milliseconds(200));
    }

    #[tokio::test]
    async fn test_cancel_interrupts_sleep() {
        let (_in_tx, in_rx) = mpsc::channel::<DeliveryEvent>(1);
        let (out_tx, _out_rx) = mpsc::channel(1);
        let cancel = CancellationToken::new();

        let task = tokio::spawn(run_averager(
            in_rx,
            out_tx,
            settings(60_000, 1, EmptyCycle::EmitNull),
            cancel.clone(),
        ));
        cancel.cancel();

        let stats = tokio::time::timeout(Duration::from_secs(1), task)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(stats.cycles, 0);
    }
}
