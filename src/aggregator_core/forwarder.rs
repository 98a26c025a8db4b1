//! Forwarder - staleness filter between the tail reader and the averager

use super::event::{local_now, DeliveryEvent};
use super::reader::TailError;
use chrono::{NaiveDateTime, TimeDelta};
use futures::{Stream, StreamExt};
use std::time::Duration;
use tokio::sync::mpsc::{self, error::SendTimeoutError};
use tokio_util::sync::CancellationToken;

/// What happens to an event that carries no `timestamp`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, clap::ValueEnum)]
pub enum MissingTimestamp {
    /// Discard it at ingestion
    #[default]
    Drop,
    /// Stamp it with the ingestion time and forward it
    Forward,
}

#[derive(Debug, Clone)]
pub struct ForwarderSettings {
    pub window: TimeDelta,
    pub enqueue_timeout: Duration,
    pub missing_timestamp: MissingTimestamp,
}

#[derive(Debug, thiserror::Error)]
pub enum ForwardError {
    #[error(transparent)]
    Tail(#[from] TailError),
    #[error("event carries no timestamp")]
    MissingTimestamp,
    #[error("hand-off queue still full after {0:?}")]
    EnqueueTimeout(Duration),
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ForwarderStats {
    pub forwarded: u64,
    pub stale: u64,
    pub malformed: u64,
    pub undated: u64,
    pub timed_out: u64,
}

/// Outcome of the ingestion-time staleness check
#[derive(Debug, PartialEq)]
pub enum Route {
    Forward(DeliveryEvent),
    Stale(TimeDelta),
}

/// Decide whether `event` is still inside the window at `now`
pub fn route(
    mut event: DeliveryEvent,
    now: NaiveDateTime,
    settings: &ForwarderSettings,
) -> Result<Route, ForwardError> {
    let Some(age) = event.age(now) else {
        return match settings.missing_timestamp {
            MissingTimestamp::Drop => Err(ForwardError::MissingTimestamp),
            MissingTimestamp::Forward => {
                event.timestamp = Some(now);
                Ok(Route::Forward(event))
            }
        };
    };

    if age < settings.window {
        Ok(Route::Forward(event))
    } else {
        Ok(Route::Stale(age))
    }
}

/// Pull events from `events` until cancelled and hand fresh ones to `tx`.
///
/// A bad line, a missing timestamp or a full queue only costs that record.
pub async fn run_forwarder<S>(
    events: S,
    tx: mpsc::Sender<DeliveryEvent>,
    settings: ForwarderSettings,
    cancel: CancellationToken,
) -> ForwarderStats
where
    S: Stream<Item = Result<DeliveryEvent, TailError>>,
{
    log::info!(
        "📥 Forwarder started (window: {}s, enqueue timeout: {:?})",
        settings.window.num_seconds(),
        settings.enqueue_timeout
    );

    let mut events = std::pin::pin!(events);
    let mut stats = ForwarderStats::default();

    while !cancel.is_cancelled() {
        let item = tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            item = events.next() => item,
        };
        let Some(item) = item else {
            break;
        };

        let routed = item
            .map_err(ForwardError::from)
            .and_then(|event| route(event, local_now(), &settings));

        let event = match routed {
            Ok(Route::Forward(event)) => event,
            Ok(Route::Stale(age)) => {
                stats.stale += 1;
                log::debug!("Dropping stale event ({}ms old)", age.num_milliseconds());
                continue;
            }
            Err(e) => {
                match e {
                    ForwardError::MissingTimestamp => stats.undated += 1,
                    _ => stats.malformed += 1,
                }
                log::warn!("⚠️  Error forwarding event: {}", e);
                continue;
            }
        };

        let sent = tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            sent = tx.send_timeout(event, settings.enqueue_timeout) => sent,
        };
        match sent {
            Ok(()) => stats.forwarded += 1,
            Err(SendTimeoutError::Timeout(_)) => {
                stats.timed_out += 1;
                log::warn!(
                    "⚠️  Error forwarding event: {}",
                    ForwardError::EnqueueTimeout(settings.enqueue_timeout)
                );
            }
            Err(SendTimeoutError::Closed(_)) => {
                log::warn!("Hand-off queue closed, forwarder exiting");
                break;
            }
        }
    }

    log::info!("📥 Forwarder stopped: {:?}", stats);
    stats
}
