//! Notification connection monitor.
//!
//! Owns the channel subscription and classifies every receive outcome.
//! Ordinary connection churn is logged and left to the driver, which
//! re-establishes the subscription on the next receive. Only an
//! attempt-failed outcome (the driver could not bring a connection back
//! at all, e.g. DNS or auth failure) is escalated; one escalation is
//! enough to end the listener, so the failure channel is bounded and the
//! send is best-effort.

use std::time::Duration;

use sqlx::postgres::PgListener;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, warn};

use crate::error::DispatchError;

/// Capacity of the escalated-failure channel. One escalation already
/// enters the fatal path; later ones may be dropped.
pub(crate) const FAILURE_CHANNEL_CAPACITY: usize = 2;

/// Capacity of the wake-up channel. Events are content-free, so a full
/// channel coalesces: one queued wake-up forces the same full re-scan
/// that ten would.
pub(crate) const WAKEUP_CHANNEL_CAPACITY: usize = 16;

/// Content-free signal that eligible work may exist.
#[derive(Debug, Clone, Copy)]
pub(crate) struct WakeupEvent;

/// Connection lifecycle classification derived from receive outcomes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ConnectionHealth {
    /// Subscription delivered a notification.
    Connected,
    /// Connection dropped; the driver reconnects on the next receive.
    Reconnecting,
    /// The driver could not re-establish the connection.
    AttemptFailed,
}

/// Maintains the subscription and forwards wake-ups to the listener.
pub(crate) struct ConnectionMonitor {
    listener: PgListener,
    channel: String,
    wakeup_tx: mpsc::Sender<WakeupEvent>,
    failure_tx: mpsc::Sender<DispatchError>,
    min_reconnect_interval: Duration,
    max_reconnect_interval: Duration,
    cancel: CancellationToken,
}

impl ConnectionMonitor {
    pub(crate) fn new(
        listener: PgListener,
        channel: String,
        wakeup_tx: mpsc::Sender<WakeupEvent>,
        failure_tx: mpsc::Sender<DispatchError>,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            listener,
            channel,
            wakeup_tx,
            failure_tx,
            min_reconnect_interval: crate::DEFAULT_MIN_RECONNECT_INTERVAL,
            max_reconnect_interval: crate::DEFAULT_MAX_RECONNECT_INTERVAL,
            cancel,
        }
    }

    /// Receives until cancelled or the subscription fails for good.
    ///
    /// Never blocks the listener run loop: wake-ups and escalations are
    /// both non-blocking sends.
    pub(crate) async fn run(mut self) {
        let mut backoff = self.min_reconnect_interval;

        loop {
            let outcome = tokio::select! {
                () = self.cancel.cancelled() => break,
                received = self.listener.try_recv() => received,
            };

            match classify(&outcome) {
                ConnectionHealth::Connected => {
                    backoff = self.min_reconnect_interval;
                    debug!(channel = %self.channel, "wake-up received");
                    match self.wakeup_tx.try_send(WakeupEvent) {
                        Ok(()) => {},
                        Err(mpsc::error::TrySendError::Full(_)) => {
                            // A queued wake-up already forces a full re-scan.
                            debug!("wake-up channel full, coalescing");
                        },
                        Err(mpsc::error::TrySendError::Closed(_)) => break,
                    }
                },
                ConnectionHealth::Reconnecting => {
                    warn!(
                        channel = %self.channel,
                        retry_in_secs = backoff.as_secs(),
                        "notification connection lost, waiting to reconnect"
                    );
                    tokio::select! {
                        () = tokio::time::sleep(backoff) => {}
                        () = self.cancel.cancelled() => break,
                    }
                    backoff = next_backoff(backoff, self.max_reconnect_interval);
                },
                ConnectionHealth::AttemptFailed => {
                    let message = outcome
                        .err()
                        .map_or_else(|| "unknown subscription failure".to_string(), |e| e.to_string());
                    error!(channel = %self.channel, error = %message, "notification reconnect failed");
                    // Best-effort: a full channel means an escalation is
                    // already in flight.
                    let _ = self.failure_tx.try_send(DispatchError::subscription(message));
                    break;
                },
            }
        }

        debug!(channel = %self.channel, "connection monitor stopped");
    }
}

/// Classifies a receive outcome into a connection health state.
///
/// `Ok(Some(_))` is a live notification. `Ok(None)` means the connection
/// dropped and the driver will transparently reconnect on the next
/// receive (notifications sent in the gap are lost, which is fine: every
/// wake-up triggers a full re-scan). `Err(_)` means the reconnect
/// attempt itself failed.
fn classify<T>(outcome: &Result<Option<T>, sqlx::Error>) -> ConnectionHealth {
    match outcome {
        Ok(Some(_)) => ConnectionHealth::Connected,
        Ok(None) => ConnectionHealth::Reconnecting,
        Err(_) => ConnectionHealth::AttemptFailed,
    }
}

fn next_backoff(current: Duration, max: Duration) -> Duration {
    (current * 2).min(max)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn notification_classifies_as_connected() {
        let outcome: Result<Option<()>, sqlx::Error> = Ok(Some(()));
        assert_eq!(classify(&outcome), ConnectionHealth::Connected);
    }

    #[test]
    fn dropped_connection_classifies_as_reconnecting() {
        let outcome: Result<Option<()>, sqlx::Error> = Ok(None);
        assert_eq!(classify(&outcome), ConnectionHealth::Reconnecting);
    }

    #[test]
    fn receive_error_classifies_as_attempt_failed() {
        let outcome: Result<Option<()>, sqlx::Error> = Err(sqlx::Error::PoolClosed);
        assert_eq!(classify(&outcome), ConnectionHealth::AttemptFailed);
    }

    #[test]
    fn backoff_doubles_until_the_ceiling() {
        let max = Duration::from_secs(60);
        let first = next_backoff(Duration::from_secs(10), max);
        assert_eq!(first, Duration::from_secs(20));
        let second = next_backoff(first, max);
        assert_eq!(second, Duration::from_secs(40));
        let third = next_backoff(second, max);
        assert_eq!(third, Duration::from_secs(60));
        assert_eq!(next_backoff(third, max), max);
    }
}
