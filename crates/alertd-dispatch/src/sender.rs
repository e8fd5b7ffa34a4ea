//! Delivery abstraction for the outbound alert channel.
//!
//! The coordination core does not care how an alert reaches its
//! recipient; it only needs a call that can take arbitrarily long and
//! fail. Production wires in whatever transport the deployment uses;
//! tests inject failing or recording doubles to drive the rollback and
//! retry paths.

use std::{future::Future, pin::Pin, time::Duration};

use alertd_core::models::Alert;
use thiserror::Error;
use tracing::info;

/// Default latency of the placeholder sender, matching an unhurried
/// external service round trip.
pub const DEFAULT_SEND_LATENCY: Duration = Duration::from_secs(3);

/// Failure reported by an [`AlertSender`].
#[derive(Debug, Clone, Error)]
#[error("alert delivery failed: {message}")]
pub struct SendError {
    /// Description of the failure.
    pub message: String,
}

impl SendError {
    /// Creates a send error from a message.
    pub fn new(message: impl Into<String>) -> Self {
        Self { message: message.into() }
    }
}

/// Performs the external delivery side effect for one alert.
///
/// Implementations must treat this as an arbitrary external-service
/// call with its own timeout discipline. The caller holds the row lock
/// for the duration: on `Err` the claim is rolled back and the row
/// retried on a future scan, on `Ok` the row is marked sent and
/// committed.
pub trait AlertSender: Send + Sync + 'static {
    /// Delivers one alert to its recipient.
    fn send<'a>(
        &'a self,
        alert: &'a Alert,
    ) -> Pin<Box<dyn Future<Output = std::result::Result<(), SendError>> + Send + 'a>>;
}

/// Placeholder sender that sleeps for a fixed latency and succeeds.
///
/// Stands in for the real outbound channel (email, SMS, push) while
/// exercising the full coordination protocol: the row lock is held for
/// the whole simulated round trip.
#[derive(Debug, Clone)]
pub struct FixedLatencySender {
    latency: Duration,
}

impl FixedLatencySender {
    /// Creates a sender with the given simulated latency.
    pub fn new(latency: Duration) -> Self {
        Self { latency }
    }
}

impl Default for FixedLatencySender {
    fn default() -> Self {
        Self::new(DEFAULT_SEND_LATENCY)
    }
}

impl AlertSender for FixedLatencySender {
    fn send<'a>(
        &'a self,
        alert: &'a Alert,
    ) -> Pin<Box<dyn Future<Output = std::result::Result<(), SendError>> + Send + 'a>> {
        Box::pin(async move {
            tokio::time::sleep(self.latency).await;
            info!(
                alert_id = %alert.id,
                email = %alert.email,
                symbol = %alert.symbol,
                "alert sent"
            );
            Ok(())
        })
    }
}

#[cfg(test)]
mod tests {
    use chrono::Utc;

    use super::*;

    #[tokio::test]
    async fn fixed_latency_sender_waits_then_succeeds() {
        let now = Utc::now();
        let alert = Alert {
            id: alertd_core::AlertId(1),
            email: "trader@example.com".to_string(),
            symbol: "ACME".to_string(),
            price: 100,
            marked_to_send_at: Some(now),
            sent_at: None,
            created_at: now,
            updated_at: now,
        };

        let sender = FixedLatencySender::new(Duration::from_millis(20));
        let start = std::time::Instant::now();
        sender.send(&alert).await.expect("placeholder send should succeed");
        assert!(start.elapsed() >= Duration::from_millis(20));
    }
}
