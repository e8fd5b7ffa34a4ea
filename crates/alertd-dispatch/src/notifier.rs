//! Periodic wake-up broadcaster.
//!
//! Publishes a content-free notification on the configured channel at a
//! fixed interval, forever, until stopped. The event carries no payload
//! on purpose: listeners always re-derive eligible work from store
//! state, which sidesteps lost and duplicate notification concerns
//! entirely.

use std::time::Duration;

use alertd_core::Config;
use sqlx::PgPool;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::{
    error::{DispatchError, Result},
    ShutdownHandle,
};

/// Broadcasts wake-up events on the notification channel.
pub struct Notifier {
    pool: PgPool,
    channel: String,
    interval: Duration,
    cancel: CancellationToken,
}

impl Notifier {
    /// Creates a notifier publishing on the configured channel.
    pub fn new(pool: PgPool, config: &Config) -> Self {
        Self {
            pool,
            channel: config.channel.clone(),
            interval: config.notify_interval,
            cancel: CancellationToken::new(),
        }
    }

    /// Returns a handle that stops a running `run` promptly.
    pub fn shutdown_handle(&self) -> ShutdownHandle {
        ShutdownHandle::new(self.cancel.clone())
    }

    /// Publishes a wake-up every interval until stopped.
    ///
    /// Returns `Ok(())` on a requested stop. A publish failure is fatal
    /// and returned immediately: a connection that cannot carry a
    /// NOTIFY will not be repaired by publishing harder. The interval
    /// wait is interruptible, so shutdown never waits out a full
    /// pending interval.
    ///
    /// # Errors
    ///
    /// Returns `DispatchError::Publish` if a broadcast fails.
    pub async fn run(&self) -> Result<()> {
        info!(
            channel = %self.channel,
            interval_secs = self.interval.as_secs(),
            "notifier running"
        );

        loop {
            debug!(channel = %self.channel, "publishing wake-up");
            sqlx::query("SELECT pg_notify($1, '')")
                .bind(&self.channel)
                .execute(&self.pool)
                .await
                .map_err(|e| DispatchError::publish(&self.channel, e))?;

            tokio::select! {
                () = tokio::time::sleep(self.interval) => {}
                () = self.cancel.cancelled() => {
                    info!("notifier stopped");
                    return Ok(());
                }
            }
        }
    }
}
