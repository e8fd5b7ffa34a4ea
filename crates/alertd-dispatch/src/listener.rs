//! Listener role: subscribe, wake, claim, repeat.
//!
//! The run loop owns nothing but channels and a cancellation token. Each
//! received wake-up spawns an independent claim pass; an escalated
//! subscription failure ends the role with that error, which is how an
//! unrecoverable connection problem terminates the listener instead of
//! leaving it looping blind against a channel it can no longer read.

use std::sync::Arc;

use alertd_core::Config;
use sqlx::{postgres::PgListener, PgPool};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use crate::{
    claim::Claimer,
    error::{DispatchError, Result},
    monitor::{ConnectionMonitor, WakeupEvent, FAILURE_CHANNEL_CAPACITY, WAKEUP_CHANNEL_CAPACITY},
    sender::AlertSender,
    ShutdownHandle,
};

/// Claims and delivers eligible alerts in response to wake-up events.
pub struct Listener {
    claimer: Claimer,
    channel: String,
    monitor: Option<ConnectionMonitor>,
    wakeup_rx: mpsc::Receiver<WakeupEvent>,
    failure_rx: mpsc::Receiver<DispatchError>,
    failure_tx: mpsc::Sender<DispatchError>,
    cancel: CancellationToken,
}

impl Listener {
    /// Establishes the channel subscription and prepares the run loop.
    ///
    /// Subscribing happens here, at construction: a listener that cannot
    /// reach the notification channel refuses to start rather than
    /// starting deaf.
    ///
    /// # Errors
    ///
    /// Returns `DispatchError::Subscription` if the subscription cannot
    /// be established.
    pub async fn connect(
        pool: PgPool,
        config: &Config,
        sender: Arc<dyn AlertSender>,
    ) -> Result<Self> {
        let mut pg_listener = PgListener::connect_with(&pool)
            .await
            .map_err(|e| DispatchError::subscription(format!("failed to connect: {e}")))?;
        pg_listener
            .listen(&config.channel)
            .await
            .map_err(|e| {
                DispatchError::subscription(format!("failed to listen on {}: {e}", config.channel))
            })?;

        let (wakeup_tx, wakeup_rx) = mpsc::channel(WAKEUP_CHANNEL_CAPACITY);
        let (failure_tx, failure_rx) = mpsc::channel(FAILURE_CHANNEL_CAPACITY);
        let cancel = CancellationToken::new();

        let monitor = ConnectionMonitor::new(
            pg_listener,
            config.channel.clone(),
            wakeup_tx,
            failure_tx.clone(),
            cancel.clone(),
        );

        Ok(Self {
            claimer: Claimer::new(pool, sender, cancel.clone()),
            channel: config.channel.clone(),
            monitor: Some(monitor),
            wakeup_rx,
            failure_rx,
            failure_tx,
            cancel,
        })
    }

    /// Returns a handle that stops a running `run` promptly.
    pub fn shutdown_handle(&self) -> ShutdownHandle {
        ShutdownHandle::new(self.cancel.clone())
    }

    /// Receives wake-ups and dispatches claim passes until stopped.
    ///
    /// Starts with one unprompted claim pass: rows that became eligible
    /// while no listener was subscribed are only discovered by scanning.
    /// Returns `Ok(())` on a requested stop and the escalated error if
    /// the subscription fails beyond recovery.
    ///
    /// # Errors
    ///
    /// Returns `DispatchError::AlreadyRunning` if called twice, or the
    /// escalated subscription failure.
    pub async fn run(&mut self) -> Result<()> {
        let monitor = self.monitor.take().ok_or(DispatchError::AlreadyRunning)?;

        info!(channel = %self.channel, "listener running");
        tokio::spawn(monitor.run());

        self.spawn_claim_pass();

        loop {
            tokio::select! {
                () = self.cancel.cancelled() => {
                    info!("listener stopped");
                    return Ok(());
                }
                escalated = self.failure_rx.recv() => {
                    if let Some(failure) = escalated {
                        error!(error = %failure, "unrecoverable subscription failure");
                        return Err(failure);
                    }
                }
                event = self.wakeup_rx.recv() => match event {
                    Some(WakeupEvent) => self.spawn_claim_pass(),
                    None => {
                        // Monitor gone: either it escalated, was cancelled,
                        // or the run loop fell behind its own channels.
                        if let Ok(failure) = self.failure_rx.try_recv() {
                            error!(error = %failure, "unrecoverable subscription failure");
                            return Err(failure);
                        }
                        if self.cancel.is_cancelled() {
                            info!("listener stopped");
                            return Ok(());
                        }
                        return Err(DispatchError::subscription(
                            "notification stream ended unexpectedly",
                        ));
                    },
                },
            }
        }
    }

    /// Spawns one claim pass as an independent task.
    ///
    /// A slow or stuck pass never delays handling of the next wake-up;
    /// passes racing each other is harmless because the locking read
    /// makes concurrently claimed rows invisible to one another.
    fn spawn_claim_pass(&self) {
        let claimer = self.claimer.clone();
        tokio::spawn(async move {
            match claimer.drain().await {
                Ok(claimed) => debug!(claimed, "claim pass finished"),
                Err(pass_error) => error!(error = %pass_error, "claim pass aborted"),
            }
        });
    }
}
