//! Claim-and-deliver coordination over a shared Postgres store.
//!
//! Two roles cooperate through the database and nothing else. The
//! notifier publishes a content-free wake-up on a notification channel
//! at a fixed interval. Each listener subscribes to that channel and, on
//! every wake-up, re-scans for eligible alert rows, claiming them one at
//! a time with `FOR UPDATE SKIP LOCKED` and handing each open
//! transaction to a concurrent delivery worker.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────┐  NOTIFY   ┌──────────────┐  wake-up  ┌────────────┐
//! │ Notifier │──────────▶│ Connection   │──────────▶│ Listener   │
//! │ (loop)   │  channel  │ Monitor      │  channel  │ run loop   │
//! └──────────┘           └──────────────┘           └─────┬──────┘
//!                              │ attempt-failed           │ spawn
//!                              ▼                          ▼
//!                        fatal escalation           ┌────────────┐
//!                                                   │ Claim Loop │──▶ one
//!                                                   └────────────┘    Delivery
//!                                                                     Worker
//!                                                                     per row
//! ```
//!
//! # Coordination guarantees
//!
//! - **At most one claimant per row.** The claiming read selects and
//!   locks atomically; rows locked elsewhere are skipped, never waited
//!   on or double-returned. This holds across independent processes.
//! - **Failure releases the claim.** A failed delivery rolls back the
//!   claiming transaction, so the row stays eligible and is retried on a
//!   future scan. There is no retry counter: a permanently failing row
//!   retries on every wake-up.
//! - **At-least-once, not exactly-once.** A crash between a successful
//!   send and the commit marking it sent causes redelivery.
//! - **Cooperative shutdown.** Stop signals are observed between
//!   iterations, never mid-transaction; in-flight workers always run to
//!   their own commit or rollback.

pub mod claim;
pub mod error;
pub mod listener;
mod monitor;
pub mod notifier;
pub mod sender;
mod worker;

use std::time::Duration;

use tokio_util::sync::CancellationToken;

pub use claim::Claimer;
pub use error::{DispatchError, Result};
pub use listener::Listener;
pub use notifier::Notifier;
pub use sender::{AlertSender, FixedLatencySender, SendError};

/// Default minimum delay before retrying a lost notification connection.
pub const DEFAULT_MIN_RECONNECT_INTERVAL: Duration = Duration::from_secs(10);

/// Default ceiling for the reconnect delay.
pub const DEFAULT_MAX_RECONNECT_INTERVAL: Duration = Duration::from_secs(60);

/// Cloneable handle that requests a running role to stop.
///
/// Safe to call from any task, any number of times; the first call wins
/// and the rest are no-ops. Stopping is cooperative: the role returns
/// from `run` once it reaches its next cancellation check, without
/// waiting out a pending interval.
#[derive(Debug, Clone)]
pub struct ShutdownHandle {
    token: CancellationToken,
}

impl ShutdownHandle {
    pub(crate) fn new(token: CancellationToken) -> Self {
        Self { token }
    }

    /// Requests the owning role to stop.
    pub fn stop(&self) {
        self.token.cancel();
    }
}
