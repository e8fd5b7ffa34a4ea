//! Per-wake-up claim loop.
//!
//! Each wake-up triggers one pass: claim at most one eligible row under
//! a locking read, hand the row and its open transaction to a spawned
//! delivery worker, and immediately try to claim the next. Claiming and
//! delivering overlap, so N eligible rows become N concurrent workers
//! rather than N serialized deliveries.

use std::sync::Arc;

use alertd_core::Repository;
use sqlx::PgPool;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::{
    error::{DispatchError, Result},
    sender::AlertSender,
    worker::DeliveryWorker,
};

/// Claims eligible rows and spawns a delivery worker per claim.
///
/// Cheap to clone: every wake-up gets its own pass as an independent
/// task, so a slow scan never delays processing of the next wake-up.
#[derive(Clone)]
pub struct Claimer {
    repository: Repository,
    sender: Arc<dyn AlertSender>,
    cancel: CancellationToken,
}

impl Claimer {
    /// Creates a claimer over the given pool and delivery channel.
    pub fn new(pool: PgPool, sender: Arc<dyn AlertSender>, cancel: CancellationToken) -> Self {
        Self { repository: Repository::new(pool), sender, cancel }
    }

    /// Claims rows until none remain, returning how many were claimed.
    ///
    /// Each iteration opens a fresh transaction and performs the
    /// lock-and-skip read. A returned row moves, with its open
    /// transaction, into a spawned [`DeliveryWorker`]; the empty
    /// transaction of a no-rows read is rolled back and the pass ends.
    /// Cancellation is checked between iterations only: workers already
    /// spawned run to their own commit or rollback.
    ///
    /// # Errors
    ///
    /// Returns error if a transaction cannot be started or the locking
    /// read fails. That aborts this pass only; the next wake-up scans
    /// again.
    pub async fn drain(&self) -> Result<usize> {
        let mut claimed = 0usize;

        loop {
            if self.cancel.is_cancelled() {
                debug!(claimed, "claim pass cancelled");
                break;
            }

            let mut tx = self
                .repository
                .begin()
                .await
                .map_err(|e| DispatchError::database(format!("failed to start transaction: {e}")))?;

            let Some(alert) = self
                .repository
                .claim_one(&mut tx)
                .await
                .map_err(|e| DispatchError::database(format!("claim read failed: {e}")))?
            else {
                // No eligible rows left: release the empty transaction.
                tx.rollback()
                    .await
                    .map_err(|e| DispatchError::database(format!("failed to release empty claim: {e}")))?;
                break;
            };

            claimed += 1;
            debug!(alert_id = %alert.id, "alert claimed");

            let worker = DeliveryWorker::new(self.repository.clone(), tx, alert, self.sender.clone());
            tokio::spawn(worker.deliver());
        }

        Ok(claimed)
    }
}
