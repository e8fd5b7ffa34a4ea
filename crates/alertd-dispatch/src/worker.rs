//! Delivery worker: one claimed row, one open transaction.
//!
//! The worker owns the transaction exclusively from spawn to its single
//! commit or rollback. Rolling back releases the row lock and leaves the
//! row eligible, so a failed delivery is retried by a future scan
//! without any explicit retry machinery. No failure here propagates to
//! the claim loop or the listener; outcomes are visible only in logs and
//! in the row's `sent_at` marker.

use std::sync::Arc;

use alertd_core::{models::Alert, Repository};
use sqlx::{Postgres, Transaction};
use tracing::{error, info};

use crate::sender::AlertSender;

/// Delivers one claimed alert and settles its transaction.
pub(crate) struct DeliveryWorker {
    repository: Repository,
    tx: Transaction<'static, Postgres>,
    alert: Alert,
    sender: Arc<dyn AlertSender>,
}

impl DeliveryWorker {
    pub(crate) fn new(
        repository: Repository,
        tx: Transaction<'static, Postgres>,
        alert: Alert,
        sender: Arc<dyn AlertSender>,
    ) -> Self {
        Self { repository, tx, alert, sender }
    }

    /// Runs the delivery to its single commit or rollback.
    ///
    /// A commit failure after a successful send leaves the row
    /// delivered but unmarked; it will be redelivered on a later scan.
    /// That at-least-once window is inherent to marking after sending
    /// and is logged explicitly when it opens.
    pub(crate) async fn deliver(mut self) {
        let alert_id = self.alert.id;
        info!(
            alert_id = %alert_id,
            email = %self.alert.email,
            symbol = %self.alert.symbol,
            "delivering alert"
        );

        if let Err(send_error) = self.sender.send(&self.alert).await {
            error!(alert_id = %alert_id, error = %send_error, "delivery failed, releasing claim");
            release(self.tx, &self.alert).await;
            return;
        }

        if let Err(mark_error) = self.repository.mark_sent(&mut self.tx, alert_id).await {
            error!(alert_id = %alert_id, error = %mark_error, "failed to mark alert sent, releasing claim");
            release(self.tx, &self.alert).await;
            return;
        }

        match self.tx.commit().await {
            Ok(()) => info!(alert_id = %alert_id, "alert delivered"),
            Err(commit_error) => {
                error!(
                    alert_id = %alert_id,
                    error = %commit_error,
                    "commit failed after successful send, alert may be redelivered"
                );
            },
        }
    }
}

/// Rolls back a claim, returning the row to the eligible pool.
async fn release(tx: Transaction<'static, Postgres>, alert: &Alert) {
    if let Err(rollback_error) = tx.rollback().await {
        // The lock still dies with the connection; the row stays eligible.
        error!(alert_id = %alert.id, error = %rollback_error, "failed to roll back claim");
    }
}
