//! Repository for alert row database operations.
//!
//! The claiming read is the sole synchronization point between listener
//! instances: `FOR UPDATE SKIP LOCKED` makes rows locked by a concurrent
//! claim invisible instead of blocking, so any number of processes can
//! scan the same table without ever returning the same row twice at
//! once. Correctness holds across independent processes because the
//! mutual exclusion lives in the database, not in process memory.

use sqlx::{PgPool, Postgres, Transaction};

use crate::{
    error::Result,
    models::{Alert, AlertId, NewAlert},
};

/// Repository for alert row database operations.
#[derive(Debug, Clone)]
pub struct Repository {
    pool: PgPool,
}

impl Repository {
    /// Creates a new repository instance.
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Returns a clone of the underlying database pool.
    pub fn pool(&self) -> PgPool {
        self.pool.clone()
    }

    /// Begins a new transaction.
    ///
    /// # Errors
    ///
    /// Returns error if a connection cannot be acquired from the pool.
    pub async fn begin(&self) -> Result<Transaction<'static, Postgres>> {
        Ok(self.pool.begin().await?)
    }

    /// Claims one eligible row under a non-blocking row lock.
    ///
    /// The eligibility predicate and the lock acquisition are one
    /// database operation: a row locked by a concurrent claim is
    /// skipped, not waited on. The returned row stays locked until
    /// `tx` commits or rolls back, so the caller must hand the open
    /// transaction to whatever finishes the delivery.
    ///
    /// No explicit ordering: any eligible row is acceptable, and all
    /// eligible rows are eventually returned by repeated claims.
    ///
    /// # Errors
    ///
    /// Returns error if the locking read fails.
    pub async fn claim_one(&self, tx: &mut Transaction<'static, Postgres>) -> Result<Option<Alert>> {
        let alert = sqlx::query_as::<_, Alert>(
            r#"
            SELECT id, email, symbol, price, marked_to_send_at, sent_at, created_at, updated_at
            FROM alerts
            WHERE marked_to_send_at IS NOT NULL
              AND sent_at IS NULL
            LIMIT 1
            FOR UPDATE SKIP LOCKED
            "#,
        )
        .fetch_optional(&mut **tx)
        .await?;

        Ok(alert)
    }

    /// Marks a claimed row as sent, inside the claiming transaction.
    ///
    /// Must run on the same transaction that holds the row lock; the
    /// caller's commit makes the state change and the lock release
    /// atomic.
    ///
    /// # Errors
    ///
    /// Returns error if the update fails.
    pub async fn mark_sent(
        &self,
        tx: &mut Transaction<'static, Postgres>,
        id: AlertId,
    ) -> Result<()> {
        sqlx::query("UPDATE alerts SET sent_at = now(), updated_at = now() WHERE id = $1")
            .bind(id)
            .execute(&mut **tx)
            .await?;

        Ok(())
    }

    /// Creates a new alert row in the unscheduled state.
    ///
    /// # Errors
    ///
    /// Returns error if the insert fails.
    pub async fn create(&self, alert: &NewAlert) -> Result<AlertId> {
        let id = sqlx::query_scalar::<_, AlertId>(
            r#"
            INSERT INTO alerts (email, symbol, price)
            VALUES ($1, $2, $3)
            RETURNING id
            "#,
        )
        .bind(&alert.email)
        .bind(&alert.symbol)
        .bind(alert.price)
        .fetch_one(&self.pool)
        .await?;

        Ok(id)
    }

    /// Marks a row for delivery, making it eligible for claiming.
    ///
    /// This is the external scheduler's half of the lifecycle; it lives
    /// here so fixtures and tooling exercise the same gate production
    /// uses.
    ///
    /// # Errors
    ///
    /// Returns error if the update fails.
    pub async fn mark_to_send(&self, id: AlertId) -> Result<()> {
        sqlx::query("UPDATE alerts SET marked_to_send_at = now(), updated_at = now() WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await?;

        Ok(())
    }

    /// Fetches one alert by id.
    ///
    /// # Errors
    ///
    /// Returns `CoreError::NotFound` if no such row exists.
    pub async fn find(&self, id: AlertId) -> Result<Alert> {
        let alert = sqlx::query_as::<_, Alert>(
            r#"
            SELECT id, email, symbol, price, marked_to_send_at, sent_at, created_at, updated_at
            FROM alerts
            WHERE id = $1
            "#,
        )
        .bind(id)
        .fetch_one(&self.pool)
        .await?;

        Ok(alert)
    }

    /// Counts rows currently eligible for claiming.
    ///
    /// # Errors
    ///
    /// Returns error if the query fails.
    pub async fn count_eligible(&self) -> Result<i64> {
        let count = sqlx::query_scalar::<_, i64>(
            "SELECT COUNT(*) FROM alerts WHERE marked_to_send_at IS NOT NULL AND sent_at IS NULL",
        )
        .fetch_one(&self.pool)
        .await?;

        Ok(count)
    }
}
