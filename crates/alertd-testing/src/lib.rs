//! Test environment for alertd database-backed tests.
//!
//! Connects to the Postgres instance named by `TEST_DATABASE_URL`,
//! applies migrations, and offers fixtures over the alerts table. Suites
//! that need the database call [`TestEnv::from_env`] and return early
//! when it yields `None`, so the full test run passes on machines
//! without a reachable Postgres.
//!
//! Tests that assert on table-wide state (eligible counts, empty-table
//! behavior) should serialize themselves and call [`TestEnv::reset`]
//! first; the environment itself never truncates implicitly.

use std::time::Duration;

use alertd_core::{
    models::{Alert, AlertId, NewAlert},
    Repository,
};
use anyhow::{Context, Result};
use sqlx::{postgres::PgPoolOptions, PgPool};
use tracing_subscriber::EnvFilter;

/// Environment variable naming the test database.
pub const TEST_DATABASE_URL: &str = "TEST_DATABASE_URL";

/// Shared test infrastructure over one Postgres database.
pub struct TestEnv {
    pool: PgPool,
    repository: Repository,
}

impl TestEnv {
    /// Builds the environment from `TEST_DATABASE_URL`.
    ///
    /// Returns `Ok(None)` when the variable is unset, printing a skip
    /// notice, so callers can early-return without failing the suite.
    pub async fn from_env() -> Result<Option<Self>> {
        init_test_tracing();

        let Ok(url) = std::env::var(TEST_DATABASE_URL) else {
            eprintln!("skipping database test: {TEST_DATABASE_URL} is not set");
            return Ok(None);
        };

        let pool = PgPoolOptions::new()
            .max_connections(10)
            .acquire_timeout(Duration::from_secs(10))
            .connect(&url)
            .await
            .context("failed to connect to test database")?;

        alertd_core::run_migrations(&pool)
            .await
            .context("failed to apply migrations to test database")?;

        let repository = Repository::new(pool.clone());
        Ok(Some(Self { pool, repository }))
    }

    /// Returns a clone of the database pool.
    pub fn pool(&self) -> PgPool {
        self.pool.clone()
    }

    /// Returns the alerts repository.
    pub fn repository(&self) -> &Repository {
        &self.repository
    }

    /// Empties the alerts table for tests that assert on global state.
    pub async fn reset(&self) -> Result<()> {
        sqlx::query("TRUNCATE alerts RESTART IDENTITY")
            .execute(&self.pool)
            .await
            .context("failed to reset alerts table")?;
        Ok(())
    }

    /// Inserts an alert already marked for delivery.
    pub async fn insert_eligible_alert(&self, email: &str, symbol: &str, price: i64) -> Result<AlertId> {
        let id = self.insert_unscheduled_alert(email, symbol, price).await?;
        self.repository.mark_to_send(id).await.context("failed to mark alert to send")?;
        Ok(id)
    }

    /// Inserts an alert that is not yet eligible for delivery.
    pub async fn insert_unscheduled_alert(
        &self,
        email: &str,
        symbol: &str,
        price: i64,
    ) -> Result<AlertId> {
        let alert = NewAlert {
            email: email.to_string(),
            symbol: symbol.to_string(),
            price,
        };
        self.repository.create(&alert).await.context("failed to insert alert fixture")
    }

    /// Fetches one alert row.
    pub async fn find(&self, id: AlertId) -> Result<Alert> {
        self.repository.find(id).await.context("failed to fetch alert")
    }

    /// Counts rows currently eligible for claiming.
    pub async fn eligible_count(&self) -> Result<i64> {
        self.repository.count_eligible().await.context("failed to count eligible alerts")
    }

    /// Polls until the row is marked sent or the timeout elapses.
    ///
    /// Returns whether `sent_at` became non-null in time.
    pub async fn wait_for_sent(&self, id: AlertId, timeout: Duration) -> Result<bool> {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            if self.find(id).await?.sent_at.is_some() {
                return Ok(true);
            }
            if tokio::time::Instant::now() >= deadline {
                return Ok(false);
            }
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
    }
}

/// Initializes tracing once per test binary.
fn init_test_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("warn,alertd_core=debug,alertd_dispatch=debug")),
        )
        .with_test_writer()
        .try_init();
}
