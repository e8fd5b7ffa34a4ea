//! Core domain types for the alertd dispatch system.
//!
//! Provides the alert model, strongly-typed identifiers, configuration
//! loading, error handling, and the storage repository shared by the
//! notifier and listener roles. The dispatch crate builds on these
//! foundations; nothing here spawns tasks or holds long-lived state.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod config;
pub mod error;
pub mod models;
pub mod storage;

pub use config::Config;
pub use error::{CoreError, Result};
pub use models::{Alert, AlertId, NewAlert};
pub use storage::Repository;

/// Embedded schema migrations, applied at each role's startup.
pub static MIGRATOR: sqlx::migrate::Migrator = sqlx::migrate!("./migrations");

/// Applies pending migrations and logs the resulting schema version.
///
/// Both roles call this before doing any other database work. A failure
/// here is fatal: the role refuses to start against a schema it cannot
/// bring up to date.
///
/// # Errors
///
/// Returns error if a migration fails to apply.
pub async fn run_migrations(pool: &sqlx::PgPool) -> Result<()> {
    MIGRATOR
        .run(pool)
        .await
        .map_err(|e| CoreError::Migration(e.to_string()))?;

    let version = MIGRATOR.migrations.last().map_or(0, |m| m.version);
    tracing::info!(version, "database migrations applied");

    Ok(())
}
