//! alertd — database-mediated alert dispatch.
//!
//! Runs one of two roles against a shared Postgres database: the
//! `notifier` broadcasts periodic wake-ups on a notification channel,
//! and each `listener` reacts to wake-ups by claiming and delivering
//! eligible alert rows. Any number of listener processes can run side
//! by side; they coordinate purely through row locks.

use std::{sync::Arc, time::Duration};

use alertd_core::Config;
use alertd_dispatch::{FixedLatencySender, Listener, Notifier, ShutdownHandle};
use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use sqlx::postgres::PgPoolOptions;
use tracing::info;

#[derive(Parser)]
#[command(name = "alertd", about = "Database-mediated alert dispatch", version)]
struct Cli {
    #[command(subcommand)]
    role: Role,
}

#[derive(Subcommand)]
enum Role {
    /// Broadcast periodic wake-up events on the notification channel.
    Notifier,
    /// Claim and deliver eligible alerts on each wake-up.
    Listener,
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();

    let cli = Cli::parse();
    let config = Config::from_env();
    info!(
        database_url = %config.database_url_masked(),
        channel = %config.channel,
        max_connections = config.max_connections,
        "configuration loaded"
    );

    let pool = create_database_pool(&config).await?;
    info!("database connection pool established");

    alertd_core::run_migrations(&pool).await.context("failed to run database migrations")?;

    match cli.role {
        Role::Notifier => {
            let notifier = Notifier::new(pool, &config);
            spawn_shutdown_monitor(notifier.shutdown_handle());
            notifier.run().await.context("notifier terminated with error")?;
        },
        Role::Listener => {
            let sender = Arc::new(FixedLatencySender::default());
            let mut listener = Listener::connect(pool, &config, sender)
                .await
                .context("failed to start listener")?;
            spawn_shutdown_monitor(listener.shutdown_handle());
            listener.run().await.context("listener terminated with error")?;
        },
    }

    info!("alertd shutdown complete");
    Ok(())
}

/// Initializes tracing with environment-based configuration.
fn init_tracing() {
    use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new("info,alertd=debug,alertd_core=debug,alertd_dispatch=debug"))
        .expect("Invalid RUST_LOG environment variable");

    let fmt_layer = fmt::layer().with_target(true);

    tracing_subscriber::registry().with(filter).with(fmt_layer).init();
}

/// Creates the database connection pool with bounded connect retries.
///
/// Persistent unreachability is fatal: the role refuses to start rather
/// than running against a store it cannot reach.
async fn create_database_pool(config: &Config) -> Result<sqlx::PgPool> {
    let mut retries = 0;
    const MAX_RETRIES: u32 = 5;
    const RETRY_DELAY: Duration = Duration::from_secs(2);

    loop {
        match PgPoolOptions::new()
            .max_connections(config.max_connections)
            .acquire_timeout(Duration::from_secs(10))
            .connect(&config.database_url())
            .await
        {
            Ok(pool) => {
                sqlx::query("SELECT 1")
                    .fetch_one(&pool)
                    .await
                    .context("failed to verify database connection")?;

                return Ok(pool);
            },
            Err(_e) if retries < MAX_RETRIES => {
                retries += 1;
                info!(
                    attempt = retries,
                    max_retries = MAX_RETRIES,
                    "database connection failed, retrying..."
                );
                tokio::time::sleep(RETRY_DELAY).await;
            },
            Err(e) => {
                return Err(e).context("failed to create database connection pool after retries");
            },
        }
    }
}

/// Translates an OS termination request into a role stop.
fn spawn_shutdown_monitor(handle: ShutdownHandle) {
    tokio::spawn(async move {
        shutdown_signal().await;
        info!("shutdown signal received, stopping");
        handle.stop();
    });
}

/// Waits for shutdown signal (CTRL+C or SIGTERM).
async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c().await.expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {
            info!("received CTRL+C signal");
        },
        () = terminate => {
            info!("received SIGTERM signal");
        },
    }
}
