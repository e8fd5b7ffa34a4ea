//! Error types for dispatch operations.
//!
//! The taxonomy separates role-terminating failures (a broken publish
//! connection, an unrecoverable subscription) from per-row failures that
//! abort at most one claim pass and heal on the next wake-up.

use thiserror::Error;

/// Result type alias for dispatch operations.
pub type Result<T> = std::result::Result<T, DispatchError>;

/// Error types for the notifier and listener roles.
#[derive(Debug, Clone, Error)]
pub enum DispatchError {
    /// Publishing a wake-up failed. A broken connection cannot be
    /// repaired by looping, so the notifier treats this as fatal.
    #[error("failed to publish wake-up on channel {channel}: {message}")]
    Publish {
        /// Channel the publish targeted.
        channel: String,
        /// Underlying error message.
        message: String,
    },

    /// The notification subscription failed beyond the driver's own
    /// reconnect logic.
    #[error("notification subscription failed: {message}")]
    Subscription {
        /// Underlying error message.
        message: String,
    },

    /// A database operation inside a claim pass failed.
    #[error("database error: {message}")]
    Database {
        /// Underlying error message.
        message: String,
    },

    /// `run` was invoked on a listener that is already running.
    #[error("listener is already running")]
    AlreadyRunning,
}

impl DispatchError {
    /// Creates a publish error.
    pub fn publish(channel: impl Into<String>, message: impl ToString) -> Self {
        Self::Publish { channel: channel.into(), message: message.to_string() }
    }

    /// Creates a subscription error.
    pub fn subscription(message: impl ToString) -> Self {
        Self::Subscription { message: message.to_string() }
    }

    /// Creates a database error.
    pub fn database(message: impl ToString) -> Self {
        Self::Database { message: message.to_string() }
    }

    /// Whether this error terminates the whole role.
    ///
    /// Database errors abort only the claim pass that hit them; the next
    /// wake-up scans again. Everything else ends `run`.
    pub fn is_fatal(&self) -> bool {
        match self {
            Self::Publish { .. } | Self::Subscription { .. } | Self::AlreadyRunning => true,
            Self::Database { .. } => false,
        }
    }
}
