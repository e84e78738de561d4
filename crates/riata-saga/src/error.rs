//! Error types for the saga coordination domain.

use riata_core::Error as CoreError;

/// The result type used throughout riata-saga.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur while coordinating sagas.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// No participant of the given service has a live callback channel.
    ///
    /// This is an outage or deployment condition, distinct from a transient
    /// disconnect of one instance: there is nobody who could execute the
    /// compensating method.
    #[error("no callback found for service {service_name}")]
    NoCallbackFound {
        /// The service with no registered callback channel.
        service_name: String,
    },

    /// Sending a compensation command over a participant channel failed.
    #[error("callback send to {service_name}/{instance_id} failed: {message}")]
    CallbackSend {
        /// The service the send targeted.
        service_name: String,
        /// The instance the send targeted.
        instance_id: String,
        /// Description of the send failure.
        message: String,
    },

    /// The asynchronous compensation retry queue is no longer accepting work.
    #[error("compensation retry queue closed")]
    RetryQueueClosed,

    /// A row with the same key already exists.
    ///
    /// Best-effort reconciliation steps treat this as success-by-someone-else
    /// and move on.
    #[error("duplicate {table} row for key {key}")]
    DuplicateRow {
        /// The logical table the insert targeted.
        table: &'static str,
        /// The conflicting key, rendered for logging.
        key: String,
    },

    /// An event was used in a context that requires store-assigned identity.
    #[error("invalid event: {message}")]
    InvalidEvent {
        /// Description of what made the event unusable.
        message: String,
    },

    /// A configuration value was missing or malformed.
    #[error("configuration error: {message}")]
    Configuration {
        /// Description of the configuration failure.
        message: String,
    },

    /// An error from riata-core.
    #[error("core error: {0}")]
    Core(#[from] CoreError),
}

impl Error {
    /// Creates a new configuration error.
    #[must_use]
    pub fn configuration(message: impl Into<String>) -> Self {
        Self::Configuration {
            message: message.into(),
        }
    }

    /// Creates a new duplicate-row error.
    #[must_use]
    pub fn duplicate_row(table: &'static str, key: impl Into<String>) -> Self {
        Self::DuplicateRow {
            table,
            key: key.into(),
        }
    }

    /// Creates a new storage error (delegating to the core taxonomy).
    #[must_use]
    pub fn storage(message: impl Into<String>) -> Self {
        Self::Core(CoreError::storage(message))
    }

    /// Returns true if this error is a duplicate-row conflict.
    #[must_use]
    pub const fn is_duplicate(&self) -> bool {
        matches!(self, Self::DuplicateRow { .. })
    }
}
