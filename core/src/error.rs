//! Error taxonomy.
//!
//! - [`BrokerError`]: a single broker-client operation failed (collaborator level).
//! - [`ConnectionError`]: the connection manager could not hand out a connection,
//!   either because establishment failed or because it has been closed.
//! - [`ConsumerError`]: an explicit consumer lifecycle call failed, either on the
//!   queue-existence precondition or while registering with the broker.
//! - [`ConfigError`]: configuration could not be loaded or is invalid.
//!
//! Failures raised by message callbacks are plain [`anyhow::Error`] values; they
//! are converted into negative acknowledgments and never surface here.

use std::time::Duration;
use thiserror::Error;

/// Errors reported by a broker client operation.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum BrokerError {
    /// A passive queue declaration found no such queue
    #[error("Queue '{0}' not found on broker")]
    QueueNotFound(String),

    /// The transport could not be opened or broke down
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    /// The channel (or its connection) is no longer usable
    #[error("Channel closed: {0}")]
    ChannelClosed(String),

    /// The operation did not complete in time
    #[error("Broker operation timed out after {0:?}")]
    Timeout(Duration),

    /// Any other broker-side failure
    #[error("Broker error: {0}")]
    Other(String),
}

impl BrokerError {
    /// Whether this error reports a missing queue.
    #[must_use]
    pub const fn is_not_found(&self) -> bool {
        matches!(self, Self::QueueNotFound(_))
    }
}

/// Errors returned by the connection manager.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConnectionError {
    /// The manager has been closed intentionally. Never retried.
    #[error("Attempt to retrieve a connection from a closed connection manager")]
    Closed,

    /// Establishing a new connection failed.
    ///
    /// Recoverable by retrying later.
    #[error("Failed to establish connection to {address}: {source}")]
    Establish {
        /// Broker address the attempt targeted
        address: String,
        /// Underlying broker failure
        #[source]
        source: BrokerError,
    },

    /// No usable connection exists right now (e.g. a hard disconnect was
    /// detected and reconnection is in progress).
    #[error("Unable to retrieve connection: {0}")]
    Unavailable(String),
}

impl ConnectionError {
    /// Whether retrying the operation later can succeed.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        !matches!(self, Self::Closed)
    }
}

/// Errors returned by consumer lifecycle operations.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConsumerError {
    /// A consumer's target queue is missing; nothing was activated.
    #[error("Precondition failed for queue '{queue}': {source}")]
    Precondition {
        /// Queue that failed the existence check
        queue: String,
        /// Underlying broker failure
        #[source]
        source: BrokerError,
    },

    /// Registering a consumer with the broker failed after preconditions passed.
    #[error("Failed to activate consumer for queue '{queue}': {source}")]
    Activation {
        /// Queue the consumer was being registered on
        queue: String,
        /// Underlying broker failure
        #[source]
        source: BrokerError,
    },

    /// No connection could be obtained.
    #[error(transparent)]
    Connection(#[from] ConnectionError),
}

/// Configuration errors.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    /// A variable was present but could not be parsed
    #[error("Invalid value for {key}: {value}")]
    InvalidValue {
        /// Variable name
        key: String,
        /// Offending raw value
        value: String,
    },

    /// Configuration validation failed
    #[error("Configuration validation failed: {0}")]
    Validation(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn closed_is_not_retryable() {
        assert!(!ConnectionError::Closed.is_retryable());
        assert!(ConnectionError::Unavailable("reconnecting".to_string()).is_retryable());
    }

    #[test]
    fn precondition_error_names_the_queue() {
        let err = ConsumerError::Precondition {
            queue: "orders".to_string(),
            source: BrokerError::QueueNotFound("orders".to_string()),
        };
        assert!(err.to_string().contains("'orders'"));
    }

    #[test]
    fn connection_error_converts_into_consumer_error() {
        let err: ConsumerError = ConnectionError::Closed.into();
        assert_eq!(err, ConsumerError::Connection(ConnectionError::Closed));
    }
}
