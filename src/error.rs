//! Error types for the event admin.

use thiserror::Error;
use uuid::Uuid;

/// Type alias for Results in this crate
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for tokio-event-admin
#[derive(Error, Debug)]
pub enum Error {
    /// Event topic is empty or otherwise unusable
    #[error("Invalid event topic: {0:?}")]
    InvalidTopic(String),

    /// Subscription topic pattern is malformed
    #[error("Invalid topic pattern {pattern:?}: {reason}")]
    InvalidTopicPattern {
        /// The offending pattern
        pattern: String,
        /// Why it was rejected
        reason: String,
    },

    /// Subscription filter expression is malformed
    #[error("Invalid filter {expr:?}: {reason}")]
    InvalidFilter {
        /// The offending expression
        expr: String,
        /// Why it was rejected
        reason: String,
    },

    /// Handler not found (never registered, or already unregistered)
    #[error("Handler not found: {id}")]
    HandlerNotFound {
        /// Handler id
        id: Uuid,
    },

    /// Event handler returned an error
    #[error("Handler error: {0}")]
    HandlerError(String),

    /// Event handler panicked
    #[error("Handler panicked: {0}")]
    HandlerPanicked(String),

    /// Event admin is shutting down
    #[error("Event admin is shutting down")]
    ShuttingDown,

    /// Delivery queue has no room for another job
    #[error("Delivery queue {key} is full")]
    QueueFull {
        /// Routing key of the queue
        key: String,
    },

    /// Delivery queue worker is gone
    #[error("Delivery queue {key} is closed")]
    QueueClosed {
        /// Routing key of the queue
        key: String,
    },

    /// Serialization error
    #[error("Serialization error: {0}")]
    SerializationError(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    ConfigError(String),

    /// Generic internal error
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Create a new internal error with a custom message
    pub fn internal(msg: impl Into<String>) -> Self {
        Error::Internal(msg.into())
    }

    /// Create a new handler error
    pub fn handler(msg: impl Into<String>) -> Self {
        Error::HandlerError(msg.into())
    }

    /// Check if this error indicates the system is shutting down
    pub fn is_shutdown(&self) -> bool {
        matches!(self, Error::ShuttingDown)
    }

    /// Check if this error is a subscription configuration fault
    pub fn is_configuration_fault(&self) -> bool {
        matches!(
            self,
            Error::InvalidTopicPattern { .. } | Error::InvalidFilter { .. }
        )
    }

    /// Check if this is a queue-related error
    pub fn is_queue_error(&self) -> bool {
        matches!(self, Error::QueueFull { .. } | Error::QueueClosed { .. })
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::SerializationError(err.to_string())
    }
}
