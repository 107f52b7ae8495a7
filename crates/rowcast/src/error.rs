//! Error types for Rowcast.

use crate::delivery::DeliveryMode;
use thiserror::Error;

/// Rowcast error type.
#[derive(Error, Debug)]
pub enum ProducerError {
    /// Redis connection or operation error
    #[error("Redis error: {0}")]
    Redis(#[from] redis::RedisError),

    /// Communication failure while issuing a send
    #[error("Transport error: {0}")]
    Transport(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// IO error (position file, event input)
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON encoding or decoding error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// A send was accepted but the backend later reported a failure.
    #[error("Asynchronous {mode} delivery to '{channel}' failed: {message}")]
    AsyncDelivery {
        mode: DeliveryMode,
        channel: String,
        message: String,
    },

    /// The producer has already been asked to stop
    #[error("Producer has been stopped")]
    Stopped,

    /// An earlier fatal error ended this producer
    #[error("Producer halted after a fatal error: {0}")]
    Halted(String),
}

impl ProducerError {
    /// Whether this is a transient communication error worth one more attempt.
    pub fn is_transient(&self) -> bool {
        matches!(self, ProducerError::Redis(_) | ProducerError::Transport(_))
    }
}

/// Result type for Rowcast operations.
pub type ProducerResult<T> = Result<T, ProducerError>;
