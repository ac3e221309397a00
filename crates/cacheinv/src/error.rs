//! Error types for the invalidation bus.

use thiserror::Error;

/// Errors raised by transports, connections and configuration loading.
///
/// Most bus-level operations never surface these to callers: connection
/// failures degrade to `false`/`0` results and are only logged. The
/// exceptions are [`InvalidationError::Configuration`] from
/// `Connection::get_config` and errors from configuration loading.
#[derive(Debug, Error)]
pub enum InvalidationError {
    #[error("Redis connection error: {0}")]
    Connection(String),

    #[error("Redis configuration error: {0}")]
    Configuration(String),

    #[error("Redis subscribe error: {0}")]
    Subscribe(String),

    #[error("Redis publish error: {0}")]
    Publish(String),

    #[error("Redis command error: {0}")]
    Command(String),

    #[error("Redis pool error: {0}")]
    Pool(String),

    #[error("Notifier error: {0}")]
    Notifier(String),

    #[error("Config error: {0}")]
    Config(String),

    #[error("Transport unavailable")]
    Unavailable,
}

impl From<config::ConfigError> for InvalidationError {
    fn from(e: config::ConfigError) -> Self {
        InvalidationError::Config(e.to_string())
    }
}

pub type InvalidationResult<T> = Result<T, InvalidationError>;
