use thiserror::Error;

/// Errors raised while building a [`Notifier`](crate::Notifier) or loading its configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Ping token must not be empty")]
    MissingToken,

    #[error("Max attempts must be at least 1")]
    ZeroAttempts,

    #[error("Timeout must be greater than zero")]
    ZeroTimeout,

    #[error("{0} environment variable is required")]
    MissingEnv(&'static str),

    #[error("{var} has invalid value '{value}'")]
    InvalidEnv { var: &'static str, value: String },

    #[error("HTTP client error: {0}")]
    Client(#[from] reqwest::Error),
}

/// Why a single ping attempt was not delivered.
///
/// Only used for log output. Every variant is retried the same way and the
/// caller only ever sees `false` once attempts run out.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DeliveryError {
    #[error("Unexpected status {0}")]
    Status(u16),

    #[error("Request timed out")]
    Timeout,

    #[error("Connection failed: {0}")]
    Connect(String),

    #[error("Request failed: {0}")]
    Request(String),
}
