//! Runtime errors

use thiserror::Error;

/// Startup configuration problems. Only these fail fast.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Invalid port {0}")]
    InvalidPort(u16),

    #[error("No endpoint: set host/port or enable discovery")]
    NoEndpoint,

    #[error("maxPasses must be at least 1")]
    InvalidPasses,

    #[error("Invalid plugin identity: {0}")]
    InvalidPlugin(String),

    #[error("Invalid parameter prefix '{0}'")]
    InvalidPrefix(String),

    #[error("Invalid backoff: {0}")]
    InvalidBackoff(String),

    #[error("{0} must be greater than zero")]
    ZeroDuration(&'static str),

    #[error("frameBuffer must be at least 1")]
    InvalidFrameBuffer,

    #[error("Malformed configuration: {0}")]
    Parse(#[from] serde_json::Error),
}

/// Runtime errors
#[derive(Error, Debug)]
pub enum RuntimeError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Logging setup failed: {0}")]
    Logging(String),
}

/// Result type for runtime setup
pub type RuntimeResult<T> = std::result::Result<T, RuntimeError>;
