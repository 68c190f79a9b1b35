//! Transport errors

use std::time::Duration;

use facebridge_core::ErrorKind;
use thiserror::Error;

/// Errors from message channels and discovery
#[derive(Error, Debug)]
pub enum TransportError {
    #[error("Connection to {url} failed: {reason}")]
    Connect { url: String, reason: String },

    #[error("Channel closed by peer")]
    Closed,

    #[error("Send failed: {0}")]
    Send(String),

    #[error("Receive failed: {0}")]
    Receive(String),

    #[error("Timed out after {0:?}")]
    Timeout(Duration),

    #[error("Operation cancelled")]
    Cancelled,

    #[error("Malformed discovery announcement: {0}")]
    Announcement(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl TransportError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            TransportError::Announcement(_) => ErrorKind::Protocol,
            _ => ErrorKind::Transport,
        }
    }
}

/// Result type for transport operations
pub type TransportResult<T> = std::result::Result<T, TransportError>;
