//! Protocol client errors

use std::time::Duration;

use facebridge_core::ErrorKind;
use facebridge_transport::TransportError;
use thiserror::Error;

use crate::ConnectionState;

/// API error: the user denied the token request in the peer's UI
pub const API_ERROR_USER_DENIED: i64 = 50;
/// API error: a parameter with this name already exists
pub const API_ERROR_PARAMETER_EXISTS: i64 = 352;

/// Protocol client errors
#[derive(Error, Debug)]
pub enum ClientError {
    #[error("Client not ready (state: {0})")]
    NotReady(ConnectionState),

    #[error("Backoff pending for another {0:?}")]
    BackoffPending(Duration),

    #[error("No endpoint configured and discovery found no peer")]
    NoEndpoint,

    #[error("Peer discovery timed out")]
    DiscoveryTimeout,

    #[error("Authentication denied by peer")]
    AuthenticationDenied,

    #[error("Authentication token rejected: {0}")]
    AuthenticationRejected(String),

    #[error("Handshake timed out after {0:?}")]
    HandshakeTimeout(Duration),

    #[error("Peer API error {error_id}: {message}")]
    Api { error_id: i64, message: String },

    #[error("Unexpected response '{found}' (expected '{expected}')")]
    UnexpectedResponse { expected: String, found: String },

    #[error("Malformed peer message: {0}")]
    Malformed(String),

    #[error("Token store error: {0}")]
    TokenStore(String),

    #[error("Operation cancelled")]
    Cancelled,

    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),
}

impl ClientError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            ClientError::Transport(e) => e.kind(),
            ClientError::DiscoveryTimeout
            | ClientError::NoEndpoint
            | ClientError::HandshakeTimeout(_) => ErrorKind::Transport,
            ClientError::TokenStore(_) => ErrorKind::ConfigIo,
            ClientError::NotReady(_) | ClientError::BackoffPending(_) | ClientError::Cancelled => {
                ErrorKind::Transport
            }
            ClientError::AuthenticationDenied
            | ClientError::AuthenticationRejected(_)
            | ClientError::Api { .. }
            | ClientError::UnexpectedResponse { .. }
            | ClientError::Malformed(_) => ErrorKind::Protocol,
        }
    }
}

/// Result type for client operations
pub type ClientResult<T> = std::result::Result<T, ClientError>;
