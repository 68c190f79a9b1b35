//! Error taxonomy for FaceBridge

use thiserror::Error;

/// Coarse error classification carried in health snapshots.
///
/// Every crate-level error maps onto one of these kinds so the recovery
/// layer can reason about failures without knowing their concrete type.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
pub enum ErrorKind {
    /// Malformed rule definition; the rule is excluded
    Validation,
    /// Rule could not be evaluated this frame; default served
    Evaluation,
    /// Rule file missing or unreadable
    ConfigIo,
    /// Peer rejected a request or sent something we cannot parse
    Protocol,
    /// Socket or connection failure
    Transport,
    /// Unexpected internal fault
    Fatal,
}

impl ErrorKind {
    pub fn as_str(self) -> &'static str {
        match self {
            ErrorKind::Validation => "validation",
            ErrorKind::Evaluation => "evaluation",
            ErrorKind::ConfigIo => "config-io",
            ErrorKind::Protocol => "protocol",
            ErrorKind::Transport => "transport",
            ErrorKind::Fatal => "fatal",
        }
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Core FaceBridge errors
#[derive(Error, Debug)]
pub enum BridgeError {
    #[error("Invalid tracking frame: {0}")]
    InvalidFrame(String),
}

impl BridgeError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            BridgeError::InvalidFrame(_) => ErrorKind::Validation,
        }
    }
}

/// Result type for core FaceBridge operations
pub type BridgeResult<T> = Result<T, BridgeError>;
