//! Health snapshots
//!
//! Both the transformation engine and the protocol client publish a
//! snapshot of their health. The recovery coordinator only ever reads them.

use std::time::SystemTime;

use serde::{Deserialize, Serialize};

use crate::ErrorKind;

/// Point-in-time health of one component
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct HealthSnapshot {
    pub is_healthy: bool,
    pub last_error_kind: Option<ErrorKind>,
    pub last_error_message: Option<String>,
    pub timestamp: SystemTime,
}

impl HealthSnapshot {
    pub fn healthy() -> Self {
        HealthSnapshot {
            is_healthy: true,
            last_error_kind: None,
            last_error_message: None,
            timestamp: SystemTime::now(),
        }
    }

    pub fn unhealthy(kind: ErrorKind, message: impl Into<String>) -> Self {
        HealthSnapshot {
            is_healthy: false,
            last_error_kind: Some(kind),
            last_error_message: Some(message.into()),
            timestamp: SystemTime::now(),
        }
    }

    /// Healthy snapshot that still remembers the last error seen
    pub fn recovered(previous: &HealthSnapshot) -> Self {
        HealthSnapshot {
            is_healthy: true,
            last_error_kind: previous.last_error_kind,
            last_error_message: previous.last_error_message.clone(),
            timestamp: SystemTime::now(),
        }
    }
}

impl Default for HealthSnapshot {
    fn default() -> Self {
        Self::healthy()
    }
}

/// Anything the recovery coordinator can watch
pub trait HealthSource {
    /// Stable component name used in logs and aggregate health
    fn component(&self) -> &'static str;

    fn health(&self) -> HealthSnapshot;
}
