//! Tracing subscriber setup
//!
//! Filter precedence: `RUST_LOG`, then the configured directive. WebSocket
//! internals are held at `warn` unless `RUST_LOG` says otherwise.

use serde::{Deserialize, Serialize};
use tracing_subscriber::EnvFilter;

use crate::{RuntimeError, RuntimeResult};

const QUIET_DEPENDENCIES: &str = "tungstenite=warn,tokio_tungstenite=warn";

/// Console output format
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum LogFormat {
    /// Multi-line human output
    Pretty,
    /// Single-line human output
    #[default]
    Compact,
    /// One JSON object per event
    Json,
}

/// Logging configuration
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct LogConfig {
    pub format: LogFormat,
    /// Default filter directive, e.g. `info` or `facebridge_client=debug`
    pub filter: String,
}

impl Default for LogConfig {
    fn default() -> Self {
        LogConfig {
            format: LogFormat::Compact,
            filter: "info".to_string(),
        }
    }
}

/// Filter from `RUST_LOG`, else `default_directive` plus dependency quieting
pub fn build_filter(default_directive: &str) -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        let directive = if default_directive.trim().is_empty() {
            "info"
        } else {
            default_directive
        };
        EnvFilter::new(format!("{},{}", directive, QUIET_DEPENDENCIES))
    })
}

/// Install the global subscriber. Fails if one is already installed.
pub fn init(config: &LogConfig) -> RuntimeResult<()> {
    let filter = build_filter(&config.filter);
    let builder = tracing_subscriber::fmt().with_env_filter(filter);

    let result = match config.format {
        LogFormat::Pretty => builder.pretty().try_init(),
        LogFormat::Compact => builder.compact().with_target(false).try_init(),
        LogFormat::Json => builder.json().with_current_span(false).try_init(),
    };
    result.map_err(|e| RuntimeError::Logging(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_serde() {
        let config: LogConfig = serde_json::from_str(r#"{"format": "json"}"#).unwrap();
        assert_eq!(config.format, LogFormat::Json);
        assert_eq!(config.filter, "info");
    }

    #[test]
    fn test_second_init_fails() {
        let config = LogConfig::default();
        // Another test may have installed one already; either way the
        // second call must report an error instead of panicking
        let _ = init(&config);
        assert!(init(&config).is_err());
    }
}
