//! Bridge configuration
//!
//! Loading and remediating configuration files is left to the embedding
//! application; this module only defines the shape, defaults and the
//! startup checks that must fail fast.

use std::net::{Ipv4Addr, SocketAddr};
use std::path::PathBuf;
use std::time::Duration;

use facebridge_client::wire::PluginInfo;
use facebridge_client::{BackoffPolicy, ClientConfig, DiscoveryMode};
use facebridge_rules::EngineConfig;
use facebridge_transport::DISCOVERY_PORT;
use serde::{Deserialize, Serialize};

use crate::{ConfigError, LogConfig};

/// Recovery coordinator timing
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RecoveryConfig {
    /// Health polling interval
    #[serde(with = "facebridge_core::duration_ms")]
    pub interval: Duration,
    /// Minimum time between engine reinitializations
    #[serde(with = "facebridge_core::duration_ms")]
    pub engine_cooldown: Duration,
    /// Minimum time between client reinitializations
    #[serde(with = "facebridge_core::duration_ms")]
    pub client_cooldown: Duration,
}

impl Default for RecoveryConfig {
    fn default() -> Self {
        RecoveryConfig {
            interval: Duration::from_secs(1),
            engine_cooldown: Duration::from_secs(5),
            client_cooldown: Duration::from_secs(2),
        }
    }
}

/// Complete bridge configuration
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct BridgeConfig {
    /// Peer host for the static endpoint
    pub host: String,
    /// Peer WebSocket port
    pub port: u16,
    pub discovery: DiscoveryMode,
    #[serde(with = "facebridge_core::duration_ms")]
    pub discovery_timeout: Duration,
    pub discovery_port: u16,
    #[serde(with = "facebridge_core::duration_ms")]
    pub handshake_timeout: Duration,
    #[serde(with = "facebridge_core::duration_ms")]
    pub request_timeout: Duration,
    /// Applied to parameter ids on the wire only
    pub parameter_prefix: String,
    pub max_passes: usize,
    pub plugin_name: String,
    pub plugin_developer: String,
    pub plugin_icon: Option<String>,
    pub token_path: PathBuf,
    pub rule_path: PathBuf,
    /// Reload rules when the file changes
    pub watch_rules: bool,
    #[serde(with = "facebridge_core::duration_ms")]
    pub rule_debounce: Duration,
    pub backoff: BackoffPolicy,
    pub recovery: RecoveryConfig,
    /// Frames buffered between the receiver and the pipeline
    pub frame_buffer: usize,
    pub log: LogConfig,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        BridgeConfig {
            host: "127.0.0.1".to_string(),
            port: 8001,
            discovery: DiscoveryMode::Disabled,
            discovery_timeout: facebridge_transport::DEFAULT_DISCOVERY_TIMEOUT,
            discovery_port: DISCOVERY_PORT,
            handshake_timeout: Duration::from_secs(10),
            request_timeout: Duration::from_secs(5),
            parameter_prefix: String::new(),
            max_passes: EngineConfig::default().max_passes,
            plugin_name: "FaceBridge".to_string(),
            plugin_developer: "FaceBridge Contributors".to_string(),
            plugin_icon: None,
            token_path: PathBuf::from("facebridge-token.txt"),
            rule_path: PathBuf::from("rules.json"),
            watch_rules: true,
            rule_debounce: facebridge_rules::DEFAULT_DEBOUNCE,
            backoff: BackoffPolicy::default(),
            recovery: RecoveryConfig::default(),
            frame_buffer: 8,
            log: LogConfig::default(),
        }
    }
}

impl BridgeConfig {
    /// Locate the peer by broadcast, falling back to the static endpoint
    pub fn discovery() -> Self {
        BridgeConfig {
            discovery: DiscoveryMode::Preferred,
            ..Default::default()
        }
    }

    /// Parse from JSON; missing fields take their defaults
    pub fn from_json(json: &str) -> Result<Self, ConfigError> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn to_json(&self) -> String {
        serde_json::to_string_pretty(self).unwrap_or_default()
    }

    /// Static `ws://` endpoint
    pub fn endpoint(&self) -> String {
        format!("ws://{}:{}", self.host, self.port)
    }

    /// Fail-fast checks run before anything starts
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.discovery != DiscoveryMode::Required {
            if self.port == 0 {
                return Err(ConfigError::InvalidPort(self.port));
            }
            if self.host.trim().is_empty() {
                return Err(ConfigError::NoEndpoint);
            }
        }
        if self.discovery != DiscoveryMode::Disabled && self.discovery_port == 0 {
            return Err(ConfigError::InvalidPort(self.discovery_port));
        }
        if self.max_passes == 0 {
            return Err(ConfigError::InvalidPasses);
        }

        // Peer limits plugin identity fields to 3..=32 characters
        for (field, value) in [
            ("pluginName", &self.plugin_name),
            ("pluginDeveloper", &self.plugin_developer),
        ] {
            let len = value.chars().count();
            if !(3..=32).contains(&len) {
                return Err(ConfigError::InvalidPlugin(format!(
                    "{} must be 3 to 32 characters",
                    field
                )));
            }
        }

        if !self
            .parameter_prefix
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_')
        {
            return Err(ConfigError::InvalidPrefix(self.parameter_prefix.clone()));
        }

        match self.backoff {
            BackoffPolicy::Fixed { .. } => {}
            BackoffPolicy::Exponential {
                base,
                max,
                factor,
                jitter,
            } => {
                if base > max {
                    return Err(ConfigError::InvalidBackoff("base exceeds max".to_string()));
                }
                if !(factor >= 1.0) {
                    return Err(ConfigError::InvalidBackoff("factor must be >= 1".to_string()));
                }
                if !(0.0..=1.0).contains(&jitter) {
                    return Err(ConfigError::InvalidBackoff(
                        "jitter must be within [0, 1]".to_string(),
                    ));
                }
            }
        }

        for (name, value) in [
            ("recovery.interval", self.recovery.interval),
            ("discoveryTimeout", self.discovery_timeout),
            ("handshakeTimeout", self.handshake_timeout),
            ("requestTimeout", self.request_timeout),
        ] {
            if value.is_zero() {
                return Err(ConfigError::ZeroDuration(name));
            }
        }
        if self.frame_buffer == 0 {
            return Err(ConfigError::InvalidFrameBuffer);
        }
        Ok(())
    }

    pub fn engine_config(&self) -> EngineConfig {
        EngineConfig {
            max_passes: self.max_passes,
        }
    }

    pub fn client_config(&self) -> ClientConfig {
        ClientConfig {
            endpoint: (self.port != 0 && !self.host.trim().is_empty()).then(|| self.endpoint()),
            discovery: self.discovery,
            discovery_addr: SocketAddr::from((Ipv4Addr::UNSPECIFIED, self.discovery_port)),
            discovery_timeout: self.discovery_timeout,
            handshake_timeout: self.handshake_timeout,
            request_timeout: self.request_timeout,
            parameter_prefix: self.parameter_prefix.clone(),
            plugin: PluginInfo {
                plugin_name: self.plugin_name.clone(),
                plugin_developer: self.plugin_developer.clone(),
                plugin_icon: self.plugin_icon.clone(),
            },
            token_path: self.token_path.clone(),
            backoff: self.backoff.clone(),
        }
    }
}
