//! FaceBridge Runtime
//!
//! Wires the rule repository, transformation engine and protocol client
//! together:
//! - [`Pipeline`]: sequential frame loop (transform, then send)
//! - [`RecoveryCoordinator`]: health polling and reinitialization off the
//!   frame path
//! - [`BridgeConfig`] and [`logging`] for startup

pub mod bridge;
pub mod config;
pub mod error;
pub mod logging;
pub mod pipeline;
pub mod recovery;

pub use bridge::*;
pub use config::*;
pub use error::*;
pub use logging::{LogConfig, LogFormat};
pub use pipeline::*;
pub use recovery::*;
