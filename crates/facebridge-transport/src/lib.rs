//! FaceBridge Transport Layer - message channels and peer discovery
//!
//! This crate provides:
//! - A text message channel abstraction with a WebSocket implementation
//! - UDP broadcast discovery of the animation peer

pub mod channel;
pub mod discovery;
pub mod error;
pub mod websocket;

pub use channel::{Connector, MessageChannel};
pub use discovery::*;
pub use error::*;
pub use websocket::{WsChannel, WsConnector};
