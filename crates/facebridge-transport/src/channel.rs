//! Message channel abstraction
//!
//! The protocol client talks to its peer through these traits so tests can
//! substitute scripted channels for real sockets.

use async_trait::async_trait;

use crate::TransportResult;

/// Bidirectional text message channel
#[async_trait]
pub trait MessageChannel: Send {
    /// Send one text message
    async fn send_text(&mut self, text: String) -> TransportResult<()>;

    /// Receive the next text message. Control frames are skipped.
    async fn recv_text(&mut self) -> TransportResult<String>;

    /// Close the channel; errors are ignored
    async fn close(&mut self);
}

/// Opens message channels to a URL
#[async_trait]
pub trait Connector: Send + Sync {
    async fn connect(&self, url: &str) -> TransportResult<Box<dyn MessageChannel>>;
}
