//! FaceBridge Test Harness - Mock peer and end-to-end scenarios
//!
//! This crate provides:
//! - A WebSocket mock of the animation peer with discovery broadcasts
//! - Rule and frame fixtures
//! - End-to-end scenarios over real sockets

pub mod fixtures;
pub mod mock_peer;
#[cfg(test)]
mod scenarios;

pub use fixtures::*;
pub use mock_peer::*;
