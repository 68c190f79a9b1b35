//! FaceBridge Core - Fundamental types and primitives
//!
//! This crate defines the types shared by every FaceBridge layer:
//! - Tracking frames and the identifiers they expose to rule expressions
//! - Output parameters handed from the engine to the protocol client
//! - Health snapshots and the error taxonomy

pub mod duration_ms;
pub mod error;
pub mod frame;
pub mod health;
pub mod output;

pub use error::*;
pub use frame::*;
pub use health::*;
pub use output::*;
