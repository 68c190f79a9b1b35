//! FaceBridge Protocol Client
//!
//! Explicit connection state machine for the animation peer:
//!
//! ```text
//! Disconnected -> Connecting -> (Discovering) -> Authenticating
//!              -> SynchronizingParameters -> Ready
//! any state -> Faulted ; Faulted -> Disconnected once the backoff delay elapsed
//! ```
//!
//! The client never reconnects on its own. Recovery is driven from outside
//! by calling [`ProtocolClient::reinitialize`].

pub mod backoff;
pub mod client;
pub mod error;
pub mod state;
pub mod token;
pub mod wire;

pub use backoff::*;
pub use client::*;
pub use error::*;
pub use state::*;
pub use token::*;
