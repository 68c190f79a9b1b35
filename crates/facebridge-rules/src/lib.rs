//! FaceBridge Rules - Rule repository and transformation engine
//!
//! This crate turns tracking frames into output parameters:
//! - A small bounded expression language over frame fields and rule names
//! - Linear / Bezier interpolation strategies
//! - Rule file parsing with per-rule validation
//! - A repository with last-known-good caching and atomic hot swap
//! - A file watcher that drives reloads
//! - The multi-pass transformation engine

pub mod engine;
pub mod error;
pub mod expr;
pub mod interp;
pub mod repository;
pub mod rule;
pub mod watch;

pub use engine::*;
pub use error::*;
pub use expr::{EvalError, Expr};
pub use interp::*;
pub use repository::*;
pub use rule::*;
pub use watch::*;
