//! # Contracts
//!
//! Shared interface contracts for the build metrics pipeline.
//! Every other crate depends on this one; it depends on none of them.
//!
//! ## Time Model
//! - Wall-clock instants are epoch milliseconds (`i64`), rendered as RFC 3339 on the wire
//! - Durations are elapsed milliseconds (`u64`)

mod build;
mod config;
mod error;
mod info;
mod execution;
mod sink;

pub use build::*;
pub use config::*;
pub use error::*;
pub use execution::*;
pub use info::*;
pub use sink::*;
