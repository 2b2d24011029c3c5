//! # tapcni-common
//!
//! Shared utilities and types for the tapcni plugin.
//!
//! This crate provides common functionality used across all tapcni crates:
//! - Container ID validation and TAP device naming
//! - Standard filesystem paths for the handoff sockets
//! - Common error types

#![warn(missing_docs)]

pub mod error;
pub mod id;
pub mod paths;

pub use error::{TapError, TapResult};
pub use id::{ContainerId, DeviceName};
pub use paths::TapPaths;
