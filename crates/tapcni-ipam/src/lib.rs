//! # tapcni-ipam
//!
//! Address management for tapcni attachments.
//!
//! Each IPAM type is one [`IpamBackend`] implementation, picked once from
//! the configuration by [`IpamOrchestrator::from_config`]. The
//! orchestrator guarantees that a lease whose application fails is
//! released before the failure is reported.

#![warn(missing_docs)]

pub mod backend;
pub mod config;
pub mod exec;
pub mod lease;
pub mod orchestrator;
pub mod static_ipam;

pub use backend::{IpamBackend, IpamRequest};
pub use config::IpamConfig;
pub use exec::ExecBackend;
pub use lease::{Dns, IpamLease, LeaseAddress, Route};
pub use orchestrator::{IpamOrchestrator, configure_interface};
pub use static_ipam::StaticBackend;
