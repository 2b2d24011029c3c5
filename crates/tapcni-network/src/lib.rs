//! # tapcni-network
//!
//! Networking primitives for attaching TAP devices to containers.
//!
//! - [`netns`]: open network namespaces and run work inside them on a
//!   pinned worker thread
//! - [`tap`]: create and inspect TAP devices through `/dev/net/tun`
//! - [`handoff`]: pass an open device descriptor over a Unix socket
//! - [`link`]: look up, move, activate and delete interfaces over netlink

#![warn(missing_docs)]

pub mod handoff;
pub mod link;
pub mod netns;
pub mod tap;

pub use handoff::{HandoffServer, receive_device, send_device};
pub use link::{LinkManager, VirtualInterface};
pub use netns::NetNs;
pub use tap::{TapDevice, TapInfo};
