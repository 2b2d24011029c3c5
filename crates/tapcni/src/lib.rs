//! # tapcni
//!
//! A CNI plugin that attaches TAP devices to container network
//! namespaces.
//!
//! On `ADD` the plugin asks a per-device provisioning service
//! (`tapudsserver`) for the TAP device, moves it into the container
//! namespace, brings it up and optionally configures addresses through
//! an IPAM backend. `DEL` walks the same path backwards.
//!
//! ## Usage
//!
//! ```no_run
//! use tapcni::attach::Attachment;
//! use tapcni::config::{AttachmentRequest, PluginSettings};
//!
//! # async fn example(request: AttachmentRequest) -> tapcni_common::TapResult<()> {
//! let attachment = Attachment::new(request, &PluginSettings::default())?;
//! let result = attachment.add().await?;
//! println!("{}", serde_json::to_string_pretty(&result)?);
//! # Ok(())
//! # }
//! ```

#![warn(missing_docs)]

pub mod attach;
pub mod cli;
pub mod config;
pub mod provision;
pub mod result;

pub use attach::{AddState, Attachment, DelState};
pub use config::{AttachmentRequest, NetConf, PluginSettings};
pub use provision::Provisioner;
pub use result::AttachmentResult;
