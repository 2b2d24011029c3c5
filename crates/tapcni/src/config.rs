//! Network configuration and invocation parameters.

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tapcni_common::{ContainerId, DeviceName, TapError, TapPaths, TapResult};
use tapcni_ipam::{Dns, IpamConfig, IpamRequest};

/// Result version emitted when the configuration names none.
pub const CURRENT_VERSION: &str = "1.0.0";

/// Versions of the result format this plugin can emit.
pub const SUPPORTED_VERSIONS: &[&str] = &["0.3.0", "0.3.1", "0.4.0", "1.0.0", "1.1.0"];

/// The network configuration read from stdin.
///
/// Unknown fields are ignored; the raw bytes are kept separately in
/// [`AttachmentRequest::raw`] for the IPAM backend.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NetConf {
    /// Requested result version.
    #[serde(rename = "cniVersion", default)]
    pub cni_version: String,

    /// Network name.
    #[serde(default)]
    pub name: String,

    /// Plugin type, normally `tap-plugin`.
    #[serde(rename = "type", default)]
    pub plugin_type: String,

    /// Address management.
    #[serde(default)]
    pub ipam: IpamConfig,

    /// DNS settings to report.
    #[serde(default, skip_serializing_if = "Dns::is_empty")]
    pub dns: Dns,
}

impl NetConf {
    /// Parse a configuration document.
    ///
    /// # Errors
    ///
    /// Returns a serialization error if the document is not valid JSON of
    /// the expected shape, and [`TapError::IncompatibleVersion`] if it
    /// names a version outside [`SUPPORTED_VERSIONS`].
    pub fn parse(bytes: &[u8]) -> TapResult<Self> {
        let conf: Self = serde_json::from_slice(bytes)?;
        if !conf.cni_version.is_empty() && !SUPPORTED_VERSIONS.contains(&conf.cni_version.as_str()) {
            return Err(TapError::IncompatibleVersion {
                version: conf.cni_version,
            });
        }
        Ok(conf)
    }

    /// Version to stamp on emitted documents.
    #[must_use]
    pub fn result_version(&self) -> &str {
        if self.cni_version.is_empty() {
            CURRENT_VERSION
        } else {
            &self.cni_version
        }
    }
}

/// Everything one ADD or DEL invocation acts on.
#[derive(Debug, Clone)]
pub struct AttachmentRequest {
    /// Container the attachment belongs to.
    pub container_id: ContainerId,
    /// Path of the container's network namespace.
    pub netns: PathBuf,
    /// Interface name requested by the runtime.
    pub ifname: String,
    /// Extra `CNI_ARGS`.
    pub args: String,
    /// Plugin search path.
    pub cni_path: Vec<PathBuf>,
    /// The configuration document as received.
    pub raw: Vec<u8>,
    /// Parsed configuration.
    pub conf: NetConf,
}

impl AttachmentRequest {
    /// Name of the TAP device serving this container.
    ///
    /// # Errors
    ///
    /// Returns a configuration error if the container ID is too short.
    pub fn device_name(&self) -> TapResult<DeviceName> {
        DeviceName::for_container(&self.container_id)
    }

    /// Request handed to the IPAM backend.
    #[must_use]
    pub fn ipam_request(&self) -> IpamRequest {
        IpamRequest {
            container_id: self.container_id.to_string(),
            netns: self.netns.clone(),
            ifname: self.ifname.clone(),
            args: self.args.clone(),
            cni_path: self.cni_path.clone(),
            config: self.raw.clone(),
        }
    }
}

/// Plugin-wide settings that do not come from the configuration document.
#[derive(Debug, Clone)]
pub struct PluginSettings {
    /// Socket and pid file locations.
    pub paths: TapPaths,
    /// Provisioning service executable.
    pub server_program: PathBuf,
    /// How long to wait for a freshly spawned service.
    pub ready_timeout: Duration,
}

impl PluginSettings {
    /// Default provisioning service executable, looked up in `PATH`.
    pub const SERVER_PROGRAM: &'static str = "tapudsserver";

    /// Default readiness timeout.
    pub const READY_TIMEOUT: Duration = Duration::from_secs(5);
}

impl Default for PluginSettings {
    fn default() -> Self {
        Self {
            paths: TapPaths::default(),
            server_program: PathBuf::from(Self::SERVER_PROGRAM),
            ready_timeout: Self::READY_TIMEOUT,
        }
    }
}
