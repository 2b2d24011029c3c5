//! Common error types for tapcni.

use miette::Diagnostic;
use thiserror::Error;

/// Result type alias using [`TapError`].
pub type TapResult<T> = Result<T, TapError>;

/// Errors raised while attaching or detaching a TAP device.
///
/// Every invocation reports at most one of these as its terminal failure.
#[derive(Error, Diagnostic, Debug)]
pub enum TapError {
    /// Invalid or incomplete configuration. Nothing has been touched yet.
    #[error("Configuration error: {message}")]
    #[diagnostic(code(tapcni::config))]
    Config {
        /// The error message.
        message: String,
    },

    /// The configuration asks for a result version this plugin cannot emit.
    #[error("Incompatible CNI version {version}")]
    #[diagnostic(
        code(tapcni::version),
        help("Supported versions: 0.3.0, 0.3.1, 0.4.0, 1.0.0, 1.1.0")
    )]
    IncompatibleVersion {
        /// The requested version.
        version: String,
    },

    /// The TAP device could not be created or handed over.
    #[error("Provisioning of device {device} failed: {message}")]
    #[diagnostic(
        code(tapcni::provisioning),
        help("Check that tapudsserver is installed and /dev/net/tun is accessible")
    )]
    Provisioning {
        /// Device name.
        device: String,
        /// The error message.
        message: String,
    },

    /// A network namespace could not be opened, entered or restored.
    #[error("Network namespace {path}: {message}")]
    #[diagnostic(code(tapcni::namespace))]
    Namespace {
        /// Namespace path.
        path: String,
        /// The error message.
        message: String,
    },

    /// No interface with the given name exists in the namespace searched.
    #[error("Device not found: {device}")]
    #[diagnostic(code(tapcni::link::not_found))]
    DeviceNotFound {
        /// Device name.
        device: String,
    },

    /// The kernel refused to move the interface to another namespace.
    #[error("Moving device {device} was rejected: {message}")]
    #[diagnostic(
        code(tapcni::link::move_rejected),
        help("The device may be left in either namespace; DEL tolerates both")
    )]
    MoveRejected {
        /// Device name.
        device: String,
        /// The error message.
        message: String,
    },

    /// Any other netlink failure.
    #[error("Netlink {operation} on {device} failed: {message}")]
    #[diagnostic(code(tapcni::netlink))]
    Netlink {
        /// The operation that failed.
        operation: String,
        /// Device name.
        device: String,
        /// The error message.
        message: String,
    },

    /// The IPAM backend failed to allocate. Nothing was allocated.
    #[error("IPAM allocation via {backend} failed: {message}")]
    #[diagnostic(code(tapcni::ipam::allocate))]
    IpamAllocation {
        /// Backend type.
        backend: String,
        /// The error message.
        message: String,
    },

    /// Addresses or routes could not be applied to the interface.
    #[error("Applying IPAM configuration to {device} failed: {message}")]
    #[diagnostic(code(tapcni::ipam::apply))]
    IpamApply {
        /// Device name.
        device: String,
        /// The error message.
        message: String,
    },

    /// The IPAM backend failed to release.
    #[error("IPAM release via {backend} failed: {message}")]
    #[diagnostic(code(tapcni::ipam::release))]
    IpamRelease {
        /// Backend type.
        backend: String,
        /// The error message.
        message: String,
    },

    /// I/O error.
    #[error("I/O error: {0}")]
    #[diagnostic(code(tapcni::io))]
    Io(#[from] std::io::Error),

    /// Serialization error.
    #[error("Serialization error: {0}")]
    #[diagnostic(code(tapcni::serialization))]
    Serialization(String),

    /// Internal error (should not happen).
    #[error("Internal error: {message}")]
    #[diagnostic(code(tapcni::internal))]
    Internal {
        /// The error message.
        message: String,
    },
}

impl TapError {
    /// Error code reported to the container runtime.
    ///
    /// Codes below 100 are the well-known ones shared by all plugins,
    /// 100 and above are specific to this plugin.
    #[must_use]
    pub const fn code(&self) -> u32 {
        match self {
            Self::IncompatibleVersion { .. } => 1,
            Self::Config { .. } => 7,
            Self::Serialization(_) => 6,
            Self::Io(_) => 5,
            Self::Provisioning { .. } => 100,
            Self::Namespace { .. } => 101,
            Self::DeviceNotFound { .. } => 102,
            Self::MoveRejected { .. } => 103,
            Self::Netlink { .. } => 104,
            Self::IpamAllocation { .. } => 105,
            Self::IpamApply { .. } => 106,
            Self::IpamRelease { .. } => 107,
            Self::Internal { .. } => 999,
        }
    }

    /// Short stable name of the error kind.
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::IncompatibleVersion { .. } => "incompatible version",
            Self::Config { .. } => "config",
            Self::Serialization(_) => "decode",
            Self::Io(_) => "io",
            Self::Provisioning { .. } => "provisioning",
            Self::Namespace { .. } => "namespace",
            Self::DeviceNotFound { .. } => "device not found",
            Self::MoveRejected { .. } => "move rejected",
            Self::Netlink { .. } => "netlink",
            Self::IpamAllocation { .. } => "ipam allocation",
            Self::IpamApply { .. } => "ipam apply",
            Self::IpamRelease { .. } => "ipam release",
            Self::Internal { .. } => "internal",
        }
    }

    /// Whether this error means the device does not exist.
    #[must_use]
    pub const fn is_device_not_found(&self) -> bool {
        matches!(self, Self::DeviceNotFound { .. })
    }

    /// Shorthand for [`TapError::Config`].
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
        }
    }

    /// Shorthand for [`TapError::Internal`].
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }
}

impl From<serde_json::Error> for TapError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}
