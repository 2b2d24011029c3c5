//! Standard filesystem paths for tapcni.

use std::path::PathBuf;

use once_cell::sync::Lazy;

use crate::id::DeviceName;

/// Default directory holding the per-device handoff sockets.
pub static TAPCNI_SOCKET_DIR: Lazy<PathBuf> = Lazy::new(|| {
    std::env::var("TAPCNI_SOCKET_DIR")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from("/tmp/tap_sock"))
});

/// Default log file of the plugin.
pub static TAPCNI_LOG_FILE: Lazy<PathBuf> = Lazy::new(|| {
    std::env::var("TAPCNI_LOG_FILE")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from("/var/log/cni-tap-plugin.log"))
});

/// Paths shared by the plugin and the provisioning service.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TapPaths {
    /// Socket directory (default: /tmp/tap_sock).
    pub socket_dir: PathBuf,
}

impl TapPaths {
    /// Create paths with default locations.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Create paths with a custom socket directory.
    #[must_use]
    pub fn with_socket_dir(socket_dir: impl Into<PathBuf>) -> Self {
        Self {
            socket_dir: socket_dir.into(),
        }
    }

    /// Handoff socket of a device.
    #[must_use]
    pub fn socket(&self, device: &DeviceName) -> PathBuf {
        self.socket_dir.join(format!("{device}.sock"))
    }

    /// PID file of the provisioning service serving a device.
    #[must_use]
    pub fn pid_file(&self, device: &DeviceName) -> PathBuf {
        self.socket_dir.join(format!("{device}.pid"))
    }

    /// Create the socket directory.
    ///
    /// # Errors
    ///
    /// Returns an error if directory creation fails.
    pub fn create_dirs(&self) -> std::io::Result<()> {
        std::fs::create_dir_all(&self.socket_dir)
    }
}

impl Default for TapPaths {
    fn default() -> Self {
        Self {
            socket_dir: TAPCNI_SOCKET_DIR.clone(),
        }
    }
}
