//! Launching and contacting the per-device provisioning service.
//!
//! The service (`tapudsserver <device>`) creates the TAP device, keeps it
//! open and hands its descriptor to every client connecting to
//! `<socket_dir>/<device>.sock`. The plugin starts it detached, then polls
//! the socket until a descriptor arrives.

#![allow(unsafe_code)]

use std::os::unix::process::CommandExt;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::time::Duration;

use tapcni_common::{DeviceName, TapError, TapPaths, TapResult};
use tapcni_network::{TapDevice, receive_device};
use tokio::time::Instant;

use crate::config::PluginSettings;

/// First pause between readiness probes.
const INITIAL_BACKOFF: Duration = Duration::from_millis(20);

/// Longest pause between readiness probes.
const MAX_BACKOFF: Duration = Duration::from_millis(500);

/// Starts, contacts and stops provisioning services.
#[derive(Debug, Clone)]
pub struct Provisioner {
    paths: TapPaths,
    program: PathBuf,
    ready_timeout: Duration,
}

impl Provisioner {
    /// Create a provisioner from the plugin settings.
    #[must_use]
    pub fn new(settings: &PluginSettings) -> Self {
        Self {
            paths: settings.paths.clone(),
            program: settings.server_program.clone(),
            ready_timeout: settings.ready_timeout,
        }
    }

    /// Socket and pid file locations.
    #[must_use]
    pub const fn paths(&self) -> &TapPaths {
        &self.paths
    }

    /// Obtain the host-side descriptor of `device`.
    ///
    /// An already running service is reused; otherwise one is spawned
    /// and awaited.
    ///
    /// # Errors
    ///
    /// Returns [`TapError::Provisioning`] if no valid descriptor can be
    /// obtained within the readiness timeout.
    pub async fn provision(&self, device: &DeviceName) -> TapResult<TapDevice> {
        let socket = self.paths.socket(device);

        if socket.exists() {
            match receive_device(&socket).await {
                Ok(fd) => {
                    tracing::info!(%device, "Reusing running provisioning service");
                    return TapDevice::from_fd(fd, device);
                }
                Err(e) => {
                    tracing::debug!(%device, error = %e, "Existing socket is not being served");
                }
            }
        }

        self.spawn(device)?;
        self.wait_ready(device).await
    }

    /// Start the service for `device` without waiting for it.
    ///
    /// The child gets its own process group and null stdio, and its
    /// handle is dropped right away so it outlives this process.
    ///
    /// # Errors
    ///
    /// Returns [`TapError::Provisioning`] if the program cannot be started.
    pub fn spawn(&self, device: &DeviceName) -> TapResult<()> {
        let child = Command::new(&self.program)
            .arg(device.as_str())
            .arg("--socket-dir")
            .arg(&self.paths.socket_dir)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .process_group(0)
            .spawn()
            .map_err(|e| provisioning_error(device, format!("failed to start {}: {e}", self.program.display())))?;

        tracing::info!(%device, pid = child.id(), program = %self.program.display(), "Spawned provisioning service");

        // Disown: the service is reparented once this process exits.
        drop(child);
        Ok(())
    }

    /// Poll the handoff socket until it yields the device descriptor.
    ///
    /// Connection failures are retried with exponential backoff. A
    /// descriptor that is not the expected TAP device fails immediately.
    ///
    /// # Errors
    ///
    /// Returns [`TapError::Provisioning`] on timeout or on a wrong
    /// descriptor.
    pub async fn wait_ready(&self, device: &DeviceName) -> TapResult<TapDevice> {
        let socket = self.paths.socket(device);
        let deadline = Instant::now() + self.ready_timeout;
        let mut backoff = INITIAL_BACKOFF;
        let mut attempts = 0u32;

        loop {
            attempts += 1;
            match receive_device(&socket).await {
                Ok(fd) => {
                    tracing::debug!(%device, attempts, "Provisioning service ready");
                    return TapDevice::from_fd(fd, device);
                }
                Err(e) => {
                    let now = Instant::now();
                    if now >= deadline {
                        return Err(provisioning_error(
                            device,
                            format!(
                                "service not ready after {:?} ({attempts} attempts): {e}",
                                self.ready_timeout
                            ),
                        ));
                    }
                    tracing::trace!(%device, error = %e, ?backoff, "Provisioning service not ready");
                    tokio::time::sleep(backoff.min(deadline - now)).await;
                    backoff = next_backoff(backoff);
                }
            }
        }
    }

    /// Ask the service for `device` to exit.
    ///
    /// Best effort: a missing or unreadable pid file means there is
    /// nothing to stop.
    ///
    /// # Errors
    ///
    /// Returns [`TapError::Provisioning`] if signalling a recorded pid
    /// fails for a reason other than the process being gone.
    pub fn shutdown(&self, device: &DeviceName) -> TapResult<()> {
        let pid_file = self.paths.pid_file(device);
        let Some(pid) = read_pid(&pid_file) else {
            tracing::debug!(%device, path = %pid_file.display(), "No provisioning service to stop");
            return Ok(());
        };

        let ret = unsafe { libc::kill(pid, libc::SIGTERM) };
        if ret != 0 {
            let err = std::io::Error::last_os_error();
            if err.raw_os_error() == Some(libc::ESRCH) {
                tracing::debug!(%device, pid, "Provisioning service already exited");
                let _ = std::fs::remove_file(&pid_file);
                return Ok(());
            }
            return Err(provisioning_error(device, format!("failed to signal pid {pid}: {err}")));
        }

        tracing::info!(%device, pid, "Stopped provisioning service");
        Ok(())
    }
}

fn next_backoff(current: Duration) -> Duration {
    (current * 2).min(MAX_BACKOFF)
}

fn read_pid(path: &Path) -> Option<libc::pid_t> {
    let content = std::fs::read_to_string(path).ok()?;
    content.trim().parse().ok().filter(|pid: &libc::pid_t| *pid > 0)
}

fn provisioning_error(device: &DeviceName, message: impl Into<String>) -> TapError {
    TapError::Provisioning {
        device: device.to_string(),
        message: message.into(),
    }
}
