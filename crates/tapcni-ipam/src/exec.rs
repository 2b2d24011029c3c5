//! Backends implemented by external IPAM plugin executables.

use std::path::{Path, PathBuf};
use std::process::Stdio;

use async_trait::async_trait;
use serde::Deserialize;
use tapcni_common::{TapError, TapResult};
use tokio::io::AsyncWriteExt;
use tokio::process::Command;

use crate::backend::{IpamBackend, IpamRequest};
use crate::lease::IpamLease;

/// Error document printed by a failing plugin.
#[derive(Debug, Deserialize)]
struct PluginError {
    #[serde(default)]
    code: u32,
    msg: String,
    #[serde(default)]
    details: String,
}

/// Runs the IPAM plugin named by the configuration, e.g. `host-local`.
///
/// The plugin is found in the request's search path, invoked with
/// `CNI_COMMAND=ADD` or `DEL` and the raw configuration on stdin, and
/// answers with a result or error document on stdout.
#[derive(Debug, Clone)]
pub struct ExecBackend {
    plugin: String,
}

impl ExecBackend {
    /// Create a backend for the plugin executable `plugin`.
    #[must_use]
    pub fn new(plugin: impl Into<String>) -> Self {
        Self {
            plugin: plugin.into(),
        }
    }

    /// Locate the plugin executable in `search_path`.
    #[must_use]
    pub fn find_plugin(&self, search_path: &[PathBuf]) -> Option<PathBuf> {
        search_path
            .iter()
            .map(|dir| dir.join(&self.plugin))
            .find(|candidate| candidate.is_file())
    }

    async fn exec(&self, command: &str, request: &IpamRequest) -> Result<Vec<u8>, String> {
        if self.plugin.contains('/') {
            return Err(format!("invalid plugin name {:?}", self.plugin));
        }

        let program = self.find_plugin(&request.cni_path).ok_or_else(|| {
            format!(
                "failed to find plugin {:?} in path {:?}",
                self.plugin, request.cni_path
            )
        })?;
        let cni_path = std::env::join_paths(&request.cni_path)
            .map_err(|e| format!("invalid plugin search path: {e}"))?;

        tracing::debug!(plugin = %program.display(), command, "Executing IPAM plugin");

        let mut child = Command::new(&program)
            .env("CNI_COMMAND", command)
            .env("CNI_CONTAINERID", &request.container_id)
            .env("CNI_NETNS", &request.netns)
            .env("CNI_IFNAME", &request.ifname)
            .env("CNI_ARGS", &request.args)
            .env("CNI_PATH", cni_path)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| format!("failed to execute {}: {e}", program.display()))?;

        if let Some(mut stdin) = child.stdin.take() {
            stdin
                .write_all(&request.config)
                .await
                .map_err(|e| format!("failed to write configuration: {e}"))?;
        }

        let output = child
            .wait_with_output()
            .await
            .map_err(|e| format!("failed to wait for {}: {e}", program.display()))?;

        if output.status.success() {
            return Ok(output.stdout);
        }

        Err(describe_failure(&program, &output))
    }
}

fn describe_failure(program: &Path, output: &std::process::Output) -> String {
    if let Ok(error) = serde_json::from_slice::<PluginError>(&output.stdout) {
        if error.details.is_empty() {
            return format!("{} (code {})", error.msg, error.code);
        }
        return format!("{}; {} (code {})", error.msg, error.details, error.code);
    }

    let stderr = String::from_utf8_lossy(&output.stderr);
    format!(
        "{} exited with {}: {}",
        program.display(),
        output.status,
        stderr.trim()
    )
}

#[async_trait]
impl IpamBackend for ExecBackend {
    fn name(&self) -> &str {
        &self.plugin
    }

    async fn allocate(&self, request: &IpamRequest) -> TapResult<IpamLease> {
        let allocation_error = |message: String| TapError::IpamAllocation {
            backend: self.plugin.clone(),
            message,
        };

        let stdout = self.exec("ADD", request).await.map_err(allocation_error)?;
        let lease: IpamLease = serde_json::from_slice(&stdout)
            .map_err(|e| allocation_error(format!("failed to decode result: {e}")))?;

        tracing::debug!(backend = %self.plugin, ?lease, "IPAM allocation succeeded");
        Ok(lease)
    }

    async fn release(&self, request: &IpamRequest) -> TapResult<()> {
        self.exec("DEL", request)
            .await
            .map_err(|message| TapError::IpamRelease {
                backend: self.plugin.clone(),
                message,
            })?;

        tracing::debug!(backend = %self.plugin, "IPAM release succeeded");
        Ok(())
    }
}
