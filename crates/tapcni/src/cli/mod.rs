//! Plugin invocation: environment, stdin and stdout.

use std::io::{Read, Write};
use std::path::PathBuf;
use std::time::Duration;

use clap::{Parser, ValueEnum};
use tapcni_common::paths::TAPCNI_SOCKET_DIR;
use tapcni_common::{ContainerId, TapError, TapPaths, TapResult};

use crate::attach::Attachment;
use crate::config::{AttachmentRequest, CURRENT_VERSION, NetConf, PluginSettings};
use crate::result::{ErrorDocument, VersionDocument};

/// Command requested by the container runtime.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum CniCommand {
    /// Attach a device.
    #[value(name = "ADD")]
    Add,
    /// Detach and destroy a device.
    #[value(name = "DEL")]
    Del,
    /// Verify an attachment.
    #[value(name = "CHECK")]
    Check,
    /// Report supported versions.
    #[value(name = "VERSION")]
    Version,
}

/// tap-plugin - attach TAP devices to container network namespaces
#[derive(Debug, Parser)]
#[command(name = "tap-plugin")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Command to run
    #[arg(long, env = "CNI_COMMAND", value_enum)]
    pub command: Option<CniCommand>,

    /// Container ID
    #[arg(long, env = "CNI_CONTAINERID")]
    pub container_id: Option<String>,

    /// Path to the container's network namespace
    #[arg(long, env = "CNI_NETNS")]
    pub netns: Option<PathBuf>,

    /// Interface name requested by the runtime
    #[arg(long, env = "CNI_IFNAME", default_value = "eth0")]
    pub ifname: String,

    /// Colon-separated plugin search path
    #[arg(long, env = "CNI_PATH", default_value = "")]
    pub cni_path: String,

    /// Extra arguments (`KEY=VALUE;...`)
    #[arg(long = "cni-args", env = "CNI_ARGS", default_value = "")]
    pub cni_args: String,

    /// Directory holding the handoff sockets
    #[arg(long, env = "TAPCNI_SOCKET_DIR", default_value_os_t = TAPCNI_SOCKET_DIR.clone())]
    pub socket_dir: PathBuf,

    /// Provisioning service executable
    #[arg(long, env = "TAPCNI_SERVER", default_value = PluginSettings::SERVER_PROGRAM)]
    pub server: PathBuf,

    /// Milliseconds to wait for the provisioning service
    #[arg(long, env = "TAPCNI_READY_TIMEOUT_MS", default_value_t = 5000)]
    pub ready_timeout_ms: u64,
}

impl Cli {
    /// Run the command against `stdin`, printing the outcome to `stdout`.
    ///
    /// Returns the process exit code: 0 on success, 1 after printing an
    /// error document.
    pub async fn execute(self, stdin: impl Read, mut stdout: impl Write) -> i32 {
        let mut version = CURRENT_VERSION.to_string();

        let outcome = self.run(stdin, &mut version).await;
        let (document, code) = match outcome {
            Ok(Some(document)) => (document, 0),
            Ok(None) => return 0,
            Err(err) => {
                tracing::error!(error = %err, code = err.code(), "Invocation failed");
                let document = serde_json::to_string_pretty(&ErrorDocument::from_error(&version, &err))
                    .unwrap_or_else(|_| format!(r#"{{"code":{},"msg":"{}"}}"#, err.code(), err.kind()));
                (document, 1)
            }
        };

        if let Err(e) = writeln!(stdout, "{document}") {
            tracing::error!(error = %e, "Failed to write to stdout");
            return 1;
        }
        code
    }

    /// Plugin settings derived from the arguments.
    #[must_use]
    pub fn settings(&self) -> PluginSettings {
        PluginSettings {
            paths: TapPaths::with_socket_dir(&self.socket_dir),
            server_program: self.server.clone(),
            ready_timeout: Duration::from_millis(self.ready_timeout_ms),
        }
    }

    async fn run(&self, mut stdin: impl Read, version: &mut String) -> TapResult<Option<String>> {
        let command = self
            .command
            .ok_or_else(|| TapError::config("CNI_COMMAND is not set"))?;

        if command == CniCommand::Version {
            return Ok(Some(serde_json::to_string_pretty(&VersionDocument::new(CURRENT_VERSION))?));
        }

        let mut raw = Vec::new();
        stdin.read_to_end(&mut raw)?;
        let conf = NetConf::parse(&raw)?;
        conf.result_version().clone_into(version);

        let request = self.request(raw, conf)?;
        tracing::info!(
            ?command,
            container = %request.container_id,
            netns = %request.netns.display(),
            network = %request.conf.name,
            "Handling invocation"
        );
        let attachment = Attachment::new(request, &self.settings())?;

        match command {
            CniCommand::Add => {
                let result = attachment.add().await?;
                Ok(Some(serde_json::to_string_pretty(&result)?))
            }
            CniCommand::Del => attachment.del().await.map(|()| None),
            CniCommand::Check => attachment.check().map(|()| None),
            CniCommand::Version => Ok(None),
        }
    }

    fn request(&self, raw: Vec<u8>, conf: NetConf) -> TapResult<AttachmentRequest> {
        let container_id = self
            .container_id
            .as_deref()
            .ok_or_else(|| TapError::config("CNI_CONTAINERID is not set"))?;
        let netns = self
            .netns
            .clone()
            .ok_or_else(|| TapError::config("CNI_NETNS is not set"))?;

        Ok(AttachmentRequest {
            container_id: ContainerId::new(container_id)?,
            netns,
            ifname: self.ifname.clone(),
            args: self.cni_args.clone(),
            cni_path: std::env::split_paths(&self.cni_path)
                .filter(|p| !p.as_os_str().is_empty())
                .collect(),
            raw,
            conf,
        })
    }
}
