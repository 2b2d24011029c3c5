//! tapudsserver - TAP device provisioning service.
//!
//! Creates one TAP device and hands its descriptor to every client that
//! connects to `<socket-dir>/<device>.sock`, until SIGTERM or SIGINT.

use std::path::{Path, PathBuf};

use clap::Parser;
use color_eyre::eyre::{Result, WrapErr};
use tapcni_common::paths::TAPCNI_SOCKET_DIR;
use tapcni_common::{DeviceName, TapPaths};
use tapcni_network::{HandoffServer, TapDevice};
use tokio::signal::unix::{SignalKind, signal};
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// TAP device to create and serve
    device: String,

    /// Directory holding the handoff sockets
    #[arg(long, env = "TAPCNI_SOCKET_DIR", default_value_os_t = TAPCNI_SOCKET_DIR.clone())]
    socket_dir: PathBuf,
}

/// Pid file removed again on drop.
struct PidFile {
    path: PathBuf,
}

impl PidFile {
    fn create(path: PathBuf) -> std::io::Result<Self> {
        std::fs::write(&path, format!("{}\n", std::process::id()))?;
        Ok(Self { path })
    }

    fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for PidFile {
    fn drop(&mut self) {
        let _ = std::fs::remove_file(&self.path);
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    color_eyre::install()?;

    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr).with_target(true))
        .with(EnvFilter::from_default_env().add_directive("tapcni=info".parse()?))
        .init();

    let args = Args::parse();
    let device = DeviceName::new(args.device)?;
    let paths = TapPaths::with_socket_dir(args.socket_dir);
    paths
        .create_dirs()
        .wrap_err_with(|| format!("creating {}", paths.socket_dir.display()))?;

    let tap = TapDevice::create(&device)?;
    tracing::info!(%device, "TAP device created");

    let server = HandoffServer::bind(&paths.socket(&device), tap)?;
    let pid_file = PidFile::create(paths.pid_file(&device))
        .wrap_err("writing pid file")?;
    tracing::info!(%device, pid = std::process::id(), pid_file = %pid_file.path().display(), "Serving device");

    let served = server.serve(shutdown_signal()).await;
    tracing::info!(%device, served, "Provisioning service exiting");

    drop(server);
    drop(pid_file);
    Ok(())
}

async fn shutdown_signal() {
    match signal(SignalKind::terminate()) {
        Ok(mut terminate) => {
            tokio::select! {
                _ = tokio::signal::ctrl_c() => tracing::debug!("Received SIGINT"),
                _ = terminate.recv() => tracing::debug!("Received SIGTERM"),
            }
        }
        Err(e) => {
            tracing::warn!(error = %e, "Failed to install SIGTERM handler");
            let _ = tokio::signal::ctrl_c().await;
        }
    }
}
