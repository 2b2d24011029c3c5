//! tap-plugin entry point.

use std::fs::OpenOptions;
use std::process::ExitCode;
use std::sync::Mutex;

use clap::Parser;
use color_eyre::eyre::Result;
use tapcni_common::paths::TAPCNI_LOG_FILE;
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

use tapcni::cli::Cli;

#[tokio::main]
async fn main() -> Result<ExitCode> {
    // Initialize error handling
    color_eyre::install()?;

    // stdout carries the result document, so logs go to a file, or to
    // stderr when the file cannot be opened.
    let log_file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(TAPCNI_LOG_FILE.as_path())
        .ok();
    let (file_layer, stderr_layer) = match log_file {
        Some(file) => (
            Some(fmt::layer().with_ansi(false).with_writer(Mutex::new(file))),
            None,
        ),
        None => (None, Some(fmt::layer().with_writer(std::io::stderr))),
    };

    tracing_subscriber::registry()
        .with(file_layer)
        .with(stderr_layer)
        .with(EnvFilter::from_default_env().add_directive("tapcni=debug".parse()?))
        .init();

    let cli = Cli::parse();
    let code = cli.execute(std::io::stdin().lock(), std::io::stdout().lock()).await;

    Ok(ExitCode::from(u8::try_from(code).unwrap_or(1)))
}
