//! bind-receiver entry point.
//!
//! Diagnostics go to stderr; the exit code carries the result.

use bind_receiver::config::ConfigError;
use bind_receiver::runner::SystemRunner;
use bind_receiver::{Config, Error, ExitStatus, Server};
use clap::error::ErrorKind;
use std::process;
use std::sync::Arc;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

fn main() {
    // Load configuration
    let config = match Config::load() {
        Ok(config) => config,
        Err(ConfigError::Cli(e))
            if matches!(e.kind(), ErrorKind::DisplayHelp | ErrorKind::DisplayVersion) =>
        {
            let _ = e.print();
            process::exit(0);
        }
        Err(e) => {
            eprintln!("ERR\t{}", e);
            process::exit(ExitStatus::Fatal.code());
        }
    };

    // Initialize logging
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(config.log_filter()));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    info!(
        address = %config.addr(),
        duration_secs = config.listen_duration.as_secs(),
        force_listen = config.force_listen,
        bundle = %config.bundle_path().display(),
        "Starting bind receiver"
    );

    let status = match run(config) {
        Ok(status) => status,
        Err(e) => {
            error!(error = %e, "Startup failed");
            ExitStatus::Fatal
        }
    };

    info!(status = %status, "Exiting");
    process::exit(status.code());
}

fn run(config: Config) -> Result<ExitStatus, Error> {
    let server = Server::bind(config, Arc::new(SystemRunner))?;
    Ok(server.run())
}
