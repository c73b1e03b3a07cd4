//! echo-poll: a single-threaded TCP echo server
//!
//! Every client shares one readiness-polling loop:
//! - Bytes sent by a client are echoed back to that client verbatim
//! - Connections are capped by the process descriptor limit
//! - The server exits cleanly after three minutes without activity

mod config;
mod error;
mod runtime;

use config::Config;
use runtime::{Server, Shutdown};
use std::process::ExitCode;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

fn main() -> ExitCode {
    let config = Config::load();

    // Logs go to stderr so stdout only carries the shutdown notice.
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.log_level));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    info!(port = config.port, "Starting echo-poll server");

    match run(config) {
        Ok(Shutdown::IdleTimeout) => {
            println!("Timeout occurred, shutting down");
            ExitCode::SUCCESS
        }
        Err(e) => {
            error!(kind = ?e.kind(), error = %e, "Server failed");
            eprintln!("{e}");
            ExitCode::FAILURE
        }
    }
}

fn run(config: Config) -> error::Result<Shutdown> {
    let mut server = Server::new(config)?;
    server.start()
}
