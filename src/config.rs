//! Configuration module for the echo server.
//!
//! The only user-facing knob is the listening port; backlog and idle timeout
//! are fixed, but live on [`Config`] so tests can shrink them.

use clap::Parser;
use std::time::Duration;

/// Pending-connection queue length handed to `listen()`.
pub const DEFAULT_BACKLOG: i32 = 32;

/// How long the loop waits with zero readiness before shutting down.
pub const DEFAULT_IDLE_TIMEOUT: Duration = Duration::from_secs(3 * 60);

/// Command-line arguments for the echo server
#[derive(Parser, Debug)]
#[command(name = "echo-poll")]
#[command(version)]
#[command(about = "A single-threaded TCP echo server", long_about = None)]
pub struct CliArgs {
    /// Port to listen on (1-65535)
    #[arg(allow_negative_numbers = true)]
    pub port: i64,

    /// Accept only IPv6 clients instead of dual-stack
    #[arg(long)]
    pub ipv6_only: bool,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info")]
    pub log_level: String,

    /// Override the idle timeout, in milliseconds
    #[arg(long, hide = true)]
    pub idle_timeout_ms: Option<u64>,
}

/// Final resolved configuration
#[derive(Debug, Clone)]
pub struct Config {
    /// Requested port, validated when the listening socket is created.
    pub port: i64,
    pub backlog: i32,
    pub idle_timeout: Duration,
    pub ipv6_only: bool,
    pub log_level: String,
}

impl Config {
    /// Load configuration from the process arguments.
    ///
    /// Usage errors are reported by clap, which exits the process.
    pub fn load() -> Self {
        Self::from_args(CliArgs::parse())
    }

    pub fn from_args(cli: CliArgs) -> Self {
        Config {
            idle_timeout: cli
                .idle_timeout_ms
                .map_or(DEFAULT_IDLE_TIMEOUT, Duration::from_millis),
            ipv6_only: cli.ipv6_only,
            log_level: cli.log_level,
            ..Config::with_port(cli.port)
        }
    }

    /// Configuration with fixed defaults for the given port.
    pub fn with_port(port: i64) -> Self {
        Config {
            port,
            backlog: DEFAULT_BACKLOG,
            idle_timeout: DEFAULT_IDLE_TIMEOUT,
            ipv6_only: false,
            log_level: "info".to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::with_port(9000);
        assert_eq!(config.port, 9000);
        assert_eq!(config.backlog, 32);
        assert_eq!(config.idle_timeout, Duration::from_secs(180));
        assert!(!config.ipv6_only);
    }

    #[test]
    fn test_cli_parsing() {
        let cli = CliArgs::try_parse_from(["echo-poll", "9000"]).unwrap();
        let config = Config::from_args(cli);
        assert_eq!(config.port, 9000);
        assert_eq!(config.log_level, "info");
        assert_eq!(config.idle_timeout, DEFAULT_IDLE_TIMEOUT);
        assert!(!config.ipv6_only);

        let cli = CliArgs::try_parse_from([
            "echo-poll",
            "--ipv6-only",
            "--log-level",
            "debug",
            "4242",
        ])
        .unwrap();
        let config = Config::from_args(cli);
        assert_eq!(config.port, 4242);
        assert_eq!(config.log_level, "debug");
        assert!(config.ipv6_only);
    }

    #[test]
    fn test_idle_timeout_override() {
        let cli =
            CliArgs::try_parse_from(["echo-poll", "--idle-timeout-ms", "200", "9000"]).unwrap();
        let config = Config::from_args(cli);
        assert_eq!(config.idle_timeout, Duration::from_millis(200));
        assert_eq!(config.backlog, DEFAULT_BACKLOG);
    }

    #[test]
    fn test_out_of_range_ports_reach_validation() {
        // Range checking belongs to the listening socket, not to clap.
        for raw in ["0", "70000", "-1"] {
            let cli = CliArgs::try_parse_from(["echo-poll", raw]).unwrap();
            assert_eq!(cli.port, raw.parse::<i64>().unwrap());
        }
    }

    #[test]
    fn test_usage_errors() {
        assert!(CliArgs::try_parse_from(["echo-poll"]).is_err());
        assert!(CliArgs::try_parse_from(["echo-poll", "80", "81"]).is_err());
        assert!(CliArgs::try_parse_from(["echo-poll", "http"]).is_err());
    }
}
