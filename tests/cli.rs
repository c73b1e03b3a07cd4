//! Process-level checks of the command-line surface.

use std::process::{Command, Output};

fn echo_poll(args: &[&str]) -> Output {
    Command::new(env!("CARGO_BIN_EXE_echo-poll"))
        .args(args)
        .env_remove("RUST_LOG")
        .output()
        .expect("failed to run echo-poll")
}

#[test]
fn test_out_of_range_ports_fail() {
    for port in ["0", "70000", "-5"] {
        let output = echo_poll(&[port]);

        assert!(!output.status.success(), "port {port} was accepted");
        let stderr = String::from_utf8_lossy(&output.stderr);
        assert!(stderr.contains("invalid port"), "stderr: {stderr}");
        assert!(output.stdout.is_empty());
    }
}

#[test]
fn test_non_numeric_port_fails() {
    let output = echo_poll(&["http"]);

    assert!(!output.status.success());
    assert!(!output.stderr.is_empty());
}

#[test]
fn test_missing_port_prints_usage() {
    let output = echo_poll(&[]);

    assert!(!output.status.success());
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("Usage"), "stderr: {stderr}");
}

#[test]
fn test_help_succeeds() {
    let output = echo_poll(&["--help"]);

    assert!(output.status.success());
    assert!(String::from_utf8_lossy(&output.stdout).contains("<PORT>"));
}

#[test]
fn test_idle_server_exits_cleanly() {
    let port = {
        let probe = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        probe.local_addr().unwrap().port().to_string()
    };
    let output = echo_poll(&["--idle-timeout-ms", "200", &port]);

    assert!(output.status.success(), "status: {:?}", output.status);
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert_eq!(stdout.trim(), "Timeout occurred, shutting down");
}
