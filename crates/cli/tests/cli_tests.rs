//! CLI integration tests

use std::process::{Command, Output};

fn mfctl(args: &[&str]) -> Output {
    Command::new(env!("CARGO_BIN_EXE_mfctl"))
        .args(args)
        .env_remove("MFCTL_SERVER")
        .env_remove("MFCTL_API_URL")
        .output()
        .expect("Failed to execute command")
}

#[test]
fn test_cli_help() {
    let output = mfctl(&["--help"]);
    let stdout = String::from_utf8_lossy(&output.stdout);

    assert!(output.status.success(), "CLI help should succeed");
    assert!(stdout.contains("MeshFlow"), "Should show app name");
    assert!(stdout.contains("logs"), "Should show logs command");
    assert!(stdout.contains("api-metrics"), "Should show api-metrics command");
    assert!(stdout.contains("envoy-metrics"), "Should show envoy-metrics command");
    assert!(stdout.contains("status"), "Should show status command");
    assert!(stdout.contains("MFCTL_SERVER"), "Should show env var");
}

#[test]
fn test_cli_version() {
    let output = mfctl(&["--version"]);
    let stdout = String::from_utf8_lossy(&output.stdout);

    assert!(output.status.success(), "CLI version should succeed");
    assert!(stdout.contains("mfctl"), "Should show binary name");
}

#[test]
fn test_logs_help() {
    let output = mfctl(&["logs", "--help"]);
    let stdout = String::from_utf8_lossy(&output.stdout);

    assert!(output.status.success(), "Logs help should succeed");
    assert!(stdout.contains("--namespace"), "Should show namespace option");
}

#[test]
fn test_invalid_command() {
    let output = mfctl(&["invalid-command"]);

    assert!(!output.status.success(), "Invalid command should fail");
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("error"), "Should show error message");
}

#[test]
fn test_status_reads_health_endpoints() {
    let mut server = mockito::Server::new();
    let _health = server
        .mock("GET", "/healthz")
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body(
            r#"{"status":"degraded","components":{"classifier":{"status":"degraded","message":"Classification service unavailable","since":1714557600},"collector":{"status":"healthy","since":1714557600}}}"#,
        )
        .create();
    let _ready = server
        .mock("GET", "/readyz")
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body(r#"{"ready":true}"#)
        .create();

    let output = mfctl(&["--api-url", &server.url(), "--format", "json", "status"]);
    let stdout = String::from_utf8_lossy(&output.stdout);

    assert!(output.status.success(), "Status should succeed: {stdout}");
    let report: serde_json::Value = serde_json::from_str(stdout.trim()).unwrap();
    assert_eq!(report["health"]["status"], "degraded");
    assert_eq!(report["readiness"]["ready"], true);
    assert_eq!(
        report["health"]["components"]["classifier"]["message"],
        "Classification service unavailable"
    );
}

#[test]
fn test_status_fails_when_collector_unreachable() {
    let output = mfctl(&["--api-url", "http://127.0.0.1:1", "status"]);

    assert!(!output.status.success(), "Unreachable collector should fail");
}
