#![cfg(feature = "cli")]

use std::net::{TcpListener, TcpStream};
use std::process::{Child, Command, Output, Stdio};
use std::thread;
use std::time::{Duration, Instant};

/// Echo server child process, killed on drop.
struct EchoServer {
    child: Child,
    addr: String,
}

impl EchoServer {
    fn start(extra: &[&str]) -> Self {
        let port = free_port();
        let addr = format!("127.0.0.1:{port}");
        let child = Command::new(env!("CARGO_BIN_EXE_linkwire"))
            .args(["--log-level", "error", "echo", &addr])
            .args(extra)
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .spawn()
            .expect("echo command should start");
        wait_for_listener(&addr, Duration::from_secs(5));
        Self { child, addr }
    }
}

impl Drop for EchoServer {
    fn drop(&mut self) {
        let _ = self.child.kill();
        let _ = self.child.wait();
    }
}

fn free_port() -> u16 {
    TcpListener::bind("127.0.0.1:0")
        .expect("ephemeral bind should succeed")
        .local_addr()
        .expect("bound address")
        .port()
}

fn wait_for_listener(addr: &str, timeout: Duration) {
    let start = Instant::now();
    loop {
        if TcpStream::connect(addr).is_ok() {
            return;
        }
        if start.elapsed() >= timeout {
            panic!("echo server did not start on {addr}");
        }
        thread::sleep(Duration::from_millis(25));
    }
}

fn linkwire(args: &[&str]) -> Output {
    Command::new(env!("CARGO_BIN_EXE_linkwire"))
        .args(["--log-level", "error"])
        .args(args)
        .output()
        .expect("linkwire should run")
}

#[test]
fn send_against_echo_server_prints_response() {
    let server = EchoServer::start(&[]);

    let output = linkwire(&[
        "--format",
        "json",
        "send",
        &server.addr,
        "--route",
        "2:5",
        "--data",
        "hello linkwire",
    ]);

    assert!(output.status.success(), "stderr: {}", String::from_utf8_lossy(&output.stderr));
    let line = String::from_utf8_lossy(&output.stdout);
    let value: serde_json::Value =
        serde_json::from_str(line.trim()).expect("stdout should be one json object");
    assert_eq!(value["route_key"], "2:5");
    assert_eq!(value["status"], 0);
    assert_eq!(value["payload"], "hello linkwire");
    assert!(value["correlation_id"].as_u64().unwrap_or(0) > 0);
}

#[test]
fn probe_reports_connected_state() {
    let server = EchoServer::start(&[]);

    let output = linkwire(&["--format", "json", "probe", &server.addr, "--samples", "2"]);

    assert!(output.status.success());
    let value: serde_json::Value = serde_json::from_slice(&output.stdout)
        .expect("stdout should be one json object");
    assert_eq!(value["state"], "connected");
    assert_eq!(value["transport"], "tcp");
    assert_eq!(value["samples"], 2);
    assert!(value["stats"]["frames_received"].as_u64().unwrap_or(0) >= 2);
}

#[test]
fn listen_prints_pushes_until_count() {
    let server = EchoServer::start(&["--push-route", "9:1", "--push-interval", "50ms"]);

    let output = linkwire(&[
        "--format",
        "json",
        "listen",
        &server.addr,
        "--route",
        "9:1",
        "--count",
        "2",
    ]);

    assert!(output.status.success());
    let stdout = String::from_utf8_lossy(&output.stdout);
    let lines: Vec<&str> = stdout.lines().collect();
    assert_eq!(lines.len(), 2);
    for line in lines {
        let value: serde_json::Value = serde_json::from_str(line).expect("json line");
        assert_eq!(value["route_key"], "9:1");
        assert_eq!(value["correlation_id"], 0);
    }
}

#[test]
fn send_to_closed_port_fails_with_exit_1() {
    let addr = format!("127.0.0.1:{}", free_port());

    let output = linkwire(&["send", &addr, "--route", "1:1", "--data", "x"]);

    assert_eq!(output.status.code(), Some(1));
    assert!(String::from_utf8_lossy(&output.stderr).contains("connect failed"));
}

#[test]
fn invalid_json_payload_is_a_usage_error() {
    let output = linkwire(&["send", "127.0.0.1:1", "--route", "1:1", "--json", "{nope"]);
    assert_eq!(output.status.code(), Some(64));
}

#[test]
fn version_prints_package_version() {
    let output = linkwire(&["version"]);
    assert!(output.status.success());
    assert_eq!(
        String::from_utf8_lossy(&output.stdout).trim(),
        format!("linkwire {}", env!("CARGO_PKG_VERSION"))
    );
}
