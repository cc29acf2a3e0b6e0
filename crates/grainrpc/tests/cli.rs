#![cfg(all(unix, feature = "cli"))]

use std::io::{BufRead, BufReader};
use std::path::PathBuf;
use std::process::{Child, Command, Output, Stdio};

use serde_json::Value;

fn unique_socket(tag: &str) -> PathBuf {
    PathBuf::from(format!(
        "/tmp/grainrpc-cli-{tag}-{}-{}.sock",
        std::process::id(),
        std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .expect("time should be after epoch")
            .as_nanos()
    ))
}

/// A running `grainrpc serve` and the address it reported.
struct Server {
    child: Child,
    addr: String,
}

impl Server {
    fn start(addr: &str, extra: &[&str]) -> Self {
        let mut child = Command::new(env!("CARGO_BIN_EXE_grainrpc"))
            .args(["--log-level", "error", "--format", "json", "serve", addr])
            .args(extra)
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .spawn()
            .expect("serve command should start");

        let stdout = child.stdout.take().expect("stdout should be piped");
        let mut line = String::new();
        BufReader::new(stdout)
            .read_line(&mut line)
            .expect("serve should announce its address");
        let report: Value = serde_json::from_str(&line).expect("announcement should be JSON");
        assert_eq!(report["event"], "listening");
        let addr = report["addr"]
            .as_str()
            .expect("announcement should carry the address")
            .to_string();
        Self { child, addr }
    }
}

impl Drop for Server {
    fn drop(&mut self) {
        let _ = self.child.kill();
        let _ = self.child.wait();
    }
}

fn grainrpc(args: &[&str]) -> Output {
    Command::new(env!("CARGO_BIN_EXE_grainrpc"))
        .args(["--log-level", "error", "--format", "json"])
        .args(args)
        .output()
        .expect("grainrpc should run")
}

#[test]
fn call_echoes_through_a_tcp_server() {
    let server = Server::start("127.0.0.1:0", &[]);
    assert!(server.addr.starts_with("tcp://127.0.0.1:"));

    let output = grainrpc(&["call", &server.addr, "--message", "hello grains"]);
    assert!(output.status.success(), "{output:?}");
    let report: Value =
        serde_json::from_slice(&output.stdout).expect("call report should be JSON");
    assert_eq!(report["response"], "hello grains");
    assert_eq!(report["grain"], 1);
    assert_eq!(report["connection_id"], 1);
}

#[test]
fn probe_reports_the_remote_endpoint() {
    let server = Server::start("127.0.0.1:0", &["--name", "probed"]);

    let output = grainrpc(&["probe", &server.addr, "--sample-for", "200ms"]);
    assert!(output.status.success(), "{output:?}");
    let report: Value =
        serde_json::from_slice(&output.stdout).expect("probe report should be JSON");
    assert_eq!(report["connected"], true);
    assert_eq!(report["remote_name"], "probed");
    assert_eq!(report["remote_addr"], server.addr.as_str());
}

#[test]
fn unix_socket_servers_answer_calls() {
    let path = unique_socket("unix");
    let addr = format!("unix://{}", path.display());
    let server = Server::start(&addr, &["--grain", "9"]);

    let output = grainrpc(&["call", &server.addr, "--grain", "9", "-m", "over unix"]);
    assert!(output.status.success(), "{output:?}");
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("\"response\":\"over unix\""));

    drop(server);
    let _ = std::fs::remove_file(&path);
}

#[test]
fn secrets_must_match() {
    let server = Server::start("127.0.0.1:0", &["--secret", "open sesame"]);

    let output = grainrpc(&["call", &server.addr, "-m", "x", "--secret", "guess"]);
    assert_eq!(output.status.code(), Some(50));

    let output = grainrpc(&["call", &server.addr, "-m", "x"]);
    assert_eq!(output.status.code(), Some(50));

    let output = grainrpc(&["call", &server.addr, "-m", "x", "--secret", "open sesame"]);
    assert!(output.status.success(), "{output:?}");
}

#[test]
fn unreachable_server_returns_transport_error() {
    let output = grainrpc(&["call", "tcp://127.0.0.1:1", "-m", "x", "--timeout", "1s"]);
    assert_eq!(output.status.code(), Some(3));
}

#[test]
fn bad_arguments_return_usage() {
    let output = grainrpc(&["call", "not an address", "-m", "x"]);
    assert_eq!(output.status.code(), Some(64));

    let output = grainrpc(&["call", "tcp://127.0.0.1:1", "-m", "x", "--timeout", "0s"]);
    assert_eq!(output.status.code(), Some(64));
}

#[test]
fn version_names_the_binary() {
    let output = grainrpc(&["version", "--extended"]);
    assert!(output.status.success());
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("name: grainrpc"));
    assert!(stdout.contains(&format!("version: {}", env!("CARGO_PKG_VERSION"))));
}
