//! Runs the `sharadar-sync` binary against a mocked API.

use std::path::Path;
use std::process::{Output, Stdio};

use serde_json::{json, Value};
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use wiremock::matchers::method;
use wiremock::{Mock, MockServer, ResponseTemplate};

mod common;
use common::{page, write_config};

/// Run the binary in `dir` with `stdin` piped in.
async fn run_cli(dir: &Path, args: &[&str], stdin: &str) -> Output {
    let mut child = Command::new(env!("CARGO_BIN_EXE_sharadar-sync"))
        .args(args)
        .current_dir(dir)
        .env("RUST_LOG", "warn")
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
        .unwrap();
    let mut input = child.stdin.take().unwrap();
    input.write_all(stdin.as_bytes()).await.unwrap();
    drop(input);
    child.wait_with_output().await.unwrap()
}

#[tokio::test]
async fn declined_all_confirmation_sends_no_requests() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200).set_body_json(page(json!([]), None)))
        .expect(0)
        .mount(&server)
        .await;

    let dir = tempfile::tempdir().unwrap();
    let config = write_config(&server, dir.path());
    let out_dir = dir.path().join("out");
    let out = run_cli(
        dir.path(),
        &[
            "--config",
            config.to_str().unwrap(),
            "download",
            "--tables",
            "ALL",
            "--directory",
            out_dir.to_str().unwrap(),
            "--key",
            "test-key",
            "--no-progress",
        ],
        "yes\n",
    )
    .await;

    assert_eq!(out.status.code(), Some(1));
    let stderr = String::from_utf8(out.stderr).unwrap();
    assert!(stderr.contains("type 'ALL' again"));
    assert!(stderr.contains("Aborted"));
    assert!(out.stdout.is_empty());
    assert!(!out_dir.exists());
}

#[tokio::test]
async fn json_report_is_the_only_stdout_after_confirming_all() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200).set_body_json(page(json!([]), None)))
        .mount(&server)
        .await;

    let dir = tempfile::tempdir().unwrap();
    let config = write_config(&server, dir.path());
    let out_dir = dir.path().join("out");
    let out = run_cli(
        dir.path(),
        &[
            "--config",
            config.to_str().unwrap(),
            "update",
            "--tables",
            "ALL",
            "--directory",
            out_dir.to_str().unwrap(),
            "--key",
            "test-key",
            "--json",
        ],
        "ALL\n",
    )
    .await;

    let stderr = String::from_utf8_lossy(&out.stderr).to_string();
    assert!(out.status.success(), "{stderr}");
    assert!(stderr.contains("type 'ALL' again"));

    let report: Value = serde_json::from_slice(&out.stdout).unwrap();
    assert_eq!(report["command"], "update");
    assert_eq!(report["tables"].as_array().unwrap().len(), 11);
    assert!(report["tables"]
        .as_array()
        .unwrap()
        .iter()
        .all(|t| t["status"] == "no_new_data"));
}
