//! End-to-end CLI tests for the download-agent binary.

#![allow(clippy::unwrap_used)]

mod support;

use assert_cmd::Command;
use predicates::prelude::*;
use support::{mock_server, runtime};
use tempfile::TempDir;
use wiremock::matchers::{method, path};
use wiremock::{Mock, ResponseTemplate};

const PROXY_VARS: [&str; 6] = [
    "HTTP_PROXY",
    "http_proxy",
    "HTTPS_PROXY",
    "https_proxy",
    "ALL_PROXY",
    "all_proxy",
];

fn agent_cmd() -> Command {
    let mut cmd = Command::cargo_bin("download-agent").unwrap();
    for var in PROXY_VARS {
        cmd.env_remove(var);
    }
    cmd.env_remove("RUST_LOG");
    cmd
}

/// Test that --help displays usage information and exits with code 0.
#[test]
fn test_binary_help_displays_usage() {
    agent_cmd()
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("Download a file"))
        .stdout(predicate::str::contains("--cache-host"));
}

/// Test that --version displays version and exits with code 0.
#[test]
fn test_binary_version_displays_version() {
    agent_cmd()
        .arg("--version")
        .assert()
        .success()
        .stdout(predicate::str::contains("download-agent"));
}

/// Test that a URL without an output path is rejected.
#[test]
fn test_binary_missing_output_returns_error() {
    agent_cmd()
        .arg("http://example.com/file")
        .assert()
        .failure()
        .stderr(predicate::str::contains("--output"));
}

/// Test that invalid flags cause non-zero exit.
#[test]
fn test_binary_invalid_flag_returns_error() {
    agent_cmd()
        .arg("--invalid-flag")
        .assert()
        .failure()
        .stderr(predicate::str::contains("error"));
}

#[test]
fn test_binary_rejects_invalid_url() {
    let temp = TempDir::new().unwrap();
    agent_cmd()
        .args(["-q", "not a url", "-o"])
        .arg(temp.path().join("out"))
        .assert()
        .failure()
        .stderr(predicate::str::contains("invalid URL"));
}

#[test]
fn test_binary_refuses_to_overwrite_existing_file() {
    let temp = TempDir::new().unwrap();
    let dest = temp.path().join("existing");
    std::fs::write(&dest, b"original").unwrap();

    agent_cmd()
        .args(["-q", "http://127.0.0.1:9/file", "-o"])
        .arg(&dest)
        .assert()
        .failure();
    assert_eq!(std::fs::read(&dest).unwrap(), b"original");
}

#[test]
fn test_binary_downloads_file() {
    let rt = runtime();
    let Some(server) = mock_server(&rt) else {
        return;
    };
    let content: Vec<u8> = (0..20_000u32).map(|i| (i % 256) as u8).collect();
    rt.block_on(
        Mock::given(method("GET"))
            .and(path("/files/data.bin"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(content.clone()))
            .mount(&server),
    );

    let temp = TempDir::new().unwrap();
    let dest = temp.path().join("data.bin");
    agent_cmd()
        .arg("-q")
        .arg(format!("{}/files/data.bin", server.uri()))
        .arg("-o")
        .arg(&dest)
        .timeout(std::time::Duration::from_secs(30))
        .assert()
        .success();

    assert_eq!(std::fs::read(&dest).unwrap(), content);
}

#[test]
fn test_binary_downloads_through_cache_host() {
    let rt = runtime();
    let (Some(origin), Some(cache)) = (mock_server(&rt), mock_server(&rt)) else {
        return;
    };
    rt.block_on(
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(b"from cache".to_vec()))
            .expect(1)
            .mount(&cache),
    );

    let temp = TempDir::new().unwrap();
    let dest = temp.path().join("cached");
    agent_cmd()
        .arg("-q")
        .arg(format!("{}/pkg", origin.uri()))
        .arg("-o")
        .arg(&dest)
        .arg("--cache-host")
        .arg(format!("127.0.0.1:{}", cache.address().port()))
        .timeout(std::time::Duration::from_secs(30))
        .assert()
        .success();

    assert_eq!(std::fs::read(&dest).unwrap(), b"from cache");
    assert!(rt.block_on(origin.received_requests()).unwrap().is_empty());
}
