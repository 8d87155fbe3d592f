//! Integration tests for the CLI

use assert_cmd::Command;
use mockito::Matcher;
use predicates::prelude::*;
use std::io::Write;
use std::path::PathBuf;

fn fixture(name: &str) -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR"))
        .join("tests")
        .join("fixtures")
        .join(name)
}

/// Registry answering every package with `latest = 5.0.0`, MIT, no repository,
/// and an audit relay reporting one high advisory for `debug`
fn mock_services(server: &mut mockito::Server) {
    server
        .mock("GET", Matcher::Regex(r"^/registry/".to_string()))
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body(r#"{"dist-tags": {"latest": "5.0.0"}, "versions": {"5.0.0": {"license": "MIT"}}}"#)
        .create();
    server
        .mock("POST", "/audit")
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body(
            r#"{
                "vulnerabilities": 1,
                "advisories": [{"id": 1, "module_name": "debug", "title": "ReDoS", "severity": "high"}],
                "packages": {"debug": {"count": 1, "severity": "high"}},
                "summary": {"high": 1}
            }"#,
        )
        .create();
}

fn cmd_against(server: &mockito::Server) -> Command {
    let mut cmd = Command::cargo_bin("lock-insight").unwrap();
    cmd.arg("--lockfile")
        .arg(fixture("package-lock-v3.json"))
        .arg("--registry-url")
        .arg(format!("{}/registry", server.url()))
        .arg("--audit-url")
        .arg(format!("{}/audit", server.url()))
        .arg("--timeout")
        .arg("5");
    cmd
}

#[test]
fn test_cli_scan_help() {
    let mut cmd = Command::cargo_bin("lock-insight").unwrap();
    cmd.arg("scan").arg("--help");

    cmd.assert()
        .success()
        .stdout(predicate::str::contains("Enrich every package"));
}

#[test]
fn test_cli_report_help() {
    let mut cmd = Command::cargo_bin("lock-insight").unwrap();
    cmd.arg("report").arg("--help");

    cmd.assert()
        .success()
        .stdout(predicate::str::contains("Generate a full enrichment report"));
}

#[test]
fn test_cli_check_help() {
    let mut cmd = Command::cargo_bin("lock-insight").unwrap();
    cmd.arg("check").arg("--help");

    cmd.assert()
        .success()
        .stdout(predicate::str::contains("Check packages against policy"));
}

#[test]
fn test_cli_inventory_v3() {
    let mut cmd = Command::cargo_bin("lock-insight").unwrap();
    cmd.arg("--lockfile")
        .arg(fixture("package-lock-v3.json"))
        .arg("inventory");

    cmd.assert()
        .success()
        .stdout(predicate::str::contains(r#""name": "express""#))
        .stdout(predicate::str::contains(r#""name": "@storefront/shared-ui""#))
        .stdout(predicate::str::contains(r#""explicit": true"#))
        .stdout(predicate::str::contains(r#""state": "pending""#));
}

#[test]
fn test_cli_inventory_v2_keeps_both_versions() {
    let mut cmd = Command::cargo_bin("lock-insight").unwrap();
    cmd.arg("--lockfile")
        .arg(fixture("package-lock-v2.json"))
        .arg("inventory");

    let output = cmd.assert().success().get_output().stdout.clone();
    let packages: serde_json::Value = serde_json::from_slice(&output).unwrap();
    let packages = packages.as_array().unwrap();

    let ids: Vec<(&str, &str)> = packages
        .iter()
        .map(|p| (p["name"].as_str().unwrap(), p["version"].as_str().unwrap()))
        .collect();
    assert_eq!(
        ids,
        vec![("minimist", "0.0.8"), ("minimist", "1.2.0"), ("mkdirp", "0.5.1")]
    );

    // The tree attested the same packages as the table
    let origins = packages[1]["origins"].as_array().unwrap();
    assert_eq!(origins.len(), 2);
}

#[test]
fn test_cli_inventory_tree_only_lockfile_is_empty() {
    let mut cmd = Command::cargo_bin("lock-insight").unwrap();
    cmd.arg("--lockfile")
        .arg(fixture("package-lock-v1.json"))
        .arg("inventory");

    cmd.assert()
        .failure()
        .stderr(predicate::str::contains("Lockfile contains no packages"));
}

#[test]
fn test_cli_inventory_rejects_garbage() {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    write!(file, "<<<<<<< HEAD\n{{ \"lockfileVersion\": 3").unwrap();

    let mut cmd = Command::cargo_bin("lock-insight").unwrap();
    cmd.arg("--lockfile").arg(file.path()).arg("inventory");

    cmd.assert()
        .failure()
        .stderr(predicate::str::contains("Failed to parse lockfile"));
}

#[test]
fn test_cli_inventory_to_file() {
    let dir = tempfile::tempdir().unwrap();
    let out = dir.path().join("inventory.json");

    let mut cmd = Command::cargo_bin("lock-insight").unwrap();
    cmd.arg("--lockfile")
        .arg(fixture("package-lock-v3.json"))
        .arg("inventory")
        .arg("--output")
        .arg(&out);

    cmd.assert()
        .success()
        .stdout(predicate::str::contains("Report written to"));
    let written = std::fs::read_to_string(out).unwrap();
    assert!(written.contains("left-pad"));
}

#[test]
fn test_cli_bad_config_fails() {
    let mut config = tempfile::NamedTempFile::new().unwrap();
    writeln!(config, "[staleness_thresholds]\nmedium_months = 20.0\nhigh_months = 2.0").unwrap();

    let mut cmd = Command::cargo_bin("lock-insight").unwrap();
    cmd.arg("--lockfile")
        .arg(fixture("package-lock-v3.json"))
        .arg("--config")
        .arg(config.path())
        .arg("scan");

    cmd.assert()
        .failure()
        .stderr(predicate::str::contains("Failed to load config"));
}

#[test]
fn test_cli_report_json_with_local_services() {
    let mut server = mockito::Server::new();
    mock_services(&mut server);

    let mut cmd = cmd_against(&server);
    cmd.arg("report").arg("--format").arg("json");

    let output = cmd.assert().success().get_output().stdout.clone();
    let report: serde_json::Value = serde_json::from_slice(&output).unwrap();

    assert_eq!(report["summary"]["total_packages"], 4);
    assert_eq!(report["summary"]["resolved"], 3);
    assert_eq!(report["summary"]["local_only"], 1);
    assert_eq!(report["summary"]["vulnerable"], 1);
    assert_eq!(report["audit"]["vulnerabilities"], 1);

    let express = report["packages"]
        .as_array()
        .unwrap()
        .iter()
        .find(|p| p["name"] == "express")
        .unwrap();
    assert_eq!(express["state"], "resolved");
    assert_eq!(express["enrichment"]["latest_version"], "5.0.0");
    assert_eq!(express["explicit"], true);
}

#[test]
fn test_cli_scan_summary() {
    let mut server = mockito::Server::new();
    mock_services(&mut server);

    let mut cmd = cmd_against(&server);
    cmd.arg("scan").arg("--detailed");

    cmd.assert()
        .success()
        .stdout(predicate::str::contains("Lockfile Summary"))
        .stdout(predicate::str::contains("Total packages: 4 (2 explicit)"))
        .stdout(predicate::str::contains("express@4.18.2"));
}

#[test]
fn test_cli_check_fails_on_high_advisory() {
    let mut server = mockito::Server::new();
    mock_services(&mut server);

    let mut cmd = cmd_against(&server);
    cmd.arg("check").arg("--fail-on").arg("high");

    cmd.assert()
        .failure()
        .stderr(predicate::str::contains("debug@2.6.9: high or worse advisories"));
}

#[test]
fn test_cli_check_passes_below_threshold() {
    let mut server = mockito::Server::new();
    mock_services(&mut server);

    let mut cmd = cmd_against(&server);
    cmd.arg("check").arg("--fail-on").arg("critical");

    cmd.assert()
        .success()
        .stdout(predicate::str::contains("All checks passed"));
}
