#![cfg(unix)]

use assert_cmd::Command;
use predicates::str::contains;
use std::{
    fs,
    os::unix::fs::PermissionsExt,
    path::{Path, PathBuf},
};
use tempfile::TempDir;

const LEGACY_SCRIPT: &str = r#"#!/bin/sh
if [ "$1" = "--version" ]; then echo "wkhtmltopdf 0.12.6"; exit 0; fi
for last; do :; done
printf '%%PDF-1.4 from-cli' > "$last"
"#;

fn fake_wkhtmltopdf(dir: &Path) -> PathBuf {
    let path = dir.join("wkhtmltopdf");
    fs::write(&path, LEGACY_SCRIPT).expect("write script");
    let mut perms = fs::metadata(&path).expect("metadata").permissions();
    perms.set_mode(0o755);
    fs::set_permissions(&path, perms).expect("set perms");
    path
}

fn pressroom() -> Command {
    let mut cmd = Command::new(assert_cmd::cargo::cargo_bin!("pressroom"));
    cmd.env_remove("PRESSROOM_CONFIG_FILE")
        .env_remove("PRESSROOM__DEFAULTS__BASIC_AUTH")
        .env("RUST_LOG", "warn");
    cmd
}

fn html_input(dir: &Path) -> PathBuf {
    let input = dir.join("report.html");
    fs::write(&input, "<html><body>Report</body></html>").expect("write input");
    input
}

#[test]
fn renders_file_to_output_path() {
    let dir = TempDir::new().expect("temp dir");
    let binary = fake_wkhtmltopdf(dir.path());
    let input = html_input(dir.path());
    let output = dir.path().join("report.pdf");

    pressroom()
        .arg("render")
        .arg(&input)
        .arg("--backend")
        .arg("wkhtmltopdf")
        .arg("--binary")
        .arg(&binary)
        .arg("--output")
        .arg(&output)
        .arg("--landscape")
        .assert()
        .success();

    let document = fs::read(&output).expect("output written");
    assert_eq!(document, b"%PDF-1.4 from-cli");
}

#[test]
fn streams_document_to_stdout() {
    let dir = TempDir::new().expect("temp dir");
    let binary = fake_wkhtmltopdf(dir.path());
    let input = html_input(dir.path());

    let assert = pressroom()
        .arg("render")
        .arg(&input)
        .args(["--backend", "wkhtmltopdf", "--binary-version", "0.12.6"])
        .arg("--binary")
        .arg(&binary)
        .assert()
        .success();

    assert_eq!(assert.get_output().stdout, b"%PDF-1.4 from-cli");
}

#[test]
fn html_on_stdin_is_rendered() {
    let dir = TempDir::new().expect("temp dir");
    let binary = fake_wkhtmltopdf(dir.path());

    let assert = pressroom()
        .args(["render", "-", "--backend", "wkhtmltopdf"])
        .arg("--binary")
        .arg(&binary)
        .write_stdin("<p>piped</p>")
        .assert()
        .success();

    assert_eq!(assert.get_output().stdout, b"%PDF-1.4 from-cli");
}

#[test]
fn missing_input_file_is_a_usage_error() {
    pressroom()
        .args(["render", "/nonexistent/report.html", "--backend", "wkhtmltopdf"])
        .assert()
        .failure()
        .code(2)
        .stderr(contains("is not a file"));
}

#[test]
fn malformed_default_credentials_fail_with_config_error() {
    let dir = TempDir::new().expect("temp dir");
    let binary = fake_wkhtmltopdf(dir.path());
    let input = html_input(dir.path());
    let output = dir.path().join("report.pdf");

    pressroom()
        .env("PRESSROOM__DEFAULTS__BASIC_AUTH", "bm8tY29sb24=")
        .arg("render")
        .arg(&input)
        .args(["--backend", "wkhtmltopdf"])
        .arg("--binary")
        .arg(&binary)
        .arg("--output")
        .arg(&output)
        .assert()
        .failure()
        .code(2)
        .stderr(contains("basic_auth"));

    assert!(!output.exists());
}

#[test]
fn probe_reports_binary_and_version() {
    let dir = TempDir::new().expect("temp dir");
    let binary = fake_wkhtmltopdf(dir.path());

    pressroom()
        .args(["probe", "--backend", "wkhtmltopdf"])
        .arg("--binary")
        .arg(&binary)
        .assert()
        .success()
        .stdout(contains("wkhtmltopdf\t"))
        .stdout(contains("0.12.6"));
}

#[test]
fn unknown_backend_fails_fast() {
    pressroom()
        .args(["probe", "--backend", "prince"])
        .assert()
        .failure()
        .code(2)
        .stderr(contains("renderer.backend"));
}
