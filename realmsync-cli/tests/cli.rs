use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;

use assert_cmd::prelude::*;
use predicates::prelude::*;
use predicates::str::contains;
use serde_json::Value;
use tempfile::TempDir;

use realmsync_core::{loader, TargetName};
use realmsync_sync::fingerprint::{self, FileFingerprintStore, FingerprintRecord, FingerprintStore};

fn realmsync_cmd(home: &Path) -> Command {
    let mut cmd = Command::new(assert_cmd::cargo::cargo_bin!("realmsync"));
    cmd.env("HOME", home).env("USERPROFILE", home);
    for var in [
        "REALMSYNC_URL",
        "REALMSYNC_USER",
        "REALMSYNC_PASSWORD",
        "REALMSYNC_LOGIN_REALM",
        "RUST_LOG",
    ] {
        cmd.env_remove(var);
    }
    cmd
}

fn write_doc(dir: &Path, name: &str, contents: &str) -> PathBuf {
    let path = dir.join(name);
    fs::write(&path, contents).expect("write document");
    path
}

const ACME: &str = "\
realm: acme
displayName: Acme
clients:
  - clientId: app
  - clientId: web
";

const ACME_REORDERED: &str = "\
realm: acme
clients:
  - clientId: web
  - clientId: app
displayName: Acme
";

fn stdout_json(cmd: &mut Command) -> Value {
    let output = cmd.output().expect("run realmsync");
    assert!(
        output.status.success(),
        "stderr: {}",
        String::from_utf8_lossy(&output.stderr)
    );
    serde_json::from_slice(&output.stdout).expect("stdout is JSON")
}

// ---------------------------------------------------------------------------
// config
// ---------------------------------------------------------------------------

#[test]
fn config_init_writes_file_and_refuses_to_overwrite() {
    let home = TempDir::new().unwrap();
    realmsync_cmd(home.path())
        .args(["config", "init", "--url", "https://idp.example.com"])
        .assert()
        .success()
        .stdout(contains("config.yaml"));

    let written = fs::read_to_string(home.path().join(".realmsync/config.yaml")).unwrap();
    assert!(written.contains("https://idp.example.com"));

    realmsync_cmd(home.path())
        .args(["config", "init"])
        .assert()
        .failure()
        .stderr(contains("--force"));

    realmsync_cmd(home.path())
        .args(["config", "init", "--force"])
        .assert()
        .success();
    let rewritten = fs::read_to_string(home.path().join(".realmsync/config.yaml")).unwrap();
    assert!(rewritten.contains("http://localhost:8080"));
}

#[test]
fn config_show_redacts_password() {
    let home = TempDir::new().unwrap();
    realmsync_cmd(home.path())
        .args(["config", "show"])
        .env("REALMSYNC_PASSWORD", "hunter2")
        .assert()
        .success()
        .stdout(contains("********"))
        .stdout(contains("hunter2").not());
}

// ---------------------------------------------------------------------------
// fingerprint
// ---------------------------------------------------------------------------

#[test]
fn fingerprint_ignores_key_and_collection_order() {
    let home = TempDir::new().unwrap();
    let docs = TempDir::new().unwrap();
    let a = write_doc(docs.path(), "a.yaml", ACME);
    let b = write_doc(docs.path(), "b.yaml", ACME_REORDERED);

    let json = stdout_json(
        realmsync_cmd(home.path())
            .args(["fingerprint", "--json"])
            .arg(docs.path()),
    );
    let entries = json.as_array().expect("array");
    assert_eq!(entries.len(), 2);
    let fp_a = entries[0]["fingerprint"].as_str().unwrap();
    let fp_b = entries[1]["fingerprint"].as_str().unwrap();
    assert_eq!(fp_a.len(), 64);
    assert!(fp_a.chars().all(|c| c.is_ascii_hexdigit()));
    assert_eq!(fp_a, fp_b);
    assert_eq!(entries[0]["source"].as_str().unwrap(), a.display().to_string());
    assert_eq!(entries[1]["source"].as_str().unwrap(), b.display().to_string());

    realmsync_cmd(home.path())
        .arg("fingerprint")
        .arg(&a)
        .assert()
        .success()
        .stdout(contains(fp_a))
        .stdout(contains("acme"));
}

#[test]
fn fingerprint_reports_unparseable_document() {
    let home = TempDir::new().unwrap();
    let docs = TempDir::new().unwrap();
    let bad = write_doc(docs.path(), "bad.yaml", "displayName: [unterminated\n");

    realmsync_cmd(home.path())
        .arg("fingerprint")
        .arg(&bad)
        .assert()
        .failure()
        .stderr(contains("failed to load desired-state documents"));
}

// ---------------------------------------------------------------------------
// status (file store, offline)
// ---------------------------------------------------------------------------

#[test]
fn status_tracks_file_store_records() {
    let home = TempDir::new().unwrap();
    let docs = TempDir::new().unwrap();
    let doc = write_doc(docs.path(), "acme.yaml", ACME);

    let status = |home: &Path| {
        stdout_json(
            realmsync_cmd(home)
                .args(["status", "--json", "--fingerprint-store", "file"])
                .arg(&doc),
        )
    };

    let before = status(home.path());
    assert_eq!(before["summary"]["never_imported"], 1);
    assert_eq!(before["realms"][0]["status"], "never_imported");
    assert!(before["realms"][0]["last_import_at"].is_null());

    let state = loader::load_file(&doc).unwrap();
    let fp = fingerprint::compute(&state.desired).unwrap();
    FileFingerprintStore::new(home.path())
        .write(&FingerprintRecord::new(TargetName::from("acme"), fp.clone()))
        .unwrap();

    let current = status(home.path());
    assert_eq!(current["realms"][0]["status"], "current");
    assert_eq!(current["realms"][0]["fingerprint"], fp.to_string());
    assert!(current["realms"][0]["last_import_at"].is_string());

    fs::write(&doc, ACME.replace("displayName: Acme", "displayName: Acme Corp")).unwrap();
    let changed = status(home.path());
    assert_eq!(changed["summary"]["changed"], 1);
    assert_eq!(changed["realms"][0]["status"], "changed");
    assert_eq!(changed["realms"][0]["stored_fingerprint"], fp.to_string());
}

#[test]
fn status_table_suggests_import() {
    let home = TempDir::new().unwrap();
    let docs = TempDir::new().unwrap();
    let doc = write_doc(docs.path(), "acme.yaml", ACME);

    realmsync_cmd(home.path())
        .args(["status", "--fingerprint-store", "file"])
        .arg(&doc)
        .assert()
        .success()
        .stdout(contains("acme"))
        .stdout(contains("NEVER IMPORTED"))
        .stdout(contains("realmsync import"));
}

// ---------------------------------------------------------------------------
// import
// ---------------------------------------------------------------------------

#[test]
fn import_against_unreachable_server_records_nothing() {
    let home = TempDir::new().unwrap();
    let docs = TempDir::new().unwrap();
    let doc = write_doc(docs.path(), "acme.yaml", ACME);

    realmsync_cmd(home.path())
        .args(["import", "--fingerprint-store", "file", "--url", "http://127.0.0.1:1"])
        .arg(&doc)
        .assert()
        .failure()
        .stderr(contains("cannot connect to http://127.0.0.1:1"));

    assert!(!home.path().join(".realmsync/fingerprints").exists());
}

#[test]
fn import_requires_a_document() {
    let home = TempDir::new().unwrap();
    realmsync_cmd(home.path()).arg("import").assert().failure();
}
