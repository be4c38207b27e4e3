use assert_cmd::Command;
use predicates::prelude::*;
use serde_json::Value;
use std::path::Path;
use std::sync::{Arc, OnceLock};
use tempfile::TempDir;
use upkeep_cli::apply::Journal;
use upkeep_cli::test_utils::{ArchiveBuilder, TreeFixture};

use crate::common::{StubResponse, StubServer, native_asset_name, release_json};

fn upkeep(install: &Path) -> Command {
    let mut cmd = Command::cargo_bin("upkeep").unwrap();
    cmd.arg("--install-dir")
        .arg(install)
        .arg("--no-progress")
        .env_remove("RUST_LOG")
        .env_remove("UPKEEP_REPO")
        .env_remove("UPKEEP_PROXY")
        .env_remove("UPKEEP_WEBHOOK")
        .env_remove("UPKEEP_RESTART_CMD")
        .env_remove("UPKEEP_CONFIG");
    cmd
}

/// Exit code and the JSON objects printed on stdout, one per line.
fn run_update(cmd: &mut Command) -> (i32, Vec<Value>) {
    let output = cmd.output().unwrap();
    let stdout = String::from_utf8(output.stdout).unwrap();
    let results = stdout
        .lines()
        .filter(|line| !line.trim().is_empty())
        .map(|line| serde_json::from_str(line).unwrap_or_else(|e| panic!("{e}: {line}")))
        .collect();
    (output.status.code().unwrap_or(-1), results)
}

fn sample_install() -> TreeFixture {
    TreeFixture::with_files(&[
        ("app", "app v1"),
        ("data/levels.dat", "levels v1"),
        ("data/retired.dat", "retired"),
        ("config/settings.ini", "user settings"),
    ])
    .unwrap()
}

fn sample_update() -> ArchiveBuilder {
    ArchiveBuilder::new()
        .executable("app", b"app v2")
        .file("data/levels.dat", b"levels v2")
        .file("data/bonus.dat", b"bonus")
        .file("config/settings.ini", b"shipped defaults")
}

#[test]
fn test_update_from_archive() {
    let install = sample_install();
    let outside = TempDir::new().unwrap();
    let archive = outside.path().join("app-update.tar.gz");
    sample_update().write_tar_gz(&archive).unwrap();

    let (code, results) = run_update(
        upkeep(install.path())
            .arg("update")
            .arg("--archive")
            .arg(&archive)
            .arg("--executable")
            .arg(outside.path().join("upkeep")),
    );

    assert_eq!(code, 0, "{results:?}");
    assert_eq!(results.len(), 1);
    let result = &results[0];
    assert_eq!(result["phase"], "update");
    assert_eq!(result["status"], "success");
    assert_eq!(result["updated"], true);
    assert_eq!(result["restart_required"], true);
    assert!(result.get("version").is_none());

    assert_eq!(install.read("app").unwrap(), "app v2");
    assert_eq!(install.read("data/levels.dat").unwrap(), "levels v2");
    assert_eq!(install.read("data/bonus.dat").unwrap(), "bonus");
    assert_eq!(install.read("config/settings.ini").unwrap(), "user settings");
    assert!(!install.exists("data/retired.dat"));
    assert!(!install.exists("update_temp"));
    assert!(!archive.exists(), "applied archive is removed");

    let changes: Value = serde_json::from_str(&install.read("changes.json").unwrap()).unwrap();
    assert_eq!(changes["added"], serde_json::json!(["data/bonus.dat"]));
    assert_eq!(changes["modified"], serde_json::json!(["app", "data/levels.dat"]));
    assert_eq!(changes["deleted"], serde_json::json!(["data/retired.dat"]));

    // Applying the same content again changes nothing
    sample_update().write_tar_gz(&archive).unwrap();
    let (code, results) = run_update(
        upkeep(install.path())
            .arg("update")
            .arg("--archive")
            .arg(&archive)
            .arg("--executable")
            .arg(outside.path().join("upkeep")),
    );
    assert_eq!(code, 0);
    assert_eq!(results[0]["status"], "success");
    assert_eq!(results[0]["updated"], false);
    assert_eq!(results[0]["message"], "Install already matches the update");
}

#[test]
fn test_unchanged_update_replaces_previous_change_list() {
    let install = TreeFixture::with_files(&[("app", "app v2"), ("data/levels.dat", "levels v2")])
        .unwrap();
    install
        .write(
            "changes.json",
            br#"{"added": ["stale-from-last-run.dat"], "deleted": [], "modified": ["app"]}"#,
        )
        .unwrap();
    let outside = TempDir::new().unwrap();
    let archive = outside.path().join("same.tar.gz");
    ArchiveBuilder::new()
        .executable("app", b"app v2")
        .file("data/levels.dat", b"levels v2")
        .write_tar_gz(&archive)
        .unwrap();

    let (code, results) = run_update(
        upkeep(install.path())
            .arg("update")
            .arg("--archive")
            .arg(&archive)
            .arg("--executable")
            .arg(outside.path().join("upkeep")),
    );

    assert_eq!(code, 0, "{results:?}");
    assert_eq!(results[0]["updated"], false);
    let changes: Value = serde_json::from_str(&install.read("changes.json").unwrap()).unwrap();
    assert_eq!(changes, serde_json::json!({"added": [], "deleted": [], "modified": []}));
}

#[test]
fn test_archive_inside_install_dir_is_not_deleted_as_stale() {
    let install = sample_install();
    let archive = install.join("downloads/update.zip");
    std::fs::create_dir_all(archive.parent().unwrap()).unwrap();
    sample_update().write_zip(&archive).unwrap();

    let (code, results) = run_update(
        upkeep(install.path())
            .arg("update")
            .arg("--archive")
            .arg(&archive)
            .arg("--executable")
            .arg(install.join("no-such-updater")),
    );

    assert_eq!(code, 0, "{results:?}");
    let changes: Value = serde_json::from_str(&install.read("changes.json").unwrap()).unwrap();
    assert_eq!(changes["deleted"], serde_json::json!(["data/retired.dat"]));
}

#[test]
fn test_interrupted_update_blocks_and_reports_rollback_incomplete() {
    let install = sample_install();
    Journal::new(".upkeep-backup-0123").write(install.path()).unwrap();
    let before = install.snapshot();

    let outside = TempDir::new().unwrap();
    let archive = outside.path().join("update.zip");
    sample_update().write_zip(&archive).unwrap();

    let (code, results) = run_update(
        upkeep(install.path())
            .arg("update")
            .arg("--archive")
            .arg(&archive)
            .arg("--executable")
            .arg(outside.path().join("upkeep")),
    );

    assert_eq!(code, 1);
    assert_eq!(results.len(), 1);
    assert_eq!(results[0]["status"], "rollback_incomplete");
    assert_eq!(results[0]["updated"], false);
    assert!(results[0]["message"].as_str().unwrap().contains(".upkeep-backup-0123"));

    let mut after = install.snapshot();
    after.remove("updater.log");
    assert_eq!(after, before);
    assert!(archive.exists());
}

#[test]
fn test_bad_archive_fails_without_touching_install() {
    let install = sample_install();
    let outside = TempDir::new().unwrap();
    let archive = outside.path().join("update.tar");
    ArchiveBuilder::new()
        .file("data/levels.dat", b"levels v2")
        .file("../../escape.txt", b"pwned")
        .write_tar(&archive)
        .unwrap();
    let before = install.snapshot();

    let (code, results) = run_update(
        upkeep(install.path())
            .arg("update")
            .arg("--archive")
            .arg(&archive)
            .arg("--executable")
            .arg(outside.path().join("upkeep")),
    );

    assert_eq!(code, 1);
    assert_eq!(results[0]["status"], "failed");
    let mut after = install.snapshot();
    after.remove("updater.log");
    assert_eq!(after, before);
}

#[test]
fn test_deferred_self_update_then_finalize() {
    let install = sample_install();
    let outside = TempDir::new().unwrap();
    let archive = outside.path().join("update.tar.gz");
    sample_update().write_tar_gz(&archive).unwrap();

    let (code, results) = run_update(
        upkeep(install.path())
            .arg("update")
            .arg("--archive")
            .arg(&archive)
            .arg("--executable")
            .arg(install.join("app"))
            .args(["--self-update-strategy", "deferred"]),
    );

    assert_eq!(code, 10, "{results:?}");
    assert_eq!(results[0]["status"], "self_update_pending");
    assert_eq!(results[0]["restart_required"], true);
    assert_eq!(install.read("app.new").unwrap(), "app v2");
    assert_eq!(install.read("app").unwrap(), "app v1");
    // The rest of the update waits for the relaunched updater
    assert_eq!(install.read("data/levels.dat").unwrap(), "levels v1");
    assert!(archive.exists());

    upkeep(install.path())
        .args(["status", "--exe"])
        .arg(install.join("app"))
        .assert()
        .success()
        .stdout(predicate::str::contains("app.new"));

    upkeep(install.path())
        .args(["finalize", "--exe", "app"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Updated"));
    assert_eq!(install.read("app").unwrap(), "app v2");
    assert!(!install.exists("app.new"));
}

#[test]
fn test_status_reports_version_and_interrupted_update() {
    let install = sample_install();
    install.write("version.txt", b"v1.4.2\n").unwrap();
    Journal::new(".upkeep-backup-feed").write(install.path()).unwrap();

    upkeep(install.path())
        .args(["status", "--exe"])
        .arg(install.join("app"))
        .assert()
        .success()
        .stdout(predicate::str::contains("Installed version"))
        .stdout(predicate::str::contains("v1.4.2"))
        .stdout(predicate::str::contains(".upkeep-backup-feed"));
}

#[test]
fn test_missing_update_source_is_reported_as_json() {
    let install = sample_install();
    let (code, results) = run_update(upkeep(install.path()).arg("update"));

    assert_eq!(code, 1);
    assert_eq!(results[0]["phase"], "check");
    assert_eq!(results[0]["status"], "failed");
}

#[test]
fn test_check_only_against_release_endpoint() {
    let body = release_json("v1.2.0", &[(native_asset_name().as_str(), "http://unused/asset")]);
    let server = StubServer::start(move |path, _| {
        if path.ends_with("/releases/latest") {
            StubResponse::ok(body.clone())
        } else {
            StubResponse::status(404)
        }
    });

    let install = sample_install();
    install.write("version.txt", b"v1.0.0\n").unwrap();
    install
        .write("config/updater.toml", format!("api_base = \"{}\"\n", server.base_url()).as_bytes())
        .unwrap();
    let before = install.snapshot();

    let (code, results) = run_update(
        upkeep(install.path()).args(["update", "--repo", "acme/widget", "--check-only"]),
    );

    assert_eq!(code, 0, "{results:?}");
    assert_eq!(results.len(), 1);
    assert_eq!(results[0]["phase"], "check");
    assert_eq!(results[0]["status"], "success");
    assert_eq!(results[0]["version"], "v1.2.0");
    assert_eq!(results[0]["updated"], false);
    assert!(results[0]["message"].as_str().unwrap().contains("v1.0.0 -> v1.2.0"));

    let mut after = install.snapshot();
    after.remove("updater.log");
    assert_eq!(after, before);
}

#[test]
fn test_update_from_latest_release() {
    let outside = TempDir::new().unwrap();
    let archive = outside.path().join("asset.tar.gz");
    sample_update().write_tar_gz(&archive).unwrap();
    let payload = std::fs::read(&archive).unwrap();

    let base: Arc<OnceLock<String>> = Arc::new(OnceLock::new());
    let handler_base = Arc::clone(&base);
    let asset = native_asset_name();
    let server = StubServer::start(move |path, _| {
        let base = handler_base.get().cloned().unwrap_or_default();
        if path.ends_with("/releases/latest") {
            let url = format!("{base}/download/{asset}");
            StubResponse::ok(release_json("v2.0.0", &[(asset.as_str(), url.as_str())]))
        } else if path.starts_with("/download/") {
            StubResponse::ok(payload.clone())
        } else {
            StubResponse::status(404)
        }
    });
    base.set(server.base_url().to_string()).unwrap();

    let install = sample_install();
    install.write("version.txt", b"v1.0.0\n").unwrap();
    install
        .write(
            "config/updater.toml",
            format!(
                "repository = \"acme/widget\"\napi_base = \"{}\"\nmax_retries = 1\n",
                server.base_url()
            )
            .as_bytes(),
        )
        .unwrap();

    let (code, results) = run_update(
        upkeep(install.path()).arg("update").arg("--executable").arg(outside.path().join("upkeep")),
    );

    assert_eq!(code, 0, "{results:?}");
    assert_eq!(results.len(), 2);
    assert_eq!(results[0]["phase"], "check");
    assert_eq!(results[1]["phase"], "update");
    assert_eq!(results[1]["status"], "success");
    assert_eq!(results[1]["updated"], true);
    assert_eq!(results[1]["version"], "v2.0.0");

    assert_eq!(install.read("version.txt").unwrap().trim(), "v2.0.0");
    assert_eq!(install.read("app").unwrap(), "app v2");
    assert_eq!(install.read("config/updater.toml").unwrap().lines().count(), 3);

    // Already current: only the check phase is reported
    let (code, results) = run_update(
        upkeep(install.path()).arg("update").arg("--executable").arg(outside.path().join("upkeep")),
    );
    assert_eq!(code, 0);
    assert_eq!(results.len(), 1);
    assert_eq!(results[0]["phase"], "check");
    assert!(results[0]["message"].as_str().unwrap().contains("up to date"));
}
