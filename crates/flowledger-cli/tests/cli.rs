//! CLI integration tests for flowledger
//!
//! Runs the binary end-to-end against a throwaway database and config dir.

use assert_cmd::Command;
use predicates::prelude::*;
use serde_json::Value;
use tempfile::TempDir;

struct Sandbox {
    dir: TempDir,
}

impl Sandbox {
    fn new() -> Self {
        Self {
            dir: TempDir::new().unwrap(),
        }
    }

    #[allow(deprecated)]
    fn cmd(&self) -> Command {
        let mut cmd = Command::cargo_bin("flowledger").unwrap();
        cmd.current_dir(self.dir.path())
            .env("FLOWLEDGER_CONFIG_DIR", self.dir.path().join("config"))
            .env("FLOWLEDGER_DB", self.dir.path().join("flows.db"))
            .env_remove("RUST_LOG");
        cmd
    }

    fn json(&self, args: &[&str]) -> Value {
        let output = self
            .cmd()
            .arg("--format")
            .arg("json")
            .args(args)
            .output()
            .unwrap();
        assert!(
            output.status.success(),
            "command {:?} failed: {}",
            args,
            String::from_utf8_lossy(&output.stderr)
        );
        serde_json::from_slice(&output.stdout).unwrap()
    }
}

#[test]
fn test_help_lists_commands() {
    Sandbox::new()
        .cmd()
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("flows"))
        .stdout(predicate::str::contains("cleanup"))
        .stdout(predicate::str::contains("doctor"));
}

#[test]
fn test_add_list_and_get() {
    let sandbox = Sandbox::new();

    let added = sandbox.json(&["flows", "add", "APPLICATION:1", "ACTOR:2", "--user", "alice"]);
    let id = added["id"].as_i64().unwrap();
    assert_eq!(added["entity_lifecycle_status"], "ACTIVE");
    assert_eq!(added["last_updated_by"], "alice");

    sandbox
        .cmd()
        .args(["flows", "list", "APPLICATION:1"])
        .assert()
        .success()
        .stdout(predicate::str::contains("APPLICATION:1 -> ACTOR:2"));

    let fetched = sandbox.json(&["flows", "get", &id.to_string()]);
    assert_eq!(fetched["source"]["kind"], "APPLICATION");
    assert_eq!(fetched["target"]["id"], 2);
}

#[test]
fn test_remove_then_add_restores_same_id() {
    let sandbox = Sandbox::new();

    let added = sandbox.json(&["flows", "add", "APPLICATION:1", "ACTOR:2", "--user", "alice"]);
    let id = added["id"].as_i64().unwrap();

    let removed = sandbox.json(&["flows", "remove", &id.to_string(), "--user", "alice"]);
    assert_eq!(removed["removed"], 1);

    let fetched = sandbox.json(&["flows", "get", &id.to_string()]);
    assert_eq!(fetched["is_removed"], true);

    let again = sandbox.json(&["flows", "add", "APPLICATION:1", "ACTOR:2", "--user", "bob"]);
    assert_eq!(again["id"].as_i64(), Some(id));
    assert_eq!(again["last_updated_by"], "bob");
    assert_eq!(again["created"], added["created"]);
}

#[test]
fn test_upstream() {
    let sandbox = Sandbox::new();
    sandbox.json(&["flows", "add", "APPLICATION:10", "APPLICATION:1"]);
    sandbox.json(&["flows", "add", "APPLICATION:11", "ACTOR:2"]);
    sandbox.json(&["flows", "add", "APPLICATION:12", "APPLICATION:3"]);

    let flows = sandbox.json(&["flows", "upstream", "APPLICATION:1", "ACTOR:2"]);
    assert_eq!(flows.as_array().unwrap().len(), 2);
}

#[test]
fn test_get_missing_flow_fails() {
    Sandbox::new()
        .cmd()
        .args(["flows", "get", "42"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("not found"));
}

#[test]
fn test_bad_entity_reference_fails() {
    Sandbox::new()
        .cmd()
        .args(["flows", "list", "PLANET:3"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("PLANET"));
}

#[test]
fn test_cleanup_commands() {
    let sandbox = Sandbox::new();
    sandbox.json(&["flows", "add", "APPLICATION:1", "APPLICATION:1"]);
    sandbox.json(&["flows", "add", "APPLICATION:1", "APPLICATION:2"]);
    sandbox.json(&["flows", "add", "APPLICATION:7", "ACTOR:3"]);

    let reports = sandbox.json(&["cleanup", "self-refs"]);
    assert_eq!(reports[0]["job"], "self_referencing");
    assert_eq!(reports[0]["affected"], 1);

    let reports = sandbox.json(&["cleanup", "orphans", "--active-apps", "1,2"]);
    assert_eq!(reports[0]["job"], "orphans");
    assert_eq!(reports[0]["affected"], 1);

    // Nothing left for a full pass
    let reports = sandbox.json(&["cleanup", "all", "--active-apps", "1,2"]);
    assert_eq!(reports.as_array().unwrap().len(), 2);
    assert!(reports.as_array().unwrap().iter().all(|r| r["affected"] == 0));
}

#[test]
fn test_orphan_cleanup_needs_active_applications() {
    Sandbox::new()
        .cmd()
        .args(["cleanup", "orphans"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("--active-apps"));
}

#[test]
fn test_orphan_cleanup_uses_configured_query() {
    let sandbox = Sandbox::new();
    sandbox.json(&["flows", "add", "APPLICATION:1", "ACTOR:1"]);
    sandbox.json(&["flows", "add", "APPLICATION:2", "ACTOR:1"]);

    sandbox
        .cmd()
        .args([
            "config",
            "set",
            "reconciliation.active_application_ids_query",
            "VALUES (1)",
        ])
        .assert()
        .success();

    let reports = sandbox.json(&["cleanup", "orphans"]);
    assert_eq!(reports[0]["affected"], 1);
}

#[test]
fn test_config_roundtrip() {
    let sandbox = Sandbox::new();

    sandbox
        .cmd()
        .args(["config", "set", "reconciliation.default_user", "ops"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Set reconciliation.default_user = ops"));

    sandbox
        .cmd()
        .args(["config", "get", "reconciliation.default_user"])
        .assert()
        .success()
        .stdout(predicate::str::diff("ops\n"));

    // The default user is used when --user is omitted
    let added = sandbox.json(&["flows", "add", "APPLICATION:1", "ACTOR:2"]);
    assert_eq!(added["last_updated_by"], "ops");

    sandbox.cmd().args(["config", "reset"]).assert().success();
    sandbox
        .cmd()
        .args(["config", "get", "reconciliation.default_user"])
        .assert()
        .success()
        .stdout(predicate::str::diff("flowledger\n"));
}

#[test]
fn test_config_rejects_unknown_key() {
    Sandbox::new()
        .cmd()
        .args(["config", "get", "no.such.key"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("Unknown configuration key"));
}

#[test]
fn test_doctor() {
    Sandbox::new()
        .cmd()
        .arg("doctor")
        .assert()
        .success()
        .stdout(predicate::str::contains("[OK] Database: Connected"))
        .stdout(predicate::str::contains("Active flows: 0"));
}
