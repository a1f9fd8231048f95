//! CLI integration tests for lorebank
//!
//! Each test points `LOREBANK_CONFIG_DIR` at its own temp directory, so the
//! config file and the default database never leave it.

use assert_cmd::Command;
use predicates::prelude::*;
use serde_json::Value;
use tempfile::TempDir;

#[allow(deprecated)]
fn lorebank(dir: &TempDir) -> Command {
    let mut cmd = Command::cargo_bin("lorebank").unwrap();
    cmd.env("LOREBANK_CONFIG_DIR", dir.path());
    cmd.env("RUST_LOG", "off");
    cmd
}

fn json_output(cmd: &mut Command) -> Value {
    let output = cmd.assert().success().get_output().stdout.clone();
    serde_json::from_slice(&output).expect("stdout should be JSON")
}

fn tone_learning(scope: &str, owner: Option<&str>, value: &str, importance: f64) -> String {
    serde_json::json!({
        "app": "horizon",
        "scope": scope,
        "owner_id": owner,
        "importance": importance,
        "content": {
            "variant": "tone_calibration",
            "dimension": "formality",
            "preferred_value": value
        }
    })
    .to_string()
}

fn learn(dir: &TempDir, body: &str) -> String {
    let value = json_output(lorebank(dir).args(["--app", "horizon", "--format", "json", "learn", "--json", body]));
    value["id"].as_str().expect("id in output").to_string()
}

#[test]
fn test_init_creates_database() {
    let dir = TempDir::new().unwrap();

    lorebank(&dir)
        .args(["--app", "horizon", "init"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Initialized app 'horizon'"));

    assert!(dir.path().join("lorebank.db").exists());
}

#[test]
fn test_learn_is_idempotent() {
    let dir = TempDir::new().unwrap();
    let body = tone_learning("user", Some("richard"), "casual", 0.9);

    let first = json_output(lorebank(&dir).args(["--format", "json", "learn", "--json", &body]));
    let second = json_output(lorebank(&dir).args(["--format", "json", "learn", "--json", &body]));

    assert_eq!(first["created"], Value::Bool(true));
    assert_eq!(second["created"], Value::Bool(false));
    assert_eq!(first["id"], second["id"]);
}

#[test]
fn test_out_of_range_importance_rejected() {
    let dir = TempDir::new().unwrap();
    let body = tone_learning("app", None, "casual", 1.5);

    lorebank(&dir)
        .args(["learn", "--json", &body])
        .assert()
        .failure()
        .stderr(predicate::str::contains("E001"));
}

#[test]
fn test_retrieve_orders_user_learning_first() {
    let dir = TempDir::new().unwrap();
    let x = learn(&dir, &tone_learning("app", None, "formal", 0.8));
    let y = learn(&dir, &tone_learning("user", Some("richard"), "casual", 0.9));

    let result = json_output(lorebank(&dir).args([
        "--app", "horizon", "--format", "json", "retrieve", "--user", "richard",
    ]));
    let ids: Vec<&str> = result["items"]
        .as_array()
        .unwrap()
        .iter()
        .map(|item| item["learning"]["id"].as_str().unwrap())
        .collect();
    assert_eq!(ids, vec![y.as_str(), x.as_str()]);
}

#[test]
fn test_supersession_cycle_reported() {
    let dir = TempDir::new().unwrap();
    let old = learn(&dir, &tone_learning("app", None, "formal", 0.5));
    let new = learn(&dir, &tone_learning("app", None, "casual", 0.5));

    lorebank(&dir)
        .args(["--app", "horizon", "link", "supersedes", &new, &old])
        .assert()
        .success();

    lorebank(&dir)
        .args(["--app", "horizon", "link", "supersedes", &old, &new])
        .assert()
        .failure()
        .stderr(predicate::str::contains("E200"));

    let edges = json_output(lorebank(&dir).args(["--app", "horizon", "--format", "json", "edges", &new]));
    assert_eq!(edges.as_array().unwrap().len(), 1);

    let current = json_output(lorebank(&dir).args(["--app", "horizon", "--format", "json", "retrieve"]));
    assert_eq!(current["items"].as_array().unwrap().len(), 1);
    let all = json_output(lorebank(&dir).args([
        "--app", "horizon", "--format", "json", "retrieve", "--historical",
    ]));
    assert_eq!(all["items"].as_array().unwrap().len(), 2);
}

#[test]
fn test_unknown_edge_kind() {
    let dir = TempDir::new().unwrap();

    lorebank(&dir)
        .args(["link", "replaces", "a", "b"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("Unknown edge kind"));
}

#[test]
fn test_show_missing_learning() {
    let dir = TempDir::new().unwrap();

    lorebank(&dir)
        .args(["show", "no-such-id"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("E101"));
}

#[test]
fn test_touch_and_retire() {
    let dir = TempDir::new().unwrap();
    let id = learn(&dir, &tone_learning("app", None, "casual", 0.5));

    lorebank(&dir).args(["touch", &id]).assert().success();
    lorebank(&dir)
        .args(["retire", &id, "--reason", "outdated"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Retired"));

    let shown = json_output(lorebank(&dir).args(["--format", "json", "show", &id]));
    assert_eq!(shown["access_count"], 1);
    assert_eq!(shown["active"], Value::Bool(false));

    let history = json_output(lorebank(&dir).args(["--format", "json", "history", &id]));
    let kinds: Vec<&str> = history
        .as_array()
        .unwrap()
        .iter()
        .map(|event| event["event_type"].as_str().unwrap())
        .collect();
    assert_eq!(kinds, vec!["created", "accessed", "deactivated"]);
}

#[test]
fn test_stats_per_app() {
    let dir = TempDir::new().unwrap();
    learn(&dir, &tone_learning("app", None, "casual", 0.5));

    let horizon = json_output(lorebank(&dir).args(["--app", "horizon", "--format", "json", "stats"]));
    assert_eq!(horizon["total"], 1);

    let pulse = json_output(lorebank(&dir).args(["--app", "pulse", "--format", "json", "stats"]));
    assert_eq!(pulse["total"], 0);
}

#[test]
fn test_config_roundtrip() {
    let dir = TempDir::new().unwrap();

    lorebank(&dir)
        .args(["config", "set", "ranking.half_life_hours", "48"])
        .assert()
        .success();
    lorebank(&dir)
        .args(["config", "get", "ranking.half_life_hours"])
        .assert()
        .success()
        .stdout(predicate::str::diff("48\n"));

    lorebank(&dir)
        .args(["config", "set", "ranking.half_life_hours", "-2"])
        .assert()
        .failure();

    lorebank(&dir)
        .args(["config", "list"])
        .assert()
        .success()
        .stdout(predicate::str::contains("expiry.sweep_interval_secs = 300"));

    lorebank(&dir).args(["config", "reset"]).assert().success();
    lorebank(&dir)
        .args(["config", "get", "ranking.half_life_hours"])
        .assert()
        .success()
        .stdout(predicate::str::diff("720\n"));
}

#[test]
fn test_unusable_config_file_is_reported() {
    let dir = TempDir::new().unwrap();
    std::fs::write(
        dir.path().join("config.toml"),
        "[ranking]\nhalf_life_hours = -inf\n",
    )
    .unwrap();

    lorebank(&dir)
        .args(["stats"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("half-life"))
        .stderr(predicate::str::contains("panicked").not());
}
