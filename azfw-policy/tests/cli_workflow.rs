use std::fs;
use std::path::{Path, PathBuf};

use assert_cmd::Command;
use azfw_policy::codec::yaml;
use azfw_policy::model::Rule;
use predicates::prelude::*;
use tempfile::{tempdir, TempDir};

fn fixture(rel: &str) -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR"))
        .join("..")
        .join("fixtures")
        .join(rel)
}

fn copy_dir(from: &Path, to: &Path) {
    fs::create_dir_all(to).expect("mkdir");
    for entry in fs::read_dir(from).expect("read fixture dir") {
        let path = entry.expect("entry").path();
        fs::copy(&path, to.join(path.file_name().expect("name"))).expect("copy fixture");
    }
}

/// A working directory holding the ARM import and environment fixtures.
fn workspace() -> TempDir {
    let dir = tempdir().expect("tempdir");
    copy_dir(&fixture("arm_import"), &dir.path().join("arm_import"));
    copy_dir(&fixture("_firewalls"), &dir.path().join("_firewalls"));
    dir
}

fn azfw(base: &Path) -> Command {
    let mut cmd = Command::new(assert_cmd::cargo::cargo_bin!("azfw-policy"));
    cmd.arg("--base-dir").arg(base).arg("--non-interactive");
    cmd
}

fn run_success(base: &Path, args: &[&str]) -> String {
    let output = azfw(base).args(args).output().expect("command output");
    assert!(
        output.status.success(),
        "command failed\nstdout:\n{}\nstderr:\n{}",
        String::from_utf8_lossy(&output.stdout),
        String::from_utf8_lossy(&output.stderr)
    );
    String::from_utf8_lossy(&output.stdout).into_owned()
}

/// Rewrite Rnet1's destination ports in the YAML policy.
fn edit_yaml_port(base: &Path, port: &str) {
    let path = base.join("_policies").join("net01.yaml");
    let text = fs::read_to_string(&path).expect("read yaml");
    let mut policy = yaml::decode_policy("net01.yaml", &text).expect("decode yaml");
    let rule = policy.rule_collection_groups[0].rule_collections[0]
        .rules
        .iter_mut()
        .find(|r| r.name() == "Rnet1")
        .expect("Rnet1");
    let Rule::Network(rule) = rule else {
        panic!("Rnet1 is not a network rule");
    };
    rule.destination_ports = vec![port.to_string()];
    fs::write(&path, yaml::encode_policy(&policy).expect("encode yaml")).expect("write yaml");
}

fn yaml_port(base: &Path) -> Vec<String> {
    let text = fs::read_to_string(base.join("_policies").join("net01.yaml")).expect("read yaml");
    let policy = yaml::decode_policy("net01.yaml", &text).expect("decode yaml");
    match policy.rule_collection_groups[0].rule_collections[0].rule("Rnet1") {
        Some(Rule::Network(rule)) => rule.destination_ports.clone(),
        other => panic!("unexpected rule {other:?}"),
    }
}

#[test]
fn import_writes_yaml_csv_and_sync_state() {
    let ws = workspace();

    let stdout = run_success(ws.path(), &["import"]);

    assert!(stdout.contains("added=1 removed=0 common=0"), "{stdout}");
    assert!(ws.path().join("_policies/net01.yaml").is_file());
    assert!(ws.path().join("_csv/net01.csv").is_file());
    assert!(ws.path().join(".sync_lock").is_file());
    let csv = fs::read_to_string(ws.path().join("_csv/net01.csv")).expect("read csv");
    assert!(csv.contains("RC_nat_1"));
    assert!(csv.contains("ipg-clients"));
}

#[test]
fn reimport_keeps_unlisted_policies_without_confirmation() {
    let ws = workspace();
    run_success(ws.path(), &["import"]);
    fs::write(ws.path().join("_policies/old.yaml"), "name: old\n").expect("write");

    let stdout = run_success(ws.path(), &["import"]);
    assert!(stdout.contains("removed=1"), "{stdout}");
    assert!(ws.path().join("_policies/old.yaml").exists());

    run_success(ws.path(), &["import", "--yes"]);
    assert!(!ws.path().join("_policies/old.yaml").exists());
}

#[test]
fn invalid_nat_rule_fails_import() {
    let ws = workspace();
    let path = ws.path().join("arm_import/net01_20250613.json");
    let text = fs::read_to_string(&path).expect("read");
    fs::write(&path, text.replace("\"translatedAddress\": \"10.0.0.4\",", "")).expect("write");

    azfw(ws.path())
        .arg("import")
        .assert()
        .failure()
        .stderr(predicate::str::contains("translatedAddress"));
    assert!(!ws.path().join("_policies").exists());
}

#[test]
fn sync_after_import_is_a_noop() {
    let ws = workspace();
    run_success(ws.path(), &["import"]);
    let before = fs::read(ws.path().join("_csv/net01.csv")).expect("read");

    run_success(ws.path(), &["sync"]);
    run_success(ws.path(), &["sync", "--force"]);

    assert_eq!(fs::read(ws.path().join("_csv/net01.csv")).expect("read"), before);
}

#[test]
fn sync_conflict_is_reported_and_resolved() {
    let ws = workspace();
    run_success(ws.path(), &["import"]);
    edit_yaml_port(ws.path(), "8443");

    azfw(ws.path())
        .args(["sync", "--resolution", "cancel"])
        .assert()
        .failure()
        .stdout(predicate::str::contains("net01/RCG_net_01/RC_net_1/Rnet1"))
        .stderr(predicate::str::contains("unresolved"));
    assert_eq!(yaml_port(ws.path()), vec!["8443"]);

    run_success(ws.path(), &["sync", "--resolution", "csv"]);
    assert_eq!(yaml_port(ws.path()), vec!["80"]);

    edit_yaml_port(ws.path(), "8443");
    run_success(ws.path(), &["sync", "--resolution", "policies"]);
    let csv = fs::read_to_string(ws.path().join("_csv/net01.csv")).expect("read csv");
    assert!(csv.contains("8443"));
}

#[test]
fn export_is_idempotent_with_clean_export() {
    let ws = workspace();
    run_success(ws.path(), &["import"]);
    let out = ws.path().join("bicep/fw-test-01/net01.bicep");

    run_success(ws.path(), &["export", "--environment", "test", "--version", "20250701"]);
    let first = fs::read(&out).expect("read bicep");
    assert!(String::from_utf8_lossy(&first).contains("name: 'net01_20250701'"));

    run_success(
        ws.path(),
        &["export", "--environment", "1", "--version", "20250701", "--clean-export"],
    );
    assert_eq!(fs::read(&out).expect("read bicep"), first);
}

#[test]
fn export_refuses_to_overwrite_without_confirmation() {
    let ws = workspace();
    run_success(ws.path(), &["import"]);
    run_success(ws.path(), &["export", "--environment", "test"]);

    azfw(ws.path())
        .args(["export", "--environment", "test"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("not empty"));

    run_success(ws.path(), &["export", "--environment", "fw-test-01", "--yes"]);
}

#[test]
fn export_rejects_unknown_environment() {
    let ws = workspace();
    run_success(ws.path(), &["import"]);

    azfw(ws.path())
        .args(["export", "--environment", "staging"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("staging"));
}

#[test]
fn compare_passes_for_equivalent_templates() {
    let ws = workspace();
    copy_dir(&fixture("arm_export"), &ws.path().join("arm_export"));

    let stdout = run_success(ws.path(), &["compare", "--strict", "--save-results"]);

    assert!(stdout.contains("PASS net01: score=1.0000"), "{stdout}");
    let saved = fs::read_to_string(ws.path().join("comparison/net01.json")).expect("saved");
    let saved: serde_json::Value = serde_json::from_str(&saved).expect("json");
    assert_eq!(saved["passed"], serde_json::Value::Bool(true));
    assert_eq!(saved["entries"], serde_json::json!([]));
}

#[test]
fn compare_strict_fails_on_added_rule() {
    let ws = workspace();
    let left = fixture("arm_export/net01_20250701.json");
    let mut template: serde_json::Value =
        serde_json::from_str(&fs::read_to_string(&left).expect("read")).expect("json");
    let rules = template["resources"][1]["properties"]["ruleCollections"][0]["rules"]
        .as_array_mut()
        .expect("rules");
    let mut added = rules[0].clone();
    added["name"] = serde_json::json!("Rnew");
    rules.push(added);
    let right = ws.path().join("changed.json");
    fs::write(&right, serde_json::to_string_pretty(&template).expect("json")).expect("write");

    azfw(ws.path())
        .args(["compare", "--strict", "--include-diff", "--threshold", "0.99"])
        .arg(&left)
        .arg(&right)
        .assert()
        .failure()
        .stdout(predicate::str::contains("FAIL"))
        .stdout(predicate::str::contains(
            "resources[net01/RCG_net_01].properties.ruleCollections[RC_net_1].rules[Rnew]",
        ));
}

#[test]
fn environments_lists_firewalls() {
    let ws = workspace();

    let stdout = run_success(ws.path(), &["environments"]);

    assert!(stdout.contains("1. test"), "{stdout}");
    assert!(stdout.contains("fw-test-01"));
}
