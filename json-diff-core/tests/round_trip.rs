use serde_json::json;

use json_diff_core::{parse, parse_file, write, write_file};

#[test]
fn parse_write_parse_round_trip_preserves_tree_shape() {
    let first = json!({
        "resources": [{"name": "p", "properties": {"priority": 100}}],
        "flag": true
    });

    let written = write(&first).expect("write should succeed");
    let second = parse(&written).expect("re-parse should succeed");

    assert_eq!(first, second);
    assert!(written.ends_with(b"}\n"));
}

#[test]
fn parse_and_write_file_round_trip() {
    let out_dir = tempfile::tempdir().expect("tempdir should be created");
    let out_path = out_dir.path().join("roundtrip.json");
    let value = json!({"a": ["x", "y"], "b": null});

    write_file(&value, &out_path).expect("write_file should succeed");

    let reparsed = parse_file(&out_path).expect("parse_file should succeed");
    assert_eq!(value, reparsed);
}

#[test]
fn parse_file_reports_missing_file() {
    let dir = tempfile::tempdir().expect("tempdir");
    assert!(parse_file(&dir.path().join("missing.json")).is_err());
}
