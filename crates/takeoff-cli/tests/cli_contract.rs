use assert_cmd::cargo::cargo_bin_cmd;
use predicates::prelude::*;
use serde_json::{json, Value};

fn stdout_json(output: &[u8]) -> Value {
    serde_json::from_slice(output).expect("stdout should contain valid json")
}

#[test]
fn calc_reads_stdin() {
    let request = json!({
        "geometry": {"type": "line", "start": {"x": 0.0, "y": 0.0}, "end": {"x": 100.0, "y": 0.0}},
        "scale": 10.0
    });

    let output = cargo_bin_cmd!("takeoff")
        .arg("calc")
        .write_stdin(request.to_string())
        .assert()
        .success()
        .get_output()
        .stdout
        .clone();

    let value = stdout_json(&output);
    assert_eq!(value["kind"], "line");
    assert_eq!(value["result"]["length_feet"], 10.0);
    assert!(value["result"].get("area_sf").is_none());
}

#[test]
fn calc_volume_from_file() {
    let temp = tempfile::tempdir().expect("temp dir should be created");
    let input = temp.path().join("slab.json");
    std::fs::write(
        &input,
        json!({
            "geometry": {"type": "rectangle", "x": 0.0, "y": 0.0, "width": 100.0, "height": 100.0},
            "scale": 10.0,
            "depth": 4.0,
            "measurement_type": "volume"
        })
        .to_string(),
    )
    .expect("fixture should be written");

    let output = cargo_bin_cmd!("takeoff")
        .arg("calc")
        .arg("--input")
        .arg(&input)
        .assert()
        .success()
        .get_output()
        .stdout
        .clone();

    let value = stdout_json(&output);
    assert_eq!(value["unit"], "CY");
    let quantity = value["quantity"].as_f64().expect("quantity should be a number");
    assert!((quantity - 100.0 * (4.0 / 12.0) / 27.0).abs() < 1e-9);
    assert_eq!(value["result"]["depth_inches"], 4.0);
}

#[test]
fn calc_rejects_zero_scale() {
    let request = json!({
        "geometry": {"type": "point", "x": 1.0, "y": 1.0},
        "scale": 0.0
    });

    cargo_bin_cmd!("takeoff")
        .arg("calc")
        .write_stdin(request.to_string())
        .assert()
        .code(2)
        .stderr(predicate::str::contains("invalid scale factor"));
}

#[test]
fn calc_fails_for_missing_file() {
    cargo_bin_cmd!("takeoff")
        .arg("calc")
        .arg("--input")
        .arg("does-not-exist.json")
        .assert()
        .code(7)
        .stderr(predicate::str::contains("failed to read"));
}

#[test]
fn edit_split_returns_pair_with_calculations() {
    let request = json!({
        "geometry": {"type": "line", "start": {"x": 0.0, "y": 0.0}, "end": {"x": 100.0, "y": 0.0}},
        "operation": {"op": "split", "split_point": {"x": 40.0, "y": 2.0}},
        "scale": 10.0
    });

    let output = cargo_bin_cmd!("takeoff")
        .arg("edit")
        .write_stdin(request.to_string())
        .assert()
        .success()
        .get_output()
        .stdout
        .clone();

    let value = stdout_json(&output);
    assert_eq!(value["operation"], "split");
    let pair = value["product"]["pair"].as_array().expect("split yields a pair");
    assert_eq!(pair.len(), 2);
    assert_eq!(pair[0]["type"], "line");
    assert_eq!(value["calculations"][0]["length_feet"], 4.0);
    assert_eq!(value["calculations"][1]["length_feet"], 6.0);
}

#[test]
fn edit_split_near_endpoint_is_rejected() {
    let request = json!({
        "geometry": {"type": "line", "start": {"x": 0.0, "y": 0.0}, "end": {"x": 100.0, "y": 0.0}},
        "operation": {"op": "split", "split_point": {"x": 99.8, "y": 0.0}}
    });

    cargo_bin_cmd!("takeoff")
        .arg("edit")
        .write_stdin(request.to_string())
        .assert()
        .code(5)
        .stderr(predicate::str::contains("edit not applicable"));
}

#[test]
fn edit_offset_on_line_is_not_applicable() {
    let request = json!({
        "geometry": {"type": "line", "start": {"x": 0.0, "y": 0.0}, "end": {"x": 100.0, "y": 0.0}},
        "operation": {"op": "offset", "distance": 5.0}
    });

    cargo_bin_cmd!("takeoff")
        .arg("edit")
        .write_stdin(request.to_string())
        .assert()
        .code(4)
        .stderr(predicate::str::contains("offset is not applicable to line geometry"));
}

#[test]
fn edit_join_respects_config_tolerance() {
    let temp = tempfile::tempdir().expect("temp dir should be created");
    let config = temp.path().join("engine.json");
    std::fs::write(&config, r#"{"editor": {"join_tolerance": 2.0}}"#)
        .expect("config should be written");

    let request = json!({
        "geometry": {"type": "line", "start": {"x": 0.0, "y": 0.0}, "end": {"x": 100.0, "y": 0.0}},
        "operation": {
            "op": "join",
            "other": {"type": "line", "start": {"x": 110.0, "y": 0.0}, "end": {"x": 200.0, "y": 0.0}}
        }
    });

    cargo_bin_cmd!("takeoff")
        .arg("--config")
        .arg(&config)
        .arg("edit")
        .write_stdin(request.to_string())
        .assert()
        .code(5)
        .stderr(predicate::str::contains("tolerance 2.00px"));

    cargo_bin_cmd!("takeoff")
        .arg("edit")
        .write_stdin(request.to_string())
        .assert()
        .success()
        .stdout(predicate::str::contains("polyline"));
}

#[test]
fn formula_eval_with_vars() {
    let output = cargo_bin_cmd!("takeoff")
        .args(["formula", "eval", "{qty} * {depth} / 12 / 27"])
        .args(["--var", "qty=1000", "--var", "depth=4"])
        .assert()
        .success()
        .get_output()
        .stdout
        .clone();

    let value = stdout_json(&output);
    let result = value["value"].as_f64().expect("value should be a number");
    assert!((result - 12.345679).abs() < 1e-6);
}

#[test]
fn formula_eval_rejects_disallowed_construct() {
    cargo_bin_cmd!("takeoff")
        .args(["formula", "eval", "__import__(1)"])
        .assert()
        .code(3)
        .stderr(predicate::str::contains("invalid formula"));
}

#[test]
fn formula_validate_reports_unknown_variable() {
    let output = cargo_bin_cmd!("takeoff")
        .args(["formula", "validate", "{qty} * {price}"])
        .assert()
        .success()
        .get_output()
        .stdout
        .clone();

    let value = stdout_json(&output);
    assert_eq!(value["valid"], false);
    assert!(value["error"].as_str().unwrap_or_default().contains("price"));
}

#[test]
fn formula_vars_lists_catalogue() {
    let output = cargo_bin_cmd!("takeoff")
        .args(["formula", "vars"])
        .assert()
        .success()
        .get_output()
        .stdout
        .clone();

    let value = stdout_json(&output);
    let vars = value.as_array().expect("vars should be an array");
    assert_eq!(vars.len(), 12);
    assert_eq!(vars[0]["name"], "qty");
    assert_eq!(vars[11]["name"], "volume_cy");
}

#[test]
fn aggregate_skips_rejected_and_evaluates_formulas() {
    let request = json!({
        "condition": {"name": "4in Slab", "measurement_type": "area", "depth": 4.0},
        "scale": 10.0,
        "measurements": [
            {"geometry": {"type": "rectangle", "x": 0.0, "y": 0.0, "width": 100.0, "height": 100.0}},
            {"geometry": {"type": "rectangle", "x": 0.0, "y": 0.0, "width": 50.0, "height": 100.0}},
            {"geometry": {"type": "rectangle", "x": 0.0, "y": 0.0, "width": 300.0, "height": 300.0}, "rejected": true}
        ],
        "formulas": {"concrete_cy": "{qty} * {depth} / 12 / 27"}
    });

    let output = cargo_bin_cmd!("takeoff")
        .arg("aggregate")
        .write_stdin(request.to_string())
        .assert()
        .success()
        .get_output()
        .stdout
        .clone();

    let value = stdout_json(&output);
    assert_eq!(value["condition"], "4in Slab");
    assert_eq!(value["unit"], "SF");
    assert_eq!(value["total_quantity"], 150.0);
    assert_eq!(value["measurement_count"], 2);
    assert_eq!(value["measurements"][2]["rejected"], true);

    let concrete = value["formulas"]["concrete_cy"].as_f64().expect("formula value");
    assert!((concrete - 150.0 * 4.0 / 12.0 / 27.0).abs() < 1e-9);
}

#[test]
fn aggregate_rejects_malformed_geometry() {
    let request = json!({
        "condition": {"name": "Walls", "measurement_type": "linear"},
        "scale": 10.0,
        "measurements": [{"geometry": {"type": "polygon", "points": [{"x": 0.0, "y": 0.0}]}}]
    });

    cargo_bin_cmd!("takeoff")
        .arg("aggregate")
        .write_stdin(request.to_string())
        .assert()
        .code(2);
}
