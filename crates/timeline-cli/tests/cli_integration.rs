use std::ffi::OsStr;
use std::fs;
use std::path::{Path, PathBuf};
use std::process::{Command, Output};
use std::time::{SystemTime, UNIX_EPOCH};

use jsonschema::JSONSchema;
use serde_json::Value;

const PAPER_MILL: &str = r#"{
  "source": "nse",
  "anchors": [
    {"date": "2004-05-13", "record": {"symbol": "APPAPER", "name": "Andhra Paper Mills",
     "series": "EQ", "isin": "INE435A01028", "face_value": 10, "market_lot": 1}}
  ],
  "updates": [
    {"date": "21-Jan-2014", "fields": {"symbol": {"old": "APPAPER", "new": "IPAPPM"}}}
  ]
}"#;

const PAPER_MILL_REVERSE: &str = r#"{
  "source": "nse",
  "origin": "1995-01-01",
  "anchors": [
    {"date": "2020-01-22", "record": {"symbol": "IPAPPM", "name": "Andhra Paper Mills",
     "series": "EQ", "isin": "INE435A01028", "face_value": 10, "market_lot": 1}}
  ],
  "updates": [
    {"date": "2014-01-21", "direction": "reverse",
     "fields": {"symbol": {"old": "APPAPER", "new": "IPAPPM"}}}
  ]
}"#;

const PAPER_MILL_STALE_MIDDLE: &str = r#"{
  "source": "nse",
  "anchors": [
    {"date": "2004-05-13", "record": {"symbol": "APPAPER", "name": "Andhra Paper Mills",
     "series": "EQ", "isin": "INE435A01028", "face_value": 10, "market_lot": 1}},
    {"date": "2020-01-22", "record": {"symbol": "ANDPAPER", "name": "Andhra Paper Mills",
     "series": "EQ", "isin": "INE435A01028", "face_value": 10, "market_lot": 1}}
  ],
  "updates": [
    {"date": "2014-01-21", "fields": {"symbol": {"old": "WRONG", "new": "IPAPPM"}}}
  ]
}"#;

const PAPER_MILL_TWO_ANCHORS: &str = r#"{
  "source": "nse",
  "anchors": [
    {"date": "2004-05-13", "record": {"symbol": "APPAPER", "name": "Andhra Paper Mills",
     "series": "EQ", "isin": "INE435A01028", "face_value": 10, "market_lot": 1}},
    {"date": "2020-01-22", "record": {"symbol": "IPAPPM", "name": "Andhra Paper Mills",
     "series": "EQ", "isin": "INE435A01028", "face_value": 10, "market_lot": 1}}
  ],
  "updates": [
    {"date": "2014-01-21", "fields": {"symbol": {"old": "APPAPER", "new": "IPAPPM"}}}
  ]
}"#;

const PAPER_MILL_BSE: &str = r#"{
  "source": "bse",
  "anchors": [
    {"date": "2004-05-13", "record": {"symbol": "APPAPER", "name": "Andhra Paper Mills",
     "series": "EQ", "isin": "INE435A01028", "face_value": 10, "market_lot": 1}}
  ],
  "updates": [
    {"date": "2008-06-02", "fields": {"face_value": {"old": "10", "new": "5"}}}
  ]
}"#;

fn unique_temp_dir(prefix: &str) -> PathBuf {
    let now = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_else(|err| panic!("clock should be >= UNIX_EPOCH: {err}"))
        .as_nanos();
    let dir = std::env::temp_dir().join(format!("{prefix}-{now}"));
    fs::create_dir_all(&dir)
        .unwrap_or_else(|err| panic!("failed to create temp dir {}: {err}", dir.display()));
    dir
}

fn write_scenario(dir: &Path, name: &str, body: &str) -> PathBuf {
    let path = dir.join(name);
    fs::write(&path, body)
        .unwrap_or_else(|err| panic!("failed to write scenario {}: {err}", path.display()));
    path
}

fn run_tl<I, S>(args: I) -> Output
where
    I: IntoIterator<Item = S>,
    S: AsRef<OsStr>,
{
    Command::new(env!("CARGO_BIN_EXE_tl"))
        .args(args)
        .output()
        .unwrap_or_else(|err| panic!("failed to execute tl binary: {err}"))
}

fn run_json<I, S>(args: I) -> Value
where
    I: IntoIterator<Item = S>,
    S: AsRef<OsStr>,
{
    let output = run_tl(args);
    if !output.status.success() {
        let stdout = String::from_utf8_lossy(&output.stdout);
        let stderr = String::from_utf8_lossy(&output.stderr);
        panic!(
            "tl command failed (status={}):\nstdout:\n{}\nstderr:\n{}",
            output.status, stdout, stderr
        );
    }

    let stdout = String::from_utf8_lossy(&output.stdout).trim().to_string();
    serde_json::from_str(&stdout)
        .unwrap_or_else(|err| panic!("stdout is not valid JSON: {err}\nstdout:\n{stdout}"))
}

fn as_u64(value: &Value, key: &str) -> u64 {
    value
        .get(key)
        .and_then(Value::as_u64)
        .unwrap_or_else(|| panic!("missing integer field `{key}` in payload: {value}"))
}

fn as_str<'a>(value: &'a Value, key: &str) -> &'a str {
    value
        .get(key)
        .and_then(Value::as_str)
        .unwrap_or_else(|| panic!("missing string field `{key}` in payload: {value}"))
}

fn as_array<'a>(value: &'a Value, key: &str) -> &'a Vec<Value> {
    value
        .get(key)
        .and_then(Value::as_array)
        .unwrap_or_else(|| panic!("missing array field `{key}` in payload: {value}"))
}

fn entry_symbol(entry: &Value) -> &str {
    entry
        .pointer("/fields/symbol")
        .and_then(Value::as_str)
        .unwrap_or_else(|| panic!("entry should carry a symbol field: {entry}"))
}

fn date_list(value: &Value, key: &str) -> Vec<String> {
    as_array(value, key)
        .iter()
        .map(|date| {
            date.as_str()
                .unwrap_or_else(|| panic!("`{key}` should hold date strings: {value}"))
                .to_string()
        })
        .collect()
}

fn path_str(path: &Path) -> &str {
    path.to_str().unwrap_or_else(|| panic!("path should be valid UTF-8: {}", path.display()))
}

fn repo_root() -> PathBuf {
    Path::new(env!("CARGO_MANIFEST_DIR"))
        .join("../..")
        .canonicalize()
        .unwrap_or_else(|err| panic!("failed to canonicalize repo root: {err}"))
}

fn read_json_file(path: &Path) -> Value {
    let body = fs::read_to_string(path)
        .unwrap_or_else(|err| panic!("failed to read JSON file {}: {err}", path.display()));
    serde_json::from_str(&body)
        .unwrap_or_else(|err| panic!("failed to parse JSON file {}: {err}", path.display()))
}

fn validate_schema(schema_file: &str, instance: &Value) {
    let schema_path = repo_root().join("contracts/v1/schemas").join(schema_file);
    let schema_json = read_json_file(&schema_path);
    let compiled = JSONSchema::compile(&schema_json)
        .unwrap_or_else(|err| panic!("failed to compile schema {}: {err}", schema_path.display()));

    let errors = compiled
        .validate(instance)
        .err()
        .map(|iter| iter.map(|err| err.to_string()).collect::<Vec<_>>());
    if let Some(errors) = errors {
        panic!("schema validation failed for {}:\n{}", schema_file, errors.join("\n"));
    }
}

// Test IDs: TLC-001
#[test]
fn bidirectional_build_emits_contract_payload() {
    let dir = unique_temp_dir("tl-build");
    let scenario = write_scenario(&dir, "paper.json", PAPER_MILL);

    let payload = run_json(["build", "--in", path_str(&scenario)]);
    validate_schema("timeline-build.schema.json", &payload);

    assert_eq!(as_str(&payload, "contract_version"), "timeline.v1");
    assert_eq!(as_str(&payload, "mode"), "bidirectional");
    assert_eq!(as_u64(&payload, "applied"), 1);
    assert_eq!(as_u64(&payload, "conflicts"), 0);

    let entries = as_array(&payload, "entries");
    assert_eq!(entries.len(), 2);
    assert_eq!(as_str(&entries[0], "date"), "2004-05-13");
    assert_eq!(entry_symbol(&entries[0]), "APPAPER");
    assert_eq!(as_str(&entries[0], "provenance"), "nse");
    assert_eq!(as_str(&entries[1], "date"), "2014-01-21");
    assert_eq!(entry_symbol(&entries[1]), "IPAPPM");
    assert_eq!(as_str(&entries[1], "provenance"), "nse:forward");
}

// Test IDs: TLC-002
#[test]
fn forward_and_bidirectional_builds_share_a_fingerprint() {
    let dir = unique_temp_dir("tl-fingerprint");
    let scenario = write_scenario(&dir, "paper.json", PAPER_MILL);

    let forward = run_json(["build", "--in", path_str(&scenario), "--mode", "forward"]);
    let bidirectional = run_json(["build", "--in", path_str(&scenario)]);
    let rerun = run_json(["build", "--in", path_str(&scenario)]);

    validate_schema("timeline-build.schema.json", &forward);
    assert_eq!(as_str(&forward, "fingerprint"), as_str(&bidirectional, "fingerprint"));
    assert_eq!(as_str(&bidirectional, "fingerprint"), as_str(&rerun, "fingerprint"));
}

// Test IDs: TLC-003
#[test]
fn csv_format_renders_listing_dates_and_provenance() {
    let dir = unique_temp_dir("tl-csv");
    let scenario = write_scenario(&dir, "paper.json", PAPER_MILL);

    let output = run_tl(["build", "--in", path_str(&scenario), "--format", "csv"]);
    assert!(output.status.success(), "csv build should succeed");
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert_eq!(
        stdout,
        "13-May-2004,nse,APPAPER,Andhra Paper Mills,EQ,INE435A01028,10,1\n\
         21-Jan-2014,nse:forward,IPAPPM,Andhra Paper Mills,EQ,INE435A01028,10,1\n"
    );
}

// Test IDs: TLC-004
#[test]
fn reverse_build_answers_point_in_time_queries() {
    let dir = unique_temp_dir("tl-at");
    let scenario = write_scenario(&dir, "reverse.json", PAPER_MILL_REVERSE);

    let early = run_json(["at", "--in", path_str(&scenario), "--mode", "reverse", "--date", "01-Jan-2010"]);
    assert_eq!(early.get("found"), Some(&Value::Bool(true)));
    assert_eq!(as_str(&early, "effective_date"), "1995-01-01");
    let Some(entry) = early.get("entry") else {
        panic!("found lookups should carry an entry: {early}");
    };
    assert_eq!(entry_symbol(entry), "APPAPER");

    let late = run_json(["at", "--in", path_str(&scenario), "--date", "2016-06-30"]);
    assert_eq!(as_str(&late, "effective_date"), "2014-01-21");
    let Some(entry) = late.get("entry") else {
        panic!("found lookups should carry an entry: {late}");
    };
    assert_eq!(entry_symbol(entry), "IPAPPM");

    let before = run_json(["at", "--in", path_str(&scenario), "--date", "1990-01-01"]);
    assert_eq!(before.get("found"), Some(&Value::Bool(false)));
    assert_eq!(before.get("entry"), Some(&Value::Null));
}

// Test IDs: TLC-005
#[test]
fn stale_middle_segment_is_reported_not_fatal() {
    let dir = unique_temp_dir("tl-stale");
    let scenario = write_scenario(&dir, "stale.json", PAPER_MILL_STALE_MIDDLE);

    let payload = run_json(["build", "--in", path_str(&scenario)]);
    validate_schema("timeline-build.schema.json", &payload);

    assert_eq!(as_u64(&payload, "applied"), 0);
    assert_eq!(as_u64(&payload, "conflicts"), 1);
    let failures = as_array(&payload, "failures");
    assert_eq!(failures.len(), 1);
    assert_eq!(as_str(&failures[0], "kind"), "stale_base");
    assert!(as_str(&failures[0], "message").contains("symbol"));
    assert_eq!(as_array(&payload, "entries").len(), 2);
}

// Test IDs: TLC-006
#[test]
fn reverse_mode_without_origin_fails() {
    let dir = unique_temp_dir("tl-no-origin");
    let scenario = write_scenario(&dir, "paper.json", PAPER_MILL);

    let output = run_tl(["build", "--in", path_str(&scenario), "--mode", "reverse"]);
    assert!(!output.status.success());
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("origin"), "stderr should name the missing origin:\n{stderr}");
}

// Test IDs: TLC-007
#[test]
fn merge_prefers_high_priority_entries() {
    let dir = unique_temp_dir("tl-merge");
    let high = write_scenario(&dir, "nse.json", PAPER_MILL);
    let low = write_scenario(&dir, "bse.json", PAPER_MILL_BSE);

    let payload = run_json(["merge", "--high", path_str(&high), "--low", path_str(&low)]);
    assert_eq!(as_u64(&payload, "high_entries"), 2);
    assert_eq!(as_u64(&payload, "low_entries"), 2);

    let entries = as_array(&payload, "entries");
    let dates = entries.iter().map(|entry| as_str(entry, "date")).collect::<Vec<_>>();
    assert_eq!(dates, ["2004-05-13", "2008-06-02", "2014-01-21"]);
    assert_eq!(as_str(&entries[0], "provenance"), "nse");
    assert_eq!(as_str(&entries[1], "provenance"), "bse:forward");
    assert_eq!(entries[1].pointer("/fields/face_value").and_then(Value::as_str), Some("5"));
}

// Test IDs: TLC-008
#[test]
fn merge_rejects_disagreeing_records() {
    let dir = unique_temp_dir("tl-merge-mismatch");
    let high = write_scenario(&dir, "nse.json", PAPER_MILL);
    let low = write_scenario(
        &dir,
        "bse.json",
        &PAPER_MILL_BSE.replace("Andhra Paper Mills", "Andhra Paper Limited"),
    );

    let output = run_tl(["merge", "--high", path_str(&high), "--low", path_str(&low)]);
    assert!(!output.status.success());
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("priority merge failed"), "unexpected stderr:\n{stderr}");
}

// Test IDs: TLC-009
#[test]
fn audit_separates_reflected_and_contradicted_updates() {
    let dir = unique_temp_dir("tl-audit");
    let reference = write_scenario(&dir, "paper.json", PAPER_MILL);
    let contradicting =
        write_scenario(&dir, "other.json", &PAPER_MILL.replace("\"new\": \"IPAPPM\"", "\"new\": \"OTHER\""));

    let reflected = run_json(["audit", "--in", path_str(&reference), "--against", path_str(&reference)]);
    assert_eq!(date_list(&reflected, "existing_dates"), ["2014-01-21"]);
    assert!(date_list(&reflected, "mismatched_dates").is_empty());
    assert!(date_list(&reflected, "remaining_dates").is_empty());

    let contradicted =
        run_json(["audit", "--in", path_str(&contradicting), "--against", path_str(&reference)]);
    assert!(date_list(&contradicted, "existing_dates").is_empty());
    assert_eq!(date_list(&contradicted, "mismatched_dates"), ["2014-01-21"]);
    assert_eq!(date_list(&contradicted, "remaining_dates"), ["2014-01-21"]);
}

// Test IDs: TLC-010
#[test]
fn unknown_field_in_scenario_is_rejected() {
    let dir = unique_temp_dir("tl-bad-field");
    let scenario = write_scenario(&dir, "bad.json", &PAPER_MILL.replace("\"symbol\": {", "\"ticker\": {"));

    let output = run_tl(["build", "--in", path_str(&scenario)]);
    assert!(!output.status.success());
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("unknown field `ticker`"), "unexpected stderr:\n{stderr}");
}

// Test IDs: TLC-011
#[test]
fn single_direction_modes_check_every_anchor() {
    let dir = unique_temp_dir("tl-anchors");
    let agreeing = write_scenario(&dir, "agreeing.json", PAPER_MILL_TWO_ANCHORS);

    let forward = run_json(["build", "--in", path_str(&agreeing), "--mode", "forward"]);
    let bidirectional = run_json(["build", "--in", path_str(&agreeing)]);
    validate_schema("timeline-build.schema.json", &forward);
    assert_eq!(as_array(&forward, "entries").len(), 3);
    assert_eq!(as_u64(&forward, "validated"), 1);
    assert_eq!(as_str(&forward, "fingerprint"), as_str(&bidirectional, "fingerprint"));

    let contradicting = write_scenario(
        &dir,
        "contradicting.json",
        &PAPER_MILL_TWO_ANCHORS.replace("\"new\": \"IPAPPM\"", "\"new\": \"XYZ\""),
    );
    let output = run_tl(["build", "--in", path_str(&contradicting), "--mode", "forward"]);
    assert!(!output.status.success());
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("anchor at 22-Jan-2020"), "unexpected stderr:\n{stderr}");

    let bidirectional = run_json(["build", "--in", path_str(&contradicting)]);
    assert_eq!(as_u64(&bidirectional, "applied"), 0);
    assert_eq!(as_u64(&bidirectional, "conflicts"), 1);
    let failures = as_array(&bidirectional, "failures");
    assert_eq!(failures.len(), 1);
    assert_eq!(as_str(&failures[0], "kind"), "conflict");
    assert_eq!(as_array(&bidirectional, "entries").len(), 2);
}
