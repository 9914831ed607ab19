#![allow(missing_docs)]

use std::fs;
use std::path::PathBuf;

use assert_cmd::cargo::cargo_bin_cmd;
use assert_cmd::Command;
use serde_json::Value;
use tempfile::TempDir;

const SCENARIO: &str = r#"{
    "table": {
        "name": "t",
        "fields": [
            {"id": 0, "name": "id", "type": {"kind": "integer", "bits": 32}},
            {"id": 1, "name": "a", "type": {"kind": "integer", "bits": 32}},
            {"id": 2, "name": "b", "type": {"kind": "integer", "bits": 32}}
        ],
        "keys": [
            {"name": "a", "parts": [{"field": 1}]},
            {"name": "b", "parts": [{"field": 2}]}
        ]
    },
    "generate": {
        "count": 1000,
        "columns": [
            {"kind": "sequence"},
            {"kind": "sequence"},
            {"kind": "modulo", "modulus": 7}
        ]
    },
    "predicate": {
        "op": "and",
        "args": [
            {"op": "cmp", "cmp": "gt", "left": {"field": 1}, "right": {"const": {"t": "Int", "v": 10}}},
            {"op": "cmp", "cmp": "lt", "left": {"field": 1}, "right": {"const": {"t": "Int", "v": 20}}}
        ]
    }
}"#;

struct Fixture {
    dir: TempDir,
    scenario: PathBuf,
}

impl Fixture {
    fn new() -> Self {
        let dir = TempDir::new().expect("tempdir");
        let scenario = dir.path().join("scenario.json");
        fs::write(&scenario, SCENARIO).expect("write scenario");
        Self { dir, scenario }
    }

    fn config(&self, contents: &str) -> PathBuf {
        let path = self.dir.path().join("optimizer.toml");
        fs::write(&path, contents).expect("write config");
        path
    }

    /// The binary with no per-user config in reach.
    fn cmd(&self) -> Command {
        let mut cmd = cargo_bin_cmd!("rangeopt");
        cmd.env("XDG_CONFIG_HOME", self.dir.path().join("xdg"))
            .env("HOME", self.dir.path())
            .env_remove("RANGEOPT_CONFIG")
            .env_remove("RANGEOPT_LOG");
        cmd
    }
}

fn stdout(cmd: &mut Command) -> String {
    let output = cmd.assert().success().get_output().stdout.clone();
    String::from_utf8(output).expect("utf8 output")
}

#[test]
fn explain_prints_the_plan_tree() {
    let fx = Fixture::new();
    let text = stdout(fx.cmd().arg("explain").arg("--scenario").arg(&fx.scenario));
    let lines: Vec<&str> = text.lines().collect();
    assert!(lines[0].starts_with("range [table=t, rows=9"), "{text}");
    assert!(lines[1].starts_with("  range [index=a, ranges=(10 .. 20), rows=9"), "{text}");
    assert!(lines.last().is_some_and(|l| l.starts_with("plan_hash: ")), "{text}");
}

#[test]
fn explain_redacts_literals() {
    let fx = Fixture::new();
    let text = stdout(
        fx.cmd()
            .args(["explain", "--redact", "--scenario"])
            .arg(&fx.scenario),
    );
    assert!(text.contains("ranges=?"), "{text}");
    assert!(!text.contains("(10 .. 20)"), "{text}");
}

#[test]
fn execute_lists_matching_rows() {
    let fx = Fixture::new();
    let text = stdout(
        fx.cmd()
            .args(["explain", "--execute", "--scenario"])
            .arg(&fx.scenario),
    );
    assert!(
        text.lines()
            .any(|l| l == "matched 9 rows: 11,12,13,14,15,16,17,18,19"),
        "{text}"
    );
}

#[test]
fn explain_emits_json() {
    let fx = Fixture::new();
    let output = stdout(
        fx.cmd()
            .args(["--format", "json", "explain", "--execute", "--scenario"])
            .arg(&fx.scenario),
    );
    let json: Value = serde_json::from_str(&output).expect("valid json");
    assert_eq!(json["plan"]["op"], "range");
    assert_eq!(json["plan"]["props"]["table"], "t");
    assert_eq!(json["plan"]["inputs"][0]["props"]["index"], "a");
    assert_eq!(json["plan_hash"].as_str().map(str::len), Some(16));
    let rows: Vec<u64> = json["rows"]
        .as_array()
        .expect("rows")
        .iter()
        .filter_map(Value::as_u64)
        .collect();
    assert_eq!(rows, (11..20).collect::<Vec<u64>>());
}

#[test]
fn config_file_changes_the_plan() {
    let fx = Fixture::new();
    let config = fx.config("enable_index_merge = false\nmax_sel_args = 1\n");
    let text = stdout(
        fx.cmd()
            .arg("--config")
            .arg(&config)
            .args(["explain", "--scenario"])
            .arg(&fx.scenario),
    );
    assert!(text.starts_with("table_scan [table=t"), "{text}");
}

#[test]
fn config_command_reports_effective_settings() {
    let fx = Fixture::new();
    let config = fx.config("enable_ror_union = false\n");
    let output = stdout(
        fx.cmd()
            .env("RANGEOPT_CONFIG", &config)
            .args(["--format", "json", "config"]),
    );
    let json: Value = serde_json::from_str(&output).expect("valid json");
    assert_eq!(json["enable_ror_union"], false);
    assert_eq!(json["enable_index_merge"], true);
    assert_eq!(json["not_in_ignore_threshold"], 1000);

    let text = stdout(fx.cmd().arg("config"));
    assert!(text.contains("enable_ror_union = true"), "{text}");
}

#[test]
fn invalid_config_is_reported() {
    let fx = Fixture::new();
    let zero = fx.config("max_sel_args = 0\n");
    let output = fx
        .cmd()
        .arg("--config")
        .arg(&zero)
        .arg("config")
        .assert()
        .failure()
        .get_output()
        .stderr
        .clone();
    let stderr = String::from_utf8_lossy(&output);
    assert!(stderr.contains("invalid optimizer config"), "{stderr}");

    let garbled = fx.config("max_sel_args = \"many\"\n");
    let output = fx
        .cmd()
        .arg("--config")
        .arg(&garbled)
        .arg("config")
        .assert()
        .failure()
        .get_output()
        .stderr
        .clone();
    let stderr = String::from_utf8_lossy(&output);
    assert!(stderr.contains("failed to parse optimizer config"), "{stderr}");
}

#[test]
fn missing_scenario_fails() {
    let fx = Fixture::new();
    let output = fx
        .cmd()
        .args(["explain", "--scenario"])
        .arg(fx.dir.path().join("absent.json"))
        .assert()
        .failure()
        .get_output()
        .stderr
        .clone();
    let stderr = String::from_utf8_lossy(&output);
    assert!(stderr.contains("absent.json"), "{stderr}");
}

#[test]
fn bundled_demos_explain() {
    let fx = Fixture::new();
    let demos = PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("demos");
    for file in ["range.json", "index_merge.json", "group_min_max.json", "not_in.json"] {
        let text = stdout(
            fx.cmd()
                .args(["explain", "--execute", "--scenario"])
                .arg(demos.join(file)),
        );
        assert!(text.lines().any(|l| l.starts_with("plan_hash: ")), "{file}: {text}");
        assert!(text.lines().any(|l| l.starts_with("matched ")), "{file}: {text}");
    }
}
