// Integration tests for the `fidelity` binary.
//
// These tests guarantee:
//   1. `run --json` stdout is exactly one JSON value with the result shape
//   2. exit codes follow the registry (0, 2, 60, 61, 62)
//   3. `--tables-dir` writes one CSV per table and replaces it on rerun
//
// Run with: cargo test -p fidelity-cli --test cli_tests -- --nocapture

use std::path::Path;
use std::process::{Command, Output};

const CONFIG: &str = r#"
name = "Accounts migration"

[datasets.accounts]
source = "source.csv"
target = "target.csv"
key = ["id"]
fields = [
    { name = "status", type = "text" },
    { name = "balance", type = "numeric" },
]
"#;

const SOURCE: &str = "id,status,balance\n1,A,10\n2,B,20\n3,C,30\n";
const TARGET: &str = "id,status,balance\n1,A,10\n2,X,25\n4,D,40\n";

fn fidelity() -> Command {
    let mut cmd = Command::new(env!("CARGO_BIN_EXE_fidelity"));
    cmd.env("RUST_LOG", "warn");
    cmd
}

/// Config and both snapshots in a scratch dir.
fn workspace(config: &str, source: &str, target: &str) -> tempfile::TempDir {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(dir.path().join("audit.toml"), config).unwrap();
    std::fs::write(dir.path().join("source.csv"), source).unwrap();
    std::fs::write(dir.path().join("target.csv"), target).unwrap();
    dir
}

fn run(dir: &Path, args: &[&str]) -> Output {
    let config = dir.join("audit.toml");
    let mut cmd = fidelity();
    cmd.arg(args[0]).arg(&config).args(&args[1..]);
    cmd.output().expect("spawn fidelity")
}

fn stderr(output: &Output) -> String {
    String::from_utf8_lossy(&output.stderr).into_owned()
}

/// Assert stdout is a single, parseable JSON value with no extra lines.
fn assert_single_json(stdout: &[u8]) -> serde_json::Value {
    let text = String::from_utf8_lossy(stdout);
    let trimmed = text.trim();
    assert!(!trimmed.is_empty(), "stdout should not be empty");
    serde_json::from_str(trimmed)
        .unwrap_or_else(|e| panic!("stdout must be valid JSON.\nParse error: {}\nstdout:\n{}", e, trimmed))
}

// ===========================================================================
// fidelity run
// ===========================================================================

#[test]
fn run_json_reports_key_sets_and_quality() {
    let dir = workspace(CONFIG, SOURCE, TARGET);
    let output = run(dir.path(), &["run", "--json"]);
    assert!(output.status.success(), "exit: {:?}\nstderr: {}", output.status, stderr(&output));

    let val = assert_single_json(&output.stdout);
    assert_eq!(val["meta"]["config_name"], "Accounts migration");
    assert_eq!(val["meta"]["scope"], "union");

    let summary = &val["summary"];
    assert_eq!(summary["datasets"], 1);
    assert_eq!(summary["missing"], 1);
    assert_eq!(summary["extra"], 1);
    assert_eq!(summary["matched"], 2);
    // Orphans defect on every field, key 2 differs on both.
    assert_eq!(summary["overall"]["total_defects"], 6);
    assert_eq!(summary["overall"]["total_opportunities"], 8);
    assert_eq!(summary["overall"]["defective_units"], 3);
    assert_eq!(summary["cross_check_mismatches"], 0);
    assert_eq!(val["cross_checks"], serde_json::json!([]));

    let ds = &val["datasets"][0];
    assert_eq!(ds["dataset"], "accounts");
    assert_eq!(ds["keys"]["missing"], serde_json::json!([["3"]]));
    assert_eq!(ds["keys"]["extra"], serde_json::json!([["4"]]));
    assert_eq!(ds["variance"]["rows"][0]["field_family"], "balance");
    assert_eq!(ds["variance"]["rows"][0]["financial_variance"], 5.0);
    assert!(ds.get("defects").is_none(), "matrix is exported as a table only");
}

#[test]
fn run_human_summary_goes_to_stderr() {
    let dir = workspace(CONFIG, SOURCE, TARGET);
    let output = run(dir.path(), &["run"]);
    assert!(output.status.success());
    assert!(output.stdout.is_empty(), "no stdout without --json");
    let err = stderr(&output);
    assert!(err.contains("audit 'Accounts migration'"), "stderr: {err}");
    assert!(err.contains("accounts:"), "stderr: {err}");
}

#[test]
fn run_output_file_matches_stdout_shape() {
    let dir = workspace(CONFIG, SOURCE, TARGET);
    let out = dir.path().join("result.json");
    let output = run(dir.path(), &["run", "--output", out.to_str().unwrap()]);
    assert!(output.status.success(), "stderr: {}", stderr(&output));

    let text = std::fs::read_to_string(&out).unwrap();
    let val: serde_json::Value = serde_json::from_str(&text).unwrap();
    assert_eq!(val["summary"]["matched"], 2);
    assert!(stderr(&output).contains("wrote"));
}

#[test]
fn fail_on_defects_exits_62() {
    let dir = workspace(CONFIG, SOURCE, TARGET);
    let output = run(dir.path(), &["run", "--fail-on-defects"]);
    assert_eq!(output.status.code(), Some(62), "stderr: {}", stderr(&output));
    assert!(stderr(&output).contains("6 defects"));
}

#[test]
fn fail_on_defects_passes_clean_migration() {
    let dir = workspace(CONFIG, SOURCE, SOURCE);
    let output = run(dir.path(), &["run", "--fail-on-defects", "--json"]);
    assert!(output.status.success(), "stderr: {}", stderr(&output));
    let val = assert_single_json(&output.stdout);
    assert_eq!(val["summary"]["overall"]["total_defects"], 0);
    assert_eq!(val["summary"]["overall"]["dpmo"], 0.0);
    // Yield of exactly 1 has no finite sigma.
    assert!(val["summary"]["overall"]["sigma_level"].is_null());
}

// ===========================================================================
// --tables-dir
// ===========================================================================

#[test]
fn tables_dir_writes_every_table() {
    let dir = workspace(CONFIG, SOURCE, TARGET);
    let tables = dir.path().join("tables");
    let output = run(dir.path(), &["run", "--tables-dir", tables.to_str().unwrap()]);
    assert!(output.status.success(), "stderr: {}", stderr(&output));

    for name in [
        "missing_keys",
        "extra_keys",
        "defect_matrix",
        "quality_metrics",
        "variance_rows",
        "financial_differences",
        "orphan_sets",
        "row_counts",
        "coercion_warnings",
    ] {
        assert!(tables.join(format!("{name}.csv")).exists(), "{name}.csv missing");
    }

    let missing = std::fs::read_to_string(tables.join("missing_keys.csv")).unwrap();
    assert_eq!(missing, "dataset,key\naccounts,3\n");

    // 4 keys x 2 fields + header.
    let matrix = std::fs::read_to_string(tables.join("defect_matrix.csv")).unwrap();
    assert_eq!(matrix.lines().count(), 9);
}

#[test]
fn tables_dir_rerun_replaces_files() {
    let dir = workspace(CONFIG, SOURCE, TARGET);
    let tables = dir.path().join("tables");
    let args = ["run", "--tables-dir", tables.to_str().unwrap()];

    assert!(run(dir.path(), &args).status.success());
    let first = std::fs::read_to_string(tables.join("row_counts.csv")).unwrap();
    assert!(run(dir.path(), &args).status.success());
    let second = std::fs::read_to_string(tables.join("row_counts.csv")).unwrap();

    assert_eq!(first, second);
    assert_eq!(second, "dataset,source,target,diff\naccounts,3,3,0\n");
    assert!(!tables.join("row_counts.csv.tmp").exists());
}

// ===========================================================================
// Error exit codes
// ===========================================================================

#[test]
fn missing_config_is_usage_error() {
    let dir = tempfile::tempdir().unwrap();
    let output = run(dir.path(), &["run"]);
    assert_eq!(output.status.code(), Some(2));
    assert!(stderr(&output).contains("cannot read config"));
}

#[test]
fn unknown_rule_field_is_invalid_config() {
    let config = format!(
        "{CONFIG}\n[datasets.accounts.rules.active_only]\napplies_to = [\"balance\"]\nvalid_when = {{ op = \"eq\", field = \"state\", value = \"A\" }}\n"
    );
    let dir = workspace(&config, SOURCE, TARGET);
    let output = run(dir.path(), &["run"]);
    assert_eq!(output.status.code(), Some(60), "stderr: {}", stderr(&output));
    assert!(stderr(&output).contains("unknown field 'state'"));
    assert!(stderr(&output).contains("hint:"));
}

#[test]
fn duplicate_key_is_runtime_error() {
    let dir = workspace(CONFIG, "id,status,balance\n1,A,10\n1,B,20\n", TARGET);
    let output = run(dir.path(), &["run", "--json"]);
    assert_eq!(output.status.code(), Some(61), "stderr: {}", stderr(&output));
    assert!(output.stdout.is_empty(), "no JSON on failure");
    assert!(stderr(&output).contains("appears 2 times"));
}

#[test]
fn missing_snapshot_is_runtime_error() {
    let dir = workspace(CONFIG, SOURCE, TARGET);
    std::fs::remove_file(dir.path().join("target.csv")).unwrap();
    let output = run(dir.path(), &["run"]);
    assert_eq!(output.status.code(), Some(61));
    assert!(stderr(&output).contains("target.csv"));
}

// ===========================================================================
// validate / schema
// ===========================================================================

#[test]
fn validate_does_not_need_snapshots() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(dir.path().join("audit.toml"), CONFIG).unwrap();
    let output = run(dir.path(), &["validate"]);
    assert!(output.status.success(), "stderr: {}", stderr(&output));
    assert!(stderr(&output).contains("is valid: 1 datasets"));
}

#[test]
fn validate_rejects_bad_scope() {
    let config = format!("{CONFIG}\n[scoring]\nscope = \"all\"\n");
    let dir = workspace(&config, SOURCE, TARGET);
    let output = run(dir.path(), &["validate"]);
    assert_eq!(output.status.code(), Some(60));
}

#[test]
fn schema_json_expands_slot_families() {
    let config = r#"
name = "Carrier"

[datasets.carrier]
source = "source.csv"
target = "target.csv"
key = ["CLM_ID"]
fields = [{ base = "LINE_NCH_PMT_AMT", count = 3, type = "numeric" }]

[[datasets.carrier.orphan_keys]]
name = "claim"
fields = ["CLM_ID"]
"#;
    let dir = workspace(config, SOURCE, TARGET);
    let output = run(dir.path(), &["schema", "--json"]);
    assert!(output.status.success(), "stderr: {}", stderr(&output));

    let val = assert_single_json(&output.stdout);
    let carrier = &val[0];
    assert_eq!(carrier["dataset"], "carrier");
    assert_eq!(carrier["key"], serde_json::json!(["CLM_ID"]));
    assert_eq!(carrier["orphan_keys"][0]["name"], "primary");
    assert_eq!(carrier["orphan_keys"][1]["name"], "claim");
    assert_eq!(carrier["families"][0]["family"], "LINE_NCH_PMT_AMT");
    assert_eq!(carrier["families"][0]["type"], "numeric");
    assert_eq!(
        carrier["families"][0]["fields"],
        serde_json::json!(["LINE_NCH_PMT_AMT_1", "LINE_NCH_PMT_AMT_2", "LINE_NCH_PMT_AMT_3"])
    );
}

#[test]
fn schema_unknown_dataset_is_usage_error() {
    let dir = workspace(CONFIG, SOURCE, TARGET);
    let output = run(dir.path(), &["schema", "--dataset", "claims"]);
    assert_eq!(output.status.code(), Some(2));
    assert!(stderr(&output).contains("configured datasets: accounts"));
}
