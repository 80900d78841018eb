use std::fs;
use std::path::{Path, PathBuf};
use std::process::{Command, Output};

use tempfile::TempDir;

/// Get the workspace root (two levels up from CARGO_MANIFEST_DIR of schemaid-cli)
fn workspace_root() -> PathBuf {
    Path::new(env!("CARGO_MANIFEST_DIR"))
        .parent() // crates/
        .unwrap()
        .parent() // workspace root
        .unwrap()
        .to_path_buf()
}

fn schemaid_bin() -> Command {
    let mut cmd = Command::new(env!("CARGO_BIN_EXE_schemaid"));
    cmd.current_dir(workspace_root());
    cmd.env_remove("RUST_LOG");
    cmd
}

fn run(args: &[&str]) -> Output {
    schemaid_bin().args(args).output().expect("failed to run")
}

fn assert_success(output: &Output) {
    assert!(
        output.status.success(),
        "stderr: {}",
        String::from_utf8_lossy(&output.stderr)
    );
}

fn stdout(output: &Output) -> String {
    String::from_utf8_lossy(&output.stdout).to_string()
}

fn stderr(output: &Output) -> String {
    String::from_utf8_lossy(&output.stderr).to_string()
}

fn read_json(path: &Path) -> serde_json::Value {
    serde_json::from_str(&fs::read_to_string(path).unwrap()).unwrap()
}

fn entity_names(model: &serde_json::Value) -> Vec<String> {
    model["entities"]
        .as_array()
        .unwrap()
        .iter()
        .map(|e| e["name"].as_str().unwrap().to_string())
        .collect()
}

/// Reconcile the task samples into a fresh model file.
fn reconcile_samples(dir: &TempDir) -> PathBuf {
    let model = dir.path().join("schemaid-model.json");
    let output = run(&[
        "reconcile",
        "samples/tasks",
        "--model",
        model.to_str().unwrap(),
    ]);
    assert_success(&output);
    model
}

const NOTES_SCHEMA: &str = r#"
entities:
  - name: Note
    properties:
      - name: id
        type: long
        flags: ID
      - name: body
        type: string
  - name: Folder
    properties:
      - name: id
        type: long
        flags: ID
"#;

// ---------------------------------------------------------------------------
// General
// ---------------------------------------------------------------------------

#[test]
fn cli_help() {
    let output = run(&["--help"]);
    assert_success(&output);
    assert!(stdout(&output).contains("stable id:uid identifiers"));
}

#[test]
fn cli_version() {
    let output = run(&["--version"]);
    assert_success(&output);
    assert!(stdout(&output).contains("0.1.0"));
}

// ---------------------------------------------------------------------------
// Reconcile
// ---------------------------------------------------------------------------

#[test]
fn cli_reconcile_directory_creates_model() {
    let dir = TempDir::new().unwrap();
    let model_path = dir.path().join("schemaid-model.json");
    let output = run(&[
        "reconcile",
        "samples/tasks",
        "--model",
        model_path.to_str().unwrap(),
    ]);
    assert_success(&output);

    let out = stdout(&output);
    assert!(out.contains("created entity User"));
    assert!(out.contains("created entity Task"));
    assert!(out.contains("updated: 2 files, 0 warnings."));

    let model = read_json(&model_path);
    assert_eq!(entity_names(&model), ["User", "Tag", "Task"]);
    assert_eq!(model["modelVersion"], 5);
    assert!(model["_note1"].as_str().unwrap().starts_with("KEEP THIS FILE"));
    assert!(!dir.path().join("schemaid-model.json.tmp").exists());
}

#[test]
fn cli_reconcile_uses_config_seed() {
    let first = TempDir::new().unwrap();
    let second = TempDir::new().unwrap();
    let a = fs::read_to_string(reconcile_samples(&first)).unwrap();
    let b = fs::read_to_string(reconcile_samples(&second)).unwrap();
    assert_eq!(a, b);
}

#[test]
fn cli_reconcile_seed_flag_overrides_config() {
    let first = TempDir::new().unwrap();
    let second = TempDir::new().unwrap();
    let config_seeded = fs::read_to_string(reconcile_samples(&first)).unwrap();

    let model_path = second.path().join("schemaid-model.json");
    let output = run(&[
        "reconcile",
        "samples/tasks",
        "--model",
        model_path.to_str().unwrap(),
        "--seed",
        "1234",
    ]);
    assert_success(&output);
    assert_ne!(fs::read_to_string(model_path).unwrap(), config_seeded);
}

#[test]
fn cli_reconcile_twice_is_unchanged() {
    let dir = TempDir::new().unwrap();
    let model_path = reconcile_samples(&dir);
    let before = fs::read_to_string(&model_path).unwrap();

    let output = run(&[
        "reconcile",
        "samples/tasks",
        "--model",
        model_path.to_str().unwrap(),
        "--seed",
        "99",
    ]);
    assert_success(&output);
    assert!(stdout(&output).contains("unchanged"));
    assert_eq!(fs::read_to_string(&model_path).unwrap(), before);
}

#[test]
fn cli_reconcile_dry_run_writes_nothing() {
    let dir = TempDir::new().unwrap();
    let model_path = dir.path().join("schemaid-model.json");
    let output = run(&[
        "reconcile",
        "samples/tasks",
        "--model",
        model_path.to_str().unwrap(),
        "--dry-run",
    ]);
    assert_success(&output);
    assert!(stdout(&output).contains("would be updated"));
    assert!(!model_path.exists());
}

#[test]
fn cli_reconcile_json_output() {
    let dir = TempDir::new().unwrap();
    let model_path = dir.path().join("schemaid-model.json");
    let output = run(&[
        "reconcile",
        "samples/tasks",
        "--model",
        model_path.to_str().unwrap(),
        "--format",
        "json",
    ]);
    assert_success(&output);

    let report: serde_json::Value =
        serde_json::from_str(&stdout(&output)).expect("invalid JSON output");
    assert_eq!(report["mode"], "fullSchema");
    assert_eq!(report["written"], true);
    let merges = report["report"]["merges"].as_array().unwrap();
    assert_eq!(merges.len(), 2);
    assert!(merges[0]["source"]
        .as_str()
        .unwrap()
        .ends_with("01-user.schema.json"));
    assert_eq!(merges[0]["events"][0]["event"], "created");
    assert_eq!(merges[0]["events"][0]["kind"], "entity");
}

#[test]
fn cli_reconcile_single_file_is_partial() {
    let dir = TempDir::new().unwrap();
    let model_path = reconcile_samples(&dir);

    let output = run(&[
        "reconcile",
        "samples/tasks/01-user.schema.json",
        "--model",
        model_path.to_str().unwrap(),
        "--format",
        "json",
    ]);
    assert_success(&output);
    let report: serde_json::Value = serde_json::from_str(&stdout(&output)).unwrap();
    assert_eq!(report["mode"], "partial");
    assert!(report["report"]["removed"].as_array().unwrap().is_empty());

    let model = read_json(&model_path);
    assert_eq!(entity_names(&model), ["User", "Tag", "Task"]);
}

#[test]
fn cli_reconcile_glob_is_full_schema() {
    let dir = TempDir::new().unwrap();
    let model_path = dir.path().join("schemaid-model.json");
    let output = run(&[
        "reconcile",
        "samples/tasks/0*.schema.*",
        "--model",
        model_path.to_str().unwrap(),
        "--format",
        "json",
    ]);
    assert_success(&output);
    let report: serde_json::Value = serde_json::from_str(&stdout(&output)).unwrap();
    assert_eq!(report["mode"], "fullSchema");
    assert_eq!(report["report"]["merges"].as_array().unwrap().len(), 2);
}

#[test]
fn cli_reconcile_removes_undeclared_entities() {
    let dir = TempDir::new().unwrap();
    let schema = dir.path().join("notes.schema.yaml");
    fs::write(&schema, NOTES_SCHEMA).unwrap();
    let dir_arg = dir.path().to_str().unwrap();

    assert_success(&run(&["reconcile", dir_arg, "--seed", "3"]));
    let model_path = dir.path().join("schemaid-model.json");
    assert_eq!(entity_names(&read_json(&model_path)), ["Note", "Folder"]);

    let only_notes = NOTES_SCHEMA
        .split("  - name: Folder")
        .next()
        .unwrap()
        .to_string();
    fs::write(&schema, only_notes).unwrap();
    let output = run(&["reconcile", dir_arg, "--seed", "3"]);
    assert_success(&output);
    assert!(stdout(&output).contains("removed entity Folder"));

    let model = read_json(&model_path);
    assert_eq!(entity_names(&model), ["Note"]);
    assert_eq!(model["retiredEntityUids"].as_array().unwrap().len(), 1);
}

#[test]
fn cli_reconcile_recursive_pattern() {
    let dir = TempDir::new().unwrap();
    let nested = dir.path().join("schema").join("notes");
    fs::create_dir_all(&nested).unwrap();
    fs::write(nested.join("notes.schema.yaml"), NOTES_SCHEMA).unwrap();
    let model_path = dir.path().join("model.json");

    // Without `/...` only the top level is scanned.
    let flat = run(&[
        "reconcile",
        dir.path().to_str().unwrap(),
        "--model",
        model_path.to_str().unwrap(),
    ]);
    assert!(!flat.status.success());
    assert!(stderr(&flat).contains("No schema files"));

    let recursive = format!("{}/...", dir.path().to_str().unwrap());
    let output = run(&[
        "reconcile",
        &recursive,
        "--model",
        model_path.to_str().unwrap(),
    ]);
    assert_success(&output);
    assert_eq!(entity_names(&read_json(&model_path)), ["Note", "Folder"]);
}

#[test]
fn cli_reconcile_pending_uid_request_fails() {
    let dir = TempDir::new().unwrap();
    let schema = dir.path().join("notes.schema.yaml");
    fs::write(
        &schema,
        NOTES_SCHEMA.replacen("  - name: Note\n", "  - name: Note\n    uidRequest: pending\n", 1),
    )
    .unwrap();
    let model_path = dir.path().join("schemaid-model.json");

    let output = run(&["reconcile", schema.to_str().unwrap()]);
    assert!(!output.status.success());
    assert_eq!(output.status.code(), Some(1));
    let err = stderr(&output);
    assert!(err.contains("Error:"));
    assert!(err.contains("uid annotation on entity Note is empty"));
    assert!(!model_path.exists());
}

#[test]
fn cli_reconcile_missing_path() {
    let output = run(&["reconcile", "samples/does-not-exist"]);
    assert!(!output.status.success());
    assert!(stderr(&output).contains("Path does not exist"));
}

#[test]
fn cli_reconcile_rejects_unknown_extension() {
    let dir = TempDir::new().unwrap();
    let schema = dir.path().join("notes.txt");
    fs::write(&schema, NOTES_SCHEMA).unwrap();
    let output = run(&["reconcile", schema.to_str().unwrap()]);
    assert!(!output.status.success());
    assert!(stderr(&output).contains("Unsupported schema file"));
}

// ---------------------------------------------------------------------------
// Check
// ---------------------------------------------------------------------------

#[test]
fn cli_check_valid_model() {
    let dir = TempDir::new().unwrap();
    let model_path = reconcile_samples(&dir);
    let output = run(&["check", model_path.to_str().unwrap()]);
    assert_success(&output);
    assert!(stdout(&output).contains("OK: 3 entities."));
}

#[test]
fn cli_check_reports_violations() {
    let dir = TempDir::new().unwrap();
    let model_path = dir.path().join("broken.json");
    fs::write(
        &model_path,
        r#"{
  "entities": [
    { "id": "1:10", "lastPropertyId": "1:11", "name": "Task",
      "properties": [ { "id": "1:11", "name": "text", "type": 9 } ] }
  ],
  "lastEntityId": "1:10",
  "lastIndexId": "",
  "lastRelationId": "",
  "lastSequenceId": "",
  "modelVersion": 5,
  "modelVersionParserMinimum": 5,
  "version": 1
}"#,
    )
    .unwrap();

    let output = run(&["check", model_path.to_str().unwrap(), "--format", "json"]);
    assert_eq!(output.status.code(), Some(1));
    let result: serde_json::Value = serde_json::from_str(&stdout(&output)).unwrap();
    assert_eq!(result["valid"], false);
    assert_eq!(
        result["violations"][0],
        "entity \"Task\" has no id property"
    );
}

#[test]
fn cli_check_missing_model() {
    let output = run(&["check", "samples/tasks/no-model.json"]);
    assert!(!output.status.success());
    assert!(stderr(&output).contains("Model file does not exist"));
}

// ---------------------------------------------------------------------------
// Inspect
// ---------------------------------------------------------------------------

#[test]
fn cli_inspect_human() {
    let dir = TempDir::new().unwrap();
    let model_path = reconcile_samples(&dir);
    let output = run(&["inspect", model_path.to_str().unwrap()]);
    assert_success(&output);

    let out = stdout(&output);
    assert!(out.contains("User 1:"));
    assert!(out.contains("-> User [INDEX_PARTIAL_SKIP_ZERO] index"));
    assert!(out.contains("  relation tags "));
    assert!(out.contains("3 entities"));
}

#[test]
fn cli_inspect_json() {
    let dir = TempDir::new().unwrap();
    let model_path = reconcile_samples(&dir);
    let output = run(&["inspect", model_path.to_str().unwrap(), "--format", "json"]);
    assert_success(&output);

    let info: serde_json::Value = serde_json::from_str(&stdout(&output)).unwrap();
    let task = &info["entities"][2];
    assert_eq!(task["name"], "Task");
    assert_eq!(task["relations"][0]["target"], "Tag");
    assert_eq!(task["properties"][0]["flags"][0], "ID");

    let email = &info["entities"][0]["properties"][2];
    assert_eq!(email["index"]["kind"], "hash");
    assert_eq!(email["index"]["unique"], true);
}
