use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;
use tempfile::TempDir;

fn civsync_binary() -> PathBuf {
    let mut path = std::env::current_exe().unwrap();
    path.pop(); // remove test binary name
    path.pop(); // remove deps/
    path.push("civsync");
    path
}

const ORGS: &str = r#"{
  "result": {
    "records": [
      { "org_id": "580001", "org_name": "Food Bank North", "city": "Haifa" },
      { "org_id": "580002", "org_name": "Open Door", "city": "Akko" },
      { "org_id": "580003", "org_name": "Shelter Home", "city": "Tel Aviv" }
    ]
  }
}"#;

fn setup_test_env() -> (TempDir, PathBuf) {
    let tmp = TempDir::new().unwrap();
    let root = tmp.path().to_path_buf();

    let config_dir = root.join("config");
    fs::create_dir_all(&config_dir).unwrap();
    let feeds_dir = root.join("feeds");
    fs::create_dir_all(&feeds_dir).unwrap();
    fs::write(feeds_dir.join("orgs.json"), ORGS).unwrap();

    let config_content = format!(
        r#"[store]
backend = "sqlite"

[db]
path = "{root}/data/civsync.sqlite"

[feeds.shil]
table = "Organizations"
kind = "json_file"
path = "{root}/feeds/orgs.json"
records_pointer = "/result/records"
id_field = "org_id"
required_fields = ["name"]

[feeds.shil.fields]
name = "org_name"
city = "city"
"#,
        root = root.display()
    );

    let config_path = config_dir.join("civsync.toml");
    fs::write(&config_path, config_content).unwrap();

    (tmp, config_path)
}

fn run_civsync(config_path: &Path, args: &[&str]) -> (String, String, bool) {
    let binary = civsync_binary();
    let output = Command::new(&binary)
        .arg("--config")
        .arg(config_path.to_str().unwrap())
        .args(args)
        .env("RUST_LOG", "warn")
        .output()
        .unwrap_or_else(|e| panic!("Failed to run civsync binary at {:?}: {}", binary, e));

    let stdout = String::from_utf8_lossy(&output.stdout).to_string();
    let stderr = String::from_utf8_lossy(&output.stderr).to_string();
    (stdout, stderr, output.status.success())
}

fn feed_path(config_path: &Path) -> PathBuf {
    config_path
        .parent()
        .unwrap()
        .parent()
        .unwrap()
        .join("feeds/orgs.json")
}

#[test]
fn test_init_creates_database() {
    let (_tmp, config) = setup_test_env();
    let (stdout, stderr, success) = run_civsync(&config, &["init"]);
    assert!(success, "init failed: stdout={}, stderr={}", stdout, stderr);
    assert!(stdout.contains("initialized"));
    assert!(stdout.contains("registered table: Organizations"));
}

#[test]
fn test_init_idempotent() {
    let (_tmp, config) = setup_test_env();
    let (_, _, success1) = run_civsync(&config, &["init"]);
    assert!(success1, "First init failed");
    let (_, _, success2) = run_civsync(&config, &["init"]);
    assert!(success2, "Second init failed (not idempotent)");
}

#[test]
fn test_feeds_listing() {
    let (_tmp, config) = setup_test_env();
    let (stdout, _, success) = run_civsync(&config, &["feeds"]);
    assert!(success);
    assert!(stdout.contains("shil"));
    assert!(stdout.contains("json_file"));
    assert!(stdout.contains("Organizations"));
    assert!(stdout.contains("true"));
}

#[test]
fn test_sync_creates_records() {
    let (_tmp, config) = setup_test_env();
    run_civsync(&config, &["init"]);
    let (stdout, stderr, success) = run_civsync(&config, &["sync", "shil"]);
    assert!(success, "sync failed: stdout={}, stderr={}", stdout, stderr);
    assert!(stdout.contains("created: 3"));
    assert!(stdout.contains("ok"));
}

#[test]
fn test_sync_idempotent_no_writes() {
    let (_tmp, config) = setup_test_env();
    run_civsync(&config, &["init"]);

    let (stdout1, _, _) = run_civsync(&config, &["sync", "shil"]);
    assert!(stdout1.contains("created: 3"));

    let (stdout2, _, success) = run_civsync(&config, &["sync", "all"]);
    assert!(success);
    assert!(stdout2.contains("created: 0"));
    assert!(stdout2.contains("updated: 0"));
    assert!(stdout2.contains("unchanged: 3"));
}

#[test]
fn test_sync_update_and_deactivate() {
    let (_tmp, config) = setup_test_env();
    run_civsync(&config, &["init"]);
    run_civsync(&config, &["sync", "shil"]);

    // 580002 renamed, 580003 gone.
    fs::write(
        feed_path(&config),
        r#"{ "result": { "records": [
            { "org_id": "580001", "org_name": "Food Bank North", "city": "Haifa" },
            { "org_id": "580002", "org_name": "Open Door Center", "city": "Akko" }
        ] } }"#,
    )
    .unwrap();

    let (stdout, stderr, success) = run_civsync(&config, &["sync", "shil"]);
    assert!(success, "sync failed: stdout={}, stderr={}", stdout, stderr);
    assert!(stdout.contains("updated: 1"), "stdout={}", stdout);
    assert!(stdout.contains("deactivated: 1"), "stdout={}", stdout);

    let (stats, _, success) = run_civsync(&config, &["stats", "Organizations"]);
    assert!(success);
    assert!(stats.contains("Records:     3"), "stats={}", stats);

    // Back in the feed: reactivated in place, not recreated.
    fs::write(feed_path(&config), ORGS).unwrap();
    let (stdout, _, _) = run_civsync(&config, &["sync", "shil"]);
    assert!(stdout.contains("created: 0"), "stdout={}", stdout);
    assert!(stdout.contains("reactivated: 1"), "stdout={}", stdout);
}

#[test]
fn test_sync_keep_missing() {
    let (_tmp, config) = setup_test_env();
    run_civsync(&config, &["init"]);
    run_civsync(&config, &["sync", "shil"]);

    fs::write(feed_path(&config), r#"{ "result": { "records": [] } }"#).unwrap();
    let (stdout, _, success) = run_civsync(&config, &["sync", "shil", "--keep-missing"]);
    assert!(success);
    assert!(stdout.contains("deactivated: 0"), "stdout={}", stdout);
}

#[test]
fn test_sync_dry_run() {
    let (_tmp, config) = setup_test_env();
    run_civsync(&config, &["init"]);
    let (stdout, _, success) = run_civsync(&config, &["sync", "shil", "--dry-run"]);
    assert!(success);
    assert!(stdout.contains("dry-run"));
    assert!(stdout.contains("would create: 3"));

    // Nothing was written.
    let (stdout, _, _) = run_civsync(&config, &["sync", "shil"]);
    assert!(stdout.contains("created: 3"));
}

#[test]
fn test_sync_before_init_fails() {
    let (_tmp, config) = setup_test_env();
    let (_, stderr, success) = run_civsync(&config, &["sync", "shil"]);
    assert!(!success, "sync into an unregistered table should fail");
    assert!(stderr.contains("unknown table"), "stderr={}", stderr);
}

#[test]
fn test_unknown_feed() {
    let (_tmp, config) = setup_test_env();
    run_civsync(&config, &["init"]);
    let (_, stderr, success) = run_civsync(&config, &["sync", "nonexistent"]);
    assert!(!success, "Unknown feed should fail");
    assert!(stderr.contains("Unknown feed"));
}

#[test]
fn test_stats() {
    let (_tmp, config) = setup_test_env();
    run_civsync(&config, &["init"]);
    run_civsync(&config, &["sync", "shil"]);

    let (stdout, _, success) = run_civsync(&config, &["stats", "Organizations"]);
    assert!(success);
    assert!(stdout.contains("Organizations"));
    assert!(stdout.contains("sqlite"));
    assert!(stdout.contains("shil"));
}

#[test]
fn test_export_to_file() {
    let (tmp, config) = setup_test_env();
    run_civsync(&config, &["init"]);
    run_civsync(&config, &["sync", "shil"]);

    let out = tmp.path().join("out/orgs.json");
    let (_, stderr, success) = run_civsync(
        &config,
        &[
            "export",
            "Organizations",
            "--source",
            "shil",
            "--output",
            out.to_str().unwrap(),
        ],
    );
    assert!(success, "export failed: {}", stderr);

    let data: serde_json::Value = serde_json::from_str(&fs::read_to_string(&out).unwrap()).unwrap();
    assert_eq!(data["table"], "Organizations");
    let records = data["records"].as_array().unwrap();
    assert_eq!(records.len(), 3);
    assert_eq!(records[0]["id"], "580001");
    assert_eq!(records[0]["status"], "ACTIVE");
    assert_eq!(records[0]["fields"]["name"], "Food Bank North");
}

#[test]
fn test_id_command_needs_no_config() {
    let binary = civsync_binary();
    let run = |args: &[&str]| {
        let output = Command::new(&binary)
            .arg("--config")
            .arg("/nonexistent/civsync.toml")
            .args(args)
            .output()
            .unwrap();
        assert!(output.status.success());
        String::from_utf8_lossy(&output.stdout).trim().to_string()
    };

    let a = run(&["id", "--prefix", "meser-", "Main St 1", "580001"]);
    let b = run(&["id", "--prefix", "meser-", "Main St 1", "580001"]);
    assert_eq!(a, b);
    assert!(a.starts_with("meser-"));

    let normalized = run(&["id", "--prefix", "meser-", "--normalize", "  MAIN  st 1 ", "580001"]);
    let plain = run(&["id", "--prefix", "meser-", "main st 1", "580001"]);
    assert_eq!(normalized, plain);
}

#[test]
fn test_sync_all_continues_past_a_failing_feed() {
    let (tmp, config) = setup_test_env();
    let mut content = fs::read_to_string(&config).unwrap();
    content.push_str(&format!(
        r#"
[feeds.broken]
table = "Organizations"
kind = "json_file"
path = "{}/feeds/missing.json"
id_field = "org_id"
"#,
        tmp.path().display()
    ));
    fs::write(&config, content).unwrap();
    run_civsync(&config, &["init"]);

    // `broken` sorts before `shil`.
    let (stdout, stderr, success) = run_civsync(&config, &["sync", "all"]);
    assert!(!success, "a failing feed should fail the run");
    assert!(stderr.contains("1 of 2 feeds failed: broken"), "stderr={}", stderr);
    assert!(stdout.contains("created: 3"), "stdout={}", stdout);
}
