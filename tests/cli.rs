use std::fs;
use std::path::{Path, PathBuf};
use std::process::{Command, Output};
use tempfile::TempDir;

fn setup_config() -> (TempDir, PathBuf) {
    let tmp = TempDir::new().unwrap();
    let config_path = tmp.path().join("dunorth.toml");
    let config_content = format!(
        r#"[db]
path = "{}/data/dunorth.sqlite"

[canvas]
auth_variants = ["cookie:canvas_session", "bearer"]
timeout_secs = 5

[index]
enabled = false
"#,
        tmp.path().display()
    );
    fs::write(&config_path, config_content).unwrap();
    (tmp, config_path)
}

fn run(config: &Path, args: &[&str]) -> Output {
    Command::new(env!("CARGO_BIN_EXE_dunorth"))
        .arg("--config")
        .arg(config)
        .args(args)
        .env("RUST_LOG", "warn")
        .output()
        .expect("failed to run dunorth")
}

#[test]
fn test_init_is_idempotent() {
    let (tmp, config) = setup_config();

    let first = run(&config, &["init"]);
    assert!(first.status.success(), "{}", String::from_utf8_lossy(&first.stderr));
    let second = run(&config, &["init"]);
    assert!(second.status.success());

    assert!(tmp.path().join("data").join("dunorth.sqlite").exists());
}

#[test]
fn test_sync_without_session_prints_error_json() {
    let (_tmp, config) = setup_config();
    run(&config, &["init"]);

    let out = run(&config, &["sync", "courses", "--user", "ghost"]);
    assert!(!out.status.success());
    let value: serde_json::Value = serde_json::from_slice(&out.stdout).unwrap();
    assert_eq!(value["ok"], false);
    assert_eq!(value["error"], "no_session");
}

#[test]
fn test_session_set_and_cursor_list() {
    let (_tmp, config) = setup_config();
    run(&config, &["init"]);

    let out = run(
        &config,
        &[
            "session",
            "set",
            "--user",
            "u1",
            "--base-url",
            "https://school.instructure.com",
            "--cookie",
            "abc123",
        ],
    );
    assert!(out.status.success(), "{}", String::from_utf8_lossy(&out.stderr));

    let bad = run(
        &config,
        &[
            "session",
            "set",
            "--user",
            "u1",
            "--base-url",
            "https://school.instructure.com",
            "--cookie",
            "abc123",
            "--expires-at",
            "tomorrow",
        ],
    );
    assert!(!bad.status.success());

    let cursors = run(&config, &["cursor", "list", "--user", "u1"]);
    assert!(cursors.status.success());
    let value: serde_json::Value = serde_json::from_slice(&cursors.stdout).unwrap();
    assert_eq!(value, serde_json::json!([]));
}

#[test]
fn test_invalid_config_is_rejected() {
    let tmp = TempDir::new().unwrap();
    let config = tmp.path().join("bad.toml");
    fs::write(
        &config,
        "[db]\npath = \"x.sqlite\"\n[canvas]\nauth_variants = [\"header:X-Token\"]\n",
    )
    .unwrap();

    let out = run(&config, &["init"]);
    assert!(!out.status.success());
    assert!(String::from_utf8_lossy(&out.stderr).contains("auth_variants"));
}
