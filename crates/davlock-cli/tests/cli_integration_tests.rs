//! CLI integration tests for davlock
//!
//! Tests the davlock CLI commands end-to-end using assert_cmd.

use assert_cmd::Command;
use predicates::prelude::*;
use std::path::PathBuf;
use tempfile::TempDir;

/// Command isolated from the user's configuration directory
#[allow(deprecated)]
fn davlock_cmd(config_dir: &TempDir) -> Command {
    let mut cmd = Command::cargo_bin("davlock").unwrap();
    cmd.env("DAVLOCK_CONFIG_DIR", config_dir.path());
    cmd.env_remove("RUST_LOG");
    cmd
}

fn write_script(dir: &TempDir, name: &str, lines: &[&str]) -> PathBuf {
    let path = dir.path().join(name);
    std::fs::write(&path, lines.join("\n")).unwrap();
    path
}

#[test]
fn test_help_command() {
    let temp_dir = TempDir::new().unwrap();
    davlock_cmd(&temp_dir)
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("Hierarchical WebDAV lock manager"))
        .stdout(predicate::str::contains("run"))
        .stdout(predicate::str::contains("shell"));
}

#[test]
fn test_version_output() {
    let temp_dir = TempDir::new().unwrap();
    davlock_cmd(&temp_dir)
        .arg("--version")
        .assert()
        .success()
        .stdout(predicate::str::contains("davlock"));
}

#[test]
fn test_run_report_scenario() {
    let temp_dir = TempDir::new().unwrap();
    let script = write_script(
        &temp_dir,
        "report.lock",
        &[
            "# alice locks the report, bob wants the folder",
            "lock /docs/report.txt alice exclusive 0 60",
            "lock /docs bob shared infinity",
            "unlock $last alice",
            "lock /docs bob shared infinity",
            "list",
        ],
    );

    davlock_cmd(&temp_dir)
        .arg("run")
        .arg(&script)
        .assert()
        .success()
        .stdout(predicate::str::contains("locked write /docs/report.txt exclusive depth=0 owners=[alice]"))
        .stdout(predicate::str::contains("conflict /docs"))
        .stdout(predicate::str::contains("unlocked"))
        .stdout(predicate::str::contains("locked write /docs shared depth=infinity owners=[bob]"));
}

#[test]
fn test_run_cleanup_cascade() {
    let temp_dir = TempDir::new().unwrap();
    let script = write_script(
        &temp_dir,
        "cascade.lock",
        &[
            "lock /a/b/c alice exclusive infinity",
            "unlock $1 alice",
            "clean",
            "show /a",
        ],
    );

    davlock_cmd(&temp_dir)
        .arg("run")
        .arg(&script)
        .assert()
        .success()
        .stdout(predicate::str::contains("removed 0 nodes"))
        .stdout(predicate::str::contains("no lock at /a"));
}

#[test]
fn test_run_timeout_sweep() {
    let temp_dir = TempDir::new().unwrap();
    let script = write_script(
        &temp_dir,
        "sweep.lock",
        &[
            "lock /tmp/job worker exclusive 0 0 temp",
            "sleep 0.05",
            "sweep temp",
            "list temp",
        ],
    );

    davlock_cmd(&temp_dir)
        .arg("run")
        .arg(&script)
        .assert()
        .success()
        .stdout(predicate::str::contains("expired 1"))
        .stdout(predicate::str::contains("no locks"));
}

#[test]
fn test_run_authorize() {
    let temp_dir = TempDir::new().unwrap();
    let script = write_script(
        &temp_dir,
        "authorize.lock",
        &[
            "lock /docs alice exclusive infinity",
            "authorize /docs/draft.md",
            "authorize /docs/draft.md $last",
        ],
    );

    davlock_cmd(&temp_dir)
        .arg("run")
        .arg(&script)
        .assert()
        .success()
        .stdout(predicate::str::contains("denied /docs/draft.md"))
        .stdout(predicate::str::contains("allowed /docs/draft.md"));
}

#[test]
fn test_run_json_output() {
    let temp_dir = TempDir::new().unwrap();
    let script = write_script(&temp_dir, "json.lock", &["lock /a alice shared 1", "clean"]);

    davlock_cmd(&temp_dir)
        .args(["--format", "json", "run"])
        .arg(&script)
        .assert()
        .success()
        .stdout(predicate::str::contains("\"result\":\"locked\""))
        .stdout(predicate::str::contains("\"path\":\"/a\""))
        .stdout(predicate::str::contains("\"result\":\"removed\""));
}

#[test]
fn test_run_reports_bad_line() {
    let temp_dir = TempDir::new().unwrap();
    let script = write_script(&temp_dir, "bad.lock", &["list", "frobnicate /a"]);

    davlock_cmd(&temp_dir)
        .arg("run")
        .arg(&script)
        .assert()
        .failure()
        .stderr(predicate::str::contains("bad.lock:2"))
        .stderr(predicate::str::contains("unknown command 'frobnicate'"));
}

#[test]
fn test_run_missing_script() {
    let temp_dir = TempDir::new().unwrap();
    davlock_cmd(&temp_dir)
        .args(["run", "does-not-exist.lock"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("Failed to read script"));
}

#[test]
fn test_run_uses_context_path_from_config() {
    let temp_dir = TempDir::new().unwrap();
    davlock_cmd(&temp_dir)
        .args(["config", "set", "server.context_path", "/dav"])
        .assert()
        .success();

    let script = write_script(&temp_dir, "context.lock", &["lock /dav/docs alice exclusive 0"]);
    davlock_cmd(&temp_dir)
        .arg("run")
        .arg(&script)
        .assert()
        .success()
        .stdout(predicate::str::contains("locked write /docs exclusive"));
}

#[test]
fn test_config_set_get_and_reset() {
    let temp_dir = TempDir::new().unwrap();

    davlock_cmd(&temp_dir)
        .args(["config", "set", "locks.cleanup_threshold", "250"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Set locks.cleanup_threshold = 250"));

    davlock_cmd(&temp_dir)
        .args(["config", "get", "locks.cleanup_threshold"])
        .assert()
        .success()
        .stdout(predicate::str::contains("250"));

    davlock_cmd(&temp_dir)
        .args(["config", "reset"])
        .assert()
        .success();

    davlock_cmd(&temp_dir)
        .args(["config", "get", "locks.cleanup_threshold"])
        .assert()
        .success()
        .stdout(predicate::str::contains("100000"));
}

#[test]
fn test_config_rejects_invalid_value() {
    let temp_dir = TempDir::new().unwrap();
    davlock_cmd(&temp_dir)
        .args(["config", "set", "tokens.worker_id", "64"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("tokens.worker_id"));
}

#[test]
fn test_config_list_and_path() {
    let temp_dir = TempDir::new().unwrap();

    davlock_cmd(&temp_dir)
        .args(["config", "list"])
        .assert()
        .success()
        .stdout(predicate::str::contains("locks.default_timeout_secs = 3600"))
        .stdout(predicate::str::contains("server.context_path ="));

    davlock_cmd(&temp_dir)
        .args(["config", "path"])
        .assert()
        .success()
        .stdout(predicate::str::contains("config.toml"));
}

#[test]
fn test_shell_reads_commands_from_stdin() {
    let temp_dir = TempDir::new().unwrap();
    davlock_cmd(&temp_dir)
        .args(["--quiet", "shell"])
        .write_stdin("lock /a alice exclusive 0\nlist\nbogus\nexit\n")
        .assert()
        .success()
        .stdout(predicate::str::contains("locked write /a exclusive"))
        .stderr(predicate::str::contains("unknown command 'bogus'"));
}
