//! CLI tests for the `provision` binary.
//!
//! Spawns the binary against small plans that only run `sh`/`printf` and
//! write into a temporary workspace.

use std::fs;
use std::path::PathBuf;
use std::process::{Command, Output};

use provision::exit_codes;
use provision::test_support::TestWorkspace;

fn write_plan(ws: &TestWorkspace, body: &str) -> PathBuf {
    let path = ws.path().join("plan.toml");
    fs::write(&path, format!("{}{body}", ws.settings_toml())).expect("write plan");
    path
}

fn provision(args: &[&str], plan: &PathBuf) -> Output {
    Command::new(env!("CARGO_BIN_EXE_provision"))
        .args(args)
        .arg("--plan")
        .arg(plan)
        .env_remove("RUST_LOG")
        .output()
        .expect("spawn provision")
}

#[test]
fn failing_required_step_exits_with_its_status() {
    let ws = TestWorkspace::new().expect("workspace");
    let scratch = ws.path().join("build");
    fs::create_dir_all(&scratch).expect("mkdir");
    let plan = write_plan(
        &ws,
        &format!(
            r#"
[[steps]]
name = "compile"
action = [{{ exec = ["sh", "-c", "exit 17"] }}]

[[steps]]
name = "never"
action = [{{ exec = ["touch", "{never}"] }}]

[[cleanup]]
remove_path = "{scratch}"
"#,
            never = ws.path().join("never").display(),
            scratch = scratch.display()
        ),
    );

    let out = provision(&["run"], &plan);

    assert_eq!(out.status.code(), Some(17));
    assert!(!ws.path().join("never").exists());
    assert!(!scratch.exists(), "cleanup must remove the build dir");
    let stderr = String::from_utf8_lossy(&out.stderr);
    assert!(stderr.contains("step 'compile' failed; exiting with status 17"));
}

#[test]
fn success_discloses_secret_and_summary() {
    let ws = TestWorkspace::new().expect("workspace");
    let plan = write_plan(
        &ws,
        r#"
[[steps]]
name = "admin"
action = [{ exec = ["printf", "User created with password '%s'.\\n", "pw-42"] }]
capture = { label = "admin password", pattern = "password '([^']+)'" }

[summary]
lines = ["web interface: https://localhost:9392"]
"#,
    );

    let out = provision(&["run"], &plan);

    assert_eq!(out.status.code(), Some(exit_codes::OK));
    let stdout = String::from_utf8_lossy(&out.stdout);
    assert!(stdout.contains("admin password: pw-42"));
    assert!(stdout.trim_end().ends_with("web interface: https://localhost:9392"));
    let log = fs::read_to_string(ws.log_path()).expect("log");
    assert!(!log.contains("pw-42"));
    assert!(!ws.secret_dir().join("admin.secret").exists());
}

#[test]
fn validate_rejects_invalid_plan() {
    let ws = TestWorkspace::new().expect("workspace");
    let plan = write_plan(
        &ws,
        r#"
[[steps]]
name = "a"
action = []
"#,
    );

    let out = provision(&["validate"], &plan);

    assert_eq!(out.status.code(), Some(exit_codes::INVALID));
    assert!(String::from_utf8_lossy(&out.stderr).contains("invalid plan"));
}

#[test]
fn list_prints_steps_in_order() {
    let ws = TestWorkspace::new().expect("workspace");
    let plan = write_plan(
        &ws,
        r#"
[[steps]]
name = "packages"
action = [{ exec = ["true"] }]

[[steps]]
name = "feed-sync"
severity = "optional"
action = [{ exec = ["true"] }]
"#,
    );

    let out = provision(&["list"], &plan);

    assert_eq!(out.status.code(), Some(exit_codes::OK));
    let stdout = String::from_utf8_lossy(&out.stdout);
    let lines: Vec<&str> = stdout.lines().collect();
    assert_eq!(lines, vec!["  1. packages (required)", "  2. feed-sync (optional)"]);
}
