//! Command execution for provisioning operations.
//!
//! The [`CommandRunner`] trait decouples orchestration from process spawning;
//! tests use scripted runners that return predetermined statuses. The
//! [`Executor`] is the single choke point for mutating operations: every
//! operation gets exactly one "executing" record before it runs and exactly
//! one outcome record after, in the durable run log.

use std::fs::{self, OpenOptions};
use std::io::{ErrorKind, Write};
use std::os::unix::fs::{OpenOptionsExt, PermissionsExt};
use std::path::{Path, PathBuf};
use std::process::Command;
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use tracing::{debug, instrument};

use crate::core::types::{CleanupAction, CommandResult, ExecSpec, FileSpec, Level, Operation};
use crate::exit_codes;
use crate::io::process::run_command_with_timeout;
use crate::io::run_log::RunLog;

/// Parameters for one external command invocation.
#[derive(Debug, Clone)]
pub struct CommandRequest<'a> {
    /// Program followed by its arguments.
    pub argv: &'a [String],
    pub cwd: Option<&'a Path>,
    pub stdin: Option<&'a [u8]>,
    /// Kill the command after this long; `None` waits indefinitely.
    pub timeout: Option<Duration>,
    pub output_limit_bytes: usize,
}

/// Raw result of a finished child process.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessOutcome {
    /// Exit code, `124` on timeout, `128 + signo` if killed by a signal.
    pub status: i32,
    pub stdout: Vec<u8>,
    pub stderr: Vec<u8>,
    pub timed_out: bool,
}

/// Abstraction over process spawning.
pub trait CommandRunner {
    /// Run a command to completion. `Err` means it could not be started at all.
    fn run(&self, request: &CommandRequest<'_>) -> Result<ProcessOutcome>;
}

/// Runner that spawns real child processes.
pub struct SystemCommandRunner;

impl CommandRunner for SystemCommandRunner {
    #[instrument(skip_all, fields(program = request.argv.first().map(String::as_str)))]
    fn run(&self, request: &CommandRequest<'_>) -> Result<ProcessOutcome> {
        let (program, args) = request
            .argv
            .split_first()
            .ok_or_else(|| anyhow!("empty command"))?;
        let mut cmd = Command::new(program);
        cmd.args(args);
        if let Some(cwd) = request.cwd {
            cmd.current_dir(cwd);
        }
        let output = run_command_with_timeout(
            cmd,
            request.stdin,
            request.timeout,
            request.output_limit_bytes,
        )
        .with_context(|| format!("run {program}"))?;
        Ok(ProcessOutcome {
            status: output.exit_code(),
            stdout: output.stdout,
            stderr: output.stderr,
            timed_out: output.timed_out,
        })
    }
}

/// Logged execution of operations and cleanup actions.
pub struct Executor<'a, R: CommandRunner> {
    runner: &'a R,
    log: &'a RunLog,
    output_limit_bytes: usize,
}

impl<'a, R: CommandRunner> Executor<'a, R> {
    pub fn new(runner: &'a R, log: &'a RunLog, output_limit_bytes: usize) -> Self {
        Self {
            runner,
            log,
            output_limit_bytes,
        }
    }

    pub fn log(&self) -> &'a RunLog {
        self.log
    }

    /// Execute one operation synchronously.
    ///
    /// `tolerated` failures are recorded at WARN instead of ERROR; the caller
    /// decides what a failure means for the step.
    pub fn execute(&self, op: &Operation, timeout: Option<Duration>, tolerated: bool) -> CommandResult {
        let display = op.to_string();
        self.log.info(&format!("executing: {display}"));
        let (status, stdout, detail) = match op {
            Operation::Exec(spec) => self.spawn(spec, timeout),
            Operation::WriteFile(spec) => write_file(spec),
        };
        let level = if tolerated { Level::Warn } else { Level::Error };
        self.record_outcome(&display, status, detail.as_deref(), level);
        CommandResult::new(display, status, stdout)
    }

    /// Execute one cleanup handler. Failures are always recorded at WARN.
    pub fn cleanup(&self, action: &CleanupAction, timeout: Option<Duration>) -> CommandResult {
        let display = action.to_string();
        self.log.info(&format!("cleanup: {display}"));
        let (status, stdout, detail) = match action {
            CleanupAction::RemovePath(path) => remove_path(path),
            CleanupAction::Command(argv) => self.spawn(
                &ExecSpec {
                    exec: argv.clone(),
                    cwd: None,
                    stdin: None,
                    optional: true,
                    capture: false,
                },
                timeout,
            ),
        };
        self.record_outcome(&display, status, detail.as_deref(), Level::Warn);
        CommandResult::new(display, status, stdout)
    }

    /// Run a read-only check command. Not recorded in the run log.
    pub fn probe(&self, argv: &[String], timeout: Option<Duration>) -> Result<ProcessOutcome> {
        debug!(command = %crate::core::types::display_argv(argv), "probing");
        self.runner.run(&CommandRequest {
            argv,
            cwd: None,
            stdin: None,
            timeout,
            output_limit_bytes: self.output_limit_bytes,
        })
    }

    fn spawn(&self, spec: &ExecSpec, timeout: Option<Duration>) -> (i32, String, Option<String>) {
        let request = CommandRequest {
            argv: &spec.exec,
            cwd: spec.cwd.as_deref(),
            stdin: spec.stdin.as_deref().map(str::as_bytes),
            timeout,
            output_limit_bytes: self.output_limit_bytes,
        };
        match self.runner.run(&request) {
            Ok(out) => {
                let stdout = String::from_utf8_lossy(&out.stdout).into_owned();
                let detail = if out.timed_out {
                    timeout.map(|t| format!("timed out after {}s", t.as_secs()))
                } else if out.status != 0 {
                    last_line(&out.stderr)
                } else {
                    None
                };
                if out.status != 0 {
                    debug!(
                        stderr = %String::from_utf8_lossy(&out.stderr),
                        "command stderr"
                    );
                }
                (out.status, stdout, detail)
            }
            Err(err) => (
                exit_codes::SPAWN_FAILED,
                String::new(),
                Some(format!("{err:#}")),
            ),
        }
    }

    fn record_outcome(&self, display: &str, status: i32, detail: Option<&str>, level: Level) {
        if status == 0 {
            self.log.info(&format!("succeeded: {display}"));
            return;
        }
        let message = match detail {
            Some(detail) => format!("failed (status {status}): {display}: {detail}"),
            None => format!("failed (status {status}): {display}"),
        };
        self.log.log(level, &message);
    }
}

fn last_line(bytes: &[u8]) -> Option<String> {
    String::from_utf8_lossy(bytes)
        .lines()
        .rev()
        .map(str::trim)
        .find(|l| !l.is_empty())
        .map(str::to_string)
}

/// Write a rendered file atomically (temp file + rename) with exactly `mode`.
fn write_file(spec: &FileSpec) -> (i32, String, Option<String>) {
    match write_atomic_with_mode(&spec.write_file, spec.contents.as_bytes(), spec.mode) {
        Ok(()) => (exit_codes::OK, String::new(), None),
        Err(err) => (exit_codes::INVALID, String::new(), Some(format!("{err:#}"))),
    }
}

fn write_atomic_with_mode(path: &Path, contents: &[u8], mode: u32) -> Result<()> {
    let parent = path
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .with_context(|| format!("path missing parent {}", path.display()))?;
    fs::create_dir_all(parent).with_context(|| format!("create directory {}", parent.display()))?;
    let tmp_path = tmp_sibling(path)?;
    let _ = fs::remove_file(&tmp_path);
    let mut file = OpenOptions::new()
        .write(true)
        .create_new(true)
        .mode(mode)
        .open(&tmp_path)
        .with_context(|| format!("create {}", tmp_path.display()))?;
    file.write_all(contents)
        .with_context(|| format!("write {}", tmp_path.display()))?;
    // The umask may have narrowed the creation mode.
    fs::set_permissions(&tmp_path, fs::Permissions::from_mode(mode))
        .with_context(|| format!("chmod {}", tmp_path.display()))?;
    fs::rename(&tmp_path, path).with_context(|| format!("replace {}", path.display()))?;
    Ok(())
}

fn tmp_sibling(path: &Path) -> Result<PathBuf> {
    let name = path
        .file_name()
        .with_context(|| format!("path missing file name {}", path.display()))?;
    Ok(path.with_file_name(format!(".{}.provision-tmp", name.to_string_lossy())))
}

fn remove_path(path: &Path) -> (i32, String, Option<String>) {
    let result = match fs::symlink_metadata(path) {
        Ok(meta) if meta.is_dir() => fs::remove_dir_all(path),
        Ok(_) => fs::remove_file(path),
        Err(err) if err.kind() == ErrorKind::NotFound => Ok(()),
        Err(err) => Err(err),
    };
    match result {
        Ok(()) => (exit_codes::OK, String::new(), None),
        Err(err) => (exit_codes::INVALID, String::new(), Some(err.to_string())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{ScriptedCommandRunner, exec_op, log_lines};

    #[test]
    fn success_logs_invocation_and_outcome() {
        let temp = tempfile::tempdir().expect("tempdir");
        let log = RunLog::open(&temp.path().join("run.log"));
        let runner = ScriptedCommandRunner::new();
        let executor = Executor::new(&runner, &log, 1024);

        let result = executor.execute(&exec_op(&["apt-get", "install", "-y", "cmake"]), None, false);
        assert!(result.success);
        assert_eq!(result.command, "apt-get install -y cmake");

        let lines = log_lines(&temp.path().join("run.log"));
        assert_eq!(lines.len(), 2);
        assert!(lines[0].contains("INFO  executing: apt-get install -y cmake"));
        assert!(lines[1].contains("INFO  succeeded: apt-get install -y cmake"));
    }

    #[test]
    fn failure_logs_status_and_stderr_tail() {
        let temp = tempfile::tempdir().expect("tempdir");
        let log = RunLog::open(&temp.path().join("run.log"));
        let runner = ScriptedCommandRunner::new().fail_with_stderr("make", 2, "ld: cannot find -lgvm\n");
        let executor = Executor::new(&runner, &log, 1024);

        let result = executor.execute(&exec_op(&["make"]), None, false);
        assert_eq!(result.status, 2);
        assert!(!result.success);

        let lines = log_lines(&temp.path().join("run.log"));
        assert!(lines[1].contains("ERROR failed (status 2): make: ld: cannot find -lgvm"));
    }

    #[test]
    fn tolerated_failure_is_a_warning() {
        let temp = tempfile::tempdir().expect("tempdir");
        let log = RunLog::open(&temp.path().join("run.log"));
        let runner = ScriptedCommandRunner::new().fail("pip", 1);
        let executor = Executor::new(&runner, &log, 1024);

        executor.execute(&exec_op(&["pip"]), None, true);
        let lines = log_lines(&temp.path().join("run.log"));
        assert!(lines[1].contains("WARN  failed (status 1): pip"));
    }

    #[test]
    fn spawn_failure_maps_to_127() {
        let temp = tempfile::tempdir().expect("tempdir");
        let log = RunLog::open(&temp.path().join("run.log"));
        let executor = Executor::new(&SystemCommandRunner, &log, 1024);

        let result = executor.execute(
            &exec_op(&["/nonexistent/provision-test-binary"]),
            None,
            false,
        );
        assert_eq!(result.status, exit_codes::SPAWN_FAILED);
    }

    #[test]
    fn write_file_applies_exact_mode() {
        let temp = tempfile::tempdir().expect("tempdir");
        let log = RunLog::console_only();
        let runner = ScriptedCommandRunner::new();
        let executor = Executor::new(&runner, &log, 1024);
        let path = temp.path().join("etc").join("gvmd.service");

        let op = Operation::WriteFile(FileSpec {
            write_file: path.clone(),
            contents: "[Unit]\n".to_string(),
            mode: 0o640,
            optional: false,
        });
        let result = executor.execute(&op, None, false);
        assert!(result.success);
        assert_eq!(fs::read_to_string(&path).expect("read"), "[Unit]\n");
        let mode = fs::metadata(&path).expect("meta").permissions().mode() & 0o777;
        assert_eq!(mode, 0o640);
        assert!(runner.calls().is_empty());
    }

    #[test]
    fn cleanup_remove_path_tolerates_missing() {
        let temp = tempfile::tempdir().expect("tempdir");
        let log = RunLog::console_only();
        let runner = ScriptedCommandRunner::new();
        let executor = Executor::new(&runner, &log, 1024);
        let dir = temp.path().join("build");
        fs::create_dir_all(dir.join("nested")).expect("mkdir");

        let removed = executor.cleanup(&CleanupAction::RemovePath(dir.clone()), None);
        assert!(removed.success);
        assert!(!dir.exists());
        let again = executor.cleanup(&CleanupAction::RemovePath(dir), None);
        assert!(again.success);
    }
}
