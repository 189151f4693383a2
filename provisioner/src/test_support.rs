//! Test-only helpers: scripted command runners, fake hosts and plan fixtures.

use std::cell::RefCell;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Result, anyhow};
use tempfile::TempDir;

use crate::core::types::{ExecSpec, Operation, display_argv};
use crate::io::executor::{CommandRequest, CommandRunner, ProcessOutcome};
use crate::io::plan::Plan;
use crate::io::preflight::HostProbe;
use crate::io::signals::Interrupt;

#[derive(Debug, Clone)]
enum Response {
    Exit {
        status: i32,
        stdout: String,
        stderr: String,
    },
    Unspawnable,
    Interrupt {
        interrupt: Interrupt,
        signal: i32,
    },
}

/// Command runner that answers from a script instead of spawning processes.
///
/// Rules match a command when its display form equals the key or starts with
/// `"{key} "`; the first matching rule wins. Unmatched commands succeed with
/// empty output. Every invocation is recorded.
#[derive(Debug, Default)]
pub struct ScriptedCommandRunner {
    rules: Vec<(String, Response)>,
    calls: RefCell<Vec<String>>,
}

impl ScriptedCommandRunner {
    pub fn new() -> Self {
        Self::default()
    }

    /// Exit with `status` and no output.
    pub fn fail(self, key: &str, status: i32) -> Self {
        self.fail_with_stderr(key, status, "")
    }

    pub fn fail_with_stderr(self, key: &str, status: i32, stderr: &str) -> Self {
        self.rule(
            key,
            Response::Exit {
                status,
                stdout: String::new(),
                stderr: stderr.to_string(),
            },
        )
    }

    /// Succeed and print `text` on stdout.
    pub fn stdout(self, key: &str, text: &str) -> Self {
        self.rule(
            key,
            Response::Exit {
                status: 0,
                stdout: text.to_string(),
                stderr: String::new(),
            },
        )
    }

    /// Fail to start, as if the program were missing.
    pub fn unspawnable(self, key: &str) -> Self {
        self.rule(key, Response::Unspawnable)
    }

    /// Succeed, but deliver `signal` to `interrupt` while the command runs.
    pub fn interrupt_on(self, key: &str, interrupt: Interrupt, signal: i32) -> Self {
        self.rule(key, Response::Interrupt { interrupt, signal })
    }

    /// Display form of every command run so far, in order.
    pub fn calls(&self) -> Vec<String> {
        self.calls.borrow().clone()
    }

    /// Whether any recorded call matches `key`.
    pub fn ran(&self, key: &str) -> bool {
        self.calls.borrow().iter().any(|call| matches_key(call, key))
    }

    fn rule(mut self, key: &str, response: Response) -> Self {
        self.rules.push((key.to_string(), response));
        self
    }
}

impl CommandRunner for ScriptedCommandRunner {
    fn run(&self, request: &CommandRequest<'_>) -> Result<ProcessOutcome> {
        let display = display_argv(request.argv);
        self.calls.borrow_mut().push(display.clone());
        let response = self
            .rules
            .iter()
            .find(|(key, _)| matches_key(&display, key))
            .map(|(_, response)| response.clone());
        match response {
            None => Ok(exited(0, "", "")),
            Some(Response::Exit {
                status,
                stdout,
                stderr,
            }) => Ok(exited(status, &stdout, &stderr)),
            Some(Response::Unspawnable) => Err(anyhow!("run {display}: No such file or directory")),
            Some(Response::Interrupt { interrupt, signal }) => {
                interrupt.raise(signal);
                Ok(exited(0, "", ""))
            }
        }
    }
}

fn matches_key(display: &str, key: &str) -> bool {
    display == key || display.starts_with(&format!("{key} "))
}

fn exited(status: i32, stdout: &str, stderr: &str) -> ProcessOutcome {
    ProcessOutcome {
        status,
        stdout: stdout.as_bytes().to_vec(),
        stderr: stderr.as_bytes().to_vec(),
        timed_out: false,
    }
}

/// Host with fixed facts for preflight tests.
#[derive(Debug, Clone)]
pub struct FakeHost {
    pub root: bool,
    pub free_mb: u64,
    pub reachable: bool,
}

impl Default for FakeHost {
    fn default() -> Self {
        Self {
            root: true,
            free_mb: 100_000,
            reachable: true,
        }
    }
}

impl HostProbe for FakeHost {
    fn is_root(&self) -> bool {
        self.root
    }

    fn free_disk_mb(&self, _path: &Path) -> Result<u64> {
        Ok(self.free_mb)
    }

    fn connect(&self, addr: &str, _timeout: Duration) -> Result<()> {
        if self.reachable {
            Ok(())
        } else {
            Err(anyhow!("connect {addr}: Connection refused"))
        }
    }
}

/// A required, non-capturing command operation.
pub fn exec_op(argv: &[&str]) -> Operation {
    Operation::Exec(ExecSpec {
        exec: argv.iter().map(|s| s.to_string()).collect(),
        cwd: None,
        stdin: None,
        optional: false,
        capture: false,
    })
}

/// Lines of a run log file; empty if the file does not exist.
pub fn log_lines(path: &Path) -> Vec<String> {
    fs::read_to_string(path)
        .map(|contents| contents.lines().map(str::to_string).collect())
        .unwrap_or_default()
}

/// Temporary workspace holding the run log, lock, secrets and report of a
/// test plan.
pub struct TestWorkspace {
    dir: TempDir,
}

impl TestWorkspace {
    pub fn new() -> Result<Self> {
        Ok(Self {
            dir: tempfile::tempdir()?,
        })
    }

    pub fn path(&self) -> &Path {
        self.dir.path()
    }

    pub fn log_path(&self) -> PathBuf {
        self.path().join("log").join("provision.log")
    }

    pub fn lock_path(&self) -> PathBuf {
        self.path().join("run.lock")
    }

    pub fn secret_dir(&self) -> PathBuf {
        self.path().join("secrets")
    }

    pub fn report_path(&self) -> PathBuf {
        self.path().join("report.json")
    }

    /// `[settings]` table pointing every artifact into the workspace.
    pub fn settings_toml(&self) -> String {
        format!(
            "[settings]\n\
             log_path = \"{}\"\n\
             lock_path = \"{}\"\n\
             secret_dir = \"{}\"\n\
             report_path = \"{}\"\n\
             \n\
             [settings.preflight]\n\
             require_root = false\n\n",
            self.log_path().display(),
            self.lock_path().display(),
            self.secret_dir().display(),
            self.report_path().display(),
        )
    }

    /// Parse `body` (steps, cleanup, summary) under the workspace settings.
    pub fn plan(&self, body: &str) -> Result<Plan> {
        let layout = format!(
            "[layout]\nsource_dir = \"{}\"\nbuild_dir = \"{}\"\n\n",
            self.path().join("source").display(),
            self.path().join("build").display(),
        );
        Plan::parse(&format!("{}{layout}{body}", self.settings_toml()), |_| None)
    }

    pub fn log_lines(&self) -> Vec<String> {
        log_lines(&self.log_path())
    }
}
