//! Run lifecycle and the cleanup guarantee.
//!
//! A [`Run`] owns the cleanup handlers and the secrets captured so far. It
//! moves through `Running → {Succeeded, Aborted} → Finalized`; finalization
//! invokes every handler exactly once, in registration order, and a failing
//! handler never stops the rest or changes the exit status.
//!
//! If a `Run` is dropped before [`Run::finalize`] (a panic or an early `?`),
//! `Drop` aborts and finalizes it. Secret files are left in place on that
//! path because their values were never disclosed.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use serde::Serialize;
use tracing::debug;

use crate::core::run_state::RunPhase;
use crate::core::types::{CleanupAction, StepRecord};
use crate::exit_codes;
use crate::io::executor::{CommandRunner, Executor};
use crate::io::secrets::{DisclosedSecret, SecretStore};

pub struct Run<'a, R: CommandRunner> {
    executor: &'a Executor<'a, R>,
    handlers: Vec<CleanupAction>,
    cleanup_timeout: Option<Duration>,
    secrets: SecretStore,
    phase: RunPhase,
    exit_status: i32,
}

/// What finalization produced.
#[derive(Debug)]
pub struct Finalized {
    /// `Succeeded` or `Aborted`.
    pub outcome: RunPhase,
    pub exit_status: i32,
    pub secrets: Vec<DisclosedSecret>,
    /// Display form of every cleanup handler that failed.
    pub cleanup_failures: Vec<String>,
}

impl<'a, R: CommandRunner> Run<'a, R> {
    pub fn begin(
        executor: &'a Executor<'a, R>,
        handlers: Vec<CleanupAction>,
        secrets: SecretStore,
        cleanup_timeout: Option<Duration>,
    ) -> Self {
        executor
            .log()
            .info(&format!("run started ({} cleanup handler(s))", handlers.len()));
        Self {
            executor,
            handlers,
            cleanup_timeout,
            secrets,
            phase: RunPhase::Running,
            exit_status: exit_codes::OK,
        }
    }

    pub fn secrets_mut(&mut self) -> &mut SecretStore {
        &mut self.secrets
    }

    /// Every step was processed without a fatal outcome.
    pub fn succeed(&mut self) -> Result<()> {
        self.phase = self.phase.transition(RunPhase::Succeeded)?;
        self.exit_status = exit_codes::OK;
        self.executor.log().info("all steps processed");
        Ok(())
    }

    /// A required step failed or the run was interrupted.
    pub fn abort(&mut self, status: i32) -> Result<()> {
        self.phase = self.phase.transition(RunPhase::Aborted)?;
        self.exit_status = status;
        self.executor
            .log()
            .error(&format!("run aborted with status {status}"));
        Ok(())
    }

    /// Disclose captured secrets, then run every cleanup handler once.
    ///
    /// Secret files are removed after the plan's own handlers.
    pub fn finalize(&mut self) -> Result<Finalized> {
        let outcome = self.phase;
        self.phase = self.phase.transition(RunPhase::Finalized)?;
        let mut handlers = std::mem::take(&mut self.handlers);
        handlers.extend(self.secrets.paths().into_iter().map(CleanupAction::RemovePath));
        let secrets = self.secrets.disclose();
        let cleanup_failures = self.run_handlers(&handlers);
        self.executor.log().info(&format!(
            "run finalized ({}, exit status {})",
            phase_name(outcome),
            self.exit_status
        ));
        Ok(Finalized {
            outcome,
            exit_status: self.exit_status,
            secrets,
            cleanup_failures,
        })
    }

    fn run_handlers(&self, handlers: &[CleanupAction]) -> Vec<String> {
        let mut failures = Vec::new();
        for handler in handlers {
            let result = self.executor.cleanup(handler, self.cleanup_timeout);
            if !result.success {
                failures.push(result.command);
            }
        }
        if !failures.is_empty() {
            self.executor.log().warn(&format!(
                "{} cleanup handler(s) failed; exit status unchanged",
                failures.len()
            ));
        }
        failures
    }
}

impl<R: CommandRunner> Drop for Run<'_, R> {
    fn drop(&mut self) {
        if self.phase == RunPhase::Finalized {
            return;
        }
        let log = self.executor.log();
        if self.phase == RunPhase::Running {
            log.error("run ended before completion, aborting");
            self.phase = RunPhase::Aborted;
            self.exit_status = exit_codes::INVALID;
        }
        for path in self.secrets.paths() {
            log.warn(&format!("secret file kept for recovery: {}", path.display()));
        }
        let handlers = std::mem::take(&mut self.handlers);
        self.run_handlers(&handlers);
        self.phase = RunPhase::Finalized;
        debug!("run finalized from drop");
    }
}

fn phase_name(phase: RunPhase) -> &'static str {
    match phase {
        RunPhase::Running => "running",
        RunPhase::Succeeded => "succeeded",
        RunPhase::Aborted => "aborted",
        RunPhase::Finalized => "finalized",
    }
}

/// Machine-readable summary of a finished run. Secrets are never serialized.
#[derive(Debug, Serialize)]
pub struct RunReport {
    pub outcome: RunPhase,
    pub exit_status: i32,
    pub failed_step: Option<String>,
    pub started_at: String,
    pub finished_at: String,
    pub log_path: Option<PathBuf>,
    pub steps: Vec<StepRecord>,
    pub cleanup_failures: Vec<String>,
    #[serde(skip)]
    pub secrets: Vec<DisclosedSecret>,
}

impl RunReport {
    pub fn succeeded(&self) -> bool {
        self.outcome == RunPhase::Succeeded
    }

    /// Atomically write the report as pretty JSON (temp file + rename).
    pub fn write_json(&self, path: &Path) -> Result<()> {
        debug!(path = %path.display(), "writing run report");
        let mut buf = serde_json::to_string_pretty(self).context("serialize run report")?;
        buf.push('\n');
        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            fs::create_dir_all(parent)
                .with_context(|| format!("create directory {}", parent.display()))?;
        }
        let tmp_path = path.with_extension("json.tmp");
        fs::write(&tmp_path, buf)
            .with_context(|| format!("write temp report {}", tmp_path.display()))?;
        fs::rename(&tmp_path, path).with_context(|| format!("replace report {}", path.display()))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::io::run_log::RunLog;
    use crate::test_support::{ScriptedCommandRunner, log_lines};

    fn handlers() -> Vec<CleanupAction> {
        vec![
            CleanupAction::Command(vec!["first".to_string()]),
            CleanupAction::Command(vec!["second".to_string()]),
        ]
    }

    #[test]
    fn finalize_runs_each_handler_once_in_order() {
        let temp = tempfile::tempdir().expect("tempdir");
        let log = RunLog::console_only();
        let runner = ScriptedCommandRunner::new();
        let executor = Executor::new(&runner, &log, 1024);

        let mut run = Run::begin(&executor, handlers(), SecretStore::new(temp.path(), None), None);
        run.succeed().expect("succeed");
        let finalized = run.finalize().expect("finalize");
        assert_eq!(finalized.outcome, RunPhase::Succeeded);
        assert_eq!(finalized.exit_status, 0);
        assert!(run.finalize().is_err());
        drop(run);

        assert_eq!(runner.calls(), vec!["first".to_string(), "second".to_string()]);
    }

    #[test]
    fn failing_handler_does_not_stop_the_rest_or_change_status() {
        let temp = tempfile::tempdir().expect("tempdir");
        let log = RunLog::open(&temp.path().join("run.log"));
        let runner = ScriptedCommandRunner::new().fail("first", 1);
        let executor = Executor::new(&runner, &log, 1024);

        let mut run = Run::begin(&executor, handlers(), SecretStore::new(temp.path(), None), None);
        run.abort(17).expect("abort");
        let finalized = run.finalize().expect("finalize");

        assert_eq!(finalized.exit_status, 17);
        assert_eq!(finalized.cleanup_failures, vec!["first".to_string()]);
        assert!(runner.ran("second"));
        let lines = log_lines(&temp.path().join("run.log"));
        assert!(lines.iter().any(|l| l.contains("WARN  failed (status 1): first")));
    }

    #[test]
    fn drop_without_finalize_still_cleans_up() {
        let temp = tempfile::tempdir().expect("tempdir");
        let log = RunLog::console_only();
        let runner = ScriptedCommandRunner::new();
        let executor = Executor::new(&runner, &log, 1024);

        {
            let _run = Run::begin(&executor, handlers(), SecretStore::new(temp.path(), None), None);
        }
        assert_eq!(runner.calls().len(), 2);
    }

    #[test]
    fn secrets_are_disclosed_and_removed_at_finalize() {
        let temp = tempfile::tempdir().expect("tempdir");
        let log = RunLog::console_only();
        let runner = ScriptedCommandRunner::new();
        let executor = Executor::new(&runner, &log, 1024);

        let mut run = Run::begin(&executor, Vec::new(), SecretStore::new(temp.path(), None), None);
        let path = run
            .secrets_mut()
            .store("admin", "admin password", "pw")
            .expect("store");
        run.succeed().expect("succeed");
        let finalized = run.finalize().expect("finalize");

        assert_eq!(finalized.secrets.len(), 1);
        assert!(!path.exists());
    }

    #[test]
    fn secrets_survive_drop_path() {
        let temp = tempfile::tempdir().expect("tempdir");
        let log = RunLog::console_only();
        let runner = ScriptedCommandRunner::new();
        let executor = Executor::new(&runner, &log, 1024);

        let path = {
            let mut run =
                Run::begin(&executor, Vec::new(), SecretStore::new(temp.path(), None), None);
            run.secrets_mut()
                .store("admin", "admin password", "pw")
                .expect("store")
        };
        assert!(path.exists());
    }

    #[test]
    fn report_json_omits_secrets() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join("out").join("report.json");
        let report = RunReport {
            outcome: RunPhase::Aborted,
            exit_status: 17,
            failed_step: Some("build".to_string()),
            started_at: "2026-01-01T00:00:00.000Z".to_string(),
            finished_at: "2026-01-01T00:00:01.000Z".to_string(),
            log_path: None,
            steps: Vec::new(),
            cleanup_failures: Vec::new(),
            secrets: vec![DisclosedSecret {
                label: "pw".to_string(),
                value: "hunter2".to_string(),
            }],
        };
        report.write_json(&path).expect("write");

        let raw = fs::read_to_string(&path).expect("read");
        assert!(!raw.contains("hunter2"));
        let value: serde_json::Value = serde_json::from_str(&raw).expect("json");
        assert_eq!(value["outcome"], "aborted");
        assert_eq!(value["exit_status"], 17);
        assert_eq!(value["failed_step"], "build");
    }
}
