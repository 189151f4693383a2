//! End-to-end provisioning: preflight, lock, steps, finalization.

use std::time::Duration;

use anyhow::Result;
use chrono::{SecondsFormat, Utc};

use crate::core::types::Severity;
use crate::exit_codes;
use crate::io::checks::{CheckResult, evaluate};
use crate::io::executor::{CommandRunner, Executor};
use crate::io::lock::RunLock;
use crate::io::plan::Plan;
use crate::io::preflight::{HostProbe, run_preflight};
use crate::io::run_log::RunLog;
use crate::io::secrets::SecretStore;
use crate::io::signals::Interrupt;
use crate::run::{Run, RunReport};
use crate::step::StepRunner;

#[derive(Debug, Clone, Default)]
pub struct ProvisionOptions {
    /// Skip the root/disk/network checks.
    pub skip_preflight: bool,
}

/// Execute `plan` once.
///
/// Preflight failures return [`PreflightError`](crate::io::preflight::PreflightError)
/// and a held lock returns [`LockHeldError`](crate::io::lock::LockHeldError);
/// in both cases no step runs. Once the run has begun, every outcome is
/// reported through the returned [`RunReport`].
pub fn provision<R: CommandRunner, H: HostProbe>(
    plan: &Plan,
    runner: &R,
    host: &H,
    interrupt: Interrupt,
    options: &ProvisionOptions,
) -> Result<RunReport> {
    let settings = &plan.context.settings;
    let log = RunLog::open(&settings.log_path);

    if options.skip_preflight {
        log.warn("preflight checks skipped");
    } else if let Err(err) = run_preflight(&settings.preflight, host) {
        for failure in &err.failures {
            log.error(&format!("preflight: {failure}"));
        }
        return Err(err.into());
    }

    let _lock = match RunLock::acquire(&settings.lock_path) {
        Ok(lock) => lock,
        Err(err) => {
            log.error(&format!("{err:#}"));
            return Err(err);
        }
    };

    let started_at = now();
    let executor = Executor::new(runner, &log, settings.output_limit_bytes);
    let cleanup_timeout = match settings.command_timeout_secs {
        0 => None,
        secs => Some(Duration::from_secs(secs)),
    };
    let mut run = Run::begin(
        &executor,
        plan.cleanup.clone(),
        SecretStore::new(&settings.secret_dir, settings.service_user.clone()),
        cleanup_timeout,
    );

    let steps = StepRunner::new(&executor, interrupt, settings.command_timeout_secs);
    let records = steps.run_all(&plan.steps, run.secrets_mut());

    let fatal = records.last().and_then(|record| {
        record
            .outcome
            .fatal_status()
            .map(|status| (record.name.clone(), status))
    });
    let failed_step = match fatal {
        Some((name, status)) => {
            log.error(&format!("step '{name}' failed; exiting with status {status}"));
            run.abort(status)?;
            Some(name)
        }
        None => match interrupt.pending() {
            Some(signal) => {
                log.error(&format!("interrupted by signal {signal} after the last step"));
                run.abort(exit_codes::from_signal(signal))?;
                None
            }
            None => {
                run.succeed()?;
                None
            }
        },
    };

    let finalized = run.finalize()?;
    let report = RunReport {
        outcome: finalized.outcome,
        exit_status: finalized.exit_status,
        failed_step,
        started_at,
        finished_at: now(),
        log_path: log.path(),
        steps: records,
        cleanup_failures: finalized.cleanup_failures,
        secrets: finalized.secrets,
    };
    if let Some(path) = &settings.report_path
        && let Err(err) = report.write_json(path)
    {
        log.warn(&format!("could not write run report: {err:#}"));
    }
    Ok(report)
}

/// Precondition state of one step, as seen by a dry run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StepStatus {
    pub name: String,
    pub severity: Severity,
    /// `None` when the step declares no precondition (it always runs).
    pub precondition: Option<CheckResult>,
}

impl StepStatus {
    pub fn would_run(&self) -> bool {
        !self
            .precondition
            .as_ref()
            .is_some_and(CheckResult::is_satisfied)
    }
}

/// Evaluate every step's precondition without mutating anything.
pub fn plan_status<R: CommandRunner>(plan: &Plan, runner: &R) -> Vec<StepStatus> {
    let settings = &plan.context.settings;
    let log = RunLog::console_only();
    let executor = Executor::new(runner, &log, settings.output_limit_bytes);
    plan.steps
        .iter()
        .map(|step| StepStatus {
            name: step.name.clone(),
            severity: step.severity,
            precondition: step.precondition.as_ref().map(|check| {
                evaluate(check, &executor, step.command_timeout(settings.command_timeout_secs))
            }),
        })
        .collect()
}

fn now() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true)
}
