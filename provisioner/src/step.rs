//! The step runner: interprets an ordered step list against the executor.

use std::time::Instant;

use tracing::{debug, instrument};

use crate::core::types::{Severity, Step, StepOutcome, StepRecord};
use crate::exit_codes;
use crate::io::checks::{CheckResult, evaluate};
use crate::io::executor::{CommandRunner, Executor};
use crate::io::secrets::{SecretStore, extract};
use crate::io::signals::Interrupt;

/// Runs steps one at a time, in declared order.
pub struct StepRunner<'a, R: CommandRunner> {
    executor: &'a Executor<'a, R>,
    interrupt: Interrupt,
    default_timeout_secs: u64,
}

impl<'a, R: CommandRunner> StepRunner<'a, R> {
    pub fn new(executor: &'a Executor<'a, R>, interrupt: Interrupt, default_timeout_secs: u64) -> Self {
        Self {
            executor,
            interrupt,
            default_timeout_secs,
        }
    }

    /// Run `steps` until the list is exhausted or an outcome is fatal.
    ///
    /// The returned records end with the fatal step, if there was one.
    pub fn run_all(&self, steps: &[Step], secrets: &mut SecretStore) -> Vec<StepRecord> {
        let mut records = Vec::with_capacity(steps.len());
        for step in steps {
            let start = Instant::now();
            let outcome = self.run_step(step, secrets);
            records.push(StepRecord {
                name: step.name.clone(),
                severity: step.severity,
                outcome,
                duration_ms: u64::try_from(start.elapsed().as_millis()).unwrap_or(u64::MAX),
            });
            if outcome.fatal_status().is_some() {
                break;
            }
        }
        records
    }

    /// Run a single step: precondition, action, capture, postcondition.
    #[instrument(skip_all, fields(step = %step.name))]
    pub fn run_step(&self, step: &Step, secrets: &mut SecretStore) -> StepOutcome {
        let log = self.executor.log();
        let name = &step.name;
        if let Some(signal) = self.interrupt.pending() {
            return self.interrupted(step, signal);
        }
        let timeout = step.command_timeout(self.default_timeout_secs);

        if let Some(check) = &step.precondition {
            match evaluate(check, self.executor, timeout) {
                CheckResult::Satisfied => {
                    log.info(&format!("{name}: already satisfied, skipping"));
                    return StepOutcome::Skipped;
                }
                CheckResult::Unsatisfied(reason) => {
                    debug!(%reason, "precondition not satisfied");
                }
                CheckResult::Unknown(reason) => {
                    log.warn(&format!(
                        "{name}: precondition could not be evaluated ({reason}), running action"
                    ));
                }
            }
            // A signal delivered during the precondition must not let the action start.
            if let Some(signal) = self.interrupt.pending() {
                return self.interrupted(step, signal);
            }
        }

        log.info(&format!("{name}: starting ({} step)", step.severity.as_str()));
        let capture_index = step.capture_index();
        let mut capture_source = None;
        let mut warnings = 0u32;
        for (index, op) in step.action.iter().enumerate() {
            let tolerated = op.is_optional() || step.severity == Severity::Optional;
            let result = self.executor.execute(op, timeout, tolerated);
            if let Some(signal) = self.interrupt.pending() {
                return self.interrupted(step, signal);
            }
            if !result.success {
                if op.is_optional() {
                    warnings += 1;
                    continue;
                }
                return self.failed(step, result.status);
            }
            if capture_index == Some(index) {
                capture_source = Some(result.stdout);
            }
        }

        if let Some(capture) = &step.capture {
            let stdout = capture_source.unwrap_or_default();
            let stored = extract(&capture.pattern, &stdout).and_then(|value| {
                value
                    .map(|value| secrets.store(name, &capture.label, &value))
                    .transpose()
            });
            match stored {
                Ok(Some(path)) => log.info(&format!(
                    "{name}: captured secret '{}' into {}",
                    capture.label,
                    path.display()
                )),
                Ok(None) => {
                    log.error(&format!(
                        "{name}: secret '{}' not found in command output",
                        capture.label
                    ));
                    return StepOutcome::RequiredFailure {
                        status: exit_codes::INVALID,
                    };
                }
                Err(err) => {
                    log.error(&format!(
                        "{name}: could not capture secret '{}': {err:#}",
                        capture.label
                    ));
                    return StepOutcome::RequiredFailure {
                        status: exit_codes::INVALID,
                    };
                }
            }
        }

        if let Some(check) = &step.postcondition {
            let reason = match evaluate(check, self.executor, timeout) {
                CheckResult::Satisfied => None,
                CheckResult::Unsatisfied(reason) => Some(reason),
                CheckResult::Unknown(reason) => Some(format!("could not be evaluated: {reason}")),
            };
            if let Some(reason) = reason {
                let status = exit_codes::INVALID;
                return match step.severity {
                    Severity::Required => {
                        log.error(&format!("{name}: postcondition failed: {reason}"));
                        StepOutcome::RequiredFailure { status }
                    }
                    Severity::Optional => {
                        log.warn(&format!(
                            "{name}: postcondition failed: {reason} (optional step, continuing)"
                        ));
                        StepOutcome::OptionalFailure { status }
                    }
                };
            }
        }

        if warnings == 0 {
            log.info(&format!("{name}: completed"));
        } else {
            log.info(&format!("{name}: completed with {warnings} warning(s)"));
        }
        StepOutcome::Succeeded { warnings }
    }

    // The executor has already logged the failing command at its level.
    fn failed(&self, step: &Step, status: i32) -> StepOutcome {
        let log = self.executor.log();
        match step.severity {
            Severity::Required => {
                log.error(&format!("{}: required step failed with status {status}", step.name));
                StepOutcome::RequiredFailure { status }
            }
            Severity::Optional => {
                log.info(&format!(
                    "{}: optional step failed with status {status}, continuing",
                    step.name
                ));
                StepOutcome::OptionalFailure { status }
            }
        }
    }

    fn interrupted(&self, step: &Step, signal: i32) -> StepOutcome {
        self.executor
            .log()
            .error(&format!("{}: interrupted by signal {signal}", step.name));
        StepOutcome::Interrupted { signal }
    }
}
