//! Evaluation of step pre/postconditions.
//!
//! Checks are read-only. A check that cannot be evaluated (spawn failure,
//! unreadable file, account database error) is [`CheckResult::Unknown`]; the
//! step runner treats that as "not satisfied" for preconditions and as a
//! failure for postconditions.

use std::fs;
use std::io::ErrorKind;
use std::time::Duration;

use nix::unistd::User;
use regex::Regex;

use crate::core::types::Check;
use crate::io::executor::{CommandRunner, Executor};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CheckResult {
    Satisfied,
    Unsatisfied(String),
    Unknown(String),
}

impl CheckResult {
    pub fn is_satisfied(&self) -> bool {
        matches!(self, Self::Satisfied)
    }
}

/// Evaluate `check`, running any check commands through `executor`'s runner.
pub fn evaluate<R: CommandRunner>(
    check: &Check,
    executor: &Executor<'_, R>,
    timeout: Option<Duration>,
) -> CheckResult {
    match check {
        Check::PathExists(path) => match fs::metadata(path) {
            Ok(_) => CheckResult::Satisfied,
            Err(err) if err.kind() == ErrorKind::NotFound => {
                CheckResult::Unsatisfied(format!("{} does not exist", path.display()))
            }
            Err(err) => CheckResult::Unknown(format!("stat {}: {err}", path.display())),
        },
        Check::Command(argv) => match executor.probe(argv, timeout) {
            Ok(out) if out.status == 0 => CheckResult::Satisfied,
            Ok(out) => CheckResult::Unsatisfied(format!(
                "`{}` exited with status {}",
                argv.join(" "),
                out.status
            )),
            Err(err) => CheckResult::Unknown(format!("{err:#}")),
        },
        Check::CommandOutput { argv, pattern } => {
            let re = match Regex::new(pattern) {
                Ok(re) => re,
                Err(err) => return CheckResult::Unknown(format!("invalid pattern: {err}")),
            };
            match executor.probe(argv, timeout) {
                Ok(out) if out.status != 0 => CheckResult::Unsatisfied(format!(
                    "`{}` exited with status {}",
                    argv.join(" "),
                    out.status
                )),
                Ok(out) => {
                    if re.is_match(&String::from_utf8_lossy(&out.stdout)) {
                        CheckResult::Satisfied
                    } else {
                        CheckResult::Unsatisfied(format!(
                            "output of `{}` does not match /{pattern}/",
                            argv.join(" ")
                        ))
                    }
                }
                Err(err) => CheckResult::Unknown(format!("{err:#}")),
            }
        }
        Check::FileMatches { path, pattern } => {
            let re = match Regex::new(pattern) {
                Ok(re) => re,
                Err(err) => return CheckResult::Unknown(format!("invalid pattern: {err}")),
            };
            match fs::read_to_string(path) {
                Ok(contents) if re.is_match(&contents) => CheckResult::Satisfied,
                Ok(_) => CheckResult::Unsatisfied(format!(
                    "{} does not match /{pattern}/",
                    path.display()
                )),
                Err(err) if err.kind() == ErrorKind::NotFound => {
                    CheckResult::Unsatisfied(format!("{} does not exist", path.display()))
                }
                Err(err) => CheckResult::Unknown(format!("read {}: {err}", path.display())),
            }
        }
        Check::UserExists(name) => match User::from_name(name) {
            Ok(Some(_)) => CheckResult::Satisfied,
            Ok(None) => CheckResult::Unsatisfied(format!("user {name} does not exist")),
            Err(err) => CheckResult::Unknown(format!("look up user {name}: {err}")),
        },
        Check::All(checks) => {
            for nested in checks {
                let result = evaluate(nested, executor, timeout);
                if !result.is_satisfied() {
                    return result;
                }
            }
            CheckResult::Satisfied
        }
    }
}
