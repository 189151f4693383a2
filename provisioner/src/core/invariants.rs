//! Plan invariants not expressible in the TOML shape alone.

use std::collections::HashSet;

use regex::Regex;

use crate::core::types::{Check, CleanupAction, Operation, Step};

/// Check semantic invariants of a rendered plan:
/// - At least one step
/// - Unique, non-empty step names
/// - Every step has at least one operation
/// - Every argv is non-empty with a non-blank program
/// - Every regex compiles; capture patterns have a capture group
/// - Capture needs a command, and at most one command is flagged `capture`
pub fn validate_plan(steps: &[Step], cleanup: &[CleanupAction]) -> Vec<String> {
    let mut errors = Vec::new();
    if steps.is_empty() {
        errors.push("plan declares no steps".to_string());
    }

    let mut seen = HashSet::new();
    for (index, step) in steps.iter().enumerate() {
        let label = if step.name.trim().is_empty() {
            errors.push(format!("step #{}: name must not be empty", index + 1));
            format!("step #{}", index + 1)
        } else {
            step.name.clone()
        };
        if !seen.insert(step.name.as_str()) {
            errors.push(format!("duplicate step name '{}'", step.name));
        }
        validate_step(step, &label, &mut errors);
    }

    for (index, action) in cleanup.iter().enumerate() {
        if let CleanupAction::Command(argv) = action {
            validate_argv(argv, &format!("cleanup #{}", index + 1), &mut errors);
        }
    }
    errors
}

fn validate_step(step: &Step, label: &str, errors: &mut Vec<String>) {
    if step.action.is_empty() {
        errors.push(format!("{label}: action must contain at least one operation"));
    }
    for op in &step.action {
        if let Operation::Exec(spec) = op {
            validate_argv(&spec.exec, &format!("{label}: action"), errors);
        }
    }
    if let Some(check) = &step.precondition {
        validate_check(check, &format!("{label}: precondition"), errors);
    }
    if let Some(check) = &step.postcondition {
        validate_check(check, &format!("{label}: postcondition"), errors);
    }

    let flagged = step
        .action
        .iter()
        .filter(|op| matches!(op, Operation::Exec(spec) if spec.capture))
        .count();
    match &step.capture {
        Some(capture) => {
            if flagged > 1 {
                errors.push(format!("{label}: at most one command may be flagged capture"));
            }
            if step.capture_index().is_none() {
                errors.push(format!("{label}: capture requires a command in the action"));
            }
            match Regex::new(&capture.pattern) {
                Ok(re) if re.captures_len() < 2 => errors.push(format!(
                    "{label}: capture pattern must contain a capture group"
                )),
                Ok(_) => {}
                Err(err) => errors.push(format!("{label}: invalid capture pattern: {err}")),
            }
        }
        None => {
            if flagged > 0 {
                errors.push(format!(
                    "{label}: command flagged capture but step has no capture"
                ));
            }
        }
    }
}

fn validate_check(check: &Check, label: &str, errors: &mut Vec<String>) {
    match check {
        Check::PathExists(_) | Check::UserExists(_) => {}
        Check::Command(argv) => validate_argv(argv, label, errors),
        Check::CommandOutput { argv, pattern } => {
            validate_argv(argv, label, errors);
            validate_pattern(pattern, label, errors);
        }
        Check::FileMatches { pattern, .. } => validate_pattern(pattern, label, errors),
        Check::All(checks) => {
            if checks.is_empty() {
                errors.push(format!("{label}: all must contain at least one check"));
            }
            for nested in checks {
                validate_check(nested, label, errors);
            }
        }
    }
}

fn validate_argv(argv: &[String], label: &str, errors: &mut Vec<String>) {
    match argv.first() {
        Some(program) if !program.trim().is_empty() => {}
        _ => errors.push(format!("{label}: command must name a program")),
    }
}

fn validate_pattern(pattern: &str, label: &str, errors: &mut Vec<String>) {
    if let Err(err) = Regex::new(pattern) {
        errors.push(format!("{label}: invalid pattern: {err}"));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::types::{ExecSpec, SecretCapture, Severity};

    fn exec(argv: &[&str], capture: bool) -> Operation {
        Operation::Exec(ExecSpec {
            exec: argv.iter().map(|s| s.to_string()).collect(),
            cwd: None,
            stdin: None,
            optional: false,
            capture,
        })
    }

    fn step(name: &str, action: Vec<Operation>) -> Step {
        Step {
            name: name.to_string(),
            severity: Severity::Required,
            precondition: None,
            action,
            postcondition: None,
            capture: None,
            timeout_secs: None,
        }
    }

    #[test]
    fn valid_plan_has_no_errors() {
        let steps = vec![step("a", vec![exec(&["true"], false)])];
        assert!(validate_plan(&steps, &[]).is_empty());
    }

    #[test]
    fn reports_all_violations_together() {
        let mut capture_step = step("cap", vec![exec(&["x"], true), exec(&["y"], true)]);
        capture_step.capture = Some(SecretCapture {
            label: "pw".to_string(),
            pattern: "no-group".to_string(),
        });
        let mut bad_check = step("chk", vec![exec(&["true"], false)]);
        bad_check.postcondition = Some(Check::All(vec![Check::FileMatches {
            path: "/etc/hosts".into(),
            pattern: "(".to_string(),
        }]));
        let steps = vec![
            step("dup", vec![exec(&["true"], false)]),
            step("dup", vec![]),
            step("empty-argv", vec![exec(&[], false)]),
            capture_step,
            bad_check,
        ];
        let cleanup = vec![CleanupAction::Command(vec![" ".to_string()])];

        let errors = validate_plan(&steps, &cleanup);
        assert!(errors.iter().any(|e| e.contains("duplicate step name 'dup'")));
        assert!(errors.iter().any(|e| e.contains("at least one operation")));
        assert!(errors.iter().any(|e| e.starts_with("empty-argv")));
        assert!(errors.iter().any(|e| e.contains("at most one command")));
        assert!(errors.iter().any(|e| e.contains("capture group")));
        assert!(errors.iter().any(|e| e.starts_with("chk: postcondition")));
        assert!(errors.iter().any(|e| e.starts_with("cleanup #1")));
    }

    #[test]
    fn flagged_capture_without_step_capture_is_rejected() {
        let steps = vec![step("a", vec![exec(&["true"], true)])];
        let errors = validate_plan(&steps, &[]);
        assert_eq!(
            errors,
            vec!["a: command flagged capture but step has no capture".to_string()]
        );
    }

    #[test]
    fn empty_plan_is_rejected() {
        assert_eq!(validate_plan(&[], &[]), vec!["plan declares no steps"]);
    }
}
