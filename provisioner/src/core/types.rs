//! Shared deterministic types for the step model.
//!
//! Steps, checks and operations deserialize directly from the plan file. They
//! carry no behaviour beyond small accessors; evaluation lives in `io` and the
//! step runner.

use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// How a step's failure affects the run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    /// Failure aborts the whole run.
    #[default]
    Required,
    /// Failure is logged as a warning and the run continues.
    Optional,
}

impl Severity {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Required => "required",
            Self::Optional => "optional",
        }
    }
}

/// Run log severity.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Level {
    Info,
    Warn,
    Error,
}

impl Level {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Info => "INFO",
            Self::Warn => "WARN",
            Self::Error => "ERROR",
        }
    }
}

/// A named unit of provisioning work.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Step {
    pub name: String,
    #[serde(default)]
    pub severity: Severity,
    /// When satisfied, the action is skipped. Absent means "never satisfied".
    #[serde(default)]
    pub precondition: Option<Check>,
    pub action: Vec<Operation>,
    /// Checked after the action. Absent means "always passes".
    #[serde(default)]
    pub postcondition: Option<Check>,
    /// Extract a credential from the output of one of the action's commands.
    #[serde(default)]
    pub capture: Option<SecretCapture>,
    /// Per-command timeout override; `0` disables the timeout.
    #[serde(default)]
    pub timeout_secs: Option<u64>,
}

impl Step {
    /// Timeout for this step's commands given the run-wide default.
    pub fn command_timeout(&self, default_secs: u64) -> Option<Duration> {
        match self.timeout_secs.unwrap_or(default_secs) {
            0 => None,
            secs => Some(Duration::from_secs(secs)),
        }
    }

    /// Index of the operation whose stdout feeds the secret capture.
    ///
    /// An explicitly flagged command wins; otherwise the last command is used.
    pub fn capture_index(&self) -> Option<usize> {
        self.capture.as_ref()?;
        let flagged = self
            .action
            .iter()
            .position(|op| matches!(op, Operation::Exec(spec) if spec.capture));
        flagged.or_else(|| {
            self.action
                .iter()
                .rposition(|op| matches!(op, Operation::Exec(_)))
        })
    }
}

/// A pre/postcondition predicate.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", deny_unknown_fields)]
pub enum Check {
    /// The path exists (file, directory or symlink target).
    PathExists(PathBuf),
    /// The command exits 0.
    Command(Vec<String>),
    /// The command exits 0 and its stdout matches `pattern`.
    CommandOutput { argv: Vec<String>, pattern: String },
    /// The file exists and its contents match `pattern`.
    FileMatches { path: PathBuf, pattern: String },
    /// A system account with this name exists.
    UserExists(String),
    /// Every nested check is satisfied (evaluated in order, short-circuiting).
    All(Vec<Check>),
}

/// One mutating operation performed through the executor.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Operation {
    Exec(ExecSpec),
    WriteFile(FileSpec),
}

impl Operation {
    /// Whether a failure of this operation is tolerated as a warning.
    pub fn is_optional(&self) -> bool {
        match self {
            Self::Exec(spec) => spec.optional,
            Self::WriteFile(spec) => spec.optional,
        }
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Exec(spec) => f.write_str(&display_argv(&spec.exec)),
            Self::WriteFile(spec) => {
                write!(f, "write {} (mode {:04o})", spec.write_file.display(), spec.mode)
            }
        }
    }
}

/// External command invocation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ExecSpec {
    /// Program followed by its arguments.
    pub exec: Vec<String>,
    #[serde(default)]
    pub cwd: Option<PathBuf>,
    /// Text fed to the command's stdin.
    #[serde(default)]
    pub stdin: Option<String>,
    #[serde(default)]
    pub optional: bool,
    /// Marks this command as the source of the step's secret capture.
    #[serde(default)]
    pub capture: bool,
}

/// Rendered file written onto the live filesystem.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FileSpec {
    pub write_file: PathBuf,
    pub contents: String,
    #[serde(default = "default_file_mode")]
    pub mode: u32,
    #[serde(default)]
    pub optional: bool,
}

fn default_file_mode() -> u32 {
    0o644
}

/// Credential extraction from a command's stdout.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SecretCapture {
    /// Human label shown in the final summary.
    pub label: String,
    /// Regex whose first capture group is the secret.
    pub pattern: String,
}

/// A cleanup handler run once at finalization.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", deny_unknown_fields)]
pub enum CleanupAction {
    /// Remove a file or directory tree; a missing path counts as removed.
    RemovePath(PathBuf),
    /// Run a command.
    Command(Vec<String>),
}

impl fmt::Display for CleanupAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::RemovePath(path) => write!(f, "remove {}", path.display()),
            Self::Command(argv) => f.write_str(&display_argv(argv)),
        }
    }
}

/// Outcome of one external invocation. Not persisted beyond the log.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandResult {
    /// Display form of the command line.
    pub command: String,
    pub status: i32,
    pub success: bool,
    /// Captured stdout (lossy UTF-8), used for secret capture.
    pub stdout: String,
}

impl CommandResult {
    pub fn new(command: impl Into<String>, status: i32, stdout: impl Into<String>) -> Self {
        Self {
            command: command.into(),
            status,
            success: status == 0,
            stdout: stdout.into(),
        }
    }
}

/// Typed result of running one step.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum StepOutcome {
    /// Precondition already satisfied; no action was taken.
    Skipped,
    /// Action and postcondition succeeded; `warnings` counts tolerated failures.
    Succeeded { warnings: u32 },
    /// A required step failed; the run must terminate with `status`.
    RequiredFailure { status: i32 },
    /// An optional step failed; logged and the run continues.
    OptionalFailure { status: i32 },
    /// An external interrupt was observed during or before this step.
    Interrupted { signal: i32 },
}

impl StepOutcome {
    /// Exit status the run must terminate with, if this outcome is fatal.
    pub fn fatal_status(&self) -> Option<i32> {
        match self {
            Self::RequiredFailure { status } => Some(*status),
            Self::Interrupted { signal } => Some(crate::exit_codes::from_signal(*signal)),
            Self::Skipped | Self::Succeeded { .. } | Self::OptionalFailure { .. } => None,
        }
    }
}

/// Per-step record kept for the run report.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StepRecord {
    pub name: String,
    pub severity: Severity,
    #[serde(flatten)]
    pub outcome: StepOutcome,
    pub duration_ms: u64,
}

/// Shell-like display of an argument vector (quotes arguments with spaces).
pub fn display_argv(argv: &[String]) -> String {
    argv.iter()
        .map(|arg| {
            if arg.is_empty() || arg.contains(char::is_whitespace) {
                format!("'{}'", arg.replace('\'', "'\\''"))
            } else {
                arg.clone()
            }
        })
        .collect::<Vec<_>>()
        .join(" ")
}
