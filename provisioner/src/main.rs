//! `provision`: run a declarative provisioning plan step by step.

use std::path::{Path, PathBuf};
use std::process;

use anyhow::Result;
use clap::{Parser, Subcommand};

use provision::exit_codes;
use provision::io::checks::CheckResult;
use provision::io::executor::SystemCommandRunner;
use provision::io::lock::LockHeldError;
use provision::io::plan::Plan;
use provision::io::preflight::{PreflightError, SystemHost};
use provision::io::secrets::DisclosedSecret;
use provision::io::signals::Interrupt;
use provision::logging;
use provision::orchestrate::{ProvisionOptions, plan_status, provision};
use provision::run::RunReport;

#[derive(Parser)]
#[command(
    name = "provision",
    version,
    about = "Fail-fast, idempotent provisioning step orchestrator"
)]
struct Cli {
    /// Enable debug output on the console.
    #[arg(short, long, global = true)]
    verbose: bool,
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run every step of the plan in order.
    Run {
        #[arg(long)]
        plan: PathBuf,
        /// Skip root, disk space and network checks.
        #[arg(long)]
        skip_preflight: bool,
    },
    /// Load the plan and check its invariants without running anything.
    Validate {
        #[arg(long)]
        plan: PathBuf,
    },
    /// Print the steps in execution order.
    List {
        #[arg(long)]
        plan: PathBuf,
    },
    /// Report which steps would run (evaluates preconditions only).
    Status {
        #[arg(long)]
        plan: PathBuf,
    },
}

fn main() {
    let cli = Cli::parse();
    logging::init(cli.verbose);
    match run(cli.command) {
        Ok(code) => process::exit(code),
        Err(err) => {
            eprintln!("{:#}", err);
            process::exit(exit_code_for(&err));
        }
    }
}

fn run(command: Command) -> Result<i32> {
    match command {
        Command::Run {
            plan,
            skip_preflight,
        } => cmd_run(&plan, skip_preflight),
        Command::Validate { plan } => {
            let loaded = load(&plan)?;
            println!("plan ok: {} step(s)", loaded.steps.len());
            Ok(exit_codes::OK)
        }
        Command::List { plan } => {
            for (index, step) in load(&plan)?.steps.iter().enumerate() {
                println!("{:>3}. {} ({})", index + 1, step.name, step.severity.as_str());
            }
            Ok(exit_codes::OK)
        }
        Command::Status { plan } => cmd_status(&plan),
    }
}

fn load(path: &Path) -> Result<Plan> {
    Plan::load(path, |key| std::env::var(key).ok())
}

fn cmd_run(path: &Path, skip_preflight: bool) -> Result<i32> {
    let plan = load(path)?;
    let interrupt = Interrupt::install()?;
    let report = provision(
        &plan,
        &SystemCommandRunner,
        &SystemHost,
        interrupt,
        &ProvisionOptions { skip_preflight },
    )?;
    print_outcome(&plan, &report);
    Ok(report.exit_status)
}

/// Final operator-facing output: secrets first, then the summary or the
/// failing step.
fn print_outcome(plan: &Plan, report: &RunReport) {
    print_secrets(&report.secrets);
    if report.succeeded() {
        for line in &plan.summary {
            println!("{line}");
        }
        return;
    }
    if let Some(log_path) = &report.log_path {
        eprintln!("see {} for details", log_path.display());
    }
    match &report.failed_step {
        Some(step) => eprintln!(
            "step '{step}' failed; exiting with status {}",
            report.exit_status
        ),
        None => eprintln!("run aborted; exiting with status {}", report.exit_status),
    }
}

fn print_secrets(secrets: &[DisclosedSecret]) {
    for secret in secrets {
        println!("{}: {}", secret.label, secret.value);
    }
}

fn cmd_status(path: &Path) -> Result<i32> {
    let plan = load(path)?;
    for status in plan_status(&plan, &SystemCommandRunner) {
        let (state, detail) = match &status.precondition {
            None => ("pending", "no precondition".to_string()),
            Some(CheckResult::Satisfied) => ("satisfied", String::new()),
            Some(CheckResult::Unsatisfied(reason)) => ("pending", reason.clone()),
            Some(CheckResult::Unknown(reason)) => ("unknown", reason.clone()),
        };
        if detail.is_empty() {
            println!("{state:<10} {}", status.name);
        } else {
            println!("{state:<10} {} ({detail})", status.name);
        }
    }
    Ok(exit_codes::OK)
}

fn exit_code_for(err: &anyhow::Error) -> i32 {
    if err.downcast_ref::<PreflightError>().is_some() {
        exit_codes::PREFLIGHT
    } else if err.downcast_ref::<LockHeldError>().is_some() {
        exit_codes::LOCKED
    } else {
        exit_codes::INVALID
    }
}
