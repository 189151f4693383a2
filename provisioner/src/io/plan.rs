//! Plan file loading.
//!
//! A plan is a TOML document declaring settings, layout, template variables,
//! the ordered step list, cleanup handlers and the access summary. Loading
//! renders every template once and checks plan invariants, so the returned
//! [`Plan`] is immutable for the rest of the run.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};
use serde::Deserialize;
use tracing::debug;

use crate::core::invariants::validate_plan;
use crate::core::types::{Check, CleanupAction, ExecSpec, FileSpec, Operation, Step};
use crate::io::config::{Layout, RunContext, Settings};
use crate::io::template::Renderer;

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct PlanFile {
    #[serde(default)]
    settings: Settings,
    #[serde(default)]
    layout: Layout,
    #[serde(default)]
    vars: BTreeMap<String, toml::Value>,
    #[serde(default)]
    steps: Vec<Step>,
    #[serde(default)]
    cleanup: Vec<CleanupAction>,
    #[serde(default)]
    summary: SummaryDef,
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct SummaryDef {
    #[serde(default)]
    lines: Vec<String>,
}

/// A rendered, validated plan.
#[derive(Debug, Clone)]
pub struct Plan {
    pub context: RunContext,
    pub steps: Vec<Step>,
    pub cleanup: Vec<CleanupAction>,
    /// Access summary shown after a successful run.
    pub summary: Vec<String>,
}

impl Plan {
    /// Read and resolve a plan file. `env` supplies layout overrides.
    pub fn load<F>(path: &Path, env: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let contents =
            fs::read_to_string(path).with_context(|| format!("read plan {}", path.display()))?;
        Self::parse(&contents, env).with_context(|| format!("load plan {}", path.display()))
    }

    pub fn parse<F>(contents: &str, env: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let file: PlanFile = toml::from_str(contents).context("parse plan toml")?;
        file.settings.validate()?;

        let context = RunContext {
            settings: file.settings,
            layout: file.layout.with_env(env),
        };
        let renderer = Renderer::new(&context, &file.vars);

        let steps = file
            .steps
            .into_iter()
            .map(|step| {
                let name = step.name.clone();
                render_step(&renderer, step).with_context(|| format!("step '{name}'"))
            })
            .collect::<Result<Vec<_>>>()?;
        let cleanup = file
            .cleanup
            .into_iter()
            .map(|action| render_cleanup(&renderer, action))
            .collect::<Result<Vec<_>>>()
            .context("cleanup")?;
        let summary = renderer
            .render_all(&file.summary.lines)
            .context("summary")?;

        let errors = validate_plan(&steps, &cleanup);
        if !errors.is_empty() {
            bail!("invalid plan:\n- {}", errors.join("\n- "));
        }

        debug!(
            steps = steps.len(),
            cleanup = cleanup.len(),
            "plan loaded"
        );
        Ok(Self {
            context,
            steps,
            cleanup,
            summary,
        })
    }
}

fn render_path(r: &Renderer, path: &Path) -> Result<PathBuf> {
    Ok(PathBuf::from(r.render(&path.to_string_lossy())?))
}

fn render_step(r: &Renderer, step: Step) -> Result<Step> {
    Ok(Step {
        precondition: step
            .precondition
            .map(|c| render_check(r, c))
            .transpose()
            .context("precondition")?,
        action: step
            .action
            .into_iter()
            .map(|op| render_operation(r, op))
            .collect::<Result<Vec<_>>>()
            .context("action")?,
        postcondition: step
            .postcondition
            .map(|c| render_check(r, c))
            .transpose()
            .context("postcondition")?,
        ..step
    })
}

fn render_operation(r: &Renderer, op: Operation) -> Result<Operation> {
    Ok(match op {
        Operation::Exec(spec) => Operation::Exec(ExecSpec {
            exec: r.render_all(&spec.exec)?,
            cwd: spec.cwd.map(|p| render_path(r, &p)).transpose()?,
            stdin: spec.stdin.map(|s| r.render(&s)).transpose()?,
            ..spec
        }),
        Operation::WriteFile(spec) => Operation::WriteFile(FileSpec {
            write_file: render_path(r, &spec.write_file)?,
            contents: r.render(&spec.contents)?,
            ..spec
        }),
    })
}

fn render_check(r: &Renderer, check: Check) -> Result<Check> {
    Ok(match check {
        Check::PathExists(path) => Check::PathExists(render_path(r, &path)?),
        Check::Command(argv) => Check::Command(r.render_all(&argv)?),
        Check::CommandOutput { argv, pattern } => Check::CommandOutput {
            argv: r.render_all(&argv)?,
            pattern,
        },
        Check::FileMatches { path, pattern } => Check::FileMatches {
            path: render_path(r, &path)?,
            pattern,
        },
        Check::UserExists(name) => Check::UserExists(r.render(&name)?),
        Check::All(checks) => Check::All(
            checks
                .into_iter()
                .map(|c| render_check(r, c))
                .collect::<Result<Vec<_>>>()?,
        ),
    })
}

fn render_cleanup(r: &Renderer, action: CleanupAction) -> Result<CleanupAction> {
    Ok(match action {
        CleanupAction::RemovePath(path) => CleanupAction::RemovePath(render_path(r, &path)?),
        CleanupAction::Command(argv) => CleanupAction::Command(r.render_all(&argv)?),
    })
}
