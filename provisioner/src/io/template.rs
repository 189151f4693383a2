//! Template rendering for plan values.
//!
//! Command arguments, paths, file contents and summary lines may reference
//! `layout.*`, `settings.*` and `vars.*`. Rendering is strict: an undefined
//! variable is an error rather than an empty string.

use std::collections::BTreeMap;

use anyhow::{Context, Result};
use minijinja::{Environment, UndefinedBehavior, Value, context};

use crate::io::config::RunContext;

/// Template engine wrapper around minijinja.
pub struct Renderer {
    env: Environment<'static>,
    ctx: Value,
}

impl Renderer {
    pub fn new(run: &RunContext, vars: &BTreeMap<String, toml::Value>) -> Self {
        let mut env = Environment::new();
        env.set_undefined_behavior(UndefinedBehavior::Strict);
        // Unit files and config snippets must keep their final newline.
        env.set_keep_trailing_newline(true);
        let ctx = context! {
            layout => &run.layout,
            settings => &run.settings,
            vars => vars,
        };
        Self { env, ctx }
    }

    pub fn render(&self, source: &str) -> Result<String> {
        self.env
            .render_str(source, &self.ctx)
            .with_context(|| format!("render template '{}'", preview(source)))
    }

    pub fn render_all(&self, sources: &[String]) -> Result<Vec<String>> {
        sources.iter().map(|s| self.render(s)).collect()
    }
}

fn preview(source: &str) -> String {
    const MAX: usize = 60;
    let first_line = source.lines().next().unwrap_or_default();
    if first_line.chars().count() > MAX {
        let cut: String = first_line.chars().take(MAX).collect();
        format!("{cut}...")
    } else {
        first_line.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::io::config::{Layout, Settings};

    fn renderer(vars: &[(&str, &str)]) -> Renderer {
        let run = RunContext {
            settings: Settings::default(),
            layout: Layout::default(),
        };
        let vars = vars
            .iter()
            .map(|(k, v)| (k.to_string(), toml::Value::String(v.to_string())))
            .collect();
        Renderer::new(&run, &vars)
    }

    #[test]
    fn renders_layout_and_vars() {
        let r = renderer(&[("version", "22.4.1")]);
        let out = r
            .render("{{ layout.source_dir }}/gvm-libs-{{ vars.version }}.tar.gz")
            .expect("render");
        assert_eq!(out, "/var/tmp/provision/source/gvm-libs-22.4.1.tar.gz");
    }

    #[test]
    fn keeps_trailing_newline() {
        let r = renderer(&[]);
        assert_eq!(r.render("[Unit]\n").expect("render"), "[Unit]\n");
    }

    #[test]
    fn undefined_variable_is_an_error() {
        let r = renderer(&[]);
        let err = r.render("{{ vars.missing }}").unwrap_err();
        assert!(format!("{err:#}").contains("render template"));
    }

    #[test]
    fn plain_text_passes_through() {
        let r = renderer(&[]);
        assert_eq!(
            r.render("ExecStart=/usr/sbin/gvmd -f %i").expect("render"),
            "ExecStart=/usr/sbin/gvmd -f %i"
        );
    }
}
