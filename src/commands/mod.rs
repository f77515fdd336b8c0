//! Subcommand implementations and their shared setup and reporting.
pub mod apply;
pub mod detect;
pub mod plan;
pub mod version;

use std::sync::Arc;

use anyhow::{Context as _, Result};
use serde::Serialize;

use crate::cli::GlobalOpts;
use crate::config::{self, Config, validation};
use crate::context::Context;
use crate::logging::{Log, Logger};
use crate::plugins::{BuiltinLoader, Orchestrator, RunReport};
use crate::tasks::TaskResult;

/// Shared state produced by the common command setup sequence.
///
/// Encapsulates configuration loading, plugin selection and platform
/// detection so that each command does not have to repeat the boilerplate.
#[derive(Debug)]
pub struct CommandSetup {
    /// Selected configuration.
    pub config: Config,
    /// Detected platform with real process execution.
    pub ctx: Context,
}

impl CommandSetup {
    /// Load the configuration, apply `--only`, and detect the platform.
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration cannot be loaded or `only`
    /// names an unknown plugin.
    pub fn init(global: &GlobalOpts, only: &[String], log: &Arc<Logger>) -> Result<Self> {
        let path = config::resolve_path(global.config.as_deref());

        log.stage("Loading configuration");
        let config = Config::load(&path)?.select(only)?;
        log.info(&format!(
            "loaded {} plugin(s) from {}",
            config.plugins.len(),
            path.display()
        ));

        let ctx = Context::detect(Arc::clone(log) as Arc<dyn Log>);
        log.info(&format!(
            "platform: {} ({})",
            ctx.platform.os,
            ctx.platform
                .package_manager
                .map_or_else(|| "no package manager".to_string(), |pm| pm.to_string())
        ));
        log.debug(&format!("elevate: {}", ctx.platform.elevate));

        let warnings = validation::validate_all(&config, &ctx.platform);
        if !warnings.is_empty() {
            log.warn(&format!(
                "found {} configuration warning(s):",
                warnings.len()
            ));
            for warning in &warnings {
                log.warn(&format!("  [{}]: {}", warning.plugin, warning.message));
            }
        }

        Ok(Self { config, ctx })
    }

    /// Load every plugin with the built-in loader and order them.
    ///
    /// # Errors
    ///
    /// Returns an error if a plugin cannot be loaded or the plugin graph is
    /// invalid.
    pub fn into_orchestrator(self) -> Result<Orchestrator> {
        Ok(Orchestrator::from_config(
            self.config,
            &BuiltinLoader,
            self.ctx,
        )?)
    }
}

/// Print `value` as pretty JSON on stdout.
///
/// # Errors
///
/// Returns an error if `value` cannot be serialized.
#[allow(clippy::print_stdout)]
pub fn print_json<T: Serialize>(value: &T) -> Result<()> {
    let json = serde_json::to_string_pretty(value).context("serializing report")?;
    println!("{json}");
    Ok(())
}

const fn icon(ok: bool) -> &'static str {
    if ok { "✓" } else { "✗" }
}

const fn task_icon(result: &TaskResult) -> &'static str {
    if result.is_dependency_failure() {
        "-"
    } else {
        icon(result.is_success())
    }
}

/// Human-readable summary lines for a full run.
#[must_use]
pub fn summary_lines(report: &RunReport) -> Vec<String> {
    let mut lines = Vec::new();

    if !report.tasks.is_empty() {
        lines.push("System tasks:".to_string());
        for entry in report.tasks.iter() {
            lines.push(format!(
                "  {} {} ({})",
                task_icon(&entry.result),
                entry.id,
                entry.result
            ));
        }
    }

    lines.push("Plugins:".to_string());
    for apply in &report.apply {
        let validate = report.validate.iter().find(|v| v.id == apply.id);
        let register = report.register.iter().find(|r| r.id == apply.id);
        let problem = if apply.ok {
            register
                .filter(|r| !r.ok)
                .map(|r| r.message.as_deref())
                .or_else(|| validate.filter(|v| !v.ok).map(|v| v.message.as_deref()))
        } else {
            Some(apply.details.as_deref())
        };
        let (ok, state, details) = match problem {
            Some(details) => (false, "failed", details),
            None if apply.did_change => (true, "changed", apply.details.as_deref()),
            None => (true, "unchanged", apply.details.as_deref()),
        };
        let head = format!("  {} {} [{}] {state}", icon(ok), apply.id, apply.category);
        lines.push(match details {
            Some(details) => format!("{head}: {details}"),
            None => head,
        });
    }

    lines
}

/// Number of failed tasks plus plugins with any failed phase.
#[must_use]
pub fn failure_count(report: &RunReport) -> usize {
    let plugins = report
        .apply
        .iter()
        .filter(|a| {
            !a.ok
                || report.validate.iter().any(|v| v.id == a.id && !v.ok)
                || report.register.iter().any(|r| r.id == a.id && !r.ok)
        })
        .count();
    report.tasks.failures().count() + plugins
}

/// Log the summary and the log file location.
pub fn print_summary(report: &RunReport, log: &Logger) {
    log.stage("Summary");
    for line in summary_lines(report) {
        log.info(&line);
    }
    if let Some(path) = log.log_path() {
        log.info(&format!("log: {}", path.display()));
    }
}

#[cfg(test)]
#[allow(clippy::expect_used, clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::config::Category;
    use crate::plugins::orchestrator::{ApplySummary, RegisterSummary, ValidateSummary};

    fn report() -> RunReport {
        RunReport {
            register: vec![RegisterSummary {
                id: "node".to_string(),
                category: Category::Language,
                ok: true,
                registered: 2,
                message: None,
            }],
            apply: vec![
                ApplySummary {
                    id: "node".to_string(),
                    category: Category::Language,
                    ok: true,
                    did_change: true,
                    details: Some("installed v20.11.0".to_string()),
                },
                ApplySummary {
                    id: "go".to_string(),
                    category: Category::Sdk,
                    ok: true,
                    did_change: false,
                    details: None,
                },
            ],
            validate: vec![ValidateSummary {
                id: "go".to_string(),
                category: Category::Sdk,
                ok: false,
                message: Some("go: not found".to_string()),
            }],
            ..RunReport::default()
        }
    }

    #[test]
    fn summary_marks_validation_failures() {
        insta::assert_snapshot!(summary_lines(&report()).join("\n"), @r"
        Plugins:
          ✓ node [language] changed: installed v20.11.0
          ✗ go [sdk] failed: go: not found
        ");
    }

    #[test]
    fn failure_count_counts_plugins_once() {
        assert_eq!(failure_count(&report()), 1);
        assert_eq!(failure_count(&RunReport::default()), 0);
    }
}
