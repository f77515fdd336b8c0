//! Built-in plugin for a tool with its own check and install commands.
//!
//! ```toml
//! [[plugins]]
//! id = "node"
//! uses = "tool"
//! category = "language"
//! [plugins.options]
//! check = ["node", "--version"]
//! requires = ["nodejs", "npm"]
//! timeout_secs = 600
//! ```
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use serde::Deserialize;

use super::{
    ApplyHook, ApplyOutcome, DetectHook, DetectOutcome, Lifecycle, RegisterTasksHook,
    ValidateHook, ValidateOutcome, parse_options,
};
use crate::config::PluginInstance;
use crate::context::Context;
use crate::error::ConfigError;
use crate::exec::{ExecResult, RunOptions, display_command};
use crate::tasks::TaskRegistry;
use crate::tasks::helpers::register_packages;

/// Name used in `uses`.
pub const NAME: &str = "tool";

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct ToolOptions {
    #[serde(default)]
    check: Vec<String>,
    #[serde(default)]
    install: Vec<String>,
    #[serde(default)]
    requires: Vec<String>,
    cwd: Option<PathBuf>,
    #[serde(default)]
    env: BTreeMap<String, String>,
    /// Per-command limit; the runner default applies when absent.
    timeout_secs: Option<u64>,
}

/// Checks for a tool and installs it with a command when missing.
#[derive(Debug)]
pub struct ToolPlugin {
    check: Vec<String>,
    install: Vec<String>,
    requires: Vec<String>,
    opts: RunOptions,
}

impl ToolPlugin {
    fn from_options(options: ToolOptions) -> Self {
        let mut opts = RunOptions {
            cwd: options.cwd,
            env: options.env.into_iter().collect(),
            ..RunOptions::inherit()
        };
        if let Some(secs) = options.timeout_secs {
            opts = opts.with_timeout(Duration::from_secs(secs));
        }
        Self {
            check: options.check,
            install: options.install,
            requires: options.requires,
            opts,
        }
    }

    /// Run the check command; `None` when the tool has no check.
    async fn run_check(&self, ctx: &Context) -> Result<Option<ExecResult>> {
        self.run_argv(ctx, &self.check).await
    }

    async fn run_argv(&self, ctx: &Context, command: &[String]) -> Result<Option<ExecResult>> {
        let Some((program, rest)) = command.split_first() else {
            return Ok(None);
        };
        let args: Vec<&str> = rest.iter().map(String::as_str).collect();
        ctx.log
            .debug(&format!("$ {}", display_command(program, &args)));
        Ok(Some(ctx.runner.run(program, &args, &self.opts).await?))
    }
}

fn describe(result: &ExecResult) -> String {
    result
        .first_line()
        .map_or_else(|| "ok".to_string(), ToString::to_string)
}

fn describe_failure(result: &ExecResult) -> String {
    let stderr = result.stderr.trim();
    if stderr.is_empty() {
        format!("exit code {}", result.exit_code())
    } else {
        stderr.to_string()
    }
}

#[async_trait]
impl DetectHook for ToolPlugin {
    async fn detect(&self, ctx: &Context) -> Result<DetectOutcome> {
        Ok(match self.run_check(ctx).await? {
            None => DetectOutcome::missing("no check command configured"),
            Some(result) if result.success => DetectOutcome::found(describe(&result)),
            Some(result) => DetectOutcome::missing(describe_failure(&result)),
        })
    }
}

#[async_trait]
impl RegisterTasksHook for ToolPlugin {
    async fn register_tasks(&self, ctx: &Context, registry: &mut TaskRegistry) -> Result<()> {
        register_packages(ctx, registry, &self.requires)?;
        Ok(())
    }
}

#[async_trait]
impl ApplyHook for ToolPlugin {
    async fn apply(&self, ctx: &Context) -> Result<ApplyOutcome> {
        match self.run_check(ctx).await? {
            Some(result) if result.success => return Ok(ApplyOutcome::unchanged()),
            None if self.install.is_empty() => return Ok(ApplyOutcome::unchanged()),
            Some(_) if self.install.is_empty() => {
                return Ok(ApplyOutcome::failed(
                    "check failed and no install command is configured",
                ));
            }
            _ => {}
        }

        let Some(installed) = self.run_argv(ctx, &self.install).await? else {
            return Ok(ApplyOutcome::unchanged());
        };
        if !installed.success {
            return Ok(ApplyOutcome::failed(format!(
                "install failed: {}",
                describe_failure(&installed)
            )));
        }

        Ok(match self.run_check(ctx).await? {
            None => ApplyOutcome::changed("installed"),
            Some(result) if result.success => {
                ApplyOutcome::changed(format!("installed {}", describe(&result)))
            }
            Some(result) => ApplyOutcome {
                ok: false,
                changed: true,
                details: Some(format!(
                    "installed but check still fails: {}",
                    describe_failure(&result)
                )),
            },
        })
    }
}

#[async_trait]
impl ValidateHook for ToolPlugin {
    async fn validate(&self, ctx: &Context) -> Result<ValidateOutcome> {
        Ok(match self.run_check(ctx).await? {
            None => ValidateOutcome::passed("no check command configured"),
            Some(result) if result.success => ValidateOutcome::passed(describe(&result)),
            Some(result) => ValidateOutcome::failed(describe_failure(&result)),
        })
    }
}

pub(crate) fn lifecycle(instance: &PluginInstance) -> Result<Lifecycle, ConfigError> {
    let plugin = Arc::new(ToolPlugin::from_options(parse_options(instance)?));
    Ok(Lifecycle::new()
        .with_detect(Arc::clone(&plugin) as Arc<dyn DetectHook>)
        .with_register_tasks(Arc::clone(&plugin) as Arc<dyn RegisterTasksHook>)
        .with_apply(Arc::clone(&plugin) as Arc<dyn ApplyHook>)
        .with_validate(plugin))
}

#[cfg(test)]
#[allow(clippy::expect_used, clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::test_helpers::{FakeRunner, apt_platform, failure, make_context, success};

    fn argv(parts: &[&str]) -> Vec<String> {
        parts.iter().map(ToString::to_string).collect()
    }

    fn node_plugin(install: &[&str]) -> ToolPlugin {
        ToolPlugin {
            check: argv(&["node", "--version"]),
            install: argv(install),
            requires: argv(&["nodejs"]),
            opts: RunOptions::inherit(),
        }
    }

    #[tokio::test]
    async fn detect_reports_version() {
        let runner = FakeRunner::new().respond("node --version", vec![success("v20.11.0\n")]);
        let (ctx, _) = make_context(runner, apt_platform());
        let outcome = node_plugin(&[]).detect(&ctx).await.unwrap();
        assert_eq!(outcome, DetectOutcome::found("v20.11.0"));
    }

    #[tokio::test]
    async fn detect_missing_tool() {
        let runner = FakeRunner::new().fail("node --version", "node: not found");
        let (ctx, _) = make_context(runner, apt_platform());
        let outcome = node_plugin(&[]).detect(&ctx).await.unwrap();
        assert_eq!(outcome, DetectOutcome::missing("node: not found"));
    }

    #[tokio::test]
    async fn apply_skips_install_when_check_passes() {
        let (ctx, runner) = make_context(FakeRunner::new(), apt_platform());
        let outcome = node_plugin(&["fnm", "install", "20"]).apply(&ctx).await.unwrap();
        assert_eq!(outcome, ApplyOutcome::unchanged());
        assert_eq!(runner.calls(), vec!["node --version"]);
    }

    #[tokio::test]
    async fn apply_installs_and_rechecks() {
        let runner = FakeRunner::new().respond(
            "node --version",
            vec![failure("node: not found"), success("v20.11.0")],
        );
        let (ctx, runner) = make_context(runner, apt_platform());
        let outcome = node_plugin(&["fnm", "install", "20"]).apply(&ctx).await.unwrap();
        assert!(outcome.ok);
        assert!(outcome.changed);
        assert_eq!(outcome.details.as_deref(), Some("installed v20.11.0"));
        assert_eq!(
            runner.calls(),
            vec!["node --version", "fnm install 20", "node --version"]
        );
    }

    #[tokio::test]
    async fn apply_reports_install_failure() {
        let runner = FakeRunner::new()
            .fail("node --version", "node: not found")
            .fail("fnm install", "network unreachable");
        let (ctx, _) = make_context(runner, apt_platform());
        let outcome = node_plugin(&["fnm", "install", "20"]).apply(&ctx).await.unwrap();
        assert!(!outcome.ok);
        assert!(!outcome.changed);
        assert_eq!(
            outcome.details.as_deref(),
            Some("install failed: network unreachable")
        );
    }

    #[tokio::test]
    async fn apply_without_install_fails_when_check_fails() {
        let runner = FakeRunner::new().fail("node --version", "node: not found");
        let (ctx, _) = make_context(runner, apt_platform());
        let outcome = node_plugin(&[]).apply(&ctx).await.unwrap();
        assert!(!outcome.ok);
    }

    #[tokio::test]
    async fn register_adds_required_packages() {
        let (ctx, _) = make_context(FakeRunner::new(), apt_platform());
        let mut registry = TaskRegistry::new();
        node_plugin(&[])
            .register_tasks(&ctx, &mut registry)
            .await
            .unwrap();
        assert!(registry.has("linux:apt:install:nodejs"));
        assert!(registry.has("linux:apt:update"));
    }

    #[tokio::test]
    async fn validate_without_check_passes() {
        let (ctx, runner) = make_context(FakeRunner::new(), apt_platform());
        let plugin = ToolPlugin {
            check: Vec::new(),
            install: Vec::new(),
            requires: Vec::new(),
            opts: RunOptions::inherit(),
        };
        assert!(plugin.validate(&ctx).await.unwrap().ok);
        assert!(runner.calls().is_empty());
    }

    #[test]
    fn options_map_env_and_cwd() {
        let instance = PluginInstance {
            id: "node".to_string(),
            uses: Some(NAME.to_string()),
            category: crate::config::Category::Language,
            depends_on: Vec::new(),
            options: serde_json::json!({
                "check": ["node", "--version"],
                "cwd": "/opt",
                "env": { "NODE_ENV": "production" }
            }),
        };
        let lifecycle = lifecycle(&instance).unwrap();
        assert!(lifecycle.apply.is_some());
    }

    #[test]
    fn timeout_secs_bounds_every_command() {
        let options: ToolOptions = serde_json::from_value(serde_json::json!({
            "check": ["deno", "--version"],
            "timeout_secs": 90
        }))
        .unwrap();
        let plugin = ToolPlugin::from_options(options);
        assert_eq!(plugin.opts.timeout, Duration::from_secs(90));

        let plugin = ToolPlugin::from_options(ToolOptions::default());
        assert_eq!(plugin.opts.timeout, crate::exec::DEFAULT_TIMEOUT);
    }

    #[tokio::test]
    async fn timed_out_check_is_a_hook_error() {
        let runner = FakeRunner::new().time_out("node --version");
        let (ctx, _) = make_context(runner, apt_platform());
        let err = node_plugin(&[]).detect(&ctx).await.unwrap_err();
        assert!(err.to_string().contains("timed out"));
    }
}
