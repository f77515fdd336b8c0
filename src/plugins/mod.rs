//! Plugins and their lifecycle.
//!
//! A plugin satisfies one requirement (a tool, SDK, or language runtime)
//! through up to four optional hooks, run by the
//! [`Orchestrator`](orchestrator::Orchestrator) in dependency order:
//!
//! 1. **detect**: observe whether the requirement is already met
//! 2. **register tasks**: contribute shared prerequisites to the [`TaskRegistry`]
//! 3. **apply**: install or configure, once every prerequisite has run
//! 4. **validate**: re-confirm the final state
pub mod graph;
pub mod orchestrator;
pub mod packages;
pub mod tool;

use std::fmt;
use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use serde::Serialize;

use crate::config::PluginInstance;
use crate::context::Context;
use crate::error::ConfigError;
use crate::tasks::TaskRegistry;

pub use graph::{GraphNode, build_graph};
pub use orchestrator::{Orchestrator, Phase, RunReport};

/// Result of a detect hook.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DetectOutcome {
    /// The requirement is already met.
    pub ok: bool,
    /// What was found, or why it is missing.
    pub details: Option<String>,
}

impl DetectOutcome {
    /// Requirement met.
    #[must_use]
    pub fn found(details: impl Into<String>) -> Self {
        Self {
            ok: true,
            details: Some(details.into()),
        }
    }

    /// Requirement not met.
    #[must_use]
    pub fn missing(details: impl Into<String>) -> Self {
        Self {
            ok: false,
            details: Some(details.into()),
        }
    }
}

/// Result of an apply hook.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ApplyOutcome {
    /// The hook reached its goal.
    pub ok: bool,
    /// Whether the hook changed the system.
    pub changed: bool,
    /// Human-readable detail for the summary.
    pub details: Option<String>,
}

impl ApplyOutcome {
    /// Nothing to do; the requirement was already satisfied.
    #[must_use]
    pub const fn unchanged() -> Self {
        Self {
            ok: true,
            changed: false,
            details: None,
        }
    }

    /// The hook installed or reconfigured something.
    #[must_use]
    pub fn changed(details: impl Into<String>) -> Self {
        Self {
            ok: true,
            changed: true,
            details: Some(details.into()),
        }
    }

    /// The hook could not reach its goal.
    #[must_use]
    pub fn failed(details: impl Into<String>) -> Self {
        Self {
            ok: false,
            changed: false,
            details: Some(details.into()),
        }
    }
}

/// Result of a validate hook.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ValidateOutcome {
    /// The final state is as expected.
    pub ok: bool,
    /// What was checked, or what is wrong.
    pub message: Option<String>,
}

impl ValidateOutcome {
    /// Validation succeeded.
    #[must_use]
    pub fn passed(message: impl Into<String>) -> Self {
        Self {
            ok: true,
            message: Some(message.into()),
        }
    }

    /// Validation failed.
    #[must_use]
    pub fn failed(message: impl Into<String>) -> Self {
        Self {
            ok: false,
            message: Some(message.into()),
        }
    }
}

/// Observes whether the requirement is met. Must not change the system.
#[async_trait]
pub trait DetectHook: Send + Sync {
    /// # Errors
    ///
    /// An error is recorded in this plugin's summary only.
    async fn detect(&self, ctx: &Context) -> Result<DetectOutcome>;
}

/// Contributes shared prerequisite tasks. Must not install anything itself.
#[async_trait]
pub trait RegisterTasksHook: Send + Sync {
    /// # Errors
    ///
    /// An error is recorded in this plugin's summary only.
    async fn register_tasks(&self, ctx: &Context, registry: &mut TaskRegistry) -> Result<()>;
}

/// Performs the installation or configuration.
#[async_trait]
pub trait ApplyHook: Send + Sync {
    /// # Errors
    ///
    /// An error is recorded in this plugin's summary only.
    async fn apply(&self, ctx: &Context) -> Result<ApplyOutcome>;
}

/// Re-confirms the final state, usually with the same check as detect.
#[async_trait]
pub trait ValidateHook: Send + Sync {
    /// # Errors
    ///
    /// An error is recorded in this plugin's summary only.
    async fn validate(&self, ctx: &Context) -> Result<ValidateOutcome>;
}

/// The hooks one plugin provides. Absent hooks are trivially successful.
#[derive(Clone, Default)]
pub struct Lifecycle {
    /// Observation hook.
    pub detect: Option<Arc<dyn DetectHook>>,
    /// Prerequisite-task hook.
    pub register_tasks: Option<Arc<dyn RegisterTasksHook>>,
    /// Installation hook.
    pub apply: Option<Arc<dyn ApplyHook>>,
    /// Final-state hook.
    pub validate: Option<Arc<dyn ValidateHook>>,
}

impl fmt::Debug for Lifecycle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Lifecycle")
            .field("detect", &self.detect.is_some())
            .field("register_tasks", &self.register_tasks.is_some())
            .field("apply", &self.apply.is_some())
            .field("validate", &self.validate.is_some())
            .finish()
    }
}

impl Lifecycle {
    /// A lifecycle with no hooks.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the detect hook.
    #[must_use]
    pub fn with_detect(mut self, hook: Arc<dyn DetectHook>) -> Self {
        self.detect = Some(hook);
        self
    }

    /// Set the register-tasks hook.
    #[must_use]
    pub fn with_register_tasks(mut self, hook: Arc<dyn RegisterTasksHook>) -> Self {
        self.register_tasks = Some(hook);
        self
    }

    /// Set the apply hook.
    #[must_use]
    pub fn with_apply(mut self, hook: Arc<dyn ApplyHook>) -> Self {
        self.apply = Some(hook);
        self
    }

    /// Set the validate hook.
    #[must_use]
    pub fn with_validate(mut self, hook: Arc<dyn ValidateHook>) -> Self {
        self.validate = Some(hook);
        self
    }
}

/// A configured plugin paired with its loaded hooks.
#[derive(Debug, Clone)]
pub struct PluginNode {
    /// Configuration entry.
    pub instance: PluginInstance,
    /// Hooks resolved from `instance.uses`.
    pub lifecycle: Lifecycle,
}

impl PluginNode {
    /// Pair `instance` with its hooks.
    #[must_use]
    pub const fn new(instance: PluginInstance, lifecycle: Lifecycle) -> Self {
        Self {
            instance,
            lifecycle,
        }
    }

    /// Plugin id.
    #[must_use]
    pub fn id(&self) -> &str {
        &self.instance.id
    }
}

impl GraphNode for PluginNode {
    fn node_id(&self) -> &str {
        &self.instance.id
    }

    fn node_dependencies(&self) -> &[String] {
        &self.instance.depends_on
    }
}

/// Resolves a configured plugin to its hooks.
pub trait PluginLoader {
    /// # Errors
    ///
    /// Returns [`ConfigError::UnknownPlugin`] when nothing implements
    /// `instance.uses`, or [`ConfigError::InvalidOptions`] when the options
    /// do not fit the implementation.
    fn load(&self, instance: &PluginInstance) -> Result<Lifecycle, ConfigError>;

    /// Load every instance, stopping at the first failure.
    ///
    /// # Errors
    ///
    /// Returns the first error from [`PluginLoader::load`].
    fn load_all(&self, instances: Vec<PluginInstance>) -> Result<Vec<PluginNode>, ConfigError> {
        instances
            .into_iter()
            .map(|instance| {
                let lifecycle = self.load(&instance)?;
                Ok(PluginNode::new(instance, lifecycle))
            })
            .collect()
    }
}

/// Loader for the plugins compiled into this binary.
#[derive(Debug, Default, Clone, Copy)]
pub struct BuiltinLoader;

impl BuiltinLoader {
    /// Names accepted in `uses`.
    pub const NAMES: &'static [&'static str] = &[packages::NAME, tool::NAME];
}

impl PluginLoader for BuiltinLoader {
    fn load(&self, instance: &PluginInstance) -> Result<Lifecycle, ConfigError> {
        match instance.implementation() {
            packages::NAME => packages::lifecycle(instance),
            tool::NAME => tool::lifecycle(instance),
            other => Err(ConfigError::UnknownPlugin {
                id: instance.id.clone(),
                uses: other.to_string(),
                available: Self::NAMES.join(", "),
            }),
        }
    }
}

/// Deserialize a plugin's options, naming the plugin on failure.
pub(crate) fn parse_options<T: serde::de::DeserializeOwned>(
    instance: &PluginInstance,
) -> Result<T, ConfigError> {
    serde_json::from_value(instance.options.clone()).map_err(|e| ConfigError::InvalidOptions {
        id: instance.id.clone(),
        message: e.to_string(),
    })
}

#[cfg(test)]
#[allow(clippy::expect_used, clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::config::Category;
    use serde_json::json;

    fn instance(id: &str, uses: Option<&str>, options: serde_json::Value) -> PluginInstance {
        PluginInstance {
            id: id.to_string(),
            uses: uses.map(ToString::to_string),
            category: Category::Tool,
            depends_on: Vec::new(),
            options,
        }
    }

    #[test]
    fn builtin_loader_resolves_uses_then_id() {
        let by_id = instance("packages", None, json!({ "packages": ["curl"] }));
        let lifecycle = BuiltinLoader.load(&by_id).unwrap();
        assert!(lifecycle.register_tasks.is_some());
        assert!(lifecycle.apply.is_none());

        let by_uses = instance("node", Some("tool"), json!({ "check": ["node", "--version"] }));
        let lifecycle = BuiltinLoader.load(&by_uses).unwrap();
        assert!(lifecycle.detect.is_some());
        assert!(lifecycle.apply.is_some());
    }

    #[test]
    fn unknown_implementation_names_plugin() {
        let err = BuiltinLoader
            .load(&instance("rust", Some("rustup"), json!({})))
            .unwrap_err();
        assert!(matches!(
            err,
            ConfigError::UnknownPlugin { ref id, ref uses, .. } if id == "rust" && uses == "rustup"
        ));
        assert!(err.to_string().ends_with("(available: packages, tool)"));
    }

    #[test]
    fn invalid_options_name_plugin() {
        let err = BuiltinLoader
            .load(&instance("node", Some("tool"), json!({ "check": "node" })))
            .unwrap_err();
        assert!(matches!(err, ConfigError::InvalidOptions { ref id, .. } if id == "node"));
    }

    #[test]
    fn load_all_keeps_input_order() {
        let nodes = BuiltinLoader
            .load_all(vec![
                instance("b", Some("packages"), json!({})),
                instance("a", Some("packages"), json!({})),
            ])
            .unwrap();
        let ids: Vec<&str> = nodes.iter().map(PluginNode::id).collect();
        assert_eq!(ids, vec!["b", "a"]);
    }

    #[test]
    fn lifecycle_debug_shows_present_hooks() {
        let debug = format!("{:?}", Lifecycle::new());
        assert!(debug.contains("detect: false"));
    }
}
