//! Non-fatal configuration checks.
//!
//! Fatal problems (duplicate ids, unknown implementations, bad wiring) are
//! errors raised while loading. The checks here catch entries that load fine
//! but probably do not do what their author intended.
use std::collections::HashSet;

use super::{Config, PluginInstance};
use crate::platform::Platform;
use crate::plugins::{packages, tool};

/// A validation warning detected during configuration loading.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationWarning {
    /// Plugin id that triggered the warning.
    pub plugin: String,
    /// Human-readable warning message.
    pub message: String,
}

impl ValidationWarning {
    /// Warning about `plugin`.
    #[must_use]
    pub fn new(plugin: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            plugin: plugin.into(),
            message: message.into(),
        }
    }
}

fn option_is_empty(plugin: &PluginInstance, key: &str) -> bool {
    plugin
        .options
        .get(key)
        .and_then(serde_json::Value::as_array)
        .is_none_or(Vec::is_empty)
}

fn validate_plugin(plugin: &PluginInstance, platform: &Platform) -> Vec<ValidationWarning> {
    let mut warnings = Vec::new();

    let mut seen = HashSet::new();
    for dep in &plugin.depends_on {
        if !seen.insert(dep) {
            warnings.push(ValidationWarning::new(
                &plugin.id,
                format!("dependency '{dep}' is listed more than once"),
            ));
        }
    }

    match plugin.implementation() {
        packages::NAME => {
            if option_is_empty(plugin, "packages") {
                warnings.push(ValidationWarning::new(&plugin.id, "no packages listed"));
            }
            if platform.package_manager.is_none() {
                warnings.push(ValidationWarning::new(
                    &plugin.id,
                    format!("no supported package manager found on {}", platform.os),
                ));
            }
        }
        tool::NAME => {
            if option_is_empty(plugin, "check") {
                warnings.push(ValidationWarning::new(
                    &plugin.id,
                    "no check command; install will run on every apply",
                ));
            }
            if option_is_empty(plugin, "install") && option_is_empty(plugin, "requires") {
                warnings.push(ValidationWarning::new(
                    &plugin.id,
                    "neither install nor requires is set; nothing will be installed",
                ));
            }
        }
        _ => {}
    }

    warnings
}

/// Run every check against `config`.
#[must_use]
pub fn validate_all(config: &Config, platform: &Platform) -> Vec<ValidationWarning> {
    config
        .plugins
        .iter()
        .flat_map(|plugin| validate_plugin(plugin, platform))
        .collect()
}
