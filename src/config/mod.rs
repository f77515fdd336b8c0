//! Plugin configuration loaded from `provision.toml`.
pub mod toml_loader;
pub mod validation;

use std::collections::HashSet;
use std::fmt;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// Environment variable naming the configuration file.
pub const CONFIG_ENV: &str = "PROVISION_CONFIG";

/// Configuration file used when neither `--config` nor [`CONFIG_ENV`] is set.
pub const DEFAULT_CONFIG_FILE: &str = "provision.toml";

/// What kind of software a plugin provides.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Category {
    /// A general developer tool.
    Tool,
    /// A software development kit.
    Sdk,
    /// A language runtime or toolchain.
    Language,
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Tool => "tool",
            Self::Sdk => "sdk",
            Self::Language => "language",
        })
    }
}

fn empty_options() -> serde_json::Value {
    serde_json::Value::Object(serde_json::Map::new())
}

/// One `[[plugins]]` entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PluginInstance {
    /// Unique id within the configuration.
    pub id: String,
    /// Built-in implementation to load; defaults to `id`.
    #[serde(default)]
    pub uses: Option<String>,
    /// Kind of software provided; reporting only.
    pub category: Category,
    /// Plugin ids that must run first.
    #[serde(default)]
    pub depends_on: Vec<String>,
    /// Implementation-specific options, passed through untouched.
    #[serde(default = "empty_options")]
    pub options: serde_json::Value,
}

impl PluginInstance {
    /// Name of the implementation this instance loads.
    #[must_use]
    pub fn implementation(&self) -> &str {
        self.uses.as_deref().unwrap_or(&self.id)
    }
}

/// The loaded plugin list.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Config {
    /// Plugin entries in file order.
    #[serde(default)]
    pub plugins: Vec<PluginInstance>,
}

impl Config {
    /// Load and check the configuration at `path`.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed, a plugin id is
    /// empty, or two plugins share an id.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let config: Self = toml_loader::load_config(path)?;
        config.check()?;
        Ok(config)
    }

    /// Parse configuration from a TOML string.
    ///
    /// # Errors
    ///
    /// Same as [`Config::load`], with `<inline>` as the path.
    pub fn from_toml(content: &str) -> Result<Self, ConfigError> {
        let config: Self = toml_loader::parse_config(content, Path::new("<inline>"))?;
        config.check()?;
        Ok(config)
    }

    fn check(&self) -> Result<(), ConfigError> {
        let mut seen = HashSet::new();
        for (i, plugin) in self.plugins.iter().enumerate() {
            if plugin.id.trim().is_empty() {
                return Err(ConfigError::EmptyId(i));
            }
            if !seen.insert(plugin.id.as_str()) {
                return Err(ConfigError::DuplicatePlugin(plugin.id.clone()));
            }
        }
        Ok(())
    }

    /// Keep only the plugins named in `only` plus everything they depend on,
    /// transitively. Order is preserved. An empty `only` keeps everything.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::UnknownSelection`] if a name matches no plugin.
    pub fn select(self, only: &[String]) -> Result<Self, ConfigError> {
        if only.is_empty() {
            return Ok(self);
        }
        let mut keep: HashSet<&str> = HashSet::new();
        let mut pending: Vec<&str> = Vec::new();
        for name in only {
            if !self.plugins.iter().any(|p| p.id == *name) {
                return Err(ConfigError::UnknownSelection(name.clone()));
            }
            pending.push(name);
        }
        while let Some(id) = pending.pop() {
            if !keep.insert(id) {
                continue;
            }
            if let Some(plugin) = self.plugins.iter().find(|p| p.id == id) {
                pending.extend(plugin.depends_on.iter().map(String::as_str));
            }
        }
        let keep: HashSet<String> = keep.into_iter().map(ToString::to_string).collect();
        Ok(Self {
            plugins: self
                .plugins
                .into_iter()
                .filter(|p| keep.contains(&p.id))
                .collect(),
        })
    }
}

/// Resolve the configuration path: the explicit argument, then
/// [`CONFIG_ENV`], then [`DEFAULT_CONFIG_FILE`] in the working directory.
#[must_use]
pub fn resolve_path(explicit: Option<&Path>) -> PathBuf {
    if let Some(path) = explicit {
        return path.to_path_buf();
    }
    std::env::var_os(CONFIG_ENV)
        .filter(|v| !v.is_empty())
        .map_or_else(|| PathBuf::from(DEFAULT_CONFIG_FILE), PathBuf::from)
}
