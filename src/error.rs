//! Domain-specific error types for the provisioning engine.
//!
//! Internal modules return typed errors ([`ConfigError`], [`GraphError`],
//! [`TaskError`]) while command handlers at the CLI boundary convert them to
//! [`anyhow::Error`] via the standard `?` operator.
//!
//! # Error hierarchy
//!
//! ```text
//! ProvisionError
//! ├── Config(ConfigError) — config file, plugin loading, options
//! ├── Graph(GraphError)   — plugin wiring (undeclared dependency, cycle)
//! └── Task(TaskError)     — system task ordering
//! ```
//!
//! Every variant here is fatal for the run. Failures local to one task or one
//! plugin are not errors: they are recorded in the run report instead.

use thiserror::Error;

/// Top-level error type for a provisioning run.
#[derive(Error, Debug)]
pub enum ProvisionError {
    /// Configuration-related error (loading, validation, plugin resolution).
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// The plugin dependency graph is malformed.
    #[error("Plugin graph error: {0}")]
    Graph(#[from] GraphError),

    /// The system task graph could not be ordered.
    #[error("Task ordering error: {0}")]
    Task(#[from] TaskError),
}

/// Errors that arise from configuration loading and plugin resolution.
#[derive(Error, Debug)]
pub enum ConfigError {
    /// An I/O error occurred while reading the config file.
    #[error("IO error reading config file {path}: {source}")]
    Io {
        /// Path to the file that could not be read.
        path: String,
        /// Underlying I/O error.
        source: std::io::Error,
    },

    /// The config file is not valid TOML or does not match the schema.
    #[error("Invalid config in {path}: {message}")]
    Parse {
        /// Path to the offending file.
        path: String,
        /// Parser message.
        message: String,
    },

    /// A plugin entry has an empty id.
    #[error("Plugin entry #{0} has an empty id")]
    EmptyId(usize),

    /// Two plugin entries share the same id.
    #[error("Duplicate plugin id '{0}'")]
    DuplicatePlugin(String),

    /// No built-in implementation matches the requested name.
    #[error("Plugin '{id}' uses unknown implementation '{uses}' (available: {available})")]
    UnknownPlugin {
        /// Plugin instance id.
        id: String,
        /// Requested implementation name.
        uses: String,
        /// Comma-separated implementation names the loader accepts.
        available: String,
    },

    /// The plugin options could not be decoded.
    #[error("Invalid options for plugin '{id}': {message}")]
    InvalidOptions {
        /// Plugin instance id.
        id: String,
        /// Decoder message.
        message: String,
    },

    /// `--only` names a plugin that is not configured.
    #[error("Unknown plugin '{0}' in selection")]
    UnknownSelection(String),
}

/// Errors that arise while ordering the plugin execution graph.
#[derive(Error, Debug, PartialEq, Eq)]
pub enum GraphError {
    /// Two nodes share the same id.
    #[error("Duplicate plugin '{0}' in execution graph")]
    DuplicateNode(String),

    /// A plugin depends on an id that no plugin declares.
    #[error("Plugin '{plugin}' depends on undeclared plugin '{dependency}'")]
    UndeclaredDependency {
        /// Plugin declaring the dependency.
        plugin: String,
        /// Missing dependency id.
        dependency: String,
    },

    /// The plugin dependencies contain a cycle.
    #[error("Plugin dependency cycle detected at '{id}': {path}")]
    Cycle {
        /// Id at which the cycle was detected.
        id: String,
        /// Rendered cycle, e.g. `a → b → a`.
        path: String,
    },
}

/// Errors that arise while ordering system tasks.
#[derive(Error, Debug, PartialEq, Eq)]
pub enum TaskError {
    /// The task dependency graph contains a cycle.
    #[error("Task dependency cycle detected at '{id}': {path}")]
    Cycle {
        /// Id at which the cycle was detected.
        id: String,
        /// Rendered cycle, e.g. `a → b → a`.
        path: String,
    },
}
