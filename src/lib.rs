//! Developer-machine provisioning engine.
//!
//! Reads a declarative list of plugins (tools, SDKs, language runtimes),
//! orders them by dependency, and drives each through a fixed lifecycle:
//! detect, register shared system tasks, run those tasks once, apply, and
//! validate.
//!
//! The public API is organised into four layers:
//!
//! - **[`config`]**: parse and validate the plugin list
//! - **[`tasks`]**: deduplicated, dependency-ordered system tasks shared between plugins
//! - **[`plugins`]**: lifecycle hooks, the plugin graph and the orchestrator
//! - **[`commands`]**: top-level subcommand orchestration (`apply`, `detect`, `plan`)
#![deny(clippy::or_fun_call)]
#![deny(clippy::bool_to_int_with_if)]

pub mod cli;
pub mod commands;
pub mod config;
pub mod context;
pub mod error;
pub mod exec;
pub mod graph;
pub mod logging;
pub mod platform;
pub mod plugins;
pub mod tasks;

#[cfg(test)]
pub mod test_helpers;
