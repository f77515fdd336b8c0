//! Built-in plugin installing a list of system packages.
//!
//! It has no apply hook: installs happen as shared tasks, so two plugins
//! listing the same package install it once.
use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use serde::Deserialize;

use super::{
    DetectHook, DetectOutcome, Lifecycle, RegisterTasksHook, ValidateHook, ValidateOutcome,
    parse_options,
};
use crate::config::PluginInstance;
use crate::context::Context;
use crate::error::ConfigError;
use crate::tasks::TaskRegistry;
use crate::tasks::helpers::{is_package_installed, register_packages};

/// Name used in `uses`.
pub const NAME: &str = "packages";

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct PackagesOptions {
    #[serde(default)]
    packages: Vec<String>,
}

/// Installs packages through the platform package manager.
#[derive(Debug)]
pub struct PackagesPlugin {
    packages: Vec<String>,
}

impl PackagesPlugin {
    /// Plugin for `packages`, in install order.
    #[must_use]
    pub const fn new(packages: Vec<String>) -> Self {
        Self { packages }
    }

    /// Packages the package manager does not report as installed.
    async fn missing(&self, ctx: &Context) -> Result<Vec<&str>> {
        let mut missing = Vec::new();
        for package in &self.packages {
            if !is_package_installed(ctx, package).await? {
                missing.push(package.as_str());
            }
        }
        Ok(missing)
    }
}

#[async_trait]
impl DetectHook for PackagesPlugin {
    async fn detect(&self, ctx: &Context) -> Result<DetectOutcome> {
        let missing = self.missing(ctx).await?;
        if missing.is_empty() {
            Ok(DetectOutcome::found(format!(
                "{} package(s) installed",
                self.packages.len()
            )))
        } else {
            Ok(DetectOutcome::missing(format!(
                "missing: {}",
                missing.join(", ")
            )))
        }
    }
}

#[async_trait]
impl RegisterTasksHook for PackagesPlugin {
    async fn register_tasks(&self, ctx: &Context, registry: &mut TaskRegistry) -> Result<()> {
        register_packages(ctx, registry, &self.packages)?;
        Ok(())
    }
}

#[async_trait]
impl ValidateHook for PackagesPlugin {
    async fn validate(&self, ctx: &Context) -> Result<ValidateOutcome> {
        let missing = self.missing(ctx).await?;
        if missing.is_empty() {
            Ok(ValidateOutcome::passed(format!(
                "{} package(s) installed",
                self.packages.len()
            )))
        } else {
            Ok(ValidateOutcome::failed(format!(
                "still missing: {}",
                missing.join(", ")
            )))
        }
    }
}

pub(crate) fn lifecycle(instance: &PluginInstance) -> Result<Lifecycle, ConfigError> {
    let options: PackagesOptions = parse_options(instance)?;
    let plugin = Arc::new(PackagesPlugin::new(options.packages));
    Ok(Lifecycle::new()
        .with_detect(Arc::clone(&plugin) as Arc<dyn DetectHook>)
        .with_register_tasks(Arc::clone(&plugin) as Arc<dyn RegisterTasksHook>)
        .with_validate(plugin))
}
