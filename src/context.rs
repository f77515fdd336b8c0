//! Shared services handed to every plugin hook.
use std::sync::Arc;

use crate::exec::{CommandRunner, SystemRunner};
use crate::logging::Log;
use crate::platform::Platform;

/// Shared context for one provisioning run.
///
/// Everything is reference-counted so plugins and the task actions they
/// build can keep their own handles after the hook returns.
#[derive(Clone)]
pub struct Context {
    /// Detected platform information.
    pub platform: Arc<Platform>,
    /// Command runner (real processes, or a fake in tests).
    pub runner: Arc<dyn CommandRunner>,
    /// Logger for output.
    pub log: Arc<dyn Log>,
}

impl std::fmt::Debug for Context {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Context")
            .field("platform", &self.platform)
            .field("runner", &self.runner)
            .field("log", &"<dyn Log>")
            .finish()
    }
}

impl Context {
    /// Creates a new context from explicit parts.
    #[must_use]
    pub fn new(platform: Platform, runner: Arc<dyn CommandRunner>, log: Arc<dyn Log>) -> Self {
        Self {
            platform: Arc::new(platform),
            runner,
            log,
        }
    }

    /// Detect the platform and use real processes.
    #[must_use]
    pub fn detect(log: Arc<dyn Log>) -> Self {
        let runner: Arc<dyn CommandRunner> = Arc::new(SystemRunner);
        let platform = Platform::detect(runner.as_ref());
        Self::new(platform, runner, log)
    }
}
