//! System-level prerequisite tasks shared between plugins.
//!
//! Plugins contribute [`Task`]s to a [`TaskRegistry`] during registration.
//! The registry deduplicates them by id, orders them by priority and
//! dependency, and runs each exactly once before any plugin applies its own
//! changes.
pub mod helpers;
pub mod registry;

pub use registry::{ExecutionReport, TaskRegistry};

use std::fmt;
use std::future::Future;
use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use serde::Serialize;

/// Conventional priorities. Higher values run earlier among tasks with no
/// ordering constraint between them.
pub mod priority {
    /// Environment checks (tool present, permissions).
    pub const CHECK: i32 = 200;
    /// Package index updates.
    pub const UPDATE: i32 = 100;
    /// Package installs.
    pub const INSTALL: i32 = 50;
    /// Default for anything else.
    pub const CUSTOM: i32 = 0;
}

/// What a task action reports back when it completes without error.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaskOutcome {
    /// Whether the task achieved its goal.
    pub success: bool,
    /// Optional detail for the summary.
    pub message: Option<String>,
}

impl TaskOutcome {
    /// A successful outcome without detail.
    #[must_use]
    pub const fn ok() -> Self {
        Self {
            success: true,
            message: None,
        }
    }

    /// A successful outcome with a detail message.
    #[must_use]
    pub fn ok_with(message: impl Into<String>) -> Self {
        Self {
            success: true,
            message: Some(message.into()),
        }
    }

    /// An unsuccessful outcome with a reason.
    #[must_use]
    pub fn failed(reason: impl Into<String>) -> Self {
        Self {
            success: false,
            message: Some(reason.into()),
        }
    }
}

/// The idempotent operation behind a [`Task`].
#[async_trait]
pub trait TaskAction: Send + Sync {
    /// Perform the work.
    ///
    /// # Errors
    ///
    /// Any error is recorded as a failed task; it never aborts the run.
    async fn run(&self) -> Result<TaskOutcome>;
}

/// Adapts an async closure into a [`TaskAction`].
pub struct FnAction<F>(F);

impl<F> fmt::Debug for FnAction<F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("FnAction")
    }
}

#[async_trait]
impl<F, Fut> TaskAction for FnAction<F>
where
    F: Fn() -> Fut + Send + Sync,
    Fut: Future<Output = Result<TaskOutcome>> + Send + 'static,
{
    async fn run(&self) -> Result<TaskOutcome> {
        (self.0)().await
    }
}

/// A unit of idempotent, system-level work identified by a stable id.
///
/// Two tasks with the same id are the same task: only the first one
/// registered is kept.
#[derive(Clone)]
pub struct Task {
    id: String,
    description: String,
    priority: i32,
    depends_on: Vec<String>,
    action: Arc<dyn TaskAction>,
}

impl fmt::Debug for Task {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Task")
            .field("id", &self.id)
            .field("description", &self.description)
            .field("priority", &self.priority)
            .field("depends_on", &self.depends_on)
            .field("action", &"<dyn TaskAction>")
            .finish()
    }
}

impl Task {
    /// Create a task with [`priority::CUSTOM`] and no dependencies.
    pub fn new(
        id: impl Into<String>,
        description: impl Into<String>,
        action: impl TaskAction + 'static,
    ) -> Self {
        Self {
            id: id.into(),
            description: description.into(),
            priority: priority::CUSTOM,
            depends_on: Vec::new(),
            action: Arc::new(action),
        }
    }

    /// Create a task from an async closure.
    ///
    /// ```
    /// use provision_cli::tasks::{Task, TaskOutcome};
    ///
    /// let task = Task::from_fn("linux:check:sudo", "Check sudo", || async {
    ///     Ok(TaskOutcome::ok())
    /// });
    /// assert_eq!(task.id(), "linux:check:sudo");
    /// ```
    pub fn from_fn<F, Fut>(id: impl Into<String>, description: impl Into<String>, f: F) -> Self
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<TaskOutcome>> + Send + 'static,
    {
        Self::new(id, description, FnAction(f))
    }

    /// Set the priority.
    #[must_use]
    pub const fn with_priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }

    /// Add a dependency on another task id. Repeated ids are collapsed.
    #[must_use]
    pub fn depends_on(mut self, id: impl Into<String>) -> Self {
        let id = id.into();
        if !self.depends_on.contains(&id) {
            self.depends_on.push(id);
        }
        self
    }

    /// Unique id.
    #[must_use]
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Human-readable label.
    #[must_use]
    pub fn description(&self) -> &str {
        &self.description
    }

    /// Higher runs earlier among unconstrained tasks.
    #[must_use]
    pub const fn priority(&self) -> i32 {
        self.priority
    }

    /// Ids that must reach a terminal state before this task runs.
    #[must_use]
    pub fn dependencies(&self) -> &[String] {
        &self.depends_on
    }

    pub(crate) async fn run(&self) -> Result<TaskOutcome> {
        self.action.run().await
    }
}

/// Execution status of a registered task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskStatus {
    /// Registered and waiting for its turn.
    Pending,
    /// The action is in flight.
    Running,
    /// The action succeeded.
    Completed,
    /// The action failed, or a dependency did.
    Failed,
}

impl TaskStatus {
    /// Whether the task has finished, successfully or not.
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }
}

/// Recorded result of one registered task.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "result", rename_all = "snake_case")]
pub enum TaskResult {
    /// The action ran and reported success.
    Succeeded {
        /// Optional detail reported by the action.
        message: Option<String>,
    },
    /// The action ran and failed, or returned an error.
    Failed {
        /// Why the action failed.
        reason: String,
    },
    /// Not run: a dependency failed.
    DependencyFailed {
        /// Id of the failed dependency.
        dependency: String,
    },
    /// Not run: a dependency id was never registered.
    DependencyMissing {
        /// The unregistered dependency id.
        dependency: String,
    },
}

impl TaskResult {
    /// Whether the action ran and succeeded.
    #[must_use]
    pub const fn is_success(&self) -> bool {
        matches!(self, Self::Succeeded { .. })
    }

    /// Whether the task was skipped because of one of its dependencies.
    #[must_use]
    pub const fn is_dependency_failure(&self) -> bool {
        matches!(
            self,
            Self::DependencyFailed { .. } | Self::DependencyMissing { .. }
        )
    }

    /// Status this result implies.
    #[must_use]
    pub const fn status(&self) -> TaskStatus {
        if self.is_success() {
            TaskStatus::Completed
        } else {
            TaskStatus::Failed
        }
    }
}

impl fmt::Display for TaskResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Succeeded { message: None } => write!(f, "ok"),
            Self::Succeeded { message: Some(m) } => write!(f, "ok ({m})"),
            Self::Failed { reason } => write!(f, "failed: {reason}"),
            Self::DependencyFailed { dependency } => {
                write!(f, "dependency failed: {dependency}")
            }
            Self::DependencyMissing { dependency } => {
                write!(f, "dependency failed: {dependency} is not registered")
            }
        }
    }
}
