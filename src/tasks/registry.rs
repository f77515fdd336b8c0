//! Deduplicating, dependency-ordered store of system tasks.
//!
//! Ordering is a depth-first, post-order topological sort seeded by
//! descending priority. Ties in priority keep registration order. A task
//! whose dependency failed (or was never registered) is marked failed without
//! running, and that failure feeds forward to its own dependents.
use std::cmp::Reverse;
use std::collections::HashMap;

use serde::Serialize;
use tracing::Instrument as _;

use super::{Task, TaskResult, TaskStatus};
use crate::error::TaskError;
use crate::graph::depth_first_order;
use crate::logging::{Log, TASK_SPAN};

/// A registered task together with its execution state.
#[derive(Debug)]
struct TaskState {
    task: Task,
    status: TaskStatus,
    result: Option<TaskResult>,
}

/// Per-task results of [`TaskRegistry::execute_all`], in execution order.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ExecutionReport {
    entries: Vec<ReportEntry>,
}

/// One row of an [`ExecutionReport`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ReportEntry {
    /// Task id.
    pub id: String,
    /// Task description.
    pub description: String,
    /// Recorded result.
    #[serde(flatten)]
    pub result: TaskResult,
}

impl ExecutionReport {
    /// Result recorded for `id`, if that task was registered.
    #[must_use]
    pub fn get(&self, id: &str) -> Option<&TaskResult> {
        self.entries.iter().find(|e| e.id == id).map(|e| &e.result)
    }

    /// Task ids in the order they were processed.
    pub fn order(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|e| e.id.as_str())
    }

    /// All entries in execution order.
    pub fn iter(&self) -> impl Iterator<Item = &ReportEntry> {
        self.entries.iter()
    }

    /// Entries whose task did not succeed.
    pub fn failures(&self) -> impl Iterator<Item = &ReportEntry> {
        self.entries.iter().filter(|e| !e.result.is_success())
    }

    /// Whether any processed task did not succeed.
    #[must_use]
    pub fn has_failures(&self) -> bool {
        self.failures().next().is_some()
    }

    /// Number of tasks processed.
    #[must_use]
    pub const fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether no task was processed.
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Merges prerequisite requests from many independent plugins into one
/// ordered, exactly-once execution sequence.
///
/// Tasks are stored in an arena in registration order; `index` maps each id
/// to its arena slot.
#[derive(Debug, Default)]
pub struct TaskRegistry {
    tasks: Vec<TaskState>,
    index: HashMap<String, usize>,
}

impl TaskRegistry {
    /// Create an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `task` unless a task with the same id is already present.
    ///
    /// Returns `true` if the task was inserted. Duplicates are ignored without
    /// error; the first registration wins.
    pub fn register(&mut self, task: Task) -> bool {
        if self.index.contains_key(task.id()) {
            return false;
        }
        self.index.insert(task.id().to_string(), self.tasks.len());
        self.tasks.push(TaskState {
            task,
            status: TaskStatus::Pending,
            result: None,
        });
        true
    }

    /// Whether a task with `id` is registered.
    #[must_use]
    pub fn has(&self, id: &str) -> bool {
        self.index.contains_key(id)
    }

    /// Status of `id`, or `None` if no such task is registered.
    #[must_use]
    pub fn status(&self, id: &str) -> Option<TaskStatus> {
        self.state(id).map(|s| s.status)
    }

    /// The registered task with `id`.
    #[must_use]
    pub fn task(&self, id: &str) -> Option<&Task> {
        self.state(id).map(|s| &s.task)
    }

    /// Result of `id`, once it has reached a terminal state.
    #[must_use]
    pub fn result(&self, id: &str) -> Option<&TaskResult> {
        self.state(id).and_then(|s| s.result.as_ref())
    }

    /// Registered task ids in registration order.
    pub fn ids(&self) -> impl Iterator<Item = &str> {
        self.tasks.iter().map(|s| s.task.id())
    }

    /// Number of registered tasks.
    #[must_use]
    pub const fn len(&self) -> usize {
        self.tasks.len()
    }

    /// Whether no task is registered.
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    /// Remove every task.
    pub fn clear(&mut self) {
        self.tasks.clear();
        self.index.clear();
    }

    /// Compute the execution order without running anything.
    ///
    /// # Errors
    ///
    /// Returns [`TaskError::Cycle`] if the task dependencies form a cycle.
    pub fn execution_order(&self) -> Result<Vec<&str>, TaskError> {
        Ok(self
            .sorted_indices()?
            .into_iter()
            .filter_map(|i| self.tasks.get(i).map(|s| s.task.id()))
            .collect())
    }

    /// Run every pending task exactly once, in dependency order.
    ///
    /// Tasks run strictly one at a time. A failing task never stops later
    /// independent tasks; its dependents are marked failed without running.
    /// Tasks already terminal from an earlier call keep their result and are
    /// not run again.
    ///
    /// # Errors
    ///
    /// Returns [`TaskError::Cycle`] if the task dependencies form a cycle, in
    /// which case no task runs.
    pub async fn execute_all(&mut self, log: &dyn Log) -> Result<ExecutionReport, TaskError> {
        let order = self.sorted_indices()?;
        let mut report = ExecutionReport::default();

        for idx in order {
            if let Some(result) = self.execute_one(idx, log).await
                && let Some(state) = self.tasks.get(idx)
            {
                report.entries.push(ReportEntry {
                    id: state.task.id().to_string(),
                    description: state.task.description().to_string(),
                    result,
                });
            }
        }

        Ok(report)
    }

    async fn execute_one(&mut self, idx: usize, log: &dyn Log) -> Option<TaskResult> {
        let state = self.tasks.get(idx)?;
        if state.status.is_terminal() {
            return state.result.clone();
        }

        let task = state.task.clone();
        let span = tracing::info_span!(TASK_SPAN, id = task.id());
        Some(self.process(idx, task, log).instrument(span).await)
    }

    async fn process(&mut self, idx: usize, task: Task, log: &dyn Log) -> TaskResult {
        let result = if let Some(blocked) = self.blocked_by(&task) {
            log.warn(&format!("skipping {}: {blocked}", task.id()));
            blocked
        } else {
            self.set_status(idx, TaskStatus::Running);
            log.info(task.description());
            log.debug(&format!("running task {}", task.id()));
            match task.run().await {
                Ok(outcome) if outcome.success => TaskResult::Succeeded {
                    message: outcome.message,
                },
                Ok(outcome) => TaskResult::Failed {
                    reason: outcome
                        .message
                        .unwrap_or_else(|| "task reported failure".to_string()),
                },
                Err(e) => TaskResult::Failed {
                    reason: format!("{e:#}"),
                },
            }
        };

        if let TaskResult::Failed { reason } = &result {
            log.error(&format!("{}: {reason}", task.id()));
        }
        if let Some(state) = self.tasks.get_mut(idx) {
            state.status = result.status();
            state.result = Some(result.clone());
        }
        result
    }

    /// The dependency-failure result for `task`, if any dependency is
    /// unregistered or failed.
    fn blocked_by(&self, task: &Task) -> Option<TaskResult> {
        task.dependencies().iter().find_map(|dep| match self.status(dep) {
            None => Some(TaskResult::DependencyMissing {
                dependency: dep.clone(),
            }),
            Some(TaskStatus::Failed) => Some(TaskResult::DependencyFailed {
                dependency: dep.clone(),
            }),
            Some(_) => None,
        })
    }

    fn set_status(&mut self, idx: usize, status: TaskStatus) {
        if let Some(state) = self.tasks.get_mut(idx) {
            state.status = status;
        }
    }

    fn state(&self, id: &str) -> Option<&TaskState> {
        self.index.get(id).and_then(|&i| self.tasks.get(i))
    }

    /// Priority-seeded depth-first order over arena indices.
    fn sorted_indices(&self) -> Result<Vec<usize>, TaskError> {
        let mut seeds: Vec<usize> = (0..self.tasks.len()).collect();
        seeds.sort_by_key(|&i| Reverse(self.tasks.get(i).map_or(0, |s| s.task.priority())));

        // Unregistered dependencies have no node; they surface at execution time.
        let edges: Vec<Vec<usize>> = self
            .tasks
            .iter()
            .map(|s| {
                s.task
                    .dependencies()
                    .iter()
                    .filter_map(|d| self.index.get(d).copied())
                    .collect()
            })
            .collect();

        depth_first_order(&seeds, &edges).map_err(|cycle| {
            let name = |i: usize| self.tasks.get(i).map_or("?", |s| s.task.id());
            TaskError::Cycle {
                id: name(cycle.at).to_string(),
                path: cycle.render(name),
            }
        })
    }
}

#[cfg(test)]
#[allow(
    clippy::expect_used,
    clippy::unwrap_used,
    clippy::indexing_slicing,
    clippy::panic
)]
mod tests {
    use super::*;
    use crate::logging::MockLog;
    use crate::tasks::{Task, TaskOutcome, priority};
    use crate::test_helpers::{CallLog, quiet_log, recording_task};

    fn ok_task(id: &str, priority: i32, calls: &CallLog) -> Task {
        recording_task(id, calls, TaskOutcome::ok()).with_priority(priority)
    }

    fn failing_task(id: &str, priority: i32, calls: &CallLog) -> Task {
        recording_task(id, calls, TaskOutcome::failed("exit 100")).with_priority(priority)
    }

    // -----------------------------------------------------------------------
    // Registration
    // -----------------------------------------------------------------------

    #[test]
    fn registering_same_id_twice_keeps_one_task() {
        let calls = CallLog::default();
        let mut registry = TaskRegistry::new();
        assert!(registry.register(ok_task("linux:apt:update", 100, &calls)));
        let dup = Task::from_fn("linux:apt:update", "different description", || async {
            Ok(TaskOutcome::ok())
        });
        assert!(!registry.register(dup));
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn n_registrations_of_one_id_yield_size_one() {
        let calls = CallLog::default();
        let mut registry = TaskRegistry::new();
        for _ in 0..5 {
            registry.register(ok_task("same", 0, &calls));
        }
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn status_of_unknown_id_is_none() {
        let calls = CallLog::default();
        let mut registry = TaskRegistry::new();
        registry.register(ok_task("a", 0, &calls));
        assert_eq!(registry.status("a"), Some(TaskStatus::Pending));
        assert_eq!(registry.status("missing"), None);
        assert!(registry.result("a").is_none());
        assert!(registry.has("a"));
        assert!(!registry.has("missing"));
    }

    #[test]
    fn clear_empties_registry() {
        let calls = CallLog::default();
        let mut registry = TaskRegistry::new();
        registry.register(ok_task("a", 0, &calls));
        registry.clear();
        assert!(registry.is_empty());
        assert!(!registry.has("a"));
        assert!(registry.register(ok_task("a", 0, &calls)));
    }

    // -----------------------------------------------------------------------
    // Ordering
    // -----------------------------------------------------------------------

    #[tokio::test]
    async fn duplicate_registrations_execute_once() {
        let calls = CallLog::default();
        let mut registry = TaskRegistry::new();
        registry.register(ok_task("linux:pm:update", 100, &calls));
        registry.register(ok_task("linux:pm:update", 100, &calls));
        let report = registry.execute_all(&quiet_log()).await.unwrap();
        assert_eq!(report.len(), 1);
        assert_eq!(calls.count("linux:pm:update"), 1);
    }

    #[tokio::test]
    async fn higher_priority_runs_first() {
        let calls = CallLog::default();
        let mut registry = TaskRegistry::new();
        registry.register(ok_task("c", 50, &calls));
        registry.register(ok_task("a", 200, &calls));
        registry.register(ok_task("b", 100, &calls));
        registry.execute_all(&quiet_log()).await.unwrap();
        assert_eq!(calls.order(), vec!["a", "b", "c"]);
    }

    #[test]
    fn equal_priorities_keep_registration_order() {
        let calls = CallLog::default();
        let mut registry = TaskRegistry::new();
        registry.register(ok_task("z", priority::INSTALL, &calls));
        registry.register(ok_task("m", priority::INSTALL, &calls));
        registry.register(ok_task("a", priority::INSTALL, &calls));
        assert_eq!(registry.execution_order().unwrap(), vec!["z", "m", "a"]);
    }

    #[tokio::test]
    async fn dependency_overrides_priority() {
        let calls = CallLog::default();
        let mut registry = TaskRegistry::new();
        registry.register(ok_task("b", 100, &calls).depends_on("a"));
        registry.register(ok_task("a", 10, &calls));
        registry.execute_all(&quiet_log()).await.unwrap();
        assert_eq!(calls.order(), vec!["a", "b"]);
    }

    #[tokio::test]
    async fn cycle_is_fatal_and_runs_nothing() {
        let calls = CallLog::default();
        let mut registry = TaskRegistry::new();
        registry.register(ok_task("a", 0, &calls).depends_on("b"));
        registry.register(ok_task("b", 0, &calls).depends_on("a"));
        let err = registry.execute_all(&quiet_log()).await.unwrap_err();
        let TaskError::Cycle { id, path } = err;
        assert!(id == "a" || id == "b", "cycle should name a or b, got {id}");
        assert!(path.contains('→'));
        assert!(calls.order().is_empty(), "no executor may run");
        assert_eq!(registry.status("a"), Some(TaskStatus::Pending));
    }

    #[test]
    fn missing_dependency_is_tolerated_during_sort() {
        let calls = CallLog::default();
        let mut registry = TaskRegistry::new();
        registry.register(ok_task("a", 0, &calls).depends_on("ghost"));
        assert_eq!(registry.execution_order().unwrap(), vec!["a"]);
    }

    // -----------------------------------------------------------------------
    // Execution
    // -----------------------------------------------------------------------

    #[tokio::test]
    async fn empty_registry_returns_empty_report() {
        let mut registry = TaskRegistry::new();
        let report = registry.execute_all(&quiet_log()).await.unwrap();
        assert!(report.is_empty());
    }

    #[tokio::test]
    async fn failure_propagates_to_dependents() {
        let calls = CallLog::default();
        let mut registry = TaskRegistry::new();
        registry.register(failing_task("a", 100, &calls));
        registry.register(ok_task("b", 50, &calls).depends_on("a"));
        registry.register(ok_task("c", 10, &calls).depends_on("b"));
        let report = registry.execute_all(&quiet_log()).await.unwrap();

        assert_eq!(registry.status("b"), Some(TaskStatus::Failed));
        assert_eq!(
            report.get("b"),
            Some(&TaskResult::DependencyFailed {
                dependency: "a".to_string()
            })
        );
        assert_eq!(
            report.get("c"),
            Some(&TaskResult::DependencyFailed {
                dependency: "b".to_string()
            })
        );
        assert_eq!(calls.order(), vec!["a"], "dependents must not run");
    }

    #[tokio::test]
    async fn independent_task_runs_after_failure() {
        let calls = CallLog::default();
        let mut registry = TaskRegistry::new();
        registry.register(failing_task("a", 100, &calls));
        registry.register(ok_task("c", 50, &calls));
        let report = registry.execute_all(&quiet_log()).await.unwrap();
        assert_eq!(calls.order(), vec!["a", "c"]);
        assert!(report.get("c").unwrap().is_success());
        assert_eq!(registry.status("c"), Some(TaskStatus::Completed));
    }

    #[tokio::test]
    async fn action_error_is_recorded_not_raised() {
        let mut registry = TaskRegistry::new();
        registry.register(Task::from_fn("boom", "Boom", || async {
            anyhow::bail!("apt lock held")
        }));
        let report = registry.execute_all(&quiet_log()).await.unwrap();
        match report.get("boom").unwrap() {
            TaskResult::Failed { reason } => assert!(reason.contains("apt lock held")),
            other => panic!("unexpected result {other:?}"),
        }
    }

    #[tokio::test]
    async fn missing_dependency_fails_dependent_at_execution() {
        let calls = CallLog::default();
        let mut registry = TaskRegistry::new();
        registry.register(ok_task("a", 0, &calls).depends_on("ghost"));
        registry.register(ok_task("b", 0, &calls));
        let report = registry.execute_all(&quiet_log()).await.unwrap();
        assert_eq!(
            report.get("a"),
            Some(&TaskResult::DependencyMissing {
                dependency: "ghost".to_string()
            })
        );
        assert!(report.get("b").unwrap().is_success());
        assert_eq!(calls.order(), vec!["b"]);
    }

    #[tokio::test]
    async fn report_covers_every_registered_task() {
        let calls = CallLog::default();
        let mut registry = TaskRegistry::new();
        registry.register(failing_task("a", 0, &calls));
        registry.register(ok_task("b", 0, &calls).depends_on("a"));
        registry.register(ok_task("c", 0, &calls));
        let report = registry.execute_all(&quiet_log()).await.unwrap();
        let mut ids: Vec<&str> = report.order().collect();
        ids.sort_unstable();
        assert_eq!(ids, vec!["a", "b", "c"]);
        assert_eq!(report.failures().count(), 2);
    }

    #[tokio::test]
    async fn second_execute_all_does_not_rerun() {
        let calls = CallLog::default();
        let mut registry = TaskRegistry::new();
        registry.register(ok_task("a", 0, &calls));
        let first = registry.execute_all(&quiet_log()).await.unwrap();
        let second = registry.execute_all(&quiet_log()).await.unwrap();
        assert_eq!(calls.count("a"), 1);
        assert_eq!(first, second);
    }

    #[tokio::test]
    async fn skipped_dependent_is_logged_as_warning() {
        let calls = CallLog::default();
        let mut registry = TaskRegistry::new();
        registry.register(failing_task("a", 1, &calls));
        registry.register(ok_task("b", 0, &calls).depends_on("a"));

        let mut log = MockLog::new();
        log.expect_info().return_const(());
        log.expect_debug().return_const(());
        log.expect_error().times(1).return_const(());
        log.expect_warn()
            .withf(|msg| msg.contains("skipping b") && msg.contains("dependency failed"))
            .times(1)
            .return_const(());

        registry.execute_all(&log).await.unwrap();
    }
}
