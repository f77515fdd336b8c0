//! Drives every plugin through the lifecycle phases.
//!
//! Phases run in a fixed, linear order. Within a phase, plugins run one at a
//! time in graph order, and a failing plugin is recorded and skipped over
//! rather than stopping its siblings.
use std::fmt;

use serde::Serialize;
use tracing::Instrument as _;

use super::{ApplyOutcome, DetectOutcome, PluginLoader, PluginNode, ValidateOutcome, build_graph};
use crate::config::{Category, Config};
use crate::context::Context;
use crate::error::{GraphError, ProvisionError, TaskError};
use crate::logging::PLUGIN_SPAN;
use crate::tasks::{ExecutionReport, TaskRegistry};

/// Run state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    /// Nothing has run yet.
    Idle,
    /// Running detect hooks.
    Detecting,
    /// Running register-tasks hooks.
    RegisteringTasks,
    /// Running the shared task registry.
    ExecutingTasks,
    /// Running apply hooks.
    Applying,
    /// Running validate hooks.
    Validating,
    /// Every phase has run.
    Done,
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Idle => "Idle",
            Self::Detecting => "Detecting installed software",
            Self::RegisteringTasks => "Registering system tasks",
            Self::ExecutingTasks => "Running system tasks",
            Self::Applying => "Applying plugins",
            Self::Validating => "Validating",
            Self::Done => "Done",
        })
    }
}

fn hook_span(node: &PluginNode) -> tracing::Span {
    tracing::info_span!(PLUGIN_SPAN, id = node.id())
}

/// Detection state reported for one plugin.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum DetectStatus {
    /// The requirement is already met.
    Present,
    /// The requirement is not met yet.
    Missing,
    /// The detect hook itself failed.
    Error,
}

/// Detect-phase result for one plugin.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DetectSummary {
    /// Plugin id.
    pub id: String,
    /// Plugin category.
    pub category: Category,
    /// Observed state.
    pub status: DetectStatus,
    /// Hook detail or error text.
    pub details: Option<String>,
}

/// Register-phase result for one plugin.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RegisterSummary {
    /// Plugin id.
    pub id: String,
    /// Plugin category.
    pub category: Category,
    /// The hook returned without error.
    pub ok: bool,
    /// Tasks this plugin added that were not already registered, including
    /// any added before a failing hook returned.
    pub registered: usize,
    /// Error text when `ok` is false.
    pub message: Option<String>,
}

/// Apply-phase result for one plugin.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ApplySummary {
    /// Plugin id.
    pub id: String,
    /// Plugin category.
    pub category: Category,
    /// The hook reached its goal.
    pub ok: bool,
    /// The hook changed the system.
    pub did_change: bool,
    /// Hook detail or error text.
    pub details: Option<String>,
}

/// Validate-phase result for one plugin.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ValidateSummary {
    /// Plugin id.
    pub id: String,
    /// Plugin category.
    pub category: Category,
    /// The final state checked out.
    pub ok: bool,
    /// Hook message or error text.
    pub message: Option<String>,
}

/// Everything recorded during a full run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RunReport {
    /// One entry per plugin, in plugin order.
    pub detect: Vec<DetectSummary>,
    /// One entry per plugin, in plugin order.
    pub register: Vec<RegisterSummary>,
    /// Shared task results, in execution order.
    pub tasks: ExecutionReport,
    /// One entry per plugin, in plugin order.
    pub apply: Vec<ApplySummary>,
    /// One entry per plugin, in plugin order.
    pub validate: Vec<ValidateSummary>,
}

impl RunReport {
    /// Whether any task, registration, apply, or validation failed.
    /// Detection results are observational and never count.
    #[must_use]
    pub fn has_failures(&self) -> bool {
        self.tasks.has_failures()
            || self.register.iter().any(|s| !s.ok)
            || self.apply.iter().any(|s| !s.ok)
            || self.validate.iter().any(|s| !s.ok)
    }

    /// Number of plugins whose apply hook changed the system.
    #[must_use]
    pub fn changed(&self) -> usize {
        self.apply.iter().filter(|s| s.did_change).count()
    }
}

/// A task as it would run, without running it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PlannedTask {
    /// Task id.
    pub id: String,
    /// Task description.
    pub description: String,
    /// Seed priority.
    pub priority: i32,
    /// Declared dependencies, registered or not.
    pub depends_on: Vec<String>,
}

/// Plugin order and deduplicated task order for a run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Plan {
    /// Plugin ids in dependency order.
    pub plugins: Vec<String>,
    /// Register-phase results.
    pub register: Vec<RegisterSummary>,
    /// Deduplicated tasks in execution order.
    pub tasks: Vec<PlannedTask>,
}

/// Runs the lifecycle over a dependency-ordered set of plugins.
#[derive(Debug)]
pub struct Orchestrator {
    nodes: Vec<PluginNode>,
    ctx: Context,
    registry: TaskRegistry,
    phase: Phase,
}

impl Orchestrator {
    /// Order `nodes` by dependency and prepare a run.
    ///
    /// # Errors
    ///
    /// Returns a [`GraphError`] if the plugin wiring is invalid. Nothing runs.
    pub fn new(nodes: Vec<PluginNode>, ctx: Context) -> Result<Self, GraphError> {
        Ok(Self {
            nodes: build_graph(nodes)?,
            ctx,
            registry: TaskRegistry::new(),
            phase: Phase::Idle,
        })
    }

    /// Load every plugin in `config` and order them.
    ///
    /// # Errors
    ///
    /// Returns an error if a plugin cannot be loaded or the graph is invalid.
    pub fn from_config(
        config: Config,
        loader: &dyn PluginLoader,
        ctx: Context,
    ) -> Result<Self, ProvisionError> {
        let nodes = loader.load_all(config.plugins)?;
        Ok(Self::new(nodes, ctx)?)
    }

    /// Current run state.
    #[must_use]
    pub const fn phase(&self) -> Phase {
        self.phase
    }

    /// Plugin ids in execution order.
    pub fn order(&self) -> impl Iterator<Item = &str> {
        self.nodes.iter().map(PluginNode::id)
    }

    /// The run's task registry.
    #[must_use]
    pub const fn registry(&self) -> &TaskRegistry {
        &self.registry
    }

    fn enter(&mut self, phase: Phase) {
        self.phase = phase;
        if !matches!(phase, Phase::Idle | Phase::Done) {
            self.ctx.log.stage(&phase.to_string());
        }
    }

    /// Run every detect hook. Plugins without one are reported present.
    pub async fn detect(&mut self) -> Vec<DetectSummary> {
        self.enter(Phase::Detecting);
        let mut summaries = Vec::with_capacity(self.nodes.len());
        for node in &self.nodes {
            let outcome = match &node.lifecycle.detect {
                None => Ok(DetectOutcome {
                    ok: true,
                    details: None,
                }),
                Some(hook) => hook.detect(&self.ctx).instrument(hook_span(node)).await,
            };
            let (status, details) = match outcome {
                Ok(o) if o.ok => (DetectStatus::Present, o.details),
                Ok(o) => (DetectStatus::Missing, o.details),
                Err(e) => {
                    self.ctx
                        .log
                        .warn(&format!("{}: detect failed: {e:#}", node.id()));
                    (DetectStatus::Error, Some(format!("{e:#}")))
                }
            };
            self.ctx
                .log
                .debug(&format!("{}: {status:?}", node.id()));
            summaries.push(DetectSummary {
                id: node.id().to_string(),
                category: node.instance.category,
                status,
                details,
            });
        }
        summaries
    }

    /// Let each plugin contribute tasks to the shared registry.
    pub async fn register_tasks(&mut self) -> Vec<RegisterSummary> {
        self.enter(Phase::RegisteringTasks);
        let mut summaries = Vec::with_capacity(self.nodes.len());
        for node in &self.nodes {
            let before = self.registry.len();
            let result = match &node.lifecycle.register_tasks {
                None => Ok(()),
                Some(hook) => {
                    hook.register_tasks(&self.ctx, &mut self.registry)
                        .instrument(hook_span(node))
                        .await
                }
            };
            let registered = self.registry.len().saturating_sub(before);
            let (ok, message) = match result {
                Ok(()) => (true, None),
                Err(e) => {
                    self.ctx
                        .log
                        .warn(&format!("{}: task registration failed: {e:#}", node.id()));
                    (false, Some(format!("{e:#}")))
                }
            };
            self.ctx.log.debug(&format!(
                "{}: registered {registered} new task(s)",
                node.id()
            ));
            summaries.push(RegisterSummary {
                id: node.id().to_string(),
                category: node.instance.category,
                ok,
                registered,
                message,
            });
        }
        summaries
    }

    /// Run every registered task once.
    ///
    /// Task failures are logged as warnings and recorded in the report;
    /// they do not stop the run.
    ///
    /// # Errors
    ///
    /// Returns [`TaskError::Cycle`] if the tasks cannot be ordered.
    pub async fn execute_tasks(&mut self) -> Result<ExecutionReport, TaskError> {
        self.enter(Phase::ExecutingTasks);
        let report = self.registry.execute_all(self.ctx.log.as_ref()).await?;
        for entry in report.failures() {
            self.ctx
                .log
                .warn(&format!("task {} {}", entry.id, entry.result));
        }
        Ok(report)
    }

    /// Run every apply hook. Plugins without one are unchanged.
    pub async fn apply(&mut self) -> Vec<ApplySummary> {
        self.enter(Phase::Applying);
        let mut summaries = Vec::with_capacity(self.nodes.len());
        for node in &self.nodes {
            let outcome = match &node.lifecycle.apply {
                None => Ok(ApplyOutcome::unchanged()),
                Some(hook) => {
                    self.ctx.log.info(&format!("applying {}", node.id()));
                    hook.apply(&self.ctx).instrument(hook_span(node)).await
                }
            };
            let outcome = outcome.unwrap_or_else(|e| ApplyOutcome::failed(format!("{e:#}")));
            if !outcome.ok {
                self.ctx.log.warn(&format!(
                    "{}: apply failed: {}",
                    node.id(),
                    outcome.details.as_deref().unwrap_or("no details")
                ));
            }
            summaries.push(ApplySummary {
                id: node.id().to_string(),
                category: node.instance.category,
                ok: outcome.ok,
                did_change: outcome.changed,
                details: outcome.details,
            });
        }
        summaries
    }

    /// Run every validate hook. Plugins without one pass.
    pub async fn validate(&mut self) -> Vec<ValidateSummary> {
        self.enter(Phase::Validating);
        let mut summaries = Vec::with_capacity(self.nodes.len());
        for node in &self.nodes {
            let outcome = match &node.lifecycle.validate {
                None => Ok(ValidateOutcome {
                    ok: true,
                    message: None,
                }),
                Some(hook) => hook.validate(&self.ctx).instrument(hook_span(node)).await,
            };
            let outcome = outcome.unwrap_or_else(|e| ValidateOutcome::failed(format!("{e:#}")));
            if !outcome.ok {
                self.ctx.log.warn(&format!(
                    "{}: validation failed: {}",
                    node.id(),
                    outcome.message.as_deref().unwrap_or("no details")
                ));
            }
            summaries.push(ValidateSummary {
                id: node.id().to_string(),
                category: node.instance.category,
                ok: outcome.ok,
                message: outcome.message,
            });
        }
        summaries
    }

    /// Run every phase in order.
    ///
    /// # Errors
    ///
    /// Returns an error only if the system tasks cannot be ordered; every
    /// other failure is recorded in the report.
    pub async fn run(&mut self) -> Result<RunReport, ProvisionError> {
        let detect = self.detect().await;
        let register = self.register_tasks().await;
        let tasks = self.execute_tasks().await?;
        let apply = self.apply().await;
        let validate = self.validate().await;
        self.enter(Phase::Done);
        Ok(RunReport {
            detect,
            register,
            tasks,
            apply,
            validate,
        })
    }

    /// Register tasks and compute their order without running anything.
    ///
    /// # Errors
    ///
    /// Returns [`TaskError::Cycle`] if the tasks cannot be ordered.
    pub async fn plan(&mut self) -> Result<Plan, ProvisionError> {
        let register = self.register_tasks().await;
        let tasks = self
            .registry
            .execution_order()?
            .into_iter()
            .filter_map(|id| self.registry.task(id))
            .map(|task| PlannedTask {
                id: task.id().to_string(),
                description: task.description().to_string(),
                priority: task.priority(),
                depends_on: task.dependencies().to_vec(),
            })
            .collect();
        self.enter(Phase::Done);
        Ok(Plan {
            plugins: self.order().map(ToString::to_string).collect(),
            register,
            tasks,
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
    use std::sync::Arc;

    use anyhow::{Result, bail};
    use async_trait::async_trait;

    use super::*;
    use crate::config::PluginInstance;
    use crate::platform::{Os, PackageManager, Platform};
    use crate::plugins::{
        ApplyHook, BuiltinLoader, DetectHook, Lifecycle, RegisterTasksHook, ValidateHook,
    };
    use crate::tasks::helpers::{install_package_task, update_index_task};
    use crate::tasks::{Task, TaskOutcome, TaskResult, priority};
    use crate::test_helpers::{
        CallLog, FakeRunner, apt_context, apt_platform, make_context, recording_task,
    };

    fn instance(id: &str, depends_on: &[&str]) -> PluginInstance {
        PluginInstance {
            id: id.to_string(),
            uses: None,
            category: Category::Tool,
            depends_on: depends_on.iter().map(ToString::to_string).collect(),
            options: serde_json::json!({}),
        }
    }

    /// Records hook calls and registers fixed tasks.
    struct StubPlugin {
        id: String,
        calls: CallLog,
        tasks: Vec<Task>,
        /// Hook name that returns an error instead of an outcome.
        fail_in: Option<&'static str>,
    }

    impl StubPlugin {
        fn new(id: &str, calls: &CallLog) -> Self {
            Self {
                id: id.to_string(),
                calls: calls.clone(),
                tasks: Vec::new(),
                fail_in: None,
            }
        }

        fn failing_in(mut self, hook: &'static str) -> Self {
            self.fail_in = Some(hook);
            self
        }

        fn enter(&self, hook: &str) -> Result<()> {
            self.calls.push(&format!("{hook}:{}", self.id));
            if self.fail_in == Some(hook) {
                bail!("{hook} crashed");
            }
            Ok(())
        }
    }

    #[async_trait]
    impl DetectHook for StubPlugin {
        async fn detect(&self, _ctx: &Context) -> Result<DetectOutcome> {
            self.enter("detect")?;
            Ok(DetectOutcome::missing("not installed"))
        }
    }

    #[async_trait]
    impl RegisterTasksHook for StubPlugin {
        async fn register_tasks(&self, _ctx: &Context, registry: &mut TaskRegistry) -> Result<()> {
            // tasks land before the hook fails, like a plugin erroring halfway
            for task in &self.tasks {
                registry.register(task.clone());
            }
            self.enter("register")
        }
    }

    #[async_trait]
    impl ApplyHook for StubPlugin {
        async fn apply(&self, _ctx: &Context) -> Result<ApplyOutcome> {
            self.enter("apply")?;
            Ok(ApplyOutcome::changed("installed"))
        }
    }

    #[async_trait]
    impl ValidateHook for StubPlugin {
        async fn validate(&self, _ctx: &Context) -> Result<ValidateOutcome> {
            self.enter("validate")?;
            Ok(ValidateOutcome::passed("ok"))
        }
    }

    fn stub_node(stub: StubPlugin, depends_on: &[&str]) -> PluginNode {
        let id = stub.id.clone();
        let stub = Arc::new(stub);
        PluginNode::new(
            instance(&id, depends_on),
            Lifecycle::new()
                .with_detect(Arc::clone(&stub) as Arc<dyn DetectHook>)
                .with_register_tasks(Arc::clone(&stub) as Arc<dyn RegisterTasksHook>)
                .with_apply(Arc::clone(&stub) as Arc<dyn ApplyHook>)
                .with_validate(stub),
        )
    }

    #[tokio::test]
    async fn phases_run_in_order_across_plugins() {
        let calls = CallLog::default();
        let nodes = vec![
            stub_node(StubPlugin::new("app", &calls), &["base"]),
            stub_node(StubPlugin::new("base", &calls), &[]),
        ];
        let mut orchestrator = Orchestrator::new(nodes, apt_context()).unwrap();
        assert_eq!(orchestrator.phase(), Phase::Idle);

        let report = orchestrator.run().await.unwrap();

        assert_eq!(orchestrator.phase(), Phase::Done);
        assert_eq!(
            calls.order(),
            vec![
                "detect:base",
                "detect:app",
                "register:base",
                "register:app",
                "apply:base",
                "apply:app",
                "validate:base",
                "validate:app",
            ]
        );
        assert!(!report.has_failures());
        assert_eq!(report.changed(), 2);
        assert_eq!(report.detect[0].status, DetectStatus::Missing);
    }

    #[tokio::test]
    async fn shared_tasks_run_once_before_apply() {
        let calls = CallLog::default();
        let mut first = StubPlugin::new("node", &calls);
        first.tasks = vec![
            recording_task("update", &calls, TaskOutcome::ok()).with_priority(priority::UPDATE),
            recording_task("install:node", &calls, TaskOutcome::ok())
                .with_priority(priority::INSTALL)
                .depends_on("update"),
        ];
        let mut second = StubPlugin::new("python", &calls);
        second.tasks = vec![
            recording_task("update", &calls, TaskOutcome::ok()).with_priority(priority::UPDATE),
            recording_task("install:python", &calls, TaskOutcome::ok())
                .with_priority(priority::INSTALL)
                .depends_on("update"),
        ];
        let nodes = vec![stub_node(first, &[]), stub_node(second, &[])];
        let mut orchestrator = Orchestrator::new(nodes, apt_context()).unwrap();

        let report = orchestrator.run().await.unwrap();

        assert_eq!(report.tasks.len(), 3);
        assert_eq!(calls.count("update"), 1);
        let order = calls.order();
        let pos = |s: &str| order.iter().position(|c| c == s).unwrap();
        assert!(pos("update") < pos("install:node"));
        assert!(pos("update") < pos("install:python"));
        assert!(pos("install:python") < pos("apply:node"));
        assert_eq!(report.register[0].registered, 2);
        assert_eq!(report.register[1].registered, 1);
    }

    #[tokio::test]
    async fn failing_apply_does_not_stop_siblings() {
        let calls = CallLog::default();
        let broken = StubPlugin::new("broken", &calls).failing_in("apply");
        let nodes = vec![
            stub_node(broken, &[]),
            stub_node(StubPlugin::new("fine", &calls), &[]),
        ];
        let mut orchestrator = Orchestrator::new(nodes, apt_context()).unwrap();

        let report = orchestrator.run().await.unwrap();

        assert!(report.has_failures());
        assert!(!report.apply[0].ok);
        assert_eq!(report.apply[0].details.as_deref(), Some("apply crashed"));
        assert!(report.apply[1].ok);
        assert_eq!(calls.count("validate:broken"), 1);
    }

    #[tokio::test]
    async fn failing_detect_is_reported_not_counted() {
        let calls = CallLog::default();
        let nodes = vec![
            stub_node(StubPlugin::new("broken", &calls).failing_in("detect"), &[]),
            stub_node(StubPlugin::new("fine", &calls), &[]),
        ];
        let mut orchestrator = Orchestrator::new(nodes, apt_context()).unwrap();

        let report = orchestrator.run().await.unwrap();

        assert_eq!(report.detect[0].status, DetectStatus::Error);
        assert_eq!(report.detect[0].details.as_deref(), Some("detect crashed"));
        assert_eq!(report.detect[1].status, DetectStatus::Missing);
        assert_eq!(calls.count("detect:fine"), 1);
        assert_eq!(calls.count("apply:broken"), 1);
        assert!(!report.has_failures());
    }

    #[tokio::test]
    async fn failing_register_keeps_partial_tasks_and_siblings() {
        let calls = CallLog::default();
        let mut broken = StubPlugin::new("broken", &calls).failing_in("register");
        broken.tasks = vec![recording_task("early", &calls, TaskOutcome::ok())];
        let mut fine = StubPlugin::new("fine", &calls);
        fine.tasks = vec![recording_task("late", &calls, TaskOutcome::ok())];
        let nodes = vec![stub_node(broken, &[]), stub_node(fine, &[])];
        let mut orchestrator = Orchestrator::new(nodes, apt_context()).unwrap();

        let report = orchestrator.run().await.unwrap();

        assert!(!report.register[0].ok);
        assert_eq!(report.register[0].registered, 1);
        assert_eq!(report.register[0].message.as_deref(), Some("register crashed"));
        assert!(report.register[1].ok);
        assert_eq!(calls.count("early"), 1);
        assert_eq!(calls.count("late"), 1);
        assert_eq!(calls.count("apply:broken"), 1);
        assert_eq!(calls.count("validate:fine"), 1);
        assert!(report.has_failures());
    }

    #[tokio::test]
    async fn failing_validate_does_not_stop_siblings() {
        let calls = CallLog::default();
        let nodes = vec![
            stub_node(StubPlugin::new("broken", &calls).failing_in("validate"), &[]),
            stub_node(StubPlugin::new("fine", &calls), &[]),
        ];
        let mut orchestrator = Orchestrator::new(nodes, apt_context()).unwrap();

        let report = orchestrator.run().await.unwrap();

        assert!(!report.validate[0].ok);
        assert_eq!(report.validate[0].message.as_deref(), Some("validate crashed"));
        assert!(report.validate[1].ok);
        assert_eq!(calls.count("validate:fine"), 1);
        assert!(report.apply.iter().all(|a| a.ok));
        assert!(report.has_failures());
        assert_eq!(orchestrator.phase(), Phase::Done);
    }

    #[tokio::test]
    async fn task_failures_do_not_block_apply() {
        let calls = CallLog::default();
        let mut stub = StubPlugin::new("node", &calls);
        stub.tasks = vec![recording_task("update", &calls, TaskOutcome::failed("offline"))];
        let mut orchestrator =
            Orchestrator::new(vec![stub_node(stub, &[])], apt_context()).unwrap();

        let report = orchestrator.run().await.unwrap();

        assert!(report.tasks.has_failures());
        assert!(report.has_failures());
        assert_eq!(calls.count("apply:node"), 1);
    }

    #[tokio::test]
    async fn task_cycle_is_fatal_for_the_run() {
        let calls = CallLog::default();
        let mut stub = StubPlugin::new("node", &calls);
        stub.tasks = vec![
            recording_task("a", &calls, TaskOutcome::ok()).depends_on("b"),
            recording_task("b", &calls, TaskOutcome::ok()).depends_on("a"),
        ];
        let mut orchestrator =
            Orchestrator::new(vec![stub_node(stub, &[])], apt_context()).unwrap();

        let err = orchestrator.run().await.unwrap_err();

        assert!(matches!(err, ProvisionError::Task(TaskError::Cycle { .. })));
        assert_eq!(calls.count("a"), 0);
        assert_eq!(calls.count("apply:node"), 0);
    }

    #[test]
    fn plugin_cycle_is_fatal_before_any_phase() {
        let calls = CallLog::default();
        let nodes = vec![
            stub_node(StubPlugin::new("a", &calls), &["b"]),
            stub_node(StubPlugin::new("b", &calls), &["a"]),
        ];
        let err = Orchestrator::new(nodes, apt_context()).unwrap_err();
        assert!(matches!(err, GraphError::Cycle { .. }));
        assert!(calls.order().is_empty());
    }

    #[tokio::test]
    async fn absent_hooks_are_trivially_successful() {
        let nodes = vec![PluginNode::new(instance("empty", &[]), Lifecycle::new())];
        let mut orchestrator = Orchestrator::new(nodes, apt_context()).unwrap();

        let report = orchestrator.run().await.unwrap();

        assert_eq!(report.detect[0].status, DetectStatus::Present);
        assert!(report.register[0].ok);
        assert_eq!(report.register[0].registered, 0);
        assert!(report.apply[0].ok);
        assert!(!report.apply[0].did_change);
        assert!(report.validate[0].ok);
        assert!(report.tasks.is_empty());
    }

    #[tokio::test]
    async fn node_and_python_share_one_index_update() {
        let platform = Platform::new(Os::Linux, Some(PackageManager::Apt), false);
        let (ctx, runner) = make_context(FakeRunner::new(), platform);
        let shared = ctx.clone();
        let mut nodes = Vec::new();
        for (id, package) in [("node", "nodejs"), ("python", "python3")] {
            let update = update_index_task(&shared).unwrap();
            let install = install_package_task(&shared, package).unwrap();
            let stub = Arc::new(StaticTasks(vec![update, install]));
            nodes.push(PluginNode::new(
                instance(id, &[]),
                Lifecycle::new().with_register_tasks(stub),
            ));
        }
        let mut orchestrator = Orchestrator::new(nodes, ctx).unwrap();

        let report = orchestrator.run().await.unwrap();

        insta::assert_snapshot!(report.tasks.order().collect::<Vec<_>>().join("\n"), @r"
        linux:apt:update
        linux:apt:install:nodejs
        linux:apt:install:python3
        ");
        assert!(
            report
                .tasks
                .iter()
                .all(|e| matches!(e.result, TaskResult::Succeeded { .. }))
        );
        assert_eq!(
            runner
                .calls()
                .iter()
                .filter(|c| c.as_str() == "apt-get update")
                .count(),
            1
        );
    }

    /// Registers a fixed task list.
    struct StaticTasks(Vec<Task>);

    #[async_trait]
    impl RegisterTasksHook for StaticTasks {
        async fn register_tasks(&self, _ctx: &Context, registry: &mut TaskRegistry) -> Result<()> {
            for task in &self.0 {
                registry.register(task.clone());
            }
            Ok(())
        }
    }

    #[tokio::test]
    async fn plan_orders_tasks_without_running_them() {
        let calls = CallLog::default();
        let mut stub = StubPlugin::new("node", &calls);
        stub.tasks = vec![
            recording_task("install", &calls, TaskOutcome::ok())
                .with_priority(priority::INSTALL)
                .depends_on("update"),
            recording_task("update", &calls, TaskOutcome::ok()).with_priority(priority::UPDATE),
        ];
        let mut orchestrator =
            Orchestrator::new(vec![stub_node(stub, &[])], apt_context()).unwrap();

        let plan = orchestrator.plan().await.unwrap();

        let ids: Vec<&str> = plan.tasks.iter().map(|t| t.id.as_str()).collect();
        assert_eq!(ids, vec!["update", "install"]);
        assert_eq!(plan.plugins, vec!["node"]);
        assert_eq!(calls.order(), vec!["register:node"]);
    }

    #[tokio::test]
    async fn builtin_plugins_load_from_config() {
        let config = Config::from_toml(
            r#"
[[plugins]]
id = "base"
uses = "packages"
category = "tool"
options = { packages = ["curl"] }

[[plugins]]
id = "node"
uses = "tool"
category = "language"
depends_on = ["base"]
options = { check = ["node", "--version"], requires = ["nodejs", "curl"] }
"#,
        )
        .unwrap();
        let (ctx, _) = make_context(FakeRunner::new().with_programs(&["sudo"]), apt_platform());
        let mut orchestrator = Orchestrator::from_config(config, &BuiltinLoader, ctx).unwrap();

        let plan = orchestrator.plan().await.unwrap();

        insta::assert_snapshot!(
            plan.tasks.iter().map(|t| t.id.as_str()).collect::<Vec<_>>().join("\n"),
            @r"
        linux:check:sudo
        linux:apt:update
        linux:apt:install:curl
        linux:apt:install:nodejs
        "
        );
        assert_eq!(plan.register[0].registered, 3);
        assert_eq!(plan.register[1].registered, 1);
    }

    #[test]
    fn unknown_plugin_is_config_error() {
        let config = Config::from_toml(
            r#"
[[plugins]]
id = "rustup"
category = "language"
"#,
        )
        .unwrap();
        let err = Orchestrator::from_config(config, &BuiltinLoader, apt_context()).unwrap_err();
        assert!(matches!(err, ProvisionError::Config(_)));
    }

    #[test]
    fn report_serializes_summaries() {
        let report = RunReport {
            apply: vec![ApplySummary {
                id: "node".to_string(),
                category: Category::Language,
                ok: true,
                did_change: true,
                details: None,
            }],
            ..RunReport::default()
        };
        let json = serde_json::to_value(&report).unwrap();
        assert_eq!(json["apply"][0]["category"], "language");
        assert_eq!(json["apply"][0]["did_change"], true);
    }
}
