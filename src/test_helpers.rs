//! Shared helpers for unit tests.
//!
//! Provides a scriptable command runner, a recorder for task invocations and
//! context factories so each test module does not have to duplicate
//! boilerplate.
#![allow(clippy::expect_used)]

use std::collections::{HashSet, VecDeque};
use std::sync::{Arc, Mutex};

use anyhow::{Result, bail};
use async_trait::async_trait;

use crate::context::Context;
use crate::exec::{CommandRunner, ExecResult, RunOptions, display_command};
use crate::logging::MockLog;
use crate::platform::{Os, PackageManager, Platform};
use crate::tasks::{Task, TaskOutcome};

/// Scripted [`CommandRunner`].
///
/// Every invocation is recorded as its rendered command line. Responses are
/// matched by command-line prefix; a prefix scripted with several results
/// returns them in turn and then keeps repeating the last one. Unscripted
/// commands succeed with empty output.
#[derive(Debug, Default)]
pub struct FakeRunner {
    programs: HashSet<String>,
    timeouts: Vec<String>,
    responses: Mutex<Vec<(String, VecDeque<ExecResult>)>>,
    calls: Mutex<Vec<String>>,
}

impl FakeRunner {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Programs reported as present by `which`.
    #[must_use]
    pub fn with_programs(mut self, programs: &[&str]) -> Self {
        self.programs
            .extend(programs.iter().map(ToString::to_string));
        self
    }

    /// Script the results for commands starting with `prefix`.
    #[must_use]
    pub fn respond(self, prefix: &str, results: Vec<ExecResult>) -> Self {
        self.responses
            .lock()
            .expect("responses poisoned")
            .push((prefix.to_string(), results.into()));
        self
    }

    /// Script a non-zero exit with `stderr` for commands starting with `prefix`.
    #[must_use]
    pub fn fail(self, prefix: &str, stderr: &str) -> Self {
        self.respond(prefix, vec![failure(stderr)])
    }

    /// Commands starting with `prefix` fail the way a hung process does
    /// once [`RunOptions::timeout`] elapses.
    #[must_use]
    pub fn time_out(mut self, prefix: &str) -> Self {
        self.timeouts.push(prefix.to_string());
        self
    }

    /// Every command line run so far.
    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().expect("calls poisoned").clone()
    }
}

#[async_trait]
impl CommandRunner for FakeRunner {
    async fn run(&self, program: &str, args: &[&str], opts: &RunOptions) -> Result<ExecResult> {
        let line = display_command(program, args);
        self.calls
            .lock()
            .expect("calls poisoned")
            .push(line.clone());
        if self.timeouts.iter().any(|p| line.starts_with(p.as_str())) {
            bail!("{line} timed out after {}s", opts.timeout.as_secs_f32());
        }
        let mut responses = self.responses.lock().expect("responses poisoned");
        let scripted = responses
            .iter_mut()
            .find(|(prefix, _)| line.starts_with(prefix.as_str()))
            .and_then(|(_, queue)| {
                if queue.len() > 1 {
                    queue.pop_front()
                } else {
                    queue.front().cloned()
                }
            });
        drop(responses);
        Ok(scripted.unwrap_or_else(|| success("")))
    }

    fn which(&self, program: &str) -> bool {
        self.programs.contains(program)
    }
}

/// A zero exit with `stdout`.
#[must_use]
pub fn success(stdout: &str) -> ExecResult {
    ExecResult {
        stdout: stdout.to_string(),
        stderr: String::new(),
        success: true,
        code: Some(0),
    }
}

/// A non-zero exit with `stderr`.
#[must_use]
pub fn failure(stderr: &str) -> ExecResult {
    ExecResult {
        stdout: String::new(),
        stderr: stderr.to_string(),
        success: false,
        code: Some(1),
    }
}

/// A [`MockLog`] that accepts any message.
#[must_use]
pub fn quiet_log() -> MockLog {
    let mut log = MockLog::new();
    log.expect_stage().return_const(());
    log.expect_info().return_const(());
    log.expect_debug().return_const(());
    log.expect_warn().return_const(());
    log.expect_error().return_const(());
    log
}

/// Build a [`Context`] around `runner` on `platform`, returning the runner
/// so tests can inspect issued commands.
pub fn make_context(runner: FakeRunner, platform: Platform) -> (Context, Arc<FakeRunner>) {
    let runner = Arc::new(runner);
    let ctx = Context::new(
        platform,
        Arc::clone(&runner) as Arc<dyn CommandRunner>,
        Arc::new(quiet_log()),
    );
    (ctx, runner)
}

/// A Debian-like Linux platform with sudo elevation.
#[must_use]
pub const fn apt_platform() -> Platform {
    Platform::new(Os::Linux, Some(PackageManager::Apt), true)
}

/// A [`Context`] on [`apt_platform`] with a default [`FakeRunner`].
#[must_use]
pub fn apt_context() -> Context {
    make_context(FakeRunner::new(), apt_platform()).0
}

/// Records the ids of tasks as they run.
#[derive(Debug, Clone, Default)]
pub struct CallLog(Arc<Mutex<Vec<String>>>);

impl CallLog {
    pub fn push(&self, id: &str) {
        self.0.lock().expect("call log poisoned").push(id.to_string());
    }

    /// Ids in invocation order.
    pub fn order(&self) -> Vec<String> {
        self.0.lock().expect("call log poisoned").clone()
    }

    /// How many times `id` ran.
    pub fn count(&self, id: &str) -> usize {
        self.order().iter().filter(|c| *c == id).count()
    }
}

/// A task that records its id in `calls` and returns `outcome`.
pub fn recording_task(id: &str, calls: &CallLog, outcome: TaskOutcome) -> Task {
    let calls = calls.clone();
    let owned = id.to_string();
    Task::from_fn(id, format!("Task {id}"), move || {
        calls.push(&owned);
        let outcome = outcome.clone();
        async move { Ok(outcome) }
    })
}
