//! Process execution behind the [`CommandRunner`] seam.
use std::path::PathBuf;
use std::process::Output;
use std::time::Duration;

use anyhow::{Context as _, Result, anyhow};
use async_trait::async_trait;

/// Result of a command execution.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExecResult {
    /// Captured standard output.
    pub stdout: String,
    /// Captured standard error.
    pub stderr: String,
    /// Whether the process exited with status zero.
    pub success: bool,
    /// Exit code, `None` when the process was killed by a signal.
    pub code: Option<i32>,
}

impl ExecResult {
    /// Exit code, or `-1` when the process did not exit normally.
    #[must_use]
    pub fn exit_code(&self) -> i32 {
        self.code.unwrap_or(-1)
    }

    /// First non-empty line of stdout, trimmed.
    #[must_use]
    pub fn first_line(&self) -> Option<&str> {
        self.stdout.lines().map(str::trim).find(|l| !l.is_empty())
    }
}

impl From<Output> for ExecResult {
    fn from(output: Output) -> Self {
        Self {
            stdout: String::from_utf8_lossy(&output.stdout).to_string(),
            stderr: String::from_utf8_lossy(&output.stderr).to_string(),
            success: output.status.success(),
            code: output.status.code(),
        }
    }
}

/// How long a single command may run before it is killed.
///
/// Package installs on a slow mirror can take minutes; anything past this is
/// treated as hung.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30 * 60);

/// Working directory, extra environment and time limit for a command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunOptions {
    /// Directory to run in; inherits the current directory when `None`.
    pub cwd: Option<PathBuf>,
    /// Extra environment variables layered over the inherited environment.
    pub env: Vec<(String, String)>,
    /// The process is killed and the run fails once this elapses.
    pub timeout: Duration,
}

impl RunOptions {
    /// Options that inherit everything from the current process, bounded by
    /// [`DEFAULT_TIMEOUT`].
    #[must_use]
    pub const fn inherit() -> Self {
        Self {
            cwd: None,
            env: Vec::new(),
            timeout: DEFAULT_TIMEOUT,
        }
    }

    /// Replace the time limit.
    #[must_use]
    pub const fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

impl Default for RunOptions {
    fn default() -> Self {
        Self::inherit()
    }
}

/// Executes OS-level commands.
///
/// A non-zero exit is a normal [`ExecResult`] with `success == false`; `Err` is
/// reserved for commands that could not be started at all or that outlived
/// [`RunOptions::timeout`].
#[async_trait]
pub trait CommandRunner: Send + Sync + std::fmt::Debug {
    /// Run `program` with `args` and capture its output.
    ///
    /// # Errors
    ///
    /// Returns an error if the process cannot be spawned or times out.
    async fn run(&self, program: &str, args: &[&str], opts: &RunOptions) -> Result<ExecResult>;

    /// Check if a program is available on PATH.
    fn which(&self, program: &str) -> bool;
}

/// Production [`CommandRunner`] backed by `tokio::process`.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemRunner;

#[async_trait]
impl CommandRunner for SystemRunner {
    async fn run(&self, program: &str, args: &[&str], opts: &RunOptions) -> Result<ExecResult> {
        let mut cmd = tokio::process::Command::new(program);
        cmd.args(args).kill_on_drop(true);
        if let Some(dir) = &opts.cwd {
            cmd.current_dir(dir);
        }
        for (k, v) in &opts.env {
            cmd.env(k, v);
        }
        // kill_on_drop reaps the child when the timeout drops the future
        let output = tokio::time::timeout(opts.timeout, cmd.output())
            .await
            .map_err(|_| {
                anyhow!(
                    "{} timed out after {}s",
                    display_command(program, args),
                    opts.timeout.as_secs_f32()
                )
            })?
            .with_context(|| format!("failed to execute: {program}"))?;
        Ok(ExecResult::from(output))
    }

    fn which(&self, program: &str) -> bool {
        which::which(program).is_ok()
    }
}

/// Render a command line for log messages.
#[must_use]
pub fn display_command(program: &str, args: &[&str]) -> String {
    std::iter::once(program)
        .chain(args.iter().copied())
        .collect::<Vec<_>>()
        .join(" ")
}
