// Shared helpers for integration tests.
//
// Provides a temporary-directory-backed configuration file, a scripted
// command runner and a recording logger so each integration test can drive
// the engine end to end without touching the host system.
//
// Used by all integration test binaries that declare `mod common;`.
#![allow(dead_code, clippy::expect_used)]

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use anyhow::Result;
use async_trait::async_trait;

use provision_cli::config::Config;
use provision_cli::context::Context;
use provision_cli::exec::{CommandRunner, ExecResult, RunOptions, display_command};
use provision_cli::logging::Log;
use provision_cli::platform::{Os, PackageManager, Platform};

/// An isolated configuration file backed by a [`tempfile::TempDir`].
pub struct ConfigFile {
    /// Temporary directory holding `provision.toml`.
    pub dir: tempfile::TempDir,
    path: PathBuf,
}

impl ConfigFile {
    /// Write `content` to `provision.toml` in a fresh temporary directory.
    pub fn new(content: &str) -> Self {
        let dir = tempfile::tempdir().expect("create temp dir");
        let path = dir.path().join("provision.toml");
        std::fs::write(&path, content).expect("write provision.toml");
        Self { dir, path }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn load(&self) -> Config {
        Config::load(&self.path).expect("load config")
    }
}

/// Command runner that succeeds unless a command starts with a failing prefix.
#[derive(Debug, Default)]
pub struct ScriptedRunner {
    failing: Vec<String>,
    programs: Vec<String>,
    calls: Mutex<Vec<String>>,
}

impl ScriptedRunner {
    pub fn new() -> Self {
        Self::default()
    }

    /// Commands starting with `prefix` exit 1.
    pub fn failing(mut self, prefix: &str) -> Self {
        self.failing.push(prefix.to_string());
        self
    }

    /// Report `program` as present on PATH.
    pub fn with_program(mut self, program: &str) -> Self {
        self.programs.push(program.to_string());
        self
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().expect("calls poisoned").clone()
    }
}

#[async_trait]
impl CommandRunner for ScriptedRunner {
    async fn run(&self, program: &str, args: &[&str], _opts: &RunOptions) -> Result<ExecResult> {
        let line = display_command(program, args);
        self.calls
            .lock()
            .expect("calls poisoned")
            .push(line.clone());
        let fails = self.failing.iter().any(|p| line.starts_with(p.as_str()));
        Ok(ExecResult {
            stdout: if fails { String::new() } else { "ok\n".to_string() },
            stderr: if fails { format!("{program}: failed") } else { String::new() },
            success: !fails,
            code: Some(i32::from(fails)),
        })
    }

    fn which(&self, program: &str) -> bool {
        self.programs.iter().any(|p| p == program)
    }
}

/// Logger that keeps every message with its level.
#[derive(Debug, Default)]
pub struct RecordingLog {
    messages: Mutex<Vec<(String, String)>>,
}

impl RecordingLog {
    fn push(&self, level: &str, msg: &str) {
        self.messages
            .lock()
            .expect("messages poisoned")
            .push((level.to_string(), msg.to_string()));
    }

    /// Messages logged at `level`.
    pub fn at(&self, level: &str) -> Vec<String> {
        self.messages
            .lock()
            .expect("messages poisoned")
            .iter()
            .filter(|(l, _)| l == level)
            .map(|(_, m)| m.clone())
            .collect()
    }
}

impl Log for RecordingLog {
    fn stage(&self, msg: &str) {
        self.push("stage", msg);
    }
    fn info(&self, msg: &str) {
        self.push("info", msg);
    }
    fn debug(&self, msg: &str) {
        self.push("debug", msg);
    }
    fn warn(&self, msg: &str) {
        self.push("warn", msg);
    }
    fn error(&self, msg: &str) {
        self.push("error", msg);
    }
}

/// Debian-like Linux without sudo.
pub const fn apt_platform() -> Platform {
    Platform::new(Os::Linux, Some(PackageManager::Apt), false)
}

/// Build a context around `runner`, returning handles for inspection.
pub fn context(
    runner: ScriptedRunner,
    platform: Platform,
) -> (Context, Arc<ScriptedRunner>, Arc<RecordingLog>) {
    let runner = Arc::new(runner);
    let log = Arc::new(RecordingLog::default());
    let ctx = Context::new(
        platform,
        Arc::clone(&runner) as Arc<dyn CommandRunner>,
        Arc::clone(&log) as Arc<dyn Log>,
    );
    (ctx, runner, log)
}
