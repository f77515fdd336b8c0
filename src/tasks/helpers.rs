//! Builders for the system tasks plugins commonly need.
//!
//! Task ids encode platform, category, operation and an optional parameter
//! (`linux:apt:install:curl`), so two plugins asking for the same package on
//! the same machine produce the same id and the registry keeps one task.
use std::sync::Arc;

use anyhow::{Result, bail};
use async_trait::async_trait;

use super::{Task, TaskAction, TaskOutcome, TaskRegistry, priority};
use crate::context::Context;
use crate::exec::{CommandRunner, RunOptions, display_command};
use crate::platform::{Os, PackageManager, Platform};

/// Build a task id from its parts.
///
/// ```
/// use provision_cli::platform::Os;
/// use provision_cli::tasks::helpers::task_id;
///
/// assert_eq!(task_id(Os::Linux, "apt", "update", None), "linux:apt:update");
/// assert_eq!(
///     task_id(Os::MacOs, "brew", "install", Some("git")),
///     "darwin:brew:install:git"
/// );
/// ```
#[must_use]
pub fn task_id(os: Os, category: &str, operation: &str, param: Option<&str>) -> String {
    param.map_or_else(
        || format!("{}:{category}:{operation}", os.key()),
        |p| format!("{}:{category}:{operation}:{p}", os.key()),
    )
}

/// A [`TaskAction`] that runs one external command.
///
/// A non-zero exit becomes an unsuccessful [`TaskOutcome`] carrying the
/// trimmed stderr.
#[derive(Debug)]
pub struct CommandAction {
    runner: Arc<dyn CommandRunner>,
    program: String,
    args: Vec<String>,
    opts: RunOptions,
}

impl CommandAction {
    /// Run `program args…` through `runner`.
    #[must_use]
    pub fn new(runner: Arc<dyn CommandRunner>, program: &str, args: &[&str]) -> Self {
        Self {
            runner,
            program: program.to_string(),
            args: args.iter().map(ToString::to_string).collect(),
            opts: RunOptions::inherit(),
        }
    }

    /// Use `opts` for the working directory and environment.
    #[must_use]
    pub fn with_options(mut self, opts: RunOptions) -> Self {
        self.opts = opts;
        self
    }
}

#[async_trait]
impl TaskAction for CommandAction {
    async fn run(&self) -> Result<TaskOutcome> {
        let args: Vec<&str> = self.args.iter().map(String::as_str).collect();
        let result = self.runner.run(&self.program, &args, &self.opts).await?;
        if result.success {
            return Ok(TaskOutcome::ok());
        }
        Ok(TaskOutcome::failed(format!(
            "{} exited {}: {}",
            display_command(&self.program, &args),
            result.exit_code(),
            result.stderr.trim()
        )))
    }
}

/// Prefix `args` with `sudo` when the platform elevates and the manager needs root.
fn privileged<'a>(
    platform: &Platform,
    pm: PackageManager,
    args: &[&'a str],
) -> (&'a str, Vec<&'a str>) {
    let (program, rest) = args.split_first().map_or(("", &[][..]), |(p, r)| (*p, r));
    if platform.elevate && pm.needs_root() {
        let mut elevated = vec![program];
        elevated.extend_from_slice(rest);
        ("sudo", elevated)
    } else {
        (program, rest.to_vec())
    }
}

const fn update_command(pm: PackageManager) -> &'static [&'static str] {
    match pm {
        PackageManager::Apt => &["apt-get", "update"],
        PackageManager::Dnf => &["dnf", "makecache"],
        PackageManager::Pacman => &["pacman", "-Sy"],
        PackageManager::Brew => &["brew", "update"],
        PackageManager::Winget => &["winget", "source", "update"],
    }
}

fn install_command(pm: PackageManager, package: &str) -> Vec<&str> {
    match pm {
        PackageManager::Apt => vec!["apt-get", "install", "-y", package],
        PackageManager::Dnf => vec!["dnf", "install", "-y", package],
        PackageManager::Pacman => vec!["pacman", "-S", "--needed", "--noconfirm", package],
        PackageManager::Brew => vec!["brew", "install", package],
        PackageManager::Winget => vec![
            "winget",
            "install",
            "--id",
            package,
            "--exact",
            "--accept-source-agreements",
            "--accept-package-agreements",
            "--disable-interactivity",
        ],
    }
}

/// Id of the index-update task for `pm` on `os`.
#[must_use]
pub fn update_task_id(os: Os, pm: PackageManager) -> String {
    task_id(os, &pm.to_string(), "update", None)
}

/// Id of the install task for `package` via `pm` on `os`.
#[must_use]
pub fn install_task_id(os: Os, pm: PackageManager, package: &str) -> String {
    task_id(os, &pm.to_string(), "install", Some(package))
}

/// A [`priority::CHECK`] task that fails unless `program` is on PATH.
#[must_use]
pub fn check_command_task(ctx: &Context, program: &str) -> Task {
    let runner = Arc::clone(&ctx.runner);
    let owned = program.to_string();
    Task::from_fn(
        task_id(ctx.platform.os, "check", program, None),
        format!("Check {program} is available"),
        move || {
            let found = runner.which(&owned);
            let program = owned.clone();
            async move {
                if found {
                    Ok(TaskOutcome::ok())
                } else {
                    Ok(TaskOutcome::failed(format!("{program} not found on PATH")))
                }
            }
        },
    )
    .with_priority(priority::CHECK)
}

/// The [`priority::UPDATE`] task refreshing the package index, or `None`
/// when no package manager was detected.
#[must_use]
pub fn update_index_task(ctx: &Context) -> Option<Task> {
    let pm = ctx.platform.package_manager?;
    let (program, args) = privileged(&ctx.platform, pm, update_command(pm));
    let mut task = Task::new(
        update_task_id(ctx.platform.os, pm),
        format!("Update {pm} package index"),
        CommandAction::new(Arc::clone(&ctx.runner), program, &args),
    )
    .with_priority(priority::UPDATE);
    if program == "sudo" {
        task = task.depends_on(task_id(ctx.platform.os, "check", "sudo", None));
    }
    Some(task)
}

/// The [`priority::INSTALL`] task for `package`, depending on the index
/// update. `None` when no package manager was detected.
#[must_use]
pub fn install_package_task(ctx: &Context, package: &str) -> Option<Task> {
    let pm = ctx.platform.package_manager?;
    let install = install_command(pm, package);
    let (program, args) = privileged(&ctx.platform, pm, &install);
    Some(
        Task::new(
            install_task_id(ctx.platform.os, pm, package),
            format!("Install {package} ({pm})"),
            CommandAction::new(Arc::clone(&ctx.runner), program, &args),
        )
        .with_priority(priority::INSTALL)
        .depends_on(update_task_id(ctx.platform.os, pm)),
    )
}

/// Register everything needed to install `packages`: a sudo check when
/// elevating, the index update, and one install task per package.
///
/// Returns how many tasks were newly inserted; ids already present are
/// deduplicated by the registry.
///
/// # Errors
///
/// Returns an error if no supported package manager was detected.
pub fn register_packages(
    ctx: &Context,
    registry: &mut TaskRegistry,
    packages: &[String],
) -> Result<usize> {
    if packages.is_empty() {
        return Ok(0);
    }
    let Some(update) = update_index_task(ctx) else {
        bail!("no supported package manager found on {}", ctx.platform.os);
    };

    let mut inserted = 0;
    if update.dependencies().iter().any(|d| d.ends_with(":check:sudo")) {
        inserted += usize::from(registry.register(check_command_task(ctx, "sudo")));
    }
    inserted += usize::from(registry.register(update));
    for package in packages {
        if let Some(task) = install_package_task(ctx, package) {
            inserted += usize::from(registry.register(task));
        }
    }
    Ok(inserted)
}

/// Ask the package manager whether `package` is installed.
///
/// # Errors
///
/// Returns an error if no package manager was detected or the query command
/// cannot be started.
pub async fn is_package_installed(ctx: &Context, package: &str) -> Result<bool> {
    let Some(pm) = ctx.platform.package_manager else {
        bail!("no supported package manager found on {}", ctx.platform.os);
    };
    let query: Vec<&str> = match pm {
        PackageManager::Apt => vec!["dpkg", "-s", package],
        PackageManager::Dnf => vec!["rpm", "-q", package],
        PackageManager::Pacman => vec!["pacman", "-Q", package],
        PackageManager::Brew => vec!["brew", "list", "--versions", package],
        PackageManager::Winget => vec!["winget", "list", "--id", package, "--exact"],
    };
    let (program, args) = query.split_first().map_or(("", &[][..]), |(p, r)| (*p, r));
    let result = ctx.runner.run(program, args, &RunOptions::inherit()).await?;
    Ok(match pm {
        // `brew list --versions` exits 0 with empty output for unknown formulae
        PackageManager::Brew => result.success && !result.stdout.trim().is_empty(),
        // winget exits 0 with a "No installed package found" notice
        PackageManager::Winget => result.success && result.stdout.contains(package),
        _ => result.success,
    })
}

#[cfg(test)]
#[allow(clippy::expect_used, clippy::unwrap_used, clippy::indexing_slicing)]
mod tests {
    use super::*;
    use crate::test_helpers::{FakeRunner, apt_platform, failure, make_context, quiet_log, success};

    fn brew_platform() -> Platform {
        Platform::new(Os::MacOs, Some(PackageManager::Brew), false)
    }

    #[test]
    fn task_ids_encode_platform_and_operation() {
        assert_eq!(
            update_task_id(Os::Linux, PackageManager::Apt),
            "linux:apt:update"
        );
        assert_eq!(
            install_task_id(Os::Windows, PackageManager::Winget, "Git.Git"),
            "windows:winget:install:Git.Git"
        );
    }

    #[test]
    fn install_task_depends_on_update() {
        let (ctx, _) = make_context(FakeRunner::new(), apt_platform());
        let task = install_package_task(&ctx, "curl").unwrap();
        assert_eq!(task.id(), "linux:apt:install:curl");
        assert_eq!(task.priority(), priority::INSTALL);
        assert_eq!(task.dependencies(), &["linux:apt:update".to_string()]);
    }

    #[test]
    fn no_package_manager_means_no_tasks() {
        let (ctx, _) = make_context(FakeRunner::new(), Platform::new(Os::Linux, None, false));
        assert!(update_index_task(&ctx).is_none());
        assert!(install_package_task(&ctx, "curl").is_none());
    }

    #[tokio::test]
    async fn elevated_install_runs_through_sudo() {
        let (ctx, runner) = make_context(FakeRunner::new(), apt_platform());
        let task = install_package_task(&ctx, "curl").unwrap();
        let outcome = task.run().await.unwrap();
        assert!(outcome.success);
        assert_eq!(runner.calls(), vec!["sudo apt-get install -y curl"]);
    }

    #[tokio::test]
    async fn brew_update_is_not_elevated() {
        let (ctx, runner) = make_context(FakeRunner::new(), brew_platform());
        let task = update_index_task(&ctx).unwrap();
        assert!(task.dependencies().is_empty());
        task.run().await.unwrap();
        assert_eq!(runner.calls(), vec!["brew update"]);
    }

    #[tokio::test]
    async fn command_failure_is_unsuccessful_outcome() {
        let runner = FakeRunner::new().fail("sudo apt-get update", "could not get lock");
        let (ctx, _) = make_context(runner, apt_platform());
        let outcome = update_index_task(&ctx).unwrap().run().await.unwrap();
        assert!(!outcome.success);
        let message = outcome.message.unwrap();
        assert!(message.contains("exited 1"));
        assert!(message.contains("could not get lock"));
    }

    #[tokio::test]
    async fn hung_update_fails_its_task_and_skips_installs() {
        let runner = FakeRunner::new().time_out("sudo apt-get update");
        let (ctx, runner) = make_context(runner.with_programs(&["sudo"]), apt_platform());
        let mut registry = TaskRegistry::new();
        register_packages(&ctx, &mut registry, &["curl".to_string()]).unwrap();

        let report = registry.execute_all(&quiet_log()).await.unwrap();

        assert!(matches!(
            report.get("linux:apt:update"),
            Some(crate::tasks::TaskResult::Failed { reason }) if reason.contains("timed out")
        ));
        assert!(report.get("linux:apt:install:curl").unwrap().is_dependency_failure());
        assert!(!runner.calls().iter().any(|c| c.contains("install")));
    }

    #[tokio::test]
    async fn check_command_task_reports_missing_program() {
        let (ctx, _) = make_context(FakeRunner::new().with_programs(&["git"]), apt_platform());
        assert!(check_command_task(&ctx, "git").run().await.unwrap().success);
        let missing = check_command_task(&ctx, "sudo").run().await.unwrap();
        assert!(!missing.success);
        assert_eq!(check_command_task(&ctx, "git").priority(), priority::CHECK);
    }

    #[test]
    fn register_packages_deduplicates_shared_update() {
        let (ctx, _) = make_context(FakeRunner::new(), apt_platform());
        let mut registry = TaskRegistry::new();
        let first =
            register_packages(&ctx, &mut registry, &["curl".to_string(), "git".to_string()])
                .unwrap();
        let second =
            register_packages(&ctx, &mut registry, &["git".to_string(), "jq".to_string()])
                .unwrap();
        // check:sudo + update + curl + git
        assert_eq!(first, 4);
        // only jq is new
        assert_eq!(second, 1);
        assert!(registry.has("linux:check:sudo"));
        assert!(registry.has("linux:apt:install:jq"));
    }

    #[tokio::test]
    async fn registered_packages_run_check_update_then_installs() {
        let runner = FakeRunner::new().with_programs(&["sudo"]);
        let (ctx, runner) = make_context(runner, apt_platform());
        let mut registry = TaskRegistry::new();
        register_packages(&ctx, &mut registry, &["curl".to_string()]).unwrap();
        let report = registry.execute_all(&quiet_log()).await.unwrap();
        assert!(!report.has_failures());
        insta::assert_snapshot!(report.order().collect::<Vec<_>>().join("\n"), @r"
        linux:check:sudo
        linux:apt:update
        linux:apt:install:curl
        ");
        assert_eq!(
            runner.calls(),
            vec!["sudo apt-get update", "sudo apt-get install -y curl"]
        );
    }

    #[test]
    fn register_packages_without_manager_errors() {
        let (ctx, _) = make_context(FakeRunner::new(), Platform::new(Os::Linux, None, false));
        let mut registry = TaskRegistry::new();
        let err = register_packages(&ctx, &mut registry, &["curl".to_string()]).unwrap_err();
        assert!(err.to_string().contains("no supported package manager"));
        assert!(registry.is_empty());
    }

    #[tokio::test]
    async fn installed_query_per_manager() {
        let runner = FakeRunner::new()
            .respond("dpkg -s curl", vec![success("Status: install ok installed")])
            .respond("dpkg -s jq", vec![failure("not installed")]);
        let (ctx, _) = make_context(runner, apt_platform());
        assert!(is_package_installed(&ctx, "curl").await.unwrap());
        assert!(!is_package_installed(&ctx, "jq").await.unwrap());
    }

    #[tokio::test]
    async fn brew_empty_versions_means_missing() {
        let runner = FakeRunner::new().respond("brew list --versions wget", vec![success("")]);
        let (ctx, _) = make_context(runner, brew_platform());
        assert!(!is_package_installed(&ctx, "wget").await.unwrap());
    }
}
