//! Command-line interface definition.
use clap::{Parser, Subcommand};

/// Top-level CLI entry point for the provisioning engine.
#[derive(Parser, Debug)]
#[command(
    name = "provision",
    about = "Provision a developer machine from a declarative plugin list",
    version
)]
pub struct Cli {
    /// Subcommand to run.
    #[command(subcommand)]
    pub command: Command,

    /// Enable verbose output
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Options shared by every subcommand.
    #[command(flatten)]
    pub global: GlobalOpts,
}

/// Options shared across all subcommands.
#[derive(Parser, Debug, Clone)]
pub struct GlobalOpts {
    /// Configuration file (defaults to `$PROVISION_CONFIG`, then `./provision.toml`)
    #[arg(short, long, global = true)]
    pub config: Option<std::path::PathBuf>,

    /// Print the report as JSON instead of a table
    #[arg(long, global = true)]
    pub json: bool,
}

/// Available subcommands.
#[derive(Subcommand, Debug)]
pub enum Command {
    /// Run every lifecycle phase for the configured plugins
    Apply(SelectOpts),
    /// Report which plugins are already satisfied
    Detect(SelectOpts),
    /// Show plugin and task order without changing anything
    Plan(SelectOpts),
    /// Print version information
    Version,
}

/// Plugin selection for a subcommand.
#[derive(Parser, Debug, Clone, Default)]
pub struct SelectOpts {
    /// Run only these plugins (and the plugins they depend on)
    #[arg(long, value_delimiter = ',')]
    pub only: Vec<String>,
}

impl Command {
    /// Name used for the per-command log file.
    #[must_use]
    pub const fn name(&self) -> &'static str {
        match self {
            Self::Apply(_) => "apply",
            Self::Detect(_) => "detect",
            Self::Plan(_) => "plan",
            Self::Version => "version",
        }
    }
}
