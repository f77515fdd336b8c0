use std::sync::Arc;

use anyhow::Result;
use clap::Parser;

use provision_cli::{cli, commands, logging};

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    let _ = enable_ansi_support::enable_ansi_support();
    let args = cli::Cli::parse();
    if matches!(args.command, cli::Command::Version) {
        commands::version::run();
        return Ok(());
    }

    let name = args.command.name();
    logging::init_subscriber(args.verbose, args.global.json, name);
    let log = Arc::new(logging::Logger::new(name));

    match &args.command {
        cli::Command::Apply(opts) => commands::apply::run(&args.global, opts, &log).await,
        cli::Command::Detect(opts) => commands::detect::run(&args.global, opts, &log).await,
        cli::Command::Plan(opts) => commands::plan::run(&args.global, opts, &log).await,
        cli::Command::Version => Ok(()),
    }
}
