//! Command: run the full provisioning pipeline.
use std::sync::Arc;

use anyhow::Result;

use super::{CommandSetup, failure_count, print_json, print_summary};
use crate::cli::{GlobalOpts, SelectOpts};
use crate::logging::Logger;

/// Run the apply command.
///
/// # Errors
///
/// Returns an error if configuration loading or plugin wiring fails, if the
/// system tasks cannot be ordered, or if any task or plugin failed.
pub async fn run(global: &GlobalOpts, opts: &SelectOpts, log: &Arc<Logger>) -> Result<()> {
    let version = super::version::current();
    log.info(&format!("provision {version}"));

    let mut orchestrator = CommandSetup::init(global, &opts.only, log)?.into_orchestrator()?;
    log.info(&format!(
        "plugin order: {}",
        orchestrator.order().collect::<Vec<_>>().join(" → ")
    ));

    let report = orchestrator.run().await?;

    if global.json {
        print_json(&report)?;
    } else {
        print_summary(&report, log);
    }

    let count = failure_count(&report);
    if count > 0 {
        anyhow::bail!("{count} task(s) or plugin(s) failed");
    }
    Ok(())
}
