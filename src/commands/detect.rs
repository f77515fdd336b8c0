//! Command: report which plugins are already satisfied.
use std::sync::Arc;

use anyhow::Result;

use super::{CommandSetup, print_json};
use crate::cli::{GlobalOpts, SelectOpts};
use crate::logging::Logger;
use crate::plugins::orchestrator::{DetectStatus, DetectSummary};

/// One table row per plugin.
#[must_use]
pub fn detect_lines(summaries: &[DetectSummary]) -> Vec<String> {
    let width = summaries.iter().map(|s| s.id.len()).max().unwrap_or(0);
    summaries
        .iter()
        .map(|s| {
            let status = match s.status {
                DetectStatus::Present => "✓ present",
                DetectStatus::Missing => "✗ missing",
                DetectStatus::Error => "! error",
            };
            let row = format!("{:<width$}  {:<9}  {status}", s.id, s.category.to_string());
            match &s.details {
                Some(details) => format!("{row}  {details}"),
                None => row,
            }
        })
        .collect()
}

/// Run the detect command.
///
/// # Errors
///
/// Returns an error if configuration loading or plugin wiring fails.
pub async fn run(global: &GlobalOpts, opts: &SelectOpts, log: &Arc<Logger>) -> Result<()> {
    let mut orchestrator = CommandSetup::init(global, &opts.only, log)?.into_orchestrator()?;
    let summaries = orchestrator.detect().await;

    if global.json {
        return print_json(&summaries);
    }
    for line in detect_lines(&summaries) {
        log.info(&line);
    }
    let missing = summaries
        .iter()
        .filter(|s| s.status != DetectStatus::Present)
        .count();
    log.info(&format!(
        "{} of {} plugin(s) satisfied",
        summaries.len() - missing,
        summaries.len()
    ));
    Ok(())
}
