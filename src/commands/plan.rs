//! Command: show what a run would do without running it.
use std::sync::Arc;

use anyhow::Result;

use super::{CommandSetup, print_json};
use crate::cli::{GlobalOpts, SelectOpts};
use crate::logging::Logger;
use crate::plugins::orchestrator::Plan;

/// Plugin order followed by the deduplicated task order.
#[must_use]
pub fn plan_lines(plan: &Plan) -> Vec<String> {
    let mut lines = vec![format!("plugins: {}", plan.plugins.join(" → "))];
    if plan.tasks.is_empty() {
        lines.push("no system tasks".to_string());
        return lines;
    }
    lines.push("system tasks:".to_string());
    for (n, task) in plan.tasks.iter().enumerate() {
        let row = format!("  {:>2}. [{:>3}] {}", n + 1, task.priority, task.id);
        lines.push(if task.depends_on.is_empty() {
            row
        } else {
            format!("{row} (after {})", task.depends_on.join(", "))
        });
    }
    lines
}

/// Run the plan command.
///
/// # Errors
///
/// Returns an error if configuration loading or plugin wiring fails, or the
/// system tasks cannot be ordered.
pub async fn run(global: &GlobalOpts, opts: &SelectOpts, log: &Arc<Logger>) -> Result<()> {
    let mut orchestrator = CommandSetup::init(global, &opts.only, log)?.into_orchestrator()?;
    let plan = orchestrator.plan().await?;

    for summary in plan.register.iter().filter(|s| !s.ok) {
        log.warn(&format!(
            "{}: task registration failed: {}",
            summary.id,
            summary.message.as_deref().unwrap_or("no details")
        ));
    }

    if global.json {
        return print_json(&plan);
    }
    log.stage("Plan");
    for line in plan_lines(&plan) {
        log.info(&line);
    }
    Ok(())
}
