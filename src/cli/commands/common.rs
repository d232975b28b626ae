//! Helpers shared by the command handlers.

use anyhow::{Context, Result};
use crossterm::style::Stylize;
use crossterm::tty::IsTty;
use serde::Serialize;

use labflow_config::Config;
use labflow_engine::{Coordinator, RunOutcome};
use labflow_utils::types::StepStatus;

pub(super) fn open_coordinator(config: Config, force_lock: bool) -> Result<Coordinator> {
    Ok(Coordinator::open(config, force_lock)?)
}

pub(super) fn print_json<T: Serialize + ?Sized>(value: &T) -> Result<()> {
    let json = serde_json::to_string_pretty(value).context("Failed to emit JSON")?;
    println!("{json}");
    Ok(())
}

fn color_enabled() -> bool {
    std::io::stdout().is_tty() && std::env::var_os("NO_COLOR").is_none()
}

pub(super) fn status_label(status: StepStatus) -> String {
    let text = status.to_string();
    if !color_enabled() {
        return text;
    }
    match status {
        StepStatus::Completed => text.green().to_string(),
        StepStatus::AwaitingDecision => text.yellow().bold().to_string(),
        StepStatus::Skipped | StepStatus::SkippedByDecision => text.dark_grey().to_string(),
        StepStatus::Pending => text,
    }
}

/// One-line summary of a finished run, for stderr.
pub(super) fn outcome_line(step_id: &str, outcome: &RunOutcome) -> String {
    let run = outcome.run();
    let line = match outcome {
        RunOutcome::Completed { .. } => format!("✓ {step_id} run {run} completed"),
        RunOutcome::Failed { .. } => format!(
            "✗ {step_id} run {run} failed ({}); project rolled back",
            outcome.failure_reason().unwrap_or_default()
        ),
        RunOutcome::Terminated { .. } => format!("■ {step_id} run {run} terminated; project rolled back"),
    };
    if !std::io::stderr().is_tty() {
        return line;
    }
    match outcome {
        RunOutcome::Completed { .. } => line.green().to_string(),
        RunOutcome::Failed { .. } => line.red().to_string(),
        RunOutcome::Terminated { .. } => line.yellow().to_string(),
    }
}
