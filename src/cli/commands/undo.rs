//! `labflow undo`

use anyhow::Result;

use labflow_config::Config;
use labflow_engine::{UndoKind, UndoReport};
use labflow_utils::exit_codes::ExitCode;

use super::common;

pub fn execute_undo_command(config: Config, force_lock: bool, json: bool) -> Result<ExitCode> {
    let mut coordinator = common::open_coordinator(config, force_lock)?;
    let report = coordinator.undo()?;

    if json {
        common::print_json(&report)?;
    } else {
        print_report(&report);
    }
    Ok(ExitCode::SUCCESS)
}

fn print_report(report: &UndoReport) {
    let what = match report.kind {
        UndoKind::Run { run } => format!("run {run} of {}", report.step_id),
        UndoKind::Decision => format!("the decision on {}", report.step_id),
        UndoKind::Skip => format!("the skip of {}", report.step_id),
    };
    match &report.restored {
        Some(key) => println!("↶ Undid {what} (restored {key})"),
        None => println!("↶ Undid {what}"),
    }
    if report.degraded {
        println!("  ! the expected snapshot was missing; an earlier restore point was used");
    }
    if !report.also_undone.is_empty() {
        println!("  also undone: {}", report.also_undone.join(", "));
    }
    println!("  {} is now {}", report.step_id, common::status_label(report.status_after));
}
