//! `labflow diagnose`

use anyhow::Result;

use labflow_config::Config;
use labflow_engine::{DiagnoseOutput, Severity};
use labflow_utils::exit_codes::ExitCode;

use super::common;

/// Exits non-zero when any finding is a failure.
pub fn execute_diagnose_command(config: Config, force_lock: bool, json: bool) -> Result<ExitCode> {
    let coordinator = common::open_coordinator(config, force_lock)?;
    let output = coordinator.diagnose()?;

    if json {
        common::print_json(&output)?;
    } else {
        print_findings(&output);
    }
    Ok(if output.ok { ExitCode::SUCCESS } else { ExitCode::INTERNAL })
}

fn print_findings(output: &DiagnoseOutput) {
    if output.findings.is_empty() {
        println!("✓ State, markers and snapshots are consistent");
        return;
    }
    for finding in &output.findings {
        let mark = match finding.severity {
            Severity::Warn => "⚠",
            Severity::Fail => "✗",
        };
        println!("{mark} {}", finding.details);
    }
    if !output.ok {
        println!();
        println!("Recorded progress is inconsistent. Nothing was changed; fix the state by hand or undo.");
    }
}
