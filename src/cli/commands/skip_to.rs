//! `labflow skip-to <step>`

use anyhow::Result;

use labflow_config::Config;
use labflow_utils::exit_codes::ExitCode;

use super::common;

pub fn execute_skip_to_command(config: Config, force_lock: bool, target: &str) -> Result<ExitCode> {
    let mut coordinator = common::open_coordinator(config, force_lock)?;
    let report = coordinator.skip_to_step(target)?;

    if report.skipped.is_empty() {
        println!("Nothing to skip before {target}");
    } else {
        println!("⇥ Skipped {}", report.skipped.join(", "));
    }
    if let Some(name) = &report.safety_snapshot {
        println!("  safety snapshot: {name}");
    }
    Ok(ExitCode::SUCCESS)
}
