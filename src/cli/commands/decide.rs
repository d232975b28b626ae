//! `labflow decide <step> yes|no`

use anyhow::Result;

use labflow_config::Config;
use labflow_utils::exit_codes::ExitCode;
use labflow_utils::types::Decision;

use super::common;

pub fn execute_decide_command(
    config: Config,
    force_lock: bool,
    step: &str,
    answer: Decision,
) -> Result<ExitCode> {
    let mut coordinator = common::open_coordinator(config, force_lock)?;
    let outcome = coordinator.resolve_decision(step, answer)?;

    match outcome.answer {
        Decision::Yes => println!("✓ {step} is ready to run"),
        Decision::No => {
            println!("✗ Skipped by decision: {}", outcome.skipped.join(", "));
            if let Some(target) = &outcome.target_reset {
                println!("  {target} is pending again");
            }
        }
    }
    Ok(ExitCode::SUCCESS)
}
