//! `labflow snapshots`

use anyhow::Result;

use labflow_config::Config;
use labflow_utils::exit_codes::ExitCode;

use super::common;

pub fn execute_snapshots_command(config: Config, force_lock: bool, json: bool) -> Result<ExitCode> {
    let coordinator = common::open_coordinator(config, force_lock)?;
    let snapshots = coordinator.list_snapshots()?;

    if json {
        common::print_json(&snapshots)?;
        return Ok(ExitCode::SUCCESS);
    }
    if snapshots.is_empty() {
        println!("No snapshots");
        return Ok(ExitCode::SUCCESS);
    }
    let width = snapshots.iter().map(|s| s.key.len()).max().unwrap_or(0);
    for s in &snapshots {
        println!(
            "{:<width$}  {}  {:>6} entries  {:>10} bytes",
            s.key,
            s.created_at.format("%Y-%m-%d %H:%M:%S"),
            s.entries,
            s.bytes
        );
    }
    Ok(ExitCode::SUCCESS)
}
