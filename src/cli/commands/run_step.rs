//! `labflow run <step>`
//!
//! Drives one run on a current-thread runtime: PTY output is copied to
//! stdout on every poll tick, stdin lines are forwarded to the step, and
//! Ctrl-C terminates the step and rolls the project back.

use anyhow::{Context, Result};
use std::collections::BTreeMap;
use std::io::Write;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::time::MissedTickBehavior;

use labflow_config::Config;
use labflow_engine::{Coordinator, RunOutcome};
use labflow_utils::exit_codes::ExitCode;

use super::common;

pub fn execute_run_command(
    config: Config,
    force_lock: bool,
    step: &str,
    inputs: Vec<(String, String)>,
) -> Result<ExitCode> {
    let mut coordinator = common::open_coordinator(config, force_lock)?;
    let inputs: BTreeMap<String, String> = inputs.into_iter().collect();

    let rt = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .context("Failed to create async runtime")?;
    let result = rt.block_on(drive(&mut coordinator, step, &inputs));
    // The stdin reader may still be parked in a blocking read.
    rt.shutdown_background();

    let outcome = result?;
    eprintln!("{}", common::outcome_line(step, &outcome));
    Ok(outcome.exit_code())
}

async fn drive(
    coordinator: &mut Coordinator,
    step: &str,
    inputs: &BTreeMap<String, String>,
) -> Result<RunOutcome> {
    let run = coordinator.start_step(step, inputs)?;
    eprintln!("▶ {step} run {run}");

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut stdin_open = true;
    let mut tick = tokio::time::interval(coordinator.config().poll_interval());
    tick.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);

    loop {
        tokio::select! {
            _ = &mut ctrl_c => {
                eprintln!();
                tracing::info!(step_id = %step, "interrupt received; terminating step");
                let outcome = coordinator.terminate_running(step)?;
                forward(&coordinator.read_output())?;
                return Ok(outcome);
            }
            line = lines.next_line(), if stdin_open => {
                match line {
                    Ok(Some(mut line)) => {
                        line.push('\n');
                        if let Err(e) = coordinator.send_input(step, line.as_bytes()) {
                            tracing::warn!(error = %e, "input not delivered");
                        }
                    }
                    Ok(None) => stdin_open = false,
                    Err(e) => {
                        tracing::warn!(error = %e, "stdin closed");
                        stdin_open = false;
                    }
                }
            }
            _ = tick.tick() => {
                forward(&coordinator.read_output())?;
                if let Some(outcome) = coordinator.poll_run()? {
                    forward(&coordinator.read_output())?;
                    return Ok(outcome);
                }
            }
        }
    }
}

fn forward(bytes: &[u8]) -> Result<()> {
    if bytes.is_empty() {
        return Ok(());
    }
    let mut out = std::io::stdout().lock();
    out.write_all(bytes).context("Failed to write step output")?;
    out.flush().context("Failed to flush step output")?;
    Ok(())
}
