//! Tracing setup and structured log helpers.

use std::time::Duration;
use tracing::{Level, info, span, warn};
use tracing_subscriber::{
    EnvFilter,
    fmt::{self, format::FmtSpan},
    layer::SubscriberExt,
    util::SubscriberInitExt,
};

/// Output format for the global subscriber.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum LogFormat {
    #[default]
    Compact,
    Json,
}

/// Install the global tracing subscriber.
///
/// `RUST_LOG` wins when set. Otherwise labflow's own targets log at `info`
/// (`debug` when verbose) and everything else at `warn`. Logs go to stderr so
/// they never interleave with step output on stdout.
pub fn init_tracing(verbose: bool, format: LogFormat) -> Result<(), Box<dyn std::error::Error>> {
    let env_filter = EnvFilter::try_from_default_env()
        .or_else(|_| {
            if verbose {
                EnvFilter::try_new("labflow=debug,labflow_engine=debug,labflow_snapshot=debug,labflow_runner=debug,info")
            } else {
                EnvFilter::try_new("labflow=info,labflow_engine=info,warn")
            }
        })
        .unwrap_or_else(|_| EnvFilter::new("info"));

    match format {
        LogFormat::Json => tracing_subscriber::registry()
            .with(env_filter)
            .with(fmt::layer().json().with_writer(std::io::stderr))
            .try_init()?,
        LogFormat::Compact => tracing_subscriber::registry()
            .with(env_filter)
            .with(
                fmt::layer()
                    .with_writer(std::io::stderr)
                    .with_target(verbose)
                    .with_thread_names(false)
                    .with_line_number(false)
                    .with_file(false)
                    .with_span_events(if verbose { FmtSpan::CLOSE } else { FmtSpan::NONE })
                    .compact(),
            )
            .try_init()?,
    }

    Ok(())
}

/// Span covering one run of one step.
pub fn run_span(step_id: &str, run: u32) -> tracing::Span {
    span!(Level::INFO, "step_run", step_id = %step_id, run = run)
}

pub fn log_run_start(step_id: &str, run: u32, command: &str) {
    info!(step_id = %step_id, run, command = %command, "starting step");
}

pub fn log_run_finished(step_id: &str, run: u32, outcome: &str, duration: Duration) {
    let duration_ms = duration.as_millis() as u64;
    if outcome == "completed" {
        info!(step_id = %step_id, run, duration_ms, "step completed");
    } else {
        warn!(step_id = %step_id, run, duration_ms, outcome = %outcome, "step did not complete; project rolled back");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_second_init_fails_without_panicking() {
        // Whichever call comes first in this process wins; the other must
        // report an error rather than panic.
        let first = init_tracing(false, LogFormat::Compact);
        let second = init_tracing(true, LogFormat::Json);
        assert!(first.is_err() || second.is_err());
    }

    #[test]
    fn test_run_span_is_constructible_without_subscriber() {
        let span = run_span("prep", 2);
        let _guard = span.enter();
        log_run_start("prep", 2, "bash prep.sh");
        log_run_finished("prep", 2, "failed", Duration::from_millis(5));
    }
}
