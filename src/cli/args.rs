//! CLI argument definitions (clap derive).

use clap::{Parser, Subcommand};
use std::path::PathBuf;

use labflow_utils::types::Decision;

/// labflow - run laboratory workflows step by step, with undo
#[derive(Parser, Debug)]
#[command(name = "labflow")]
#[command(about = "Run laboratory workflow steps with per-run snapshots and precise undo")]
#[command(long_about = r#"
labflow runs the steps of a YAML workflow one at a time inside a project
directory. Every run is preceded by a snapshot; a run only counts when its
executable exits 0 AND creates its success marker. Anything else rolls the
project back.

EXAMPLES:
  # Show every step and what can run next
  labflow status

  # Run a step, passing a declared input
  labflow run normalize --input plate=data/plate1.csv

  # Undo the most recent completed step, decision or skip
  labflow undo

  # Answer the prompt of a conditional step
  labflow decide review no

  # Check state, markers and snapshots for inconsistencies
  labflow diagnose --json

CONFIGURATION:
  Precedence: CLI flags > .labflow/config.toml (or --config) > defaults
  The project root is the nearest ancestor holding .labflow/ or workflow.yml,
  unless --project is given.
"#)]
#[command(version)]
pub struct Cli {
    /// Project directory (default: discovered from the current directory)
    #[arg(long, global = true)]
    pub project: Option<PathBuf>,

    /// Path to configuration file (overrides .labflow/config.toml)
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Workflow definition, relative to the project root
    #[arg(long, global = true)]
    pub definition: Option<String>,

    /// Seconds between SIGTERM and SIGKILL when terminating a step
    #[arg(long, global = true)]
    pub grace_period: Option<u64>,

    /// Do not write per-run transcripts to .labflow/logs
    #[arg(long, global = true)]
    pub no_transcripts: bool,

    /// Extra snapshot exclude glob (repeatable)
    #[arg(long = "exclude", global = true)]
    pub exclude: Vec<String>,

    /// Take over a project lock even if it looks live
    #[arg(long, global = true)]
    pub force_lock: bool,

    /// Enable verbose output
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Emit logs as JSON lines on stderr
    #[arg(long, global = true)]
    pub log_json: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Show step statuses and the completion order
    Status {
        /// Output as JSON
        #[arg(long)]
        json: bool,

        /// Also print the effective configuration and where each value came from
        #[arg(long)]
        show_config: bool,
    },

    /// Run one step, streaming its terminal output
    ///
    /// Lines typed on stdin are forwarded to the step. Ctrl-C terminates the
    /// step's whole process tree and rolls the project back.
    Run {
        /// Step id
        step: String,

        /// Declared input as NAME=VALUE (repeatable)
        #[arg(long = "input", short = 'i', value_parser = parse_input)]
        inputs: Vec<(String, String)>,
    },

    /// Undo the most recent completion-order entry
    Undo {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },

    /// Skip every pending step before the given one
    SkipTo {
        /// Step to skip ahead to
        step: String,
    },

    /// Answer the prompt of a step awaiting a decision
    Decide {
        /// Step id
        step: String,

        /// yes or no
        answer: Decision,
    },

    /// Report inconsistencies between state, markers and snapshots
    Diagnose {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },

    /// List snapshots on disk
    Snapshots {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },

    /// Load and validate the workflow definition without touching the project
    Validate,
}

fn parse_input(raw: &str) -> Result<(String, String), String> {
    match raw.split_once('=') {
        Some((name, value)) if !name.trim().is_empty() => Ok((name.trim().to_string(), value.to_string())),
        _ => Err(format!("expected NAME=VALUE, got '{raw}'")),
    }
}

/// Build the clap command, for tests and completions.
#[must_use]
pub fn build_cli() -> clap::Command {
    <Cli as clap::CommandFactory>::command()
}
