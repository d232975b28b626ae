//! Command-line interface for labflow.
//!
//! - `args`: clap definitions
//! - `run`: entry point, configuration discovery and dispatch
//! - `commands`: one module per subcommand

pub mod args;
mod commands;
mod run;

pub use args::{Cli, Commands, build_cli};
pub use run::run;
