//! Command implementations, one module per subcommand.
//!
//! Every handler returns the process exit code for a completed command, or
//! an error that `run()` reports.

mod common;
mod decide;
mod diagnose;
mod run_step;
mod skip_to;
mod snapshots;
mod status;
mod undo;
mod validate;

pub use decide::execute_decide_command;
pub use diagnose::execute_diagnose_command;
pub use run_step::execute_run_command;
pub use skip_to::execute_skip_to_command;
pub use snapshots::execute_snapshots_command;
pub use status::execute_status_command;
pub use undo::execute_undo_command;
pub use validate::execute_validate_command;
