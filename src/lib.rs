//! labflow - laboratory workflows with per-run snapshots and precise undo
//!
//! A workflow is a YAML list of steps, each an executable run inside the
//! project directory. labflow runs one step at a time on a pseudo-terminal,
//! snapshots the project before every run, and counts a run as successful
//! only when the executable exits 0 *and* creates its success marker. Failed
//! and terminated runs are rolled back; completed ones can be undone in
//! reverse completion order.
//!
//! labflow can be used in two ways:
//! - **CLI**: `labflow status`, `labflow run <step>`, `labflow undo`, ...
//! - **Library**: drive a [`Coordinator`] directly
//!
//! # Quick Start (CLI)
//!
//! ```bash
//! labflow validate
//! labflow run prep --input plate=data/plate1.csv
//! labflow status --json
//! labflow undo
//! ```
//!
//! # Quick Start (Library)
//!
//! ```rust,no_run
//! use labflow::{Config, Coordinator, StepStatus};
//! use std::collections::BTreeMap;
//!
//! # fn main() -> Result<(), labflow::LabflowError> {
//! let config = Config::builder("/data/project").build()?;
//! let mut coordinator = Coordinator::open(config, false)?;
//! let outcome = coordinator.run_step("prep", &BTreeMap::new(), |_| {})?;
//! if outcome.is_success() {
//!     assert_eq!(coordinator.status("prep")?, StepStatus::Completed);
//! }
//! # Ok(())
//! # }
//! ```
//!
//! # Stable Public API
//!
//! The re-exports below are stable for 0.x minor releases. The member crates
//! are reachable through their module paths but are `#[doc(hidden)]`.

pub mod cli;

pub use labflow_config::{CliArgs, Config, ConfigBuilder, ConfigSource};
pub use labflow_engine::{
    Coordinator, DecisionOutcome, DiagnoseOutput, Finding, FindingKind, RunOutcome, RunningView,
    Severity, SkipReport, SnapshotSummary, StepView, UndoKind, UndoReport, WorkflowView,
};
pub use labflow_utils::error::{LabflowError, UserFriendlyError};
pub use labflow_utils::exit_codes::ExitCode;
pub use labflow_utils::types::{Decision, StepStatus};
pub use labflow_workflow::{Conditional, InputSpec, Step, Workflow};

#[doc(hidden)]
pub use labflow_lock as lock;
#[doc(hidden)]
pub use labflow_runner as runner;
#[doc(hidden)]
pub use labflow_snapshot as snapshot;
#[doc(hidden)]
pub use labflow_state as state;
#[doc(hidden)]
pub use labflow_utils as utils;
