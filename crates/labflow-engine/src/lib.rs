//! Workflow coordinator.
//!
//! [`Coordinator`] owns the project lock, the loaded workflow, the state
//! document and the snapshot store, and is the only writer of the latter two.
//! It runs at most one step at a time:
//!
//! - every run is preceded by a snapshot of the step's scope;
//! - a run succeeds only when the executable exits 0 *and* leaves its success
//!   marker behind; anything else restores the snapshot and discards it;
//! - [`Coordinator::undo`] walks the completion order backwards, restoring the
//!   snapshot taken before the most recent run (or the nearest surviving one).
//!
//! # Example
//!
//! ```rust,no_run
//! use labflow_config::Config;
//! use labflow_engine::Coordinator;
//! use std::collections::BTreeMap;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let config = Config::builder("/data/project").build()?;
//! let mut coordinator = Coordinator::open(config, false)?;
//! let outcome = coordinator.run_step("prep", &BTreeMap::new(), |bytes| {
//!     print!("{}", String::from_utf8_lossy(bytes));
//! })?;
//! println!("prep: {}", outcome.label());
//! # Ok(())
//! # }
//! ```

mod coordinator;
mod decisions;
mod diagnose;
mod launch;
mod outcome;
mod undo;
mod view;

pub use coordinator::{Coordinator, SnapshotSummary};
pub use diagnose::{DiagnoseOutput, Finding, FindingKind, Severity};
pub use outcome::{DecisionOutcome, RunOutcome, SkipReport, UndoKind, UndoReport};
pub use view::{RunningView, StepView, WorkflowView};
