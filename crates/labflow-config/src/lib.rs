//! Configuration for labflow.
//!
//! Precedence is CLI > `.labflow/config.toml` > built-in defaults, with the
//! origin of every effective value recorded for `labflow status --config`.

mod builder;
mod discovery;
mod model;
mod sources;
mod validation;

pub use builder::ConfigBuilder;
pub use discovery::discover_project_root;
pub use model::{
    CliArgs, Config, ConfigSource, LockSection, LoggingSection, RunnerSection, SnapshotSection,
    WorkflowSection, DEFAULT_GRACE_PERIOD_SECS, DEFAULT_LOCK_TTL_SECS, DEFAULT_POLL_INTERVAL_MS,
    DEFAULT_TRANSCRIPT_CAP_BYTES, MAX_GRACE_PERIOD_SECS,
};
