use std::fmt;
use thiserror::Error;

use crate::step_id::StepIdError;
use crate::types::StepStatus;
pub use labflow_lock::LockError;
pub use labflow_runner::RunnerError;

/// Library-level error type.
///
/// Every labflow crate returns one of the concern-specific enums below; the
/// coordinator and CLI aggregate them here. Library code never calls
/// `std::process::exit()`; the CLI maps errors with
/// [`to_exit_code()`](Self::to_exit_code) and prints
/// [`display_for_user()`](Self::display_for_user).
///
/// Note that a step that runs and fails verification, or that the operator
/// terminates, is not an error: both are ordinary run outcomes after which the
/// project has been rolled back.
#[derive(Error, Debug)]
pub enum LabflowError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Workflow definition error: {0}")]
    Definition(#[from] DefinitionError),

    #[error("State store error: {0}")]
    State(#[from] StateError),

    #[error("Snapshot error: {0}")]
    Snapshot(#[from] SnapshotError),

    #[error("Step error: {0}")]
    Step(#[from] StepError),

    #[error("Process session error: {0}")]
    Runner(#[from] RunnerError),

    #[error("Project lock error: {0}")]
    Lock(#[from] LockError),

    #[error("Step ID error: {0}")]
    StepId(#[from] StepIdError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T, E = LabflowError> = std::result::Result<T, E>;

/// User-facing reporting with context and suggestions.
pub trait UserFriendlyError {
    fn user_message(&self) -> String;

    fn context(&self) -> Option<String>;

    fn suggestions(&self) -> Vec<String>;

    fn category(&self) -> ErrorCategory;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    Configuration,
    Definition,
    StepExecution,
    Snapshot,
    FileSystem,
    Concurrency,
    Validation,
}

impl fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Configuration => write!(f, "Configuration"),
            Self::Definition => write!(f, "Workflow Definition"),
            Self::StepExecution => write!(f, "Step Execution"),
            Self::Snapshot => write!(f, "Snapshot"),
            Self::FileSystem => write!(f, "File System"),
            Self::Concurrency => write!(f, "Concurrency"),
            Self::Validation => write!(f, "Validation"),
        }
    }
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Invalid configuration file: {0}")]
    InvalidFile(String),

    #[error("Invalid configuration value for {key}: {value}")]
    InvalidValue { key: String, value: String },

    #[error("Configuration file not found at {path}")]
    NotFound { path: String },

    #[error("Invalid exclude pattern '{pattern}': {reason}")]
    InvalidGlob { pattern: String, reason: String },
}

/// Structural problems in the workflow definition. Fatal at load.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DefinitionError {
    #[error("Workflow definition not found at {path}")]
    NotFound { path: String },

    #[error("Failed to parse workflow definition {path}: {reason}")]
    Parse { path: String, reason: String },

    #[error("Workflow defines no steps")]
    EmptyWorkflow,

    #[error("Step #{index} is missing required field '{field}'")]
    MissingField { index: usize, field: &'static str },

    #[error("Step '{id}' has an invalid id: {reason}")]
    InvalidStepId { id: String, reason: String },

    #[error("Duplicate step id '{id}'")]
    DuplicateStepId { id: String },

    #[error("Step '{step}' {field} refers to unknown step '{target}'")]
    DanglingReference {
        step: String,
        field: &'static str,
        target: String,
    },

    #[error("Step '{step}' {field} refers to itself")]
    SelfReference { step: String, field: &'static str },

    #[error("Step '{step}' has a conditional block with neither trigger_step nor depends_on")]
    EmptyConditional { step: String },

    #[error("Step '{step}' has an invalid snapshot scope '{path}': {reason}")]
    InvalidScope {
        step: String,
        path: String,
        reason: String,
    },

    #[error("Step '{step}' declares input '{name}' more than once")]
    DuplicateInput { step: String, name: String },
}

#[derive(Error, Debug)]
pub enum StateError {
    #[error("Failed to read state document {path}: {reason}")]
    Read { path: String, reason: String },

    #[error("State document {path} is corrupted: {reason}")]
    Corrupted { path: String, reason: String },

    #[error("Failed to persist state document {path}: {reason}")]
    Persist { path: String, reason: String },

    #[error("State document schema {found} is not supported (expected {expected})")]
    UnsupportedSchema { found: u32, expected: u32 },
}

#[derive(Error, Debug)]
pub enum SnapshotError {
    #[error("Snapshot '{key}' does not exist")]
    NotFound { key: String },

    #[error("No restore point available to undo step '{step_id}': {detail}")]
    NoRestorePoint { step_id: String, detail: String },

    #[error("Invalid snapshot key '{key}'")]
    InvalidKey { key: String },

    #[error("Failed to capture snapshot '{key}': {reason}")]
    Capture { key: String, reason: String },

    #[error("Failed to restore snapshot '{key}': {reason}")]
    Restore { key: String, reason: String },

    #[error("Snapshot '{key}' is corrupted: {reason}")]
    Corrupted { key: String, reason: String },
}

/// Requests the coordinator refuses given the current state.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StepError {
    #[error("Unknown step '{id}'")]
    UnknownStep { id: String },

    #[error("Step '{id}' cannot run while {status}")]
    NotRunnable { id: String, status: StepStatus },

    #[error("Step '{running}' is still running")]
    AlreadyRunning { running: String },

    #[error("No run is active for step '{id}'")]
    NoActiveRun { id: String },

    #[error("No step is running")]
    Idle,

    #[error("Step '{id}' is {status}, not awaiting a decision")]
    NotAwaitingDecision { id: String, status: StepStatus },

    #[error("Nothing to undo")]
    NothingToUndo,

    #[error("Step '{step}' requires input '{input}'")]
    MissingInput { step: String, input: String },

    #[error("Step '{step}' has no input named '{input}'")]
    UnknownInput { step: String, input: String },

    #[error("Executable '{program}' for step '{step}' was not found")]
    ExecutableNotFound { step: String, program: String },
}

impl UserFriendlyError for ConfigError {
    fn user_message(&self) -> String {
        match self {
            Self::InvalidFile(reason) => format!("The configuration file could not be read: {reason}"),
            Self::InvalidValue { key, value } => format!("Configuration key '{key}' has an invalid value '{value}'"),
            Self::NotFound { path } => format!("No configuration file at {path}"),
            Self::InvalidGlob { pattern, .. } => format!("Snapshot exclude pattern '{pattern}' is not a valid glob"),
        }
    }

    fn context(&self) -> Option<String> {
        Some("Configuration is read from .labflow/config.toml; CLI flags override file values.".to_string())
    }

    fn suggestions(&self) -> Vec<String> {
        match self {
            Self::InvalidFile(_) => vec!["Check the TOML syntax of .labflow/config.toml".to_string()],
            Self::InvalidValue { key, .. } => vec![format!("Fix or remove '{key}' to fall back to the default")],
            Self::NotFound { .. } => vec!["Pass an existing file to --config or omit the flag".to_string()],
            Self::InvalidGlob { reason, .. } => vec![format!("Glob error: {reason}")],
        }
    }

    fn category(&self) -> ErrorCategory {
        ErrorCategory::Configuration
    }
}

impl UserFriendlyError for DefinitionError {
    fn user_message(&self) -> String {
        self.to_string()
    }

    fn context(&self) -> Option<String> {
        Some("The workflow definition is validated in full before any step can run.".to_string())
    }

    fn suggestions(&self) -> Vec<String> {
        match self {
            Self::NotFound { .. } => vec![
                "Create workflow.yml in the project root or pass --definition".to_string(),
            ],
            Self::Parse { .. } => vec!["Check the YAML syntax of the definition".to_string()],
            Self::EmptyWorkflow => vec!["Add at least one entry under 'steps:'".to_string()],
            Self::MissingField { field, .. } => vec![format!("Add '{field}:' to the step")],
            Self::InvalidStepId { .. } => vec![
                "Step ids start with a letter or digit and use only A-Z, a-z, 0-9, '.', '_' and '-'".to_string(),
            ],
            Self::DuplicateStepId { .. } => vec!["Give every step a unique id".to_string()],
            Self::DanglingReference { .. } | Self::SelfReference { .. } => vec![
                "Conditional references must name another step defined in the same workflow".to_string(),
            ],
            Self::EmptyConditional { .. } => vec![
                "Add trigger_step (with prompt and target_step) or depends_on, or remove the conditional block".to_string(),
            ],
            Self::InvalidScope { .. } => vec![
                "Snapshot scopes are relative paths inside the project, e.g. 'data' or '.'".to_string(),
            ],
            Self::DuplicateInput { .. } => vec!["Rename or remove the repeated input".to_string()],
        }
    }

    fn category(&self) -> ErrorCategory {
        ErrorCategory::Definition
    }
}

impl UserFriendlyError for StateError {
    fn user_message(&self) -> String {
        match self {
            Self::Read { path, .. } | Self::Persist { path, .. } => {
                format!("Workflow progress at {path} could not be accessed")
            }
            Self::Corrupted { path, .. } => format!("Workflow progress at {path} is unreadable"),
            Self::UnsupportedSchema { found, .. } => {
                format!("Workflow progress was written by an incompatible labflow (schema {found})")
            }
        }
    }

    fn context(&self) -> Option<String> {
        Some(self.to_string())
    }

    fn suggestions(&self) -> Vec<String> {
        match self {
            Self::Persist { .. } => vec![
                "Check free disk space and permissions on .labflow/".to_string(),
            ],
            Self::Corrupted { .. } => vec![
                "Run 'labflow diagnose' to inspect the project".to_string(),
                "Restore .labflow/state.json from a backup if available".to_string(),
            ],
            Self::Read { .. } | Self::UnsupportedSchema { .. } => vec![],
        }
    }

    fn category(&self) -> ErrorCategory {
        ErrorCategory::FileSystem
    }
}

impl UserFriendlyError for SnapshotError {
    fn user_message(&self) -> String {
        match self {
            Self::NoRestorePoint { step_id, .. } => {
                format!("Cannot undo '{step_id}': no snapshot to restore from")
            }
            other => other.to_string(),
        }
    }

    fn context(&self) -> Option<String> {
        match self {
            Self::NoRestorePoint { detail, .. } => Some(detail.clone()),
            _ => Some("Snapshots live under .labflow/snapshots/".to_string()),
        }
    }

    fn suggestions(&self) -> Vec<String> {
        match self {
            Self::NoRestorePoint { .. } => vec![
                "Nothing was changed; the project is as it was before the undo request".to_string(),
                "Run 'labflow snapshots' to list the restore points that exist".to_string(),
            ],
            Self::Corrupted { .. } => vec!["Run 'labflow diagnose' to find damaged snapshots".to_string()],
            _ => vec![],
        }
    }

    fn category(&self) -> ErrorCategory {
        ErrorCategory::Snapshot
    }
}

impl UserFriendlyError for StepError {
    fn user_message(&self) -> String {
        self.to_string()
    }

    fn context(&self) -> Option<String> {
        None
    }

    fn suggestions(&self) -> Vec<String> {
        match self {
            Self::UnknownStep { .. } => vec!["Run 'labflow status' to list step ids".to_string()],
            Self::NotRunnable { status, .. } => match status {
                StepStatus::Completed => vec!["Set 'allow_rerun: true' on the step or undo it first".to_string()],
                StepStatus::AwaitingDecision => vec!["Answer the pending decision with 'labflow decide'".to_string()],
                _ => vec!["Undo back to this step to run it again".to_string()],
            },
            Self::AlreadyRunning { .. } => vec!["Wait for the running step or terminate it".to_string()],
            Self::NotAwaitingDecision { .. } => vec![],
            Self::NothingToUndo => vec!["No step has been completed or skipped yet".to_string()],
            Self::MissingInput { input, .. } => vec![format!("Pass --input {input}=<path>")],
            Self::UnknownInput { .. } | Self::NoActiveRun { .. } | Self::Idle => vec![],
            Self::ExecutableNotFound { program, .. } => vec![
                format!("Install '{program}' or set an interpreter for the step"),
            ],
        }
    }

    fn category(&self) -> ErrorCategory {
        ErrorCategory::StepExecution
    }
}

impl UserFriendlyError for RunnerError {
    fn user_message(&self) -> String {
        match self {
            Self::SpawnFailed { program, .. } => format!("Could not start '{program}'"),
            other => other.to_string(),
        }
    }

    fn context(&self) -> Option<String> {
        match self {
            Self::SpawnFailed { reason, .. } => Some(reason.clone()),
            _ => None,
        }
    }

    fn suggestions(&self) -> Vec<String> {
        match self {
            Self::SpawnFailed { .. } => vec![
                "Check that the script exists and is executable, or set its interpreter".to_string(),
            ],
            Self::Unsupported { .. } => vec!["Run labflow on Linux or macOS".to_string()],
            _ => vec![],
        }
    }

    fn category(&self) -> ErrorCategory {
        ErrorCategory::StepExecution
    }
}

impl UserFriendlyError for LockError {
    fn user_message(&self) -> String {
        match self {
            Self::Held { pid, .. } => format!("Another labflow process (PID {pid}) is working on this project"),
            Self::Stale { pid, .. } => format!("A previous labflow process (PID {pid}) left its lock behind"),
            other => other.to_string(),
        }
    }

    fn context(&self) -> Option<String> {
        Some("Only one labflow process may operate on a project directory at a time.".to_string())
    }

    fn suggestions(&self) -> Vec<String> {
        match self {
            Self::Held { .. } => vec!["Wait for the other process to finish".to_string()],
            Self::Stale { .. } | Self::Corrupted { .. } => vec!["Re-run with --force to take over the lock".to_string()],
            _ => vec![],
        }
    }

    fn category(&self) -> ErrorCategory {
        ErrorCategory::Concurrency
    }
}

impl UserFriendlyError for LabflowError {
    fn user_message(&self) -> String {
        match self {
            Self::Config(e) => e.user_message(),
            Self::Definition(e) => e.user_message(),
            Self::State(e) => e.user_message(),
            Self::Snapshot(e) => e.user_message(),
            Self::Step(e) => e.user_message(),
            Self::Runner(e) => e.user_message(),
            Self::Lock(e) => e.user_message(),
            Self::StepId(e) => e.user_message(),
            Self::Io(e) => format!("File system operation failed: {e}"),
        }
    }

    fn context(&self) -> Option<String> {
        match self {
            Self::Config(e) => e.context(),
            Self::Definition(e) => e.context(),
            Self::State(e) => e.context(),
            Self::Snapshot(e) => e.context(),
            Self::Step(e) => e.context(),
            Self::Runner(e) => e.context(),
            Self::Lock(e) => e.context(),
            Self::StepId(e) => e.context(),
            Self::Io(_) => None,
        }
    }

    fn suggestions(&self) -> Vec<String> {
        match self {
            Self::Config(e) => e.suggestions(),
            Self::Definition(e) => e.suggestions(),
            Self::State(e) => e.suggestions(),
            Self::Snapshot(e) => e.suggestions(),
            Self::Step(e) => e.suggestions(),
            Self::Runner(e) => e.suggestions(),
            Self::Lock(e) => e.suggestions(),
            Self::StepId(e) => e.suggestions(),
            Self::Io(_) => vec!["Check file permissions and free disk space".to_string()],
        }
    }

    fn category(&self) -> ErrorCategory {
        match self {
            Self::Config(e) => e.category(),
            Self::Definition(e) => e.category(),
            Self::State(e) => e.category(),
            Self::Snapshot(e) => e.category(),
            Self::Step(e) => e.category(),
            Self::Runner(e) => e.category(),
            Self::Lock(e) => e.category(),
            Self::StepId(e) => e.category(),
            Self::Io(_) => ErrorCategory::FileSystem,
        }
    }
}

impl LabflowError {
    /// Message, context and suggestions formatted for a terminal.
    #[must_use]
    pub fn display_for_user(&self) -> String {
        let mut output = format!("Error: {}\n", self.user_message());
        if let Some(ctx) = self.context() {
            output.push_str(&format!("\nContext: {ctx}\n"));
        }
        let suggestions = self.suggestions();
        if !suggestions.is_empty() {
            output.push_str("\nSuggestions:\n");
            for s in suggestions {
                output.push_str(&format!("  • {s}\n"));
            }
        }
        output
    }

    #[must_use]
    pub fn to_exit_code(&self) -> crate::exit_codes::ExitCode {
        use crate::exit_codes::ExitCode;

        match self {
            Self::Config(_) | Self::StepId(_) => ExitCode::CLI_ARGS,
            Self::Definition(_) => ExitCode::DEFINITION_INVALID,
            Self::Snapshot(SnapshotError::NoRestorePoint { .. } | SnapshotError::NotFound { .. }) => {
                ExitCode::SNAPSHOT_MISSING
            }
            Self::Step(_) => ExitCode::STEP_REJECTED,
            Self::Lock(LockError::Held { .. } | LockError::Stale { .. }) => ExitCode::LOCK_HELD,
            _ => ExitCode::INTERNAL,
        }
    }
}

/// Convert an `anyhow` chain from a store's I/O boundary into a message.
#[must_use]
pub fn chain_message(err: &anyhow::Error) -> String {
    format!("{err:#}")
}
