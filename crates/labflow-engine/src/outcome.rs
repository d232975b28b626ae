use serde::Serialize;

use labflow_utils::exit_codes::ExitCode;
use labflow_utils::types::{Decision, StepStatus};

/// How a run ended. Failure and termination are ordinary outcomes: by the
/// time one is returned the project has already been rolled back.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum RunOutcome {
    Completed {
        run: u32,
    },
    Failed {
        run: u32,
        /// `None` when the process was ended by a signal.
        exit_code: Option<i32>,
        marker_present: bool,
    },
    Terminated {
        run: u32,
    },
}

impl RunOutcome {
    #[must_use]
    pub const fn run(&self) -> u32 {
        match self {
            Self::Completed { run } | Self::Failed { run, .. } | Self::Terminated { run } => *run,
        }
    }

    #[must_use]
    pub const fn is_success(&self) -> bool {
        matches!(self, Self::Completed { .. })
    }

    #[must_use]
    pub const fn label(&self) -> &'static str {
        match self {
            Self::Completed { .. } => "completed",
            Self::Failed { .. } => "failed",
            Self::Terminated { .. } => "terminated",
        }
    }

    #[must_use]
    pub const fn exit_code(&self) -> ExitCode {
        match self {
            Self::Completed { .. } => ExitCode::SUCCESS,
            Self::Failed { .. } => ExitCode::STEP_FAILED,
            Self::Terminated { .. } => ExitCode::STEP_TERMINATED,
        }
    }

    /// One-line explanation of a failure.
    #[must_use]
    pub fn failure_reason(&self) -> Option<String> {
        match self {
            Self::Failed {
                exit_code: Some(0),
                marker_present: false,
                ..
            } => Some("exited 0 but did not create its success marker".to_string()),
            Self::Failed {
                exit_code: Some(code),
                marker_present: true,
                ..
            } => Some(format!("created its success marker but exited {code}")),
            Self::Failed {
                exit_code: Some(code),
                ..
            } => Some(format!("exited {code}")),
            Self::Failed { exit_code: None, .. } => Some("was killed by a signal".to_string()),
            Self::Completed { .. } | Self::Terminated { .. } => None,
        }
    }
}

/// What the last completion-order entry was.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum UndoKind {
    Run { run: u32 },
    Decision,
    Skip,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct UndoReport {
    pub step_id: String,
    pub kind: UndoKind,
    /// Snapshot the project was restored from, if any.
    pub restored: Option<String>,
    /// The expected snapshot was missing and an earlier one was used.
    pub degraded: bool,
    /// Further completion-order entries rolled back with it, newest first.
    pub also_undone: Vec<String>,
    pub status_after: StepStatus,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SkipReport {
    pub target: String,
    pub skipped: Vec<String>,
    /// Kept only when something was skipped.
    pub safety_snapshot: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DecisionOutcome {
    pub step_id: String,
    pub answer: Decision,
    /// Steps now `skipped_by_decision`, the decided step first.
    pub skipped: Vec<String>,
    /// Step reset to `pending` by a "no".
    pub target_reset: Option<String>,
    pub safety_snapshot: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_outcome_exit_codes() {
        assert_eq!(RunOutcome::Completed { run: 1 }.exit_code(), ExitCode::SUCCESS);
        assert_eq!(RunOutcome::Terminated { run: 2 }.exit_code(), ExitCode::STEP_TERMINATED);
        let failed = RunOutcome::Failed {
            run: 3,
            exit_code: Some(1),
            marker_present: false,
        };
        assert_eq!(failed.exit_code(), ExitCode::STEP_FAILED);
        assert_eq!(failed.run(), 3);
    }

    #[test]
    fn test_failure_reason_names_the_missing_half() {
        let no_marker = RunOutcome::Failed {
            run: 1,
            exit_code: Some(0),
            marker_present: false,
        };
        assert!(no_marker.failure_reason().unwrap().contains("success marker"));
        let bad_exit = RunOutcome::Failed {
            run: 1,
            exit_code: Some(2),
            marker_present: true,
        };
        assert_eq!(bad_exit.failure_reason().unwrap(), "created its success marker but exited 2");
        assert!(RunOutcome::Completed { run: 1 }.failure_reason().is_none());
    }

    #[test]
    fn test_outcome_json_is_tagged() {
        let json = serde_json::to_value(RunOutcome::Terminated { run: 4 }).unwrap();
        assert_eq!(json["outcome"], "terminated");
        assert_eq!(json["run"], 4);
    }
}
