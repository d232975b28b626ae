//! Exit codes for the labflow CLI.
//!
//! | Code | Constant | Description |
//! |------|----------|-------------|
//! | 0 | `SUCCESS` | Operation completed |
//! | 1 | `INTERNAL` | General/internal failure |
//! | 2 | `CLI_ARGS` | Invalid CLI arguments or configuration |
//! | 3 | `DEFINITION_INVALID` | Workflow definition failed validation |
//! | 4 | `STEP_FAILED` | Step ran and failed verification; project rolled back |
//! | 5 | `STEP_TERMINATED` | Operator terminated the step; project rolled back |
//! | 6 | `SNAPSHOT_MISSING` | Undo refused, no restore point |
//! | 7 | `STEP_REJECTED` | Request not valid for the step's current status |
//! | 9 | `LOCK_HELD` | Another labflow process owns the project |

use crate::error::LabflowError;

/// Process exit code. The numeric values are stable.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExitCode(i32);

impl ExitCode {
    pub const SUCCESS: ExitCode = ExitCode(0);
    pub const INTERNAL: ExitCode = ExitCode(1);
    pub const CLI_ARGS: ExitCode = ExitCode(2);
    pub const DEFINITION_INVALID: ExitCode = ExitCode(3);
    pub const STEP_FAILED: ExitCode = ExitCode(4);
    pub const STEP_TERMINATED: ExitCode = ExitCode(5);
    pub const SNAPSHOT_MISSING: ExitCode = ExitCode(6);
    pub const STEP_REJECTED: ExitCode = ExitCode(7);
    pub const LOCK_HELD: ExitCode = ExitCode(9);

    #[must_use]
    pub const fn as_i32(self) -> i32 {
        self.0
    }

    #[must_use]
    pub const fn from_i32(code: i32) -> Self {
        ExitCode(code)
    }

    #[must_use]
    pub const fn is_success(self) -> bool {
        self.0 == 0
    }
}

impl From<ExitCode> for i32 {
    fn from(code: ExitCode) -> Self {
        code.0
    }
}

impl From<&LabflowError> for ExitCode {
    fn from(err: &LabflowError) -> Self {
        err.to_exit_code()
    }
}

impl std::fmt::Display for ExitCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}
