//! Step ID validation.
//!
//! Step ids end up in snapshot directory names (`{id}_run_{N}`) and in marker
//! and log file names, so they are restricted to a filesystem-safe alphabet.
//! A leading `_` is reserved for labflow's own safety snapshots.

use crate::error::{ErrorCategory, UserFriendlyError};
use once_cell::sync::Lazy;
use regex::Regex;

static STEP_ID_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"^[A-Za-z0-9][A-Za-z0-9._-]*$").unwrap());

const MAX_LEN: usize = 128;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StepIdError {
    #[error("Step ID is empty")]
    Empty,

    #[error("Step ID '{0}' is longer than {MAX_LEN} characters")]
    TooLong(String),

    #[error("Step ID '{0}' must start with a letter or digit and contain only A-Z, a-z, 0-9, '.', '_' or '-'")]
    InvalidCharacters(String),

    #[error("Step ID '{0}' contains '..'")]
    Traversal(String),
}

impl UserFriendlyError for StepIdError {
    fn user_message(&self) -> String {
        self.to_string()
    }

    fn context(&self) -> Option<String> {
        Some("Step ids name snapshot directories and log files, so they must be filesystem-safe.".to_string())
    }

    fn suggestions(&self) -> Vec<String> {
        vec![
            "Use ids such as 'prep', 'qc-1' or 'align_reads'".to_string(),
            "Run 'labflow status' to list the ids defined by the workflow".to_string(),
        ]
    }

    fn category(&self) -> ErrorCategory {
        ErrorCategory::Validation
    }
}

/// Validate a step id without modifying it.
pub fn validate_step_id(id: &str) -> Result<(), StepIdError> {
    if id.is_empty() {
        return Err(StepIdError::Empty);
    }
    if id.len() > MAX_LEN {
        return Err(StepIdError::TooLong(id.to_string()));
    }
    if !STEP_ID_RE.is_match(id) {
        return Err(StepIdError::InvalidCharacters(id.to_string()));
    }
    if id.contains("..") {
        return Err(StepIdError::Traversal(id.to_string()));
    }
    Ok(())
}
