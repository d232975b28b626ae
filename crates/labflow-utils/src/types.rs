//! Shared value types.

use serde::{Deserialize, Serialize};
use strum::{Display, EnumIter, EnumString, IntoStaticStr};

/// Persisted status of a step. Exactly one holds at any time.
///
/// "Running" is deliberately absent: it is a property of the coordinator's
/// live session, never written to disk.
#[derive(
    Debug,
    Clone,
    Copy,
    Default,
    PartialEq,
    Eq,
    Hash,
    Serialize,
    Deserialize,
    Display,
    EnumString,
    EnumIter,
    IntoStaticStr,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum StepStatus {
    #[default]
    Pending,
    Completed,
    Skipped,
    AwaitingDecision,
    SkippedByDecision,
}

impl StepStatus {
    /// Statuses that may appear in the completion order.
    #[must_use]
    pub const fn is_settled(self) -> bool {
        !matches!(self, Self::Pending | Self::AwaitingDecision)
    }
}

/// Operator answer to a conditional prompt.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display, EnumString, IntoStaticStr,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case", ascii_case_insensitive)]
pub enum Decision {
    #[strum(to_string = "yes", serialize = "y")]
    Yes,
    #[strum(to_string = "no", serialize = "n")]
    No,
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;
    use strum::IntoEnumIterator;

    #[test]
    fn test_status_strings_match_serde() {
        for status in StepStatus::iter() {
            let json = serde_json::to_string(&status).unwrap();
            assert_eq!(json, format!("\"{status}\""));
            assert_eq!(StepStatus::from_str(&status.to_string()).unwrap(), status);
        }
        assert_eq!(StepStatus::SkippedByDecision.to_string(), "skipped_by_decision");
    }

    #[test]
    fn test_decision_parsing() {
        assert_eq!(Decision::from_str("YES").unwrap(), Decision::Yes);
        assert_eq!(Decision::from_str("n").unwrap(), Decision::No);
        assert!(Decision::from_str("maybe").is_err());
    }

    #[test]
    fn test_settled_statuses() {
        assert!(!StepStatus::Pending.is_settled());
        assert!(!StepStatus::AwaitingDecision.is_settled());
        assert!(StepStatus::Completed.is_settled());
        assert!(StepStatus::Skipped.is_settled());
        assert!(StepStatus::SkippedByDecision.is_settled());
    }
}
