use std::fmt;

use labflow_utils::error::SnapshotError;
use labflow_utils::step_id::validate_step_id;

/// Prefix of safety snapshot keys. Step ids cannot start with `_`, so these
/// never collide with run keys.
pub const SAFETY_PREFIX: &str = "_safety_";

const RUN_INFIX: &str = "_run_";

/// Identifies one snapshot; its `Display` form is the directory name.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum SnapshotKey {
    /// `{step_id}_run_{run}`: the tree just before that run.
    Run { step_id: String, run: u32 },
    /// `_safety_{label}`: taken before skip-to and decisions.
    Safety { label: String },
}

impl SnapshotKey {
    #[must_use]
    pub fn run(step_id: impl Into<String>, run: u32) -> Self {
        Self::Run {
            step_id: step_id.into(),
            run,
        }
    }

    #[must_use]
    pub fn safety(label: impl Into<String>) -> Self {
        Self::Safety {
            label: label.into(),
        }
    }

    #[must_use]
    pub fn skip_to(target: &str) -> Self {
        Self::safety(format!("skip_to_{target}"))
    }

    #[must_use]
    pub fn decision(step_id: &str) -> Self {
        Self::safety(format!("decision_{step_id}"))
    }

    #[must_use]
    pub fn step_id(&self) -> Option<&str> {
        match self {
            Self::Run { step_id, .. } => Some(step_id),
            Self::Safety { .. } => None,
        }
    }

    #[must_use]
    pub const fn run_number(&self) -> Option<u32> {
        match self {
            Self::Run { run, .. } => Some(*run),
            Self::Safety { .. } => None,
        }
    }

    /// Parse a directory name back into a key.
    pub fn parse(name: &str) -> Result<Self, SnapshotError> {
        let invalid = || SnapshotError::InvalidKey {
            key: name.to_string(),
        };

        if let Some(label) = name.strip_prefix(SAFETY_PREFIX) {
            let safe = !label.is_empty()
                && label
                    .chars()
                    .all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '-' | '.'))
                && !label.contains("..");
            return if safe { Ok(Self::safety(label)) } else { Err(invalid()) };
        }

        let (step_id, run) = name.rsplit_once(RUN_INFIX).ok_or_else(invalid)?;
        validate_step_id(step_id).map_err(|_| invalid())?;
        let run: u32 = run.parse().map_err(|_| invalid())?;
        if run == 0 || run.to_string().len() != name.len() - step_id.len() - RUN_INFIX.len() {
            return Err(invalid());
        }
        Ok(Self::run(step_id, run))
    }
}

impl fmt::Display for SnapshotKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Run { step_id, run } => write!(f, "{step_id}{RUN_INFIX}{run}"),
            Self::Safety { label } => write!(f, "{SAFETY_PREFIX}{label}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_names() {
        assert_eq!(SnapshotKey::run("prep", 3).to_string(), "prep_run_3");
        assert_eq!(SnapshotKey::skip_to("report").to_string(), "_safety_skip_to_report");
        assert_eq!(SnapshotKey::decision("qc").to_string(), "_safety_decision_qc");
    }

    #[test]
    fn test_parse() {
        assert_eq!(SnapshotKey::parse("prep_run_3").unwrap(), SnapshotKey::run("prep", 3));
        assert_eq!(
            SnapshotKey::parse("a_run_2_run_10").unwrap(),
            SnapshotKey::run("a_run_2", 10)
        );
        assert_eq!(
            SnapshotKey::parse("_safety_decision_qc").unwrap(),
            SnapshotKey::decision("qc")
        );
        for bad in ["prep", "prep_run_0", "prep_run_x", "prep_run_03", "_run_1", "_safety_", "_safety_../x", "objects"] {
            assert!(SnapshotKey::parse(bad).is_err(), "{bad}");
        }
    }

    #[test]
    fn test_ordering_groups_runs_by_step() {
        let mut keys = vec![
            SnapshotKey::run("b", 1),
            SnapshotKey::run("a", 2),
            SnapshotKey::run("a", 1),
        ];
        keys.sort();
        assert_eq!(keys, [SnapshotKey::run("a", 1), SnapshotKey::run("a", 2), SnapshotKey::run("b", 1)]);
    }
}
