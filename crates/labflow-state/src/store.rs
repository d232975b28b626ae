use camino::{Utf8Path, Utf8PathBuf};
use chrono::Utc;
use std::collections::BTreeMap;

use labflow_utils::atomic_write::write_file_atomic;
use labflow_utils::error::StateError;
use labflow_utils::types::StepStatus;

use crate::document::{DecisionRecord, SCHEMA_VERSION, StateDocument};

/// Owner of the state document.
///
/// Every mutation is applied to a copy, persisted, and only then swapped in,
/// so after any call returns the in-memory document equals the file on disk.
/// A failed persist leaves both untouched.
#[derive(Debug)]
pub struct StateStore {
    path: Utf8PathBuf,
    doc: StateDocument,
}

impl StateStore {
    /// Load `path`, or start empty when it does not exist yet. Nothing is
    /// written until the first mutation.
    pub fn load(path: impl Into<Utf8PathBuf>) -> Result<Self, StateError> {
        let path = path.into();
        let doc = read_document(&path)?;
        Ok(Self { path, doc })
    }

    #[must_use]
    pub fn path(&self) -> &Utf8Path {
        &self.path
    }

    #[must_use]
    pub fn document(&self) -> &StateDocument {
        &self.doc
    }

    #[must_use]
    pub fn get_status(&self, step_id: &str) -> StepStatus {
        self.doc.status(step_id)
    }

    #[must_use]
    pub fn statuses(&self) -> &BTreeMap<String, StepStatus> {
        &self.doc.statuses
    }

    #[must_use]
    pub fn get_completion_order(&self) -> &[String] {
        &self.doc.completion_order
    }

    #[must_use]
    pub fn decision(&self, step_id: &str) -> Option<&DecisionRecord> {
        self.doc.decisions.get(step_id)
    }

    pub fn set_status(&mut self, step_id: &str, status: StepStatus) -> Result<(), StateError> {
        self.update(|doc| doc.set_status(step_id, status))
    }

    pub fn append_to_completion_order(&mut self, step_id: &str) -> Result<(), StateError> {
        self.update(|doc| doc.append(step_id))
    }

    /// Remove the last occurrence of `step_id`; `Ok(false)` when absent, in
    /// which case nothing is written.
    pub fn remove_last_occurrence(&mut self, step_id: &str) -> Result<bool, StateError> {
        if !self.doc.completion_order.iter().any(|e| e == step_id) {
            return Ok(false);
        }
        self.update(|doc| doc.remove_last_occurrence(step_id))
    }

    /// Apply several changes as one atomic write.
    pub fn update<T>(&mut self, f: impl FnOnce(&mut StateDocument) -> T) -> Result<T, StateError> {
        let mut next = self.doc.clone();
        let out = f(&mut next);
        next.updated_at = Some(Utc::now());
        self.persist(&next)?;
        self.doc = next;
        Ok(out)
    }

    fn persist(&self, doc: &StateDocument) -> Result<(), StateError> {
        let json = serde_json::to_string_pretty(doc).map_err(|e| StateError::Persist {
            path: self.path.to_string(),
            reason: e.to_string(),
        })?;
        write_file_atomic(&self.path, &json).map_err(|e| StateError::Persist {
            path: self.path.to_string(),
            reason: format!("{e:#}"),
        })?;
        tracing::trace!(path = %self.path, "state persisted");
        Ok(())
    }
}

fn read_document(path: &Utf8Path) -> Result<StateDocument, StateError> {
    let content = match std::fs::read_to_string(path) {
        Ok(content) => content,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(StateDocument::default()),
        Err(e) => {
            return Err(StateError::Read {
                path: path.to_string(),
                reason: e.to_string(),
            });
        }
    };

    // Check the version before the full parse so a newer layout reports a
    // schema mismatch rather than a field error.
    let value: serde_json::Value = serde_json::from_str(&content).map_err(|e| StateError::Corrupted {
        path: path.to_string(),
        reason: e.to_string(),
    })?;
    let found = value
        .get("schema_version")
        .and_then(serde_json::Value::as_u64)
        .ok_or_else(|| StateError::Corrupted {
            path: path.to_string(),
            reason: "missing schema_version".to_string(),
        })?;
    if found != u64::from(SCHEMA_VERSION) {
        return Err(StateError::UnsupportedSchema {
            found: u32::try_from(found).unwrap_or(u32::MAX),
            expected: SCHEMA_VERSION,
        });
    }

    serde_json::from_value(value).map_err(|e| StateError::Corrupted {
        path: path.to_string(),
        reason: e.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use labflow_utils::test_support::TestProject;
    use labflow_utils::types::Decision;

    fn store(project: &TestProject) -> StateStore {
        StateStore::load(project.root().join(".labflow/state.json")).unwrap()
    }

    #[test]
    fn test_missing_file_is_empty_state_and_not_created() {
        let project = TestProject::new();
        let s = store(&project);
        assert_eq!(s.get_status("a"), StepStatus::Pending);
        assert!(s.get_completion_order().is_empty());
        assert!(!project.exists(".labflow/state.json"));
    }

    #[test]
    fn test_mutations_persist_and_reload() {
        let project = TestProject::new();
        let mut s = store(&project);
        s.set_status("a", StepStatus::Completed).unwrap();
        s.append_to_completion_order("a").unwrap();
        assert!(project.exists(".labflow/state.json"));

        let fresh = store(&project);
        assert_eq!(fresh.get_status("a"), StepStatus::Completed);
        assert_eq!(fresh.get_completion_order(), ["a"]);
        assert_eq!(fresh.document(), s.document());
    }

    #[test]
    fn test_update_is_all_or_nothing_on_disk() {
        let project = TestProject::new();
        let mut s = store(&project);
        let n = s
            .update(|doc| {
                doc.set_status("a", StepStatus::Skipped);
                doc.set_status("b", StepStatus::Skipped);
                doc.append("a");
                doc.append("b");
                doc.completion_order.len()
            })
            .unwrap();
        assert_eq!(n, 2);
        let fresh = store(&project);
        assert_eq!(fresh.get_completion_order(), ["a", "b"]);
    }

    #[test]
    fn test_failed_persist_leaves_memory_unchanged() {
        let project = TestProject::new();
        // A directory where the state file should be makes the rename fail.
        std::fs::create_dir_all(project.root().join(".labflow/state.json/blocker")).unwrap();
        let mut s = StateStore {
            path: project.root().join(".labflow/state.json"),
            doc: StateDocument::default(),
        };
        let err = s.set_status("a", StepStatus::Completed).unwrap_err();
        assert!(matches!(err, StateError::Persist { .. }));
        assert_eq!(s.get_status("a"), StepStatus::Pending);
    }

    #[test]
    fn test_remove_absent_does_not_write() {
        let project = TestProject::new();
        let mut s = store(&project);
        assert!(!s.remove_last_occurrence("a").unwrap());
        assert!(!project.exists(".labflow/state.json"));
    }

    #[test]
    fn test_decision_and_run_records_survive_reload() {
        let project = TestProject::new();
        let mut s = store(&project);
        let record = DecisionRecord {
            answer: Decision::No,
            decided_at: Utc::now(),
            prior: BTreeMap::from([("qc".to_string(), StepStatus::AwaitingDecision)]),
            safety_snapshot: Some("_safety_decision_qc".to_string()),
        };
        s.update(|doc| {
            doc.set_status("prep", StepStatus::Completed);
            doc.append_run("prep", 1);
            doc.append_run("prep", 3);
            doc.set_status("qc", StepStatus::SkippedByDecision);
            doc.append("qc");
            doc.decisions.insert("qc".to_string(), record.clone());
        })
        .unwrap();

        let fresh = store(&project);
        assert_eq!(fresh.decision("qc"), Some(&record));
        assert_eq!(fresh.document().run_of("prep", 2), 3);
        assert_eq!(fresh.get_completion_order(), ["prep", "prep", "qc"]);
    }

    #[test]
    fn test_corrupted_and_future_documents() {
        let project = TestProject::new();
        project.write(".labflow/state.json", "{not json");
        assert!(matches!(
            StateStore::load(project.root().join(".labflow/state.json")),
            Err(StateError::Corrupted { .. })
        ));

        project.write(".labflow/state.json", r#"{"schema_version": 7}"#);
        assert!(matches!(
            StateStore::load(project.root().join(".labflow/state.json")),
            Err(StateError::UnsupportedSchema { found: 7, expected: 1 })
        ));

        project.write(".labflow/state.json", r#"{"schema_version": 1, "statuses": {"a": "running"}}"#);
        assert!(matches!(
            StateStore::load(project.root().join(".labflow/state.json")),
            Err(StateError::Corrupted { .. })
        ));
    }
}
