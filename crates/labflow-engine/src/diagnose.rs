//! Consistency checks between recorded progress, success markers and
//! snapshots. Findings are reported, never repaired.

use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet};

use labflow_snapshot::SnapshotKey;
use labflow_state::StateDocument;
use labflow_utils::paths::marker_file_name;
use labflow_utils::types::StepStatus;
use labflow_workflow::Workflow;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    /// Undo or a later run may behave unexpectedly.
    Warn,
    /// Recorded progress contradicts itself.
    Fail,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FindingKind {
    DefinitionChanged,
    UnknownStep,
    PendingInCompletionOrder,
    MarkerMissing,
    StaleMarker,
    MissingRunSnapshot,
    OrphanSnapshot,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Finding {
    pub kind: FindingKind,
    pub severity: Severity,
    pub step_id: Option<String>,
    pub details: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DiagnoseOutput {
    /// No `Fail` findings.
    pub ok: bool,
    pub findings: Vec<Finding>,
}

impl DiagnoseOutput {
    #[must_use]
    pub fn is_clean(&self) -> bool {
        self.findings.is_empty()
    }

    #[must_use]
    pub fn of_kind(&self, kind: FindingKind) -> Vec<&Finding> {
        self.findings.iter().filter(|f| f.kind == kind).collect()
    }
}

/// `markers` holds the file names present in the markers directory.
pub(crate) fn diagnose(
    workflow: &Workflow,
    doc: &StateDocument,
    snapshots: &[SnapshotKey],
    markers: &BTreeSet<String>,
) -> DiagnoseOutput {
    let mut findings = Vec::new();
    let mut push = |kind, severity, step_id: Option<&str>, details: String| {
        findings.push(Finding {
            kind,
            severity,
            step_id: step_id.map(str::to_owned),
            details,
        });
    };

    if let Some(recorded) = doc.definition_hash.as_deref()
        && recorded != workflow.content_hash()
    {
        push(
            FindingKind::DefinitionChanged,
            Severity::Warn,
            None,
            "the workflow definition changed after progress was recorded".to_string(),
        );
    }

    for id in doc.statuses.keys() {
        if workflow.step(id).is_none() {
            push(
                FindingKind::UnknownStep,
                Severity::Warn,
                Some(id.as_str()),
                format!("state records a status for '{id}', which the definition no longer has"),
            );
        }
    }
    let ordered: BTreeSet<&str> = doc.completion_order.iter().map(String::as_str).collect();
    for id in &ordered {
        if workflow.step(id).is_none() {
            push(
                FindingKind::UnknownStep,
                Severity::Fail,
                Some(*id),
                format!("completion order names '{id}', which the definition does not define"),
            );
        }
    }

    for id in doc.pending_in_order() {
        push(
            FindingKind::PendingInCompletionOrder,
            Severity::Fail,
            Some(id),
            format!("'{id}' is in the completion order but {}", doc.status(id)),
        );
    }

    // Steps that share an executable share its marker.
    let mut by_marker: BTreeMap<String, Vec<&str>> = BTreeMap::new();
    for step in workflow.steps() {
        by_marker
            .entry(marker_file_name(&step.executable_ref))
            .or_default()
            .push(&step.id);
    }
    for (marker, ids) in &by_marker {
        let completed: Vec<&str> = ids
            .iter()
            .copied()
            .filter(|id| doc.status(id) == StepStatus::Completed)
            .collect();
        let present = markers.contains(marker);
        if !present {
            for id in completed {
                push(
                    FindingKind::MarkerMissing,
                    Severity::Warn,
                    Some(id),
                    format!("'{id}' is completed but its success marker {marker} is absent"),
                );
            }
        } else if completed.is_empty() {
            push(
                FindingKind::StaleMarker,
                Severity::Warn,
                ids.first().copied(),
                format!("success marker {marker} exists but no step using it is completed"),
            );
        }
    }

    let mut surviving: BTreeMap<&str, BTreeSet<u32>> = BTreeMap::new();
    for key in snapshots {
        match key {
            SnapshotKey::Run { step_id, run } => {
                surviving.entry(step_id.as_str()).or_default().insert(*run);
            }
            SnapshotKey::Safety { label } => {
                if let Some(step_id) = label.strip_prefix("decision_")
                    && !doc.decisions.contains_key(step_id)
                {
                    push(
                        FindingKind::OrphanSnapshot,
                        Severity::Warn,
                        Some(step_id),
                        format!("{key} belongs to no recorded decision"),
                    );
                } else if let Some(target) = label.strip_prefix("skip_to_")
                    && !doc.skips.values().any(|r| r.target == target)
                {
                    push(
                        FindingKind::OrphanSnapshot,
                        Severity::Warn,
                        Some(target),
                        format!("{key} belongs to no recorded skip"),
                    );
                }
            }
        }
    }
    for step in workflow.steps() {
        // Skipped entries sit in the completion order without a run.
        let recorded: BTreeSet<u32> =
            if matches!(doc.status(&step.id), StepStatus::Skipped | StepStatus::SkippedByDecision) {
                BTreeSet::new()
            } else {
                doc.recorded_runs(&step.id).into_iter().collect()
            };
        let runs = surviving.remove(step.id.as_str()).unwrap_or_default();
        for &run in &recorded {
            if !runs.contains(&run) {
                push(
                    FindingKind::MissingRunSnapshot,
                    Severity::Warn,
                    Some(step.id.as_str()),
                    format!(
                        "snapshot {} is missing; undo will fall back to an earlier one",
                        SnapshotKey::run(step.id.as_str(), run)
                    ),
                );
            }
        }
        for run in runs.difference(&recorded) {
            push(
                FindingKind::OrphanSnapshot,
                Severity::Warn,
                Some(step.id.as_str()),
                format!(
                    "snapshot {} has no recorded run; the next run of '{}' will be numbered after it",
                    SnapshotKey::run(step.id.as_str(), *run),
                    step.id
                ),
            );
        }
    }
    for (step_id, runs) in surviving {
        push(
            FindingKind::OrphanSnapshot,
            Severity::Warn,
            Some(step_id),
            format!("{} snapshot(s) belong to '{step_id}', which the definition does not define", runs.len()),
        );
    }

    let ok = !findings.iter().any(|f| f.severity == Severity::Fail);
    DiagnoseOutput { ok, findings }
}

#[cfg(test)]
mod tests {
    use super::*;

    const YAML: &str = "\
steps:
  - {id: prep, script: prep.sh, allow_rerun: true}
  - {id: assay, script: assay.sh}
";

    fn workflow() -> Workflow {
        Workflow::from_yaml_str(YAML).unwrap()
    }

    fn consistent_doc(wf: &Workflow) -> StateDocument {
        let mut doc = StateDocument::default();
        doc.set_status("prep", StepStatus::Completed);
        doc.append("prep");
        doc.append("prep");
        doc.definition_hash = Some(wf.content_hash().to_string());
        doc
    }

    #[test]
    fn test_consistent_project_is_clean() {
        let wf = workflow();
        let doc = consistent_doc(&wf);
        let keys = [SnapshotKey::run("prep", 1), SnapshotKey::run("prep", 2)];
        let markers = BTreeSet::from(["prep.success".to_string()]);
        let out = diagnose(&wf, &doc, &keys, &markers);
        assert!(out.is_clean(), "{:?}", out.findings);
        assert!(out.ok);
    }

    #[test]
    fn test_marker_and_snapshot_mismatches_are_warnings() {
        let wf = workflow();
        let doc = consistent_doc(&wf);
        let keys = [SnapshotKey::run("prep", 2), SnapshotKey::run("assay", 1)];
        let markers = BTreeSet::from(["assay.success".to_string()]);
        let out = diagnose(&wf, &doc, &keys, &markers);

        assert!(out.ok);
        assert_eq!(out.of_kind(FindingKind::MarkerMissing).len(), 1);
        assert_eq!(out.of_kind(FindingKind::StaleMarker)[0].step_id.as_deref(), Some("assay"));
        let missing = out.of_kind(FindingKind::MissingRunSnapshot);
        assert_eq!(missing.len(), 1);
        assert!(missing[0].details.contains("prep_run_1"));
        assert_eq!(out.of_kind(FindingKind::OrphanSnapshot)[0].step_id.as_deref(), Some("assay"));
    }

    #[test]
    fn test_pending_in_order_fails() {
        let wf = workflow();
        let mut doc = consistent_doc(&wf);
        doc.append("assay");
        doc.definition_hash = Some("0".repeat(64));
        let out = diagnose(&wf, &doc, &[SnapshotKey::run("prep", 1), SnapshotKey::run("prep", 2)], &BTreeSet::from(["prep.success".to_string()]));
        assert!(!out.ok);
        assert_eq!(out.of_kind(FindingKind::PendingInCompletionOrder).len(), 1);
        assert_eq!(out.of_kind(FindingKind::DefinitionChanged).len(), 1);
        // assay has a recorded completion entry but no snapshot
        assert_eq!(out.of_kind(FindingKind::MissingRunSnapshot).len(), 1);
    }

    #[test]
    fn test_unknown_steps_are_reported() {
        let wf = workflow();
        let mut doc = consistent_doc(&wf);
        doc.set_status("retired", StepStatus::Completed);
        doc.append("retired");
        let keys = [
            SnapshotKey::run("prep", 1),
            SnapshotKey::run("prep", 2),
            SnapshotKey::run("retired", 1),
            SnapshotKey::decision("gone"),
        ];
        let out = diagnose(&wf, &doc, &keys, &BTreeSet::from(["prep.success".to_string()]));
        assert!(!out.ok);
        assert_eq!(out.of_kind(FindingKind::UnknownStep).len(), 2);
        assert_eq!(out.of_kind(FindingKind::OrphanSnapshot).len(), 2);
    }

    #[test]
    fn test_recorded_run_numbers_and_skip_snapshots() {
        let wf = workflow();
        let mut doc = StateDocument::default();
        doc.set_status("prep", StepStatus::Completed);
        doc.append_run("prep", 1);
        doc.append_run("prep", 3);
        doc.set_status("assay", StepStatus::Skipped);
        doc.append("assay");
        doc.definition_hash = Some(wf.content_hash().to_string());
        let markers = BTreeSet::from(["prep.success".to_string()]);

        let keys = [SnapshotKey::run("prep", 1), SnapshotKey::run("prep", 3)];
        assert!(diagnose(&wf, &doc, &keys, &markers).is_clean());

        let keys = [
            SnapshotKey::run("prep", 1),
            SnapshotKey::run("prep", 2),
            SnapshotKey::skip_to("assay"),
        ];
        let out = diagnose(&wf, &doc, &keys, &markers);
        let missing = out.of_kind(FindingKind::MissingRunSnapshot);
        assert_eq!(missing.len(), 1);
        assert!(missing[0].details.contains("prep_run_3"));
        let orphans = out.of_kind(FindingKind::OrphanSnapshot);
        assert_eq!(orphans.len(), 2);
        assert!(orphans.iter().any(|f| f.details.contains("prep_run_2")));
        assert!(orphans.iter().any(|f| f.details.contains("_safety_skip_to_assay")));
    }
}
