//! Walking the completion order backwards.
//!
//! Undo always acts on the last completion-order entry. For a completed step
//! the project is restored from the snapshot taken before its most recent
//! run, found through the run number recorded with each completion. When that snapshot is gone the nearest older restore point is used
//! instead and every entry recorded after it is rolled back as well, so the
//! tree and the recorded progress never disagree.

use std::collections::{BTreeMap, HashMap};

use labflow_snapshot::SnapshotKey;
use labflow_state::StateDocument;
use labflow_utils::error::{Result, SnapshotError, StepError};
use labflow_utils::types::{Decision, StepStatus};

use crate::coordinator::Coordinator;
use crate::outcome::{UndoKind, UndoReport};

/// Where the tree goes back to, and how much of the completion order goes
/// with it.
#[derive(Debug, Clone, PartialEq, Eq)]
struct RestorePoint {
    /// Index of the first completion-order entry to roll back.
    position: usize,
    key: Option<SnapshotKey>,
    degraded: bool,
}

/// How one completion-order entry was reversed.
#[derive(Debug, Clone, PartialEq, Eq)]
enum Unwound {
    Run { run: u32 },
    Decision { safety_snapshot: Option<String> },
    /// Carries the skip-to safety snapshot once no skipped step refers to it.
    Skip { safety_snapshot: Option<String> },
    /// The entry's status could not be in the completion order.
    Stray,
}

impl Coordinator {
    /// Reverse the most recent completion-order entry.
    ///
    /// Refuses with [`SnapshotError::NoRestorePoint`], leaving everything
    /// untouched, when a completed step has no snapshot left to restore from.
    pub fn undo(&mut self) -> Result<UndoReport> {
        self.ensure_idle()?;
        let order = self.state.get_completion_order().to_vec();
        let Some(last) = order.last().cloned() else {
            return Err(StepError::NothingToUndo.into());
        };
        let tail = order.len() - 1;

        let status = self.state.get_status(&last);
        let (point, kind) = match status {
            StepStatus::Completed => {
                let run = self.state.document().run_of(&last, occurrence_count(&order, &last));
                (self.find_restore_point(&order, &last)?, UndoKind::Run { run })
            }
            StepStatus::SkippedByDecision if self.state.decision(&last).is_some() => {
                let key = SnapshotKey::decision(&last);
                let key = if self.snapshots.snapshot_exists(&key) {
                    Some(key)
                } else {
                    tracing::warn!(step_id = %last, "decision safety snapshot missing; restoring statuses only");
                    None
                };
                let point = RestorePoint {
                    position: tail,
                    key,
                    degraded: false,
                };
                (point, UndoKind::Decision)
            }
            _ => {
                let point = RestorePoint {
                    position: tail,
                    key: None,
                    degraded: false,
                };
                (point, UndoKind::Skip)
            }
        };

        if let Some(key) = &point.key {
            self.snapshots.restore_snapshot(key)?;
        }

        let popped: Vec<String> = order[point.position..].iter().rev().cloned().collect();
        let triggered: HashMap<String, Vec<String>> = popped
            .iter()
            .map(|id| {
                let ids = self
                    .workflow
                    .triggered_by(id)
                    .into_iter()
                    .map(|s| s.id.clone())
                    .collect();
                (id.clone(), ids)
            })
            .collect();
        let unwound = self.commit(|doc| {
            popped
                .iter()
                .map(|id| unwind_entry(doc, id, triggered.get(id).map_or(&[][..], Vec::as_slice)))
                .collect::<Vec<_>>()
        })?;

        self.discard_unwound_snapshots(&popped, &unwound)?;

        let status_after = self.state.get_status(&last);
        let also_undone: Vec<String> = popped.iter().skip(1).cloned().collect();
        if point.degraded {
            tracing::warn!(
                step_id = %last,
                restored = ?point.key.as_ref().map(ToString::to_string),
                also_undone = ?also_undone,
                "expected snapshot missing; undid back to an earlier restore point"
            );
        }
        tracing::info!(step_id = %last, status = %status_after, kind = ?kind, "undo complete");

        Ok(UndoReport {
            step_id: last,
            kind,
            restored: point.key.map(|k| k.to_string()),
            degraded: point.degraded,
            also_undone,
            status_after,
        })
    }

    /// Search order: the snapshot before the step's latest run, then its
    /// earlier runs, then earlier completion-order entries of other steps.
    ///
    /// Run numbers can repeat after a snapshot was lost, so the search goes
    /// newest first: an existing key always belongs to the latest run that
    /// used its number.
    fn find_restore_point(&self, order: &[String], step_id: &str) -> Result<RestorePoint> {
        let doc = self.state.document();
        let runs = occurrence_count(order, step_id);
        for n in (1..=runs).rev() {
            let key = SnapshotKey::run(step_id, doc.run_of(step_id, n));
            if self.snapshots.snapshot_exists(&key)
                && let Some(position) = nth_occurrence(order, step_id, n)
            {
                return Ok(RestorePoint {
                    position,
                    key: Some(key),
                    degraded: n != runs,
                });
            }
            tracing::debug!(key = %key, "restore point missing");
        }

        let tail = order.len().saturating_sub(1);
        for position in (0..tail).rev() {
            let other = &order[position];
            if other == step_id || self.state.get_status(other) != StepStatus::Completed {
                continue;
            }
            let n = occurrence_count(&order[..=position], other);
            let key = SnapshotKey::run(other.as_str(), doc.run_of(other, n));
            if self.snapshots.snapshot_exists(&key) {
                return Ok(RestorePoint {
                    position,
                    key: Some(key),
                    degraded: true,
                });
            }
        }

        Err(SnapshotError::NoRestorePoint {
            step_id: step_id.to_string(),
            detail: format!(
                "none of the {runs} run snapshot(s) of '{step_id}' survive, and no earlier completed step has one"
            ),
        }
        .into())
    }

    /// Drop the run snapshots of unwound runs and the safety snapshots that
    /// nothing refers to any more.
    ///
    /// Every snapshot numbered at or above a step's lowest unwound run was
    /// taken by an unwound run: that number was only handed out once all
    /// higher ones were gone.
    fn discard_unwound_snapshots(&self, popped: &[String], unwound: &[Unwound]) -> Result<()> {
        let mut lowest: BTreeMap<&str, u32> = BTreeMap::new();
        for (id, how) in popped.iter().zip(unwound) {
            match how {
                Unwound::Run { run } => {
                    lowest
                        .entry(id.as_str())
                        .and_modify(|r| *r = (*r).min(*run))
                        .or_insert(*run);
                }
                Unwound::Decision {
                    safety_snapshot: Some(name),
                }
                | Unwound::Skip {
                    safety_snapshot: Some(name),
                } => match SnapshotKey::parse(name) {
                    Ok(key) => {
                        self.snapshots.delete_snapshot(&key)?;
                    }
                    Err(e) => tracing::warn!(error = %e, "state names an invalid safety snapshot"),
                },
                Unwound::Decision { safety_snapshot: None } | Unwound::Skip { safety_snapshot: None } | Unwound::Stray => {}
            }
        }
        for (id, run) in lowest {
            self.snapshots.delete_run_snapshots_from(id, run)?;
        }
        Ok(())
    }
}

/// Reverse one completion-order entry (the current tail) in `doc`.
fn unwind_entry(doc: &mut StateDocument, id: &str, triggered: &[String]) -> Unwound {
    let status = doc.status(id);
    doc.remove_last_occurrence(id);
    match status {
        StepStatus::Completed => {
            let remaining = u32::try_from(doc.occurrences(id)).unwrap_or(u32::MAX);
            let run = doc.pop_run(id).unwrap_or(remaining.saturating_add(1));
            if remaining == 0 {
                let answered_yes = doc.decisions.get(id).is_some_and(|r| r.answer == Decision::Yes);
                if answered_yes {
                    doc.decisions.remove(id);
                    doc.set_status(id, StepStatus::AwaitingDecision);
                } else {
                    doc.set_status(id, StepStatus::Pending);
                }
                for t in triggered {
                    match doc.status(t) {
                        StepStatus::AwaitingDecision => doc.set_status(t, StepStatus::Pending),
                        StepStatus::Pending => {
                            doc.decisions.remove(t);
                        }
                        _ => {}
                    }
                }
            }
            Unwound::Run { run }
        }
        StepStatus::SkippedByDecision => match doc.decisions.remove(id) {
            Some(record) => {
                for (step, prior) in record.prior {
                    doc.set_status(&step, prior);
                }
                doc.set_status(id, StepStatus::AwaitingDecision);
                Unwound::Decision {
                    safety_snapshot: record.safety_snapshot,
                }
            }
            None => {
                doc.set_status(id, StepStatus::Pending);
                Unwound::Skip { safety_snapshot: None }
            }
        },
        StepStatus::Skipped => {
            let Some(record) = doc.skips.remove(id) else {
                doc.set_status(id, StepStatus::Pending);
                return Unwound::Skip { safety_snapshot: None };
            };
            doc.set_status(id, record.prior);
            let shared = doc.skips.values().any(|r| r.target == record.target);
            Unwound::Skip {
                safety_snapshot: (!shared).then(|| SnapshotKey::skip_to(&record.target).to_string()),
            }
        }
        StepStatus::Pending | StepStatus::AwaitingDecision => Unwound::Stray,
    }
}

fn occurrence_count(order: &[String], id: &str) -> u32 {
    let count = order.iter().filter(|e| *e == id).count();
    u32::try_from(count).unwrap_or(u32::MAX)
}

/// Index of the `n`th (1-based) occurrence of `id`.
fn nth_occurrence(order: &[String], id: &str, n: u32) -> Option<usize> {
    let skip = usize::try_from(n).ok()?.checked_sub(1)?;
    order
        .iter()
        .enumerate()
        .filter(|(_, e)| *e == id)
        .nth(skip)
        .map(|(i, _)| i)
}
