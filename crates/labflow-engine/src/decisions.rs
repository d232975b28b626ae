use chrono::Utc;
use std::collections::BTreeMap;

use labflow_snapshot::SnapshotKey;
use labflow_state::{DecisionRecord, SkipRecord};
use labflow_utils::error::{Result, StepError};
use labflow_utils::types::{Decision, StepStatus};

use crate::coordinator::Coordinator;
use crate::outcome::{DecisionOutcome, SkipReport};

impl Coordinator {
    /// Jump ahead to `target`: every `pending` or `awaiting_decision` step
    /// before it becomes `skipped` and enters the completion order. The
    /// target and later steps are untouched.
    pub fn skip_to_step(&mut self, target: &str) -> Result<SkipReport> {
        self.ensure_idle()?;
        let index = self.workflow.index_of(target).ok_or_else(|| StepError::UnknownStep {
            id: target.to_string(),
        })?;

        let key = SnapshotKey::skip_to(target);
        self.snapshots.create_snapshot(&key)?;

        let candidates: Vec<String> = self.workflow.steps()[..index]
            .iter()
            .map(|s| s.id.clone())
            .collect();
        let skipped = self.commit(|doc| {
            let mut skipped = Vec::new();
            for id in candidates {
                let prior = doc.status(&id);
                if matches!(prior, StepStatus::Pending | StepStatus::AwaitingDecision) {
                    doc.set_status(&id, StepStatus::Skipped);
                    doc.append(&id);
                    doc.skips.insert(
                        id.clone(),
                        SkipRecord {
                            target: target.to_string(),
                            prior,
                        },
                    );
                    skipped.push(id);
                }
            }
            skipped
        })?;

        let safety_snapshot = if skipped.is_empty() {
            self.snapshots.delete_snapshot(&key)?;
            None
        } else {
            Some(key.to_string())
        };
        tracing::info!(target = %target, skipped = ?skipped, "skipped ahead");
        Ok(SkipReport {
            target: target.to_string(),
            skipped,
            safety_snapshot,
        })
    }

    /// Answer the prompt of a step that is `awaiting_decision`.
    ///
    /// "yes" makes the step runnable and is recorded so undoing the step's
    /// run puts the gate back. "no" marks it and its not-yet-run
    /// dependents `skipped_by_decision` and resets the decision target to
    /// `pending`; the prior statuses are recorded so undo can reverse it.
    pub fn resolve_decision(&mut self, step_id: &str, answer: Decision) -> Result<DecisionOutcome> {
        self.ensure_idle()?;
        let step = self.step(step_id)?.clone();
        let status = self.state.get_status(step_id);
        if status != StepStatus::AwaitingDecision {
            return Err(StepError::NotAwaitingDecision {
                id: step_id.to_string(),
                status,
            }
            .into());
        }

        if answer == Decision::Yes {
            self.commit(|doc| {
                doc.set_status(step_id, StepStatus::Pending);
                doc.decisions.insert(
                    step_id.to_string(),
                    DecisionRecord {
                        answer: Decision::Yes,
                        decided_at: Utc::now(),
                        prior: BTreeMap::from([(step_id.to_string(), StepStatus::AwaitingDecision)]),
                        safety_snapshot: None,
                    },
                );
            })?;
            tracing::info!(step_id = %step_id, "decision: yes");
            return Ok(DecisionOutcome {
                step_id: step_id.to_string(),
                answer,
                skipped: Vec::new(),
                target_reset: None,
                safety_snapshot: None,
            });
        }

        let key = SnapshotKey::decision(step_id);
        self.snapshots.create_snapshot(&key)?;

        let dependents: Vec<String> = self
            .workflow
            .dependents_of(step_id)
            .into_iter()
            .map(|s| s.id.clone())
            .collect();
        let target = step.decision_target().map(str::to_owned);
        let safety_name = key.to_string();

        let (skipped, target_reset) = self.commit(|doc| {
            let mut prior = BTreeMap::from([(step_id.to_string(), StepStatus::AwaitingDecision)]);
            let mut skipped = vec![step_id.to_string()];
            doc.set_status(step_id, StepStatus::SkippedByDecision);

            for dep in dependents {
                let current = doc.status(&dep);
                if target.as_deref() == Some(dep.as_str())
                    || !matches!(current, StepStatus::Pending | StepStatus::AwaitingDecision)
                {
                    continue;
                }
                prior.insert(dep.clone(), current);
                doc.set_status(&dep, StepStatus::SkippedByDecision);
                skipped.push(dep);
            }

            // A target with recorded completions keeps its status.
            let mut target_reset = None;
            if let Some(t) = target
                && doc.occurrences(&t) == 0
                && doc.status(&t) != StepStatus::Pending
            {
                prior.insert(t.clone(), doc.status(&t));
                doc.set_status(&t, StepStatus::Pending);
                target_reset = Some(t);
            }

            doc.append(step_id);
            doc.decisions.insert(
                step_id.to_string(),
                DecisionRecord {
                    answer: Decision::No,
                    decided_at: Utc::now(),
                    prior,
                    safety_snapshot: Some(safety_name.clone()),
                },
            );
            (skipped, target_reset)
        })?;

        tracing::info!(
            step_id = %step_id,
            skipped = ?skipped,
            target_reset = ?target_reset,
            "decision: no"
        );
        Ok(DecisionOutcome {
            step_id: step_id.to_string(),
            answer,
            skipped,
            target_reset,
            safety_snapshot: Some(safety_name),
        })
    }
}
