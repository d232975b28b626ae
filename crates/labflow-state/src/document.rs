use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use labflow_utils::types::{Decision, StepStatus};

pub const SCHEMA_VERSION: u32 = 1;

/// Everything needed to reverse a resolved decision.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DecisionRecord {
    pub answer: Decision,
    pub decided_at: DateTime<Utc>,
    /// Status before the decision for every step it changed, the decided
    /// step included.
    #[serde(default)]
    pub prior: BTreeMap<String, StepStatus>,
    /// Safety snapshot taken just before the decision was applied.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub safety_snapshot: Option<String>,
}

/// What a skip-to changed for one skipped step.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SkipRecord {
    pub target: String,
    /// Status the step had before it was skipped.
    pub prior: StepStatus,
}

/// On-disk state document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StateDocument {
    pub schema_version: u32,
    #[serde(default)]
    pub statuses: BTreeMap<String, StepStatus>,
    #[serde(default)]
    pub completion_order: Vec<String>,
    #[serde(default)]
    pub decisions: BTreeMap<String, DecisionRecord>,
    /// Snapshot run number of each completed run, per step, oldest first.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub runs: BTreeMap<String, Vec<u32>>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub skips: BTreeMap<String, SkipRecord>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub definition_hash: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<DateTime<Utc>>,
}

impl Default for StateDocument {
    fn default() -> Self {
        Self {
            schema_version: SCHEMA_VERSION,
            statuses: BTreeMap::new(),
            completion_order: Vec::new(),
            decisions: BTreeMap::new(),
            runs: BTreeMap::new(),
            skips: BTreeMap::new(),
            definition_hash: None,
            updated_at: None,
        }
    }
}

impl StateDocument {
    /// Status of `id`; unknown ids are `pending`.
    #[must_use]
    pub fn status(&self, id: &str) -> StepStatus {
        self.statuses.get(id).copied().unwrap_or_default()
    }

    pub fn set_status(&mut self, id: &str, status: StepStatus) {
        self.statuses.insert(id.to_string(), status);
    }

    pub fn append(&mut self, id: &str) {
        self.completion_order.push(id.to_string());
    }

    /// Append a completed run of `id` that used snapshot run number `run`.
    pub fn append_run(&mut self, id: &str, run: u32) {
        self.append(id);
        self.runs.entry(id.to_string()).or_default().push(run);
    }

    /// Forget the latest recorded run of `id` and return its number.
    pub fn pop_run(&mut self, id: &str) -> Option<u32> {
        let runs = self.runs.get_mut(id)?;
        let run = runs.pop();
        if runs.is_empty() {
            self.runs.remove(id);
        }
        run
    }

    /// Snapshot run number of the `n`th (1-based) completed run of `id`.
    /// Documents without run records number runs by occurrence.
    #[must_use]
    pub fn run_of(&self, id: &str, n: u32) -> u32 {
        usize::try_from(n)
            .ok()
            .and_then(|n| n.checked_sub(1))
            .and_then(|i| self.runs.get(id)?.get(i).copied())
            .unwrap_or(n)
    }

    /// Run numbers the completion order still refers to for `id`.
    #[must_use]
    pub fn recorded_runs(&self, id: &str) -> Vec<u32> {
        let count = u32::try_from(self.occurrences(id)).unwrap_or(u32::MAX);
        (1..=count).map(|n| self.run_of(id, n)).collect()
    }

    /// Remove the last occurrence of `id`; false when it is absent.
    pub fn remove_last_occurrence(&mut self, id: &str) -> bool {
        match self.completion_order.iter().rposition(|e| e == id) {
            Some(pos) => {
                self.completion_order.remove(pos);
                true
            }
            None => false,
        }
    }

    #[must_use]
    pub fn occurrences(&self, id: &str) -> usize {
        self.completion_order.iter().filter(|e| *e == id).count()
    }

    #[must_use]
    pub fn last_completed(&self) -> Option<&str> {
        self.completion_order.last().map(String::as_str)
    }

    /// Ids in the completion order whose status is `pending`.
    #[must_use]
    pub fn pending_in_order(&self) -> Vec<&str> {
        let mut seen: Vec<&str> = Vec::new();
        for id in &self.completion_order {
            if self.status(id) == StepStatus::Pending && !seen.contains(&id.as_str()) {
                seen.push(id);
            }
        }
        seen
    }
}
