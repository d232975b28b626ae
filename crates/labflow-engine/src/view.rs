//! What a front end needs to draw the workflow, derived from the definition,
//! the state document, surviving snapshots and the live session only.

use serde::Serialize;
use std::collections::BTreeMap;

use labflow_state::StateDocument;
use labflow_utils::types::StepStatus;
use labflow_workflow::Workflow;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StepView {
    pub id: String,
    pub name: String,
    pub description: Option<String>,
    pub status: StepStatus,
    /// Successful runs currently on record.
    pub completions: usize,
    pub surviving_runs: Vec<u32>,
    pub allow_rerun: bool,
    pub can_run: bool,
    /// Set while the step is awaiting a decision.
    pub prompt: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RunningView {
    pub step_id: String,
    pub run: u32,
    pub pid: u32,
    pub alive: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct WorkflowView {
    pub workflow: Option<String>,
    pub steps: Vec<StepView>,
    pub completion_order: Vec<String>,
    pub running: Option<RunningView>,
    pub can_undo: bool,
}

impl WorkflowView {
    #[must_use]
    pub fn step(&self, id: &str) -> Option<&StepView> {
        self.steps.iter().find(|s| s.id == id)
    }
}

pub(crate) fn build_view(
    workflow: &Workflow,
    doc: &StateDocument,
    surviving: &BTreeMap<String, Vec<u32>>,
    running: Option<RunningView>,
) -> WorkflowView {
    let idle = running.is_none();
    let steps = workflow
        .steps()
        .iter()
        .map(|step| {
            let status = doc.status(&step.id);
            let runnable = match status {
                StepStatus::Pending => true,
                StepStatus::Completed => step.allow_rerun,
                _ => false,
            };
            StepView {
                id: step.id.clone(),
                name: step.name.clone(),
                description: step.description.clone(),
                status,
                completions: doc.occurrences(&step.id),
                surviving_runs: surviving.get(&step.id).cloned().unwrap_or_default(),
                allow_rerun: step.allow_rerun,
                can_run: idle && runnable,
                prompt: (status == StepStatus::AwaitingDecision)
                    .then(|| step.prompt().map(str::to_owned))
                    .flatten(),
            }
        })
        .collect();

    WorkflowView {
        workflow: workflow.name().map(str::to_owned),
        steps,
        completion_order: doc.completion_order.clone(),
        can_undo: idle && !doc.completion_order.is_empty(),
        running,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const YAML: &str = "\
name: assay
steps:
  - {id: prep, name: Prepare, script: prep.sh, allow_rerun: true}
  - {id: check, script: check.sh, conditional: {trigger_step: prep, prompt: 'Re-run prep?', target_step: prep}}
  - {id: report, script: report.sh}
";

    #[test]
    fn test_view_reflects_state() {
        let workflow = Workflow::from_yaml_str(YAML).unwrap();
        let mut doc = StateDocument::default();
        doc.set_status("prep", StepStatus::Completed);
        doc.append("prep");
        doc.set_status("check", StepStatus::AwaitingDecision);
        let surviving = BTreeMap::from([("prep".to_string(), vec![1])]);

        let view = build_view(&workflow, &doc, &surviving, None);
        assert_eq!(view.workflow.as_deref(), Some("assay"));
        assert!(view.can_undo);

        let prep = view.step("prep").unwrap();
        assert_eq!(prep.name, "Prepare");
        assert!(prep.can_run);
        assert_eq!(prep.completions, 1);
        assert_eq!(prep.surviving_runs, [1]);

        let check = view.step("check").unwrap();
        assert!(!check.can_run);
        assert_eq!(check.prompt.as_deref(), Some("Re-run prep?"));

        assert!(view.step("report").unwrap().can_run);
        assert!(view.step("report").unwrap().prompt.is_none());
    }

    #[test]
    fn test_nothing_runs_while_a_step_is_running() {
        let workflow = Workflow::from_yaml_str(YAML).unwrap();
        let running = RunningView {
            step_id: "prep".into(),
            run: 1,
            pid: 42,
            alive: true,
        };
        let view = build_view(&workflow, &StateDocument::default(), &BTreeMap::new(), Some(running));
        assert!(view.steps.iter().all(|s| !s.can_run));
        assert!(!view.can_undo);
        assert_eq!(view.running.unwrap().step_id, "prep");
    }
}
