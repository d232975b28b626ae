use camino::{Utf8Path, Utf8PathBuf};
use std::collections::{BTreeMap, BTreeSet};

use labflow_utils::error::StepError;

/// A declared input-file argument.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InputSpec {
    pub name: String,
    /// Passed as `<flag> <value>` when set, positionally otherwise.
    pub flag: Option<String>,
    pub required: bool,
}

/// Operator decision gate on a step.
///
/// A step with `trigger_step` moves to `awaiting_decision` once its trigger
/// completes. A step with only `depends_on` follows the decision of the step
/// it depends on: when that decision is "no", it is skipped too.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Conditional {
    pub trigger_step: Option<String>,
    pub prompt: String,
    /// Step activated as `pending` when the operator answers "no".
    pub target_step: Option<String>,
    pub depends_on: Option<String>,
}

/// Immutable step descriptor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Step {
    pub id: String,
    pub name: String,
    /// Script path relative to the project root, or a bare program name.
    pub executable_ref: String,
    pub args: Vec<String>,
    pub interpreter: Option<String>,
    pub inputs: Vec<InputSpec>,
    pub description: Option<String>,
    /// Normalized project-relative paths; an empty path is the whole project.
    pub snapshot_scope: Vec<Utf8PathBuf>,
    pub allow_rerun: bool,
    pub conditional: Option<Conditional>,
}

impl Step {
    #[must_use]
    pub fn trigger_step(&self) -> Option<&str> {
        self.conditional.as_ref()?.trigger_step.as_deref()
    }

    #[must_use]
    pub fn depends_on(&self) -> Option<&str> {
        self.conditional.as_ref()?.depends_on.as_deref()
    }

    #[must_use]
    pub fn decision_target(&self) -> Option<&str> {
        self.conditional.as_ref()?.target_step.as_deref()
    }

    #[must_use]
    pub fn prompt(&self) -> Option<&str> {
        self.conditional
            .as_ref()
            .filter(|c| c.trigger_step.is_some())
            .map(|c| c.prompt.as_str())
    }

    #[must_use]
    pub fn covers_whole_project(&self) -> bool {
        self.snapshot_scope.iter().any(|p| p.as_str().is_empty())
    }

    /// Build the argv tail for a run: fixed `args`, then declared inputs in
    /// declaration order.
    pub fn command_args(&self, provided: &BTreeMap<String, String>) -> Result<Vec<String>, StepError> {
        if let Some(unknown) = provided
            .keys()
            .find(|name| !self.inputs.iter().any(|i| &i.name == *name))
        {
            return Err(StepError::UnknownInput {
                step: self.id.clone(),
                input: unknown.clone(),
            });
        }

        let mut argv = self.args.clone();
        for input in &self.inputs {
            match provided.get(&input.name) {
                Some(value) => {
                    if let Some(flag) = &input.flag {
                        argv.push(flag.clone());
                    }
                    argv.push(value.clone());
                }
                None if input.required => {
                    return Err(StepError::MissingInput {
                        step: self.id.clone(),
                        input: input.name.clone(),
                    });
                }
                None => {}
            }
        }
        Ok(argv)
    }
}

/// Validated, ordered workflow.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Workflow {
    pub(crate) name: Option<String>,
    pub(crate) description: Option<String>,
    pub(crate) steps: Vec<Step>,
    pub(crate) source_path: Option<Utf8PathBuf>,
    pub(crate) content_hash: String,
}

impl Workflow {
    #[must_use]
    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    #[must_use]
    pub fn description(&self) -> Option<&str> {
        self.description.as_deref()
    }

    #[must_use]
    pub fn steps(&self) -> &[Step] {
        &self.steps
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.steps.len()
    }

    /// Always false for a validated workflow.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    #[must_use]
    pub fn source_path(&self) -> Option<&Utf8Path> {
        self.source_path.as_deref()
    }

    /// BLAKE3 of the definition text, hex encoded.
    #[must_use]
    pub fn content_hash(&self) -> &str {
        &self.content_hash
    }

    #[must_use]
    pub fn step(&self, id: &str) -> Option<&Step> {
        self.steps.iter().find(|s| s.id == id)
    }

    #[must_use]
    pub fn index_of(&self, id: &str) -> Option<usize> {
        self.steps.iter().position(|s| s.id == id)
    }

    pub fn step_ids(&self) -> impl Iterator<Item = &str> {
        self.steps.iter().map(|s| s.id.as_str())
    }

    /// Steps strictly before `id` in definition order; empty for unknown ids.
    #[must_use]
    pub fn steps_before(&self, id: &str) -> &[Step] {
        match self.index_of(id) {
            Some(idx) => &self.steps[..idx],
            None => &[],
        }
    }

    /// Steps whose decision is triggered by `id` completing.
    #[must_use]
    pub fn triggered_by(&self, id: &str) -> Vec<&Step> {
        self.steps
            .iter()
            .filter(|s| s.trigger_step() == Some(id))
            .collect()
    }

    /// Steps that follow `id`'s decision, directly or through a chain of
    /// `depends_on`, in definition order.
    #[must_use]
    pub fn dependents_of(&self, id: &str) -> Vec<&Step> {
        let mut reached = BTreeSet::from([id]);
        loop {
            let before = reached.len();
            for step in &self.steps {
                if let Some(parent) = step.depends_on()
                    && reached.contains(parent)
                {
                    reached.insert(step.id.as_str());
                }
            }
            if reached.len() == before {
                break;
            }
        }
        self.steps
            .iter()
            .filter(|s| s.id != id && reached.contains(s.id.as_str()))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn wf() -> Workflow {
        Workflow::from_yaml_str(
            r#"
steps:
  - id: prep
    script: prep.sh
    inputs:
      - { name: samples, flag: --samples, required: true }
      - { name: notes }
  - id: qc
    script: qc.sh
    conditional: { trigger_step: prep, prompt: "QC?", target_step: report }
  - id: qc_plot
    script: qc_plot.sh
    conditional: { depends_on: qc }
  - id: qc_table
    script: qc_table.sh
    conditional: { depends_on: qc_plot }
  - id: report
    script: report.sh
"#,
        )
        .unwrap()
    }

    #[test]
    fn test_lookup_and_ordering() {
        let wf = wf();
        assert_eq!(wf.len(), 5);
        assert_eq!(wf.index_of("qc_plot"), Some(2));
        assert_eq!(wf.index_of("nope"), None);
        let before: Vec<_> = wf.steps_before("qc_plot").iter().map(|s| s.id.as_str()).collect();
        assert_eq!(before, ["prep", "qc"]);
        assert!(wf.steps_before("nope").is_empty());
    }

    #[test]
    fn test_trigger_and_dependents() {
        let wf = wf();
        let triggered: Vec<_> = wf.triggered_by("prep").iter().map(|s| s.id.as_str()).collect();
        assert_eq!(triggered, ["qc"]);
        let deps: Vec<_> = wf.dependents_of("qc").iter().map(|s| s.id.as_str()).collect();
        assert_eq!(deps, ["qc_plot", "qc_table"]);
        assert!(wf.dependents_of("report").is_empty());
        assert_eq!(wf.step("qc").unwrap().prompt(), Some("QC?"));
        assert_eq!(wf.step("qc_plot").unwrap().prompt(), None);
    }

    #[test]
    fn test_command_args_order_and_validation() {
        let wf = wf();
        let prep = wf.step("prep").unwrap();

        let mut provided = BTreeMap::new();
        provided.insert("notes".to_string(), "n.txt".to_string());
        provided.insert("samples".to_string(), "s.csv".to_string());
        assert_eq!(prep.command_args(&provided).unwrap(), ["--samples", "s.csv", "n.txt"]);

        provided.remove("samples");
        assert!(matches!(prep.command_args(&provided), Err(StepError::MissingInput { .. })));

        provided.insert("samples".to_string(), "s.csv".to_string());
        provided.insert("bogus".to_string(), "x".to_string());
        assert!(matches!(prep.command_args(&provided), Err(StepError::UnknownInput { .. })));
    }
}
