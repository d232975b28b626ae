use camino::{Utf8Path, Utf8PathBuf};
use serde::Deserialize;
use std::collections::HashSet;

use labflow_utils::error::DefinitionError;
use labflow_utils::paths::normalize_relative;
use labflow_utils::step_id::validate_step_id;

use crate::model::{Conditional, InputSpec, Step, Workflow};

const INLINE_SOURCE: &str = "<inline>";

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawWorkflow {
    name: Option<String>,
    description: Option<String>,
    steps: Option<Vec<RawStep>>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawStep {
    id: Option<String>,
    name: Option<String>,
    script: Option<String>,
    #[serde(default)]
    args: Vec<String>,
    interpreter: Option<String>,
    #[serde(default)]
    inputs: Vec<RawInput>,
    description: Option<String>,
    snapshot_scope: Option<Vec<String>>,
    #[serde(default)]
    allow_rerun: bool,
    conditional: Option<RawConditional>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawInput {
    name: Option<String>,
    flag: Option<String>,
    #[serde(default)]
    required: bool,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawConditional {
    trigger_step: Option<String>,
    prompt: Option<String>,
    target_step: Option<String>,
    depends_on: Option<String>,
}

impl Workflow {
    /// Read and validate the definition at `path`.
    pub fn load(path: &Utf8Path) -> Result<Self, DefinitionError> {
        let text = std::fs::read_to_string(path).map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                DefinitionError::NotFound {
                    path: path.to_string(),
                }
            } else {
                DefinitionError::Parse {
                    path: path.to_string(),
                    reason: e.to_string(),
                }
            }
        })?;
        let mut workflow = parse(&text, path.as_str())?;
        workflow.source_path = Some(path.to_path_buf());
        tracing::debug!(
            path = %path,
            steps = workflow.len(),
            hash = %workflow.content_hash,
            "loaded workflow definition"
        );
        Ok(workflow)
    }

    /// Validate a definition held in memory.
    pub fn from_yaml_str(yaml: &str) -> Result<Self, DefinitionError> {
        parse(yaml, INLINE_SOURCE)
    }
}

fn parse(text: &str, source: &str) -> Result<Workflow, DefinitionError> {
    let raw: RawWorkflow = serde_yaml::from_str(text).map_err(|e| DefinitionError::Parse {
        path: source.to_string(),
        reason: e.to_string(),
    })?;

    let raw_steps = raw.steps.unwrap_or_default();
    if raw_steps.is_empty() {
        return Err(DefinitionError::EmptyWorkflow);
    }

    let mut steps = Vec::with_capacity(raw_steps.len());
    let mut seen = HashSet::new();
    for (i, raw_step) in raw_steps.into_iter().enumerate() {
        let step = convert_step(i + 1, raw_step)?;
        if !seen.insert(step.id.clone()) {
            return Err(DefinitionError::DuplicateStepId { id: step.id });
        }
        steps.push(step);
    }

    for step in &steps {
        check_references(step, &seen)?;
    }

    Ok(Workflow {
        name: raw.name,
        description: raw.description,
        steps,
        source_path: None,
        content_hash: blake3::hash(text.as_bytes()).to_hex().to_string(),
    })
}

fn non_blank(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

fn convert_step(index: usize, raw: RawStep) -> Result<Step, DefinitionError> {
    let id = non_blank(raw.id).ok_or(DefinitionError::MissingField { index, field: "id" })?;
    validate_step_id(&id).map_err(|e| DefinitionError::InvalidStepId {
        id: id.clone(),
        reason: e.to_string(),
    })?;
    let executable_ref =
        non_blank(raw.script).ok_or(DefinitionError::MissingField { index, field: "script" })?;

    let snapshot_scope = convert_scope(&id, raw.snapshot_scope)?;

    let mut inputs = Vec::with_capacity(raw.inputs.len());
    let mut input_names = HashSet::new();
    for raw_input in raw.inputs {
        let name = non_blank(raw_input.name).ok_or(DefinitionError::MissingField {
            index,
            field: "inputs.name",
        })?;
        if !input_names.insert(name.clone()) {
            return Err(DefinitionError::DuplicateInput { step: id, name });
        }
        inputs.push(InputSpec {
            name,
            flag: non_blank(raw_input.flag),
            required: raw_input.required,
        });
    }

    let conditional = match raw.conditional {
        Some(c) => {
            let trigger_step = non_blank(c.trigger_step);
            let depends_on = non_blank(c.depends_on);
            if trigger_step.is_none() && depends_on.is_none() {
                return Err(DefinitionError::EmptyConditional { step: id });
            }
            let name = non_blank(raw.name.clone()).unwrap_or_else(|| id.clone());
            Some(Conditional {
                prompt: non_blank(c.prompt).unwrap_or_else(|| format!("Run '{name}'?")),
                trigger_step,
                target_step: non_blank(c.target_step),
                depends_on,
            })
        }
        None => None,
    };

    Ok(Step {
        name: non_blank(raw.name).unwrap_or_else(|| id.clone()),
        id,
        executable_ref,
        args: raw.args,
        interpreter: non_blank(raw.interpreter),
        inputs,
        description: raw.description,
        snapshot_scope,
        allow_rerun: raw.allow_rerun,
        conditional,
    })
}

fn convert_scope(id: &str, raw: Option<Vec<String>>) -> Result<Vec<Utf8PathBuf>, DefinitionError> {
    let entries = match raw {
        Some(entries) if !entries.is_empty() => entries,
        _ => return Ok(vec![Utf8PathBuf::new()]),
    };

    let mut scope: Vec<Utf8PathBuf> = Vec::with_capacity(entries.len());
    for entry in entries {
        let path = normalize_relative(&entry).map_err(|e| DefinitionError::InvalidScope {
            step: id.to_string(),
            path: entry.clone(),
            reason: e.to_string(),
        })?;
        if path.as_str().is_empty() {
            return Ok(vec![Utf8PathBuf::new()]);
        }
        if !scope.contains(&path) {
            scope.push(path);
        }
    }
    Ok(scope)
}

fn check_references(step: &Step, known: &HashSet<String>) -> Result<(), DefinitionError> {
    let Some(cond) = &step.conditional else {
        return Ok(());
    };
    let refs = [
        ("trigger_step", cond.trigger_step.as_deref()),
        ("target_step", cond.target_step.as_deref()),
        ("depends_on", cond.depends_on.as_deref()),
    ];
    for (field, target) in refs {
        let Some(target) = target else { continue };
        if target == step.id {
            return Err(DefinitionError::SelfReference {
                step: step.id.clone(),
                field,
            });
        }
        if !known.contains(target) {
            return Err(DefinitionError::DanglingReference {
                step: step.id.clone(),
                field,
                target: target.to_string(),
            });
        }
    }
    if cond.target_step.is_some() && cond.trigger_step.is_none() {
        tracing::warn!(step_id = %step.id, "target_step has no effect without trigger_step");
    }
    Ok(())
}
