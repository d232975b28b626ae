//! `labflow validate`
//!
//! Loads the definition only; the project lock and state are not touched.

use anyhow::Result;

use labflow_config::Config;
use labflow_utils::exit_codes::ExitCode;
use labflow_workflow::Workflow;

pub fn execute_validate_command(config: &Config) -> Result<ExitCode> {
    let path = config.definition_path();
    let workflow = Workflow::load(&path).map_err(labflow_utils::error::LabflowError::from)?;

    println!("✓ {path}: {} step(s)", workflow.len());
    for step in workflow.steps() {
        let mut notes = Vec::new();
        if step.allow_rerun {
            notes.push("rerun".to_string());
        }
        if let Some(trigger) = step.trigger_step() {
            notes.push(format!("asks after {trigger}"));
        }
        if let Some(parent) = step.depends_on() {
            notes.push(format!("follows {parent}"));
        }
        if notes.is_empty() {
            println!("  - {}", step.id);
        } else {
            println!("  - {} ({})", step.id, notes.join("; "));
        }
    }
    Ok(ExitCode::SUCCESS)
}
