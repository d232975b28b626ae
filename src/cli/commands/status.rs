//! `labflow status`

use anyhow::Result;
use serde::Serialize;
use std::collections::BTreeMap;

use labflow_config::Config;
use labflow_engine::WorkflowView;
use labflow_utils::exit_codes::ExitCode;
use labflow_utils::types::StepStatus;

use super::common;

#[derive(Serialize)]
struct ConfigValue {
    value: String,
    source: String,
}

#[derive(Serialize)]
struct StatusJson<'a> {
    project: String,
    #[serde(flatten)]
    view: &'a WorkflowView,
    #[serde(skip_serializing_if = "Option::is_none")]
    config: Option<BTreeMap<String, ConfigValue>>,
}

pub fn execute_status_command(config: Config, force_lock: bool, json: bool, show_config: bool) -> Result<ExitCode> {
    let project = config.project_root.to_string();
    let effective = show_config.then(|| config.effective_config());
    let mut coordinator = common::open_coordinator(config, force_lock)?;
    let view = coordinator.view()?;

    if json {
        let config = effective.map(|entries| {
            entries
                .into_iter()
                .map(|(key, (value, source))| (key, ConfigValue { value, source }))
                .collect()
        });
        common::print_json(&StatusJson {
            project,
            view: &view,
            config,
        })?;
        return Ok(ExitCode::SUCCESS);
    }

    render(&project, &view);
    if let Some(entries) = effective {
        println!();
        println!("Configuration:");
        for (key, (value, source)) in entries {
            println!("  {key:<22} {value}  ({source})");
        }
    }
    Ok(ExitCode::SUCCESS)
}

fn render(project: &str, view: &WorkflowView) {
    match &view.workflow {
        Some(name) => println!("Workflow: {name}  ({project})"),
        None => println!("Project: {project}"),
    }
    println!();

    let width = view.steps.iter().map(|s| s.id.len()).max().unwrap_or(0);
    for (i, step) in view.steps.iter().enumerate() {
        let mut line = format!(
            "{:>3}. {:<width$}  {}",
            i + 1,
            step.id,
            common::status_label(step.status)
        );
        if !step.surviving_runs.is_empty() {
            let runs: Vec<String> = step.surviving_runs.iter().map(ToString::to_string).collect();
            line.push_str(&format!("  [runs {}]", runs.join(",")));
        }
        if step.can_run && step.status == StepStatus::Pending {
            line.push_str("  ← runnable");
        }
        println!("{line}");
        if let Some(prompt) = &step.prompt {
            println!("       {prompt}  (labflow decide {} yes|no)", step.id);
        }
    }

    println!();
    if view.completion_order.is_empty() {
        println!("Completion order: (empty)");
    } else {
        println!("Completion order: {}", view.completion_order.join(" → "));
    }
    if let Some(running) = &view.running {
        println!(
            "Running: {} run {} (pid {}{})",
            running.step_id,
            running.run,
            running.pid,
            if running.alive { "" } else { ", exited" }
        );
    }
}
