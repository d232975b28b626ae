//! Turning a step into an argv invocation.
//!
//! Resolution order: the step's own `interpreter`, then the configured
//! interpreter for the script's extension, then the executable itself (a
//! project-relative path, or a bare name looked up on `PATH`).

use camino::Utf8Path;
use std::path::PathBuf;

use labflow_config::Config;
use labflow_runner::CommandSpec;
use labflow_utils::error::StepError;
use labflow_utils::paths::ProjectPaths;
use labflow_workflow::Step;

pub(crate) const ENV_SUCCESS_MARKER: &str = "LABFLOW_SUCCESS_MARKER";
pub(crate) const ENV_PROJECT_DIR: &str = "LABFLOW_PROJECT_DIR";
pub(crate) const ENV_STEP_ID: &str = "LABFLOW_STEP_ID";
pub(crate) const ENV_RUN_NUMBER: &str = "LABFLOW_RUN_NUMBER";

/// Build the command for `run` of `step` with the argv tail `argv`.
pub(crate) fn command_for(
    config: &Config,
    paths: &ProjectPaths,
    step: &Step,
    run: u32,
    argv: Vec<String>,
) -> Result<CommandSpec, StepError> {
    let (program, leading) = resolve_program(config, paths.root(), step)?;
    let marker = paths.marker_for(&step.executable_ref);
    Ok(CommandSpec::new(program)
        .args(leading)
        .args(argv)
        .cwd(paths.root().as_std_path())
        .env(ENV_SUCCESS_MARKER, marker.as_str())
        .env(ENV_PROJECT_DIR, paths.root().as_str())
        .env(ENV_STEP_ID, step.id.as_str())
        .env(ENV_RUN_NUMBER, run.to_string()))
}

fn resolve_program(config: &Config, root: &Utf8Path, step: &Step) -> Result<(PathBuf, Vec<String>), StepError> {
    let not_found = |program: &str| StepError::ExecutableNotFound {
        step: step.id.clone(),
        program: program.to_string(),
    };

    let script = root.join(&step.executable_ref);
    let interpreter = step
        .interpreter
        .as_deref()
        .or_else(|| config.interpreter_for(&step.executable_ref));

    if let Some(interpreter) = interpreter {
        if !script.is_file() {
            return Err(not_found(&step.executable_ref));
        }
        let program = which::which(interpreter).map_err(|e| {
            tracing::debug!(step_id = %step.id, interpreter, error = %e, "interpreter lookup failed");
            not_found(interpreter)
        })?;
        return Ok((program, vec![step.executable_ref.clone()]));
    }

    if step.executable_ref.contains('/') || script.is_file() {
        if !script.is_file() {
            return Err(not_found(&step.executable_ref));
        }
        return Ok((script.into_std_path_buf(), Vec::new()));
    }

    which::which(&step.executable_ref)
        .map(|program| (program, Vec::new()))
        .map_err(|_| not_found(&step.executable_ref))
}
