//! CLI entry point and dispatch.
//!
//! `run()` owns all output, errors included. It returns the exit code to use
//! on failure; `main.rs` only calls `std::process::exit`.

use anyhow::Result;
use camino::Utf8PathBuf;
use clap::Parser;
use std::path::Path;

use labflow_config::{CliArgs, Config, discover_project_root};
use labflow_utils::error::{ConfigError, LabflowError};
use labflow_utils::exit_codes::ExitCode;
use labflow_utils::logging::{LogFormat, init_tracing};

use super::args::{Cli, Commands};
use super::commands;

/// Parse arguments, discover configuration and run one command.
pub fn run() -> Result<(), ExitCode> {
    let cli = Cli::parse();

    let format = if cli.log_json { LogFormat::Json } else { LogFormat::Compact };
    if let Err(e) = init_tracing(cli.verbose, format) {
        eprintln!("✗ Failed to initialize logging: {e}");
    }

    let config = match load_config(&cli) {
        Ok(config) => config,
        Err(err) => {
            eprintln!("{}", err.display_for_user());
            return Err(err.to_exit_code());
        }
    };
    tracing::debug!(project = %config.project_root, "configuration loaded");

    let operation = operation_name(&cli.command);
    let force_lock = cli.force_lock;
    let result = match cli.command {
        Commands::Status { json, show_config } => {
            commands::execute_status_command(config, force_lock, json, show_config)
        }
        Commands::Run { step, inputs } => commands::execute_run_command(config, force_lock, &step, inputs),
        Commands::Undo { json } => commands::execute_undo_command(config, force_lock, json),
        Commands::SkipTo { step } => commands::execute_skip_to_command(config, force_lock, &step),
        Commands::Decide { step, answer } => {
            commands::execute_decide_command(config, force_lock, &step, answer)
        }
        Commands::Diagnose { json } => commands::execute_diagnose_command(config, force_lock, json),
        Commands::Snapshots { json } => commands::execute_snapshots_command(config, force_lock, json),
        Commands::Validate => commands::execute_validate_command(&config),
    };

    match result {
        Ok(code) if code.is_success() => Ok(()),
        Ok(code) => Err(code),
        Err(error) => Err(report_error(&error, operation)),
    }
}

fn load_config(cli: &Cli) -> Result<Config, LabflowError> {
    let root = project_root(cli.project.as_deref())?;
    let cli_args = CliArgs {
        config_path: cli.config.clone(),
        definition: cli.definition.clone(),
        grace_period_secs: cli.grace_period,
        verbose: cli.verbose.then_some(true),
        no_transcripts: cli.no_transcripts,
        exclude: cli.exclude.clone(),
    };
    Ok(Config::discover_from(&root, &cli_args)?)
}

/// `--project` when given, else the nearest enclosing project, else the
/// current directory.
fn project_root(explicit: Option<&Path>) -> Result<Utf8PathBuf, LabflowError> {
    let invalid = |value: String| ConfigError::InvalidValue {
        key: "project".to_string(),
        value,
    };

    if let Some(path) = explicit {
        let path = Utf8PathBuf::from_path_buf(path.to_path_buf())
            .map_err(|p| invalid(format!("{} is not valid UTF-8", p.display())))?;
        if !path.is_dir() {
            return Err(invalid(format!("{path} is not a directory")).into());
        }
        return Ok(path);
    }

    let cwd = std::env::current_dir()?;
    let cwd = Utf8PathBuf::from_path_buf(cwd)
        .map_err(|p| invalid(format!("{} is not valid UTF-8", p.display())))?;
    Ok(discover_project_root(&cwd).unwrap_or(cwd))
}

fn operation_name(command: &Commands) -> &'static str {
    match command {
        Commands::Status { .. } => "status",
        Commands::Run { .. } => "run",
        Commands::Undo { .. } => "undo",
        Commands::SkipTo { .. } => "skip-to",
        Commands::Decide { .. } => "decide",
        Commands::Diagnose { .. } => "diagnose",
        Commands::Snapshots { .. } => "snapshots",
        Commands::Validate => "validate",
    }
}

fn report_error(error: &anyhow::Error, operation: &str) -> ExitCode {
    if let Some(err) = error.downcast_ref::<LabflowError>() {
        tracing::debug!(operation, error = %err, "command failed");
        eprint!("{}", err.display_for_user());
        return err.to_exit_code();
    }

    eprintln!("✗ {operation} failed: {error:#}");
    eprintln!("\n  Run with --verbose for more detailed output");
    ExitCode::INTERNAL
}

#[cfg(test)]
mod tests {
    use super::*;
    use labflow_utils::error::StepError;
    use labflow_utils::test_support::TestProject;
    use serial_test::serial;

    #[test]
    fn test_explicit_project_must_exist() {
        let err = project_root(Some(Path::new("/definitely/not/a/project"))).unwrap_err();
        assert_eq!(err.to_exit_code(), ExitCode::CLI_ARGS);
    }

    #[test]
    fn test_explicit_project_is_used_verbatim() {
        let project = TestProject::new();
        let root = project_root(Some(project.root().as_std_path())).unwrap();
        assert_eq!(root, project.root());
    }

    #[test]
    #[serial]
    fn test_project_discovered_from_nested_dir() {
        let project = TestProject::new();
        project.workflow("steps:\n  - {id: a, script: a.sh}\n");
        project.write("data/raw/.keep", "");

        let previous = std::env::current_dir().unwrap();
        std::env::set_current_dir(project.root().join("data/raw")).unwrap();
        let found = project_root(None);
        std::env::set_current_dir(previous).unwrap();

        assert_eq!(found.unwrap(), project.root());
    }

    #[test]
    fn test_labflow_errors_keep_their_exit_code() {
        let err = anyhow::Error::from(LabflowError::from(StepError::NothingToUndo));
        assert_eq!(report_error(&err, "undo"), ExitCode::STEP_REJECTED);

        let wrapped = anyhow::anyhow!("disk on fire");
        assert_eq!(report_error(&wrapped, "run"), ExitCode::INTERNAL);
    }
}
