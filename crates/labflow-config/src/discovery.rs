use camino::{Utf8Path, Utf8PathBuf};
use serde::Deserialize;
use std::collections::BTreeMap;

use labflow_utils::error::ConfigError;
use labflow_utils::paths::{DEFAULT_DEFINITION_FILE, HOUSEKEEPING_DIR, ProjectPaths};

use crate::model::{CliArgs, Config, ConfigSource};

/// On-disk layout of `.labflow/config.toml`. Every field is optional so a
/// file only needs to mention what it overrides.
#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct TomlConfig {
    workflow: Option<TomlWorkflow>,
    runner: Option<TomlRunner>,
    snapshots: Option<TomlSnapshots>,
    lock: Option<TomlLock>,
    logging: Option<TomlLogging>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct TomlWorkflow {
    definition: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct TomlRunner {
    grace_period_secs: Option<u64>,
    poll_interval_ms: Option<u64>,
    transcript_cap_bytes: Option<usize>,
    write_transcripts: Option<bool>,
    interpreters: Option<BTreeMap<String, String>>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct TomlSnapshots {
    exclude: Option<Vec<String>>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct TomlLock {
    ttl_seconds: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct TomlLogging {
    verbose: Option<bool>,
}

impl Config {
    /// Load configuration for the project at `project_root` with precedence
    /// CLI > config file > defaults, then validate it.
    ///
    /// The config file is `cli_args.config_path` when given (it must exist),
    /// otherwise `.labflow/config.toml` when present.
    pub fn discover_from(project_root: &Utf8Path, cli_args: &CliArgs) -> Result<Self, ConfigError> {
        let mut config = Self::defaults_for(project_root);

        let config_path = match &cli_args.config_path {
            Some(explicit) => {
                let path = Utf8PathBuf::from_path_buf(explicit.clone()).map_err(|p| {
                    ConfigError::InvalidFile(format!("config path is not UTF-8: {}", p.display()))
                })?;
                if !path.is_file() {
                    return Err(ConfigError::NotFound {
                        path: path.to_string(),
                    });
                }
                Some(path)
            }
            None => {
                let default = ProjectPaths::new(project_root).config_file();
                default.is_file().then_some(default)
            }
        };

        if let Some(path) = config_path {
            let file_config = load_config_file(&path)?;
            config.apply_file(file_config);
            tracing::debug!(path = %path, "loaded config file");
            config.config_file = Some(path);
        }

        config.apply_cli(cli_args);
        config.validate()?;
        Ok(config)
    }

    fn apply_file(&mut self, file: TomlConfig) {
        let src = ConfigSource::Config;

        if let Some(workflow) = file.workflow
            && let Some(definition) = workflow.definition
        {
            self.workflow.definition = definition;
            self.attribute("definition", src.clone());
        }

        if let Some(runner) = file.runner {
            if let Some(v) = runner.grace_period_secs {
                self.runner.grace_period_secs = v;
                self.attribute("grace_period_secs", src.clone());
            }
            if let Some(v) = runner.poll_interval_ms {
                self.runner.poll_interval_ms = v;
                self.attribute("poll_interval_ms", src.clone());
            }
            if let Some(v) = runner.transcript_cap_bytes {
                self.runner.transcript_cap_bytes = v;
                self.attribute("transcript_cap_bytes", src.clone());
            }
            if let Some(v) = runner.write_transcripts {
                self.runner.write_transcripts = v;
                self.attribute("write_transcripts", src.clone());
            }
            // File entries extend the built-in table rather than replacing it.
            if let Some(map) = runner.interpreters {
                self.runner.interpreters.extend(map);
                self.attribute("interpreters", src.clone());
            }
        }

        if let Some(snapshots) = file.snapshots
            && let Some(exclude) = snapshots.exclude
        {
            self.snapshots.exclude = exclude;
            self.attribute("snapshot_exclude", src.clone());
        }

        if let Some(lock) = file.lock
            && let Some(ttl) = lock.ttl_seconds
        {
            self.lock.ttl_seconds = ttl;
            self.attribute("lock_ttl_seconds", src.clone());
        }

        if let Some(logging) = file.logging
            && let Some(verbose) = logging.verbose
        {
            self.logging.verbose = verbose;
            self.attribute("verbose", src);
        }
    }

    fn apply_cli(&mut self, cli: &CliArgs) {
        if let Some(definition) = &cli.definition {
            self.workflow.definition.clone_from(definition);
            self.attribute("definition", ConfigSource::Cli);
        }
        if let Some(grace) = cli.grace_period_secs {
            self.runner.grace_period_secs = grace;
            self.attribute("grace_period_secs", ConfigSource::Cli);
        }
        if cli.no_transcripts {
            self.runner.write_transcripts = false;
            self.attribute("write_transcripts", ConfigSource::Cli);
        }
        if !cli.exclude.is_empty() {
            self.snapshots.exclude.extend(cli.exclude.iter().cloned());
            self.attribute("snapshot_exclude", ConfigSource::Cli);
        }
        if let Some(verbose) = cli.verbose {
            self.logging.verbose = verbose;
            self.attribute("verbose", ConfigSource::Cli);
        }
    }

    pub(crate) fn attribute(&mut self, key: &str, source: ConfigSource) {
        self.source_attribution.insert(key.to_string(), source);
    }
}

fn load_config_file(path: &Utf8Path) -> Result<TomlConfig, ConfigError> {
    let content = std::fs::read_to_string(path)
        .map_err(|e| ConfigError::InvalidFile(format!("{path}: {e}")))?;
    toml::from_str(&content).map_err(|e| ConfigError::InvalidFile(format!("{path}: {e}")))
}

/// Find the project root for `start`: the nearest ancestor holding a
/// `.labflow/` directory or a `workflow.yml`.
///
/// The search stops at a VCS root (`.git`, `.hg`, `.svn`) so a workflow in an
/// enclosing repository is never picked up by accident.
#[must_use]
pub fn discover_project_root(start: &Utf8Path) -> Option<Utf8PathBuf> {
    for dir in start.ancestors() {
        if dir.join(HOUSEKEEPING_DIR).is_dir() || dir.join(DEFAULT_DEFINITION_FILE).is_file() {
            return Some(dir.to_path_buf());
        }
        if [".git", ".hg", ".svn"].iter().any(|vcs| dir.join(vcs).exists()) {
            return None;
        }
    }
    None
}
