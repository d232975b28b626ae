use camino::{Utf8Path, Utf8PathBuf};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::path::PathBuf;
use std::time::Duration;

use labflow_utils::paths::DEFAULT_DEFINITION_FILE;

pub const DEFAULT_GRACE_PERIOD_SECS: u64 = 5;
pub const MAX_GRACE_PERIOD_SECS: u64 = 300;
pub const DEFAULT_POLL_INTERVAL_MS: u64 = 50;
pub const DEFAULT_TRANSCRIPT_CAP_BYTES: usize = 1024 * 1024;
pub const DEFAULT_LOCK_TTL_SECS: u64 = 900;

/// Where an effective configuration value came from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigSource {
    Cli,
    Config,
    Programmatic,
    Default,
}

/// Effective configuration for one project.
///
/// ```toml
/// [workflow]
/// definition = "workflow.yml"
///
/// [runner]
/// grace_period_secs = 5
/// poll_interval_ms = 50
/// transcript_cap_bytes = 1048576
/// write_transcripts = true
///
/// [runner.interpreters]
/// py = "python3"
///
/// [snapshots]
/// exclude = ["**/*.tmp"]
///
/// [lock]
/// ttl_seconds = 900
/// ```
#[derive(Debug, Clone)]
pub struct Config {
    pub project_root: Utf8PathBuf,
    /// Config file the values were read from, if one was found.
    pub config_file: Option<Utf8PathBuf>,
    pub workflow: WorkflowSection,
    pub runner: RunnerSection,
    pub snapshots: SnapshotSection,
    pub lock: LockSection,
    pub logging: LoggingSection,
    pub source_attribution: HashMap<String, ConfigSource>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkflowSection {
    /// Definition file, relative to the project root.
    pub definition: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunnerSection {
    pub grace_period_secs: u64,
    pub poll_interval_ms: u64,
    pub transcript_cap_bytes: usize,
    pub write_transcripts: bool,
    /// Script extension (without dot) to the program that runs it.
    pub interpreters: BTreeMap<String, String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SnapshotSection {
    /// Globs, relative to the project root, never captured or restored.
    pub exclude: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LockSection {
    pub ttl_seconds: u64,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoggingSection {
    pub verbose: bool,
}

/// Overrides supplied on the command line.
#[derive(Debug, Clone, Default)]
pub struct CliArgs {
    pub config_path: Option<PathBuf>,
    pub definition: Option<String>,
    pub grace_period_secs: Option<u64>,
    pub verbose: Option<bool>,
    pub no_transcripts: bool,
    pub exclude: Vec<String>,
}

impl Default for WorkflowSection {
    fn default() -> Self {
        Self {
            definition: DEFAULT_DEFINITION_FILE.to_string(),
        }
    }
}

impl Default for RunnerSection {
    fn default() -> Self {
        let interpreters = [
            ("py", "python3"),
            ("sh", "sh"),
            ("bash", "bash"),
            ("R", "Rscript"),
            ("pl", "perl"),
        ]
        .into_iter()
        .map(|(ext, prog)| (ext.to_string(), prog.to_string()))
        .collect();
        Self {
            grace_period_secs: DEFAULT_GRACE_PERIOD_SECS,
            poll_interval_ms: DEFAULT_POLL_INTERVAL_MS,
            transcript_cap_bytes: DEFAULT_TRANSCRIPT_CAP_BYTES,
            write_transcripts: true,
            interpreters,
        }
    }
}

impl Default for LockSection {
    fn default() -> Self {
        Self {
            ttl_seconds: DEFAULT_LOCK_TTL_SECS,
        }
    }
}

impl Config {
    /// Defaults for `project_root`, with every key attributed to `Default`.
    #[must_use]
    pub fn defaults_for(project_root: impl Into<Utf8PathBuf>) -> Self {
        let source_attribution = Self::ATTRIBUTED_KEYS
            .iter()
            .map(|k| ((*k).to_string(), ConfigSource::Default))
            .collect();
        Self {
            project_root: project_root.into(),
            config_file: None,
            workflow: WorkflowSection::default(),
            runner: RunnerSection::default(),
            snapshots: SnapshotSection::default(),
            lock: LockSection::default(),
            logging: LoggingSection::default(),
            source_attribution,
        }
    }

    pub(crate) const ATTRIBUTED_KEYS: &'static [&'static str] = &[
        "definition",
        "grace_period_secs",
        "poll_interval_ms",
        "transcript_cap_bytes",
        "write_transcripts",
        "interpreters",
        "snapshot_exclude",
        "lock_ttl_seconds",
        "verbose",
    ];

    #[must_use]
    pub fn definition_path(&self) -> Utf8PathBuf {
        let def = Utf8Path::new(&self.workflow.definition);
        if def.is_absolute() {
            def.to_path_buf()
        } else {
            self.project_root.join(def)
        }
    }

    #[must_use]
    pub const fn grace_period(&self) -> Duration {
        Duration::from_secs(self.runner.grace_period_secs)
    }

    #[must_use]
    pub const fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.runner.poll_interval_ms)
    }

    /// Interpreter configured for the extension of `executable_ref`, if any.
    #[must_use]
    pub fn interpreter_for(&self, executable_ref: &str) -> Option<&str> {
        let ext = Utf8Path::new(executable_ref).extension()?;
        self.runner.interpreters.get(ext).map(String::as_str)
    }
}
