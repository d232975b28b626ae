use camino::Utf8PathBuf;
use std::time::Duration;

use labflow_utils::error::ConfigError;

use crate::model::{Config, ConfigSource};

impl Config {
    /// Create a builder for programmatic configuration.
    ///
    /// ```rust,no_run
    /// use labflow_config::Config;
    /// use std::time::Duration;
    ///
    /// let config = Config::builder("/data/project")
    ///     .grace_period(Duration::from_secs(2))
    ///     .interpreter("jl", "julia")
    ///     .exclude("scratch/**")
    ///     .build()
    ///     .expect("valid config");
    /// ```
    #[must_use]
    pub fn builder(project_root: impl Into<Utf8PathBuf>) -> ConfigBuilder {
        ConfigBuilder::new(project_root)
    }
}

/// Fluent construction of a [`Config`] without reading any file.
///
/// Values set here are attributed to `ConfigSource::Programmatic`.
#[derive(Debug, Clone)]
pub struct ConfigBuilder {
    project_root: Utf8PathBuf,
    definition: Option<String>,
    grace_period: Option<Duration>,
    poll_interval: Option<Duration>,
    transcript_cap_bytes: Option<usize>,
    write_transcripts: Option<bool>,
    interpreters: Vec<(String, String)>,
    exclude: Vec<String>,
    lock_ttl_seconds: Option<u64>,
    verbose: Option<bool>,
}

impl ConfigBuilder {
    #[must_use]
    pub fn new(project_root: impl Into<Utf8PathBuf>) -> Self {
        Self {
            project_root: project_root.into(),
            definition: None,
            grace_period: None,
            poll_interval: None,
            transcript_cap_bytes: None,
            write_transcripts: None,
            interpreters: Vec::new(),
            exclude: Vec::new(),
            lock_ttl_seconds: None,
            verbose: None,
        }
    }

    #[must_use]
    pub fn definition(mut self, path: impl Into<String>) -> Self {
        self.definition = Some(path.into());
        self
    }

    /// Sub-second precision is dropped.
    #[must_use]
    pub const fn grace_period(mut self, grace: Duration) -> Self {
        self.grace_period = Some(grace);
        self
    }

    #[must_use]
    pub const fn poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = Some(interval);
        self
    }

    #[must_use]
    pub const fn transcript_cap_bytes(mut self, cap: usize) -> Self {
        self.transcript_cap_bytes = Some(cap);
        self
    }

    #[must_use]
    pub const fn write_transcripts(mut self, enabled: bool) -> Self {
        self.write_transcripts = Some(enabled);
        self
    }

    #[must_use]
    pub fn interpreter(mut self, extension: impl Into<String>, program: impl Into<String>) -> Self {
        self.interpreters.push((extension.into(), program.into()));
        self
    }

    #[must_use]
    pub fn exclude(mut self, pattern: impl Into<String>) -> Self {
        self.exclude.push(pattern.into());
        self
    }

    #[must_use]
    pub const fn lock_ttl_seconds(mut self, ttl: u64) -> Self {
        self.lock_ttl_seconds = Some(ttl);
        self
    }

    #[must_use]
    pub const fn verbose(mut self, verbose: bool) -> Self {
        self.verbose = Some(verbose);
        self
    }

    /// Build and validate.
    pub fn build(self) -> Result<Config, ConfigError> {
        let mut config = Config::defaults_for(self.project_root);
        let src = ConfigSource::Programmatic;

        if let Some(definition) = self.definition {
            config.workflow.definition = definition;
            config.attribute("definition", src.clone());
        }
        if let Some(grace) = self.grace_period {
            config.runner.grace_period_secs = grace.as_secs();
            config.attribute("grace_period_secs", src.clone());
        }
        if let Some(interval) = self.poll_interval {
            config.runner.poll_interval_ms = u64::try_from(interval.as_millis()).unwrap_or(u64::MAX);
            config.attribute("poll_interval_ms", src.clone());
        }
        if let Some(cap) = self.transcript_cap_bytes {
            config.runner.transcript_cap_bytes = cap;
            config.attribute("transcript_cap_bytes", src.clone());
        }
        if let Some(enabled) = self.write_transcripts {
            config.runner.write_transcripts = enabled;
            config.attribute("write_transcripts", src.clone());
        }
        if !self.interpreters.is_empty() {
            config.runner.interpreters.extend(self.interpreters);
            config.attribute("interpreters", src.clone());
        }
        if !self.exclude.is_empty() {
            config.snapshots.exclude = self.exclude;
            config.attribute("snapshot_exclude", src.clone());
        }
        if let Some(ttl) = self.lock_ttl_seconds {
            config.lock.ttl_seconds = ttl;
            config.attribute("lock_ttl_seconds", src.clone());
        }
        if let Some(verbose) = self.verbose {
            config.logging.verbose = verbose;
            config.attribute("verbose", src);
        }

        config.validate()?;
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builder_sets_values_and_attribution() {
        let config = Config::builder("/proj")
            .definition("wf.yml")
            .grace_period(Duration::from_millis(2500))
            .poll_interval(Duration::from_millis(10))
            .interpreter("jl", "julia")
            .exclude("tmp/**")
            .build()
            .unwrap();

        assert_eq!(config.definition_path(), "/proj/wf.yml");
        assert_eq!(config.grace_period(), Duration::from_secs(2));
        assert_eq!(config.poll_interval(), Duration::from_millis(10));
        assert_eq!(config.interpreter_for("model.jl"), Some("julia"));
        assert_eq!(config.snapshots.exclude, vec!["tmp/**"]);
        assert_eq!(config.source_attribution["grace_period_secs"], ConfigSource::Programmatic);
        assert_eq!(config.source_attribution["verbose"], ConfigSource::Default);
    }

    #[test]
    fn test_builder_validates() {
        let err = Config::builder("/proj")
            .poll_interval(Duration::ZERO)
            .build()
            .unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue { key, .. } if key == "poll_interval_ms"));
    }
}
