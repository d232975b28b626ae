use globset::{Glob, GlobSet, GlobSetBuilder};

use labflow_utils::error::ConfigError;
use labflow_utils::paths::normalize_relative;

use crate::model::{Config, MAX_GRACE_PERIOD_SECS};

fn invalid(key: &str, value: impl Into<String>) -> ConfigError {
    ConfigError::InvalidValue {
        key: key.to_string(),
        value: value.into(),
    }
}

impl Config {
    /// Validate configuration values.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.runner.poll_interval_ms == 0 {
            return Err(invalid("poll_interval_ms", "must be greater than 0"));
        }
        if self.runner.poll_interval_ms > 10_000 {
            return Err(invalid("poll_interval_ms", "exceeds maximum of 10000 ms"));
        }

        if self.runner.grace_period_secs > MAX_GRACE_PERIOD_SECS {
            return Err(invalid(
                "grace_period_secs",
                format!("exceeds maximum of {MAX_GRACE_PERIOD_SECS} seconds"),
            ));
        }

        if self.runner.transcript_cap_bytes < 1024 {
            return Err(invalid("transcript_cap_bytes", "must be at least 1024 bytes (1 KiB)"));
        }

        if self.lock.ttl_seconds == 0 {
            return Err(invalid("lock_ttl_seconds", "must be greater than 0"));
        }

        if !camino::Utf8Path::new(&self.workflow.definition).is_absolute() {
            normalize_relative(&self.workflow.definition)
                .map_err(|e| invalid("definition", e.to_string()))?;
        }

        for (ext, program) in &self.runner.interpreters {
            if ext.is_empty() || ext.starts_with('.') {
                return Err(invalid("interpreters", format!("bad extension key '{ext}'")));
            }
            if program.trim().is_empty() {
                return Err(invalid("interpreters", format!("empty program for '.{ext}'")));
            }
        }

        self.exclude_globset()?;
        Ok(())
    }

    /// Compile `snapshots.exclude` into a matcher over project-relative paths.
    pub fn exclude_globset(&self) -> Result<GlobSet, ConfigError> {
        let mut builder = GlobSetBuilder::new();
        for pattern in &self.snapshots.exclude {
            let glob = Glob::new(pattern).map_err(|e| ConfigError::InvalidGlob {
                pattern: pattern.clone(),
                reason: e.to_string(),
            })?;
            builder.add(glob);
        }
        builder.build().map_err(|e| ConfigError::InvalidGlob {
            pattern: self.snapshots.exclude.join(", "),
            reason: e.to_string(),
        })
    }
}
