use std::collections::BTreeMap;

use crate::model::{Config, ConfigSource};

fn stable_source_label(source: &ConfigSource) -> &'static str {
    match source {
        ConfigSource::Cli => "cli",
        ConfigSource::Config => "config",
        ConfigSource::Programmatic => "programmatic",
        ConfigSource::Default => "default",
    }
}

impl Config {
    fn source_label(&self, key: &str) -> String {
        stable_source_label(self.source_attribution.get(key).unwrap_or(&ConfigSource::Default))
            .to_string()
    }

    /// Effective configuration as `key -> (value, source)`, sorted by key.
    #[must_use]
    pub fn effective_config(&self) -> BTreeMap<String, (String, String)> {
        let interpreters = self
            .runner
            .interpreters
            .iter()
            .map(|(ext, prog)| format!("{ext}={prog}"))
            .collect::<Vec<_>>()
            .join(", ");

        let entries = [
            ("definition", self.workflow.definition.clone()),
            ("grace_period_secs", self.runner.grace_period_secs.to_string()),
            ("poll_interval_ms", self.runner.poll_interval_ms.to_string()),
            ("transcript_cap_bytes", self.runner.transcript_cap_bytes.to_string()),
            ("write_transcripts", self.runner.write_transcripts.to_string()),
            ("interpreters", interpreters),
            ("snapshot_exclude", self.snapshots.exclude.join(", ")),
            ("lock_ttl_seconds", self.lock.ttl_seconds.to_string()),
            ("verbose", self.logging.verbose.to_string()),
        ];

        entries
            .into_iter()
            .map(|(key, value)| (key.to_string(), (value, self.source_label(key))))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_every_attributed_key_is_reported() {
        let config = Config::defaults_for("/proj");
        let effective = config.effective_config();
        for key in Config::ATTRIBUTED_KEYS {
            let (_, source) = effective.get(*key).unwrap_or_else(|| panic!("missing {key}"));
            assert_eq!(source, "default");
        }
    }

    #[test]
    fn test_labels_follow_attribution() {
        let mut config = Config::defaults_for("/proj");
        config.attribute("verbose", ConfigSource::Cli);
        config.attribute("lock_ttl_seconds", ConfigSource::Programmatic);
        let effective = config.effective_config();
        assert_eq!(effective["verbose"].1, "cli");
        assert_eq!(effective["lock_ttl_seconds"], ("900".to_string(), "programmatic".to_string()));
        assert!(effective["interpreters"].0.contains("py=python3"));
    }
}
