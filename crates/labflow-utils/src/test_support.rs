//! Fixtures for tests that need a throwaway project directory.

use camino::{Utf8Path, Utf8PathBuf};
use std::fs;
use tempfile::TempDir;

/// A project rooted in a temporary directory, removed on drop.
pub struct TestProject {
    _dir: TempDir,
    root: Utf8PathBuf,
}

impl TestProject {
    /// # Panics
    /// If the temporary directory cannot be created.
    #[must_use]
    pub fn new() -> Self {
        let dir = TempDir::new().expect("create temp project");
        let root = Utf8PathBuf::from_path_buf(dir.path().to_path_buf()).expect("utf-8 temp dir");
        Self { _dir: dir, root }
    }

    #[must_use]
    pub fn root(&self) -> &Utf8Path {
        &self.root
    }

    /// # Panics
    /// On any I/O failure.
    pub fn write(&self, rel: &str, content: &str) -> Utf8PathBuf {
        let path = self.root.join(rel);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).expect("create parent");
        }
        fs::write(&path, content).expect("write fixture");
        path
    }

    /// Write an executable `sh` script.
    ///
    /// # Panics
    /// On any I/O failure.
    pub fn script(&self, rel: &str, body: &str) -> Utf8PathBuf {
        let path = self.write(rel, &format!("#!/bin/sh\n{body}\n"));
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            fs::set_permissions(&path, fs::Permissions::from_mode(0o755)).expect("chmod script");
        }
        path
    }

    /// Write `workflow.yml`.
    pub fn workflow(&self, yaml: &str) -> Utf8PathBuf {
        self.write(crate::paths::DEFAULT_DEFINITION_FILE, yaml)
    }

    #[must_use]
    pub fn read(&self, rel: &str) -> Option<String> {
        fs::read_to_string(self.root.join(rel)).ok()
    }

    #[must_use]
    pub fn exists(&self, rel: &str) -> bool {
        self.root.join(rel).exists()
    }
}

impl Default for TestProject {
    fn default() -> Self {
        Self::new()
    }
}

/// Script body that appends `line` to `file`, then signals success.
#[must_use]
pub fn succeeding_body(file: &str, line: &str) -> String {
    format!("echo '{line}' >> '{file}'\ntouch \"$LABFLOW_SUCCESS_MARKER\"\nexit 0")
}

/// Script body that writes `file` and then exits non-zero without a marker.
#[must_use]
pub fn failing_body(file: &str) -> String {
    format!("echo partial > '{file}'\nexit 1")
}
