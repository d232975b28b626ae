//! Project directory layout.
//!
//! ```text
//! <project>/
//!   workflow.yml               definition (never captured, never restored)
//!   .labflow/
//!     config.toml
//!     state.json
//!     .lock
//!     markers/<stem>.success   captured in snapshots like user data
//!     snapshots/<key>/manifest.json
//!     snapshots/objects/<aa>/<blake3>
//!     logs/<step>_run_<N>.log
//! ```
//!
//! Everything under `.labflow/` except `markers/` is housekeeping: it is
//! excluded from snapshots and survives every restore.

use camino::{Utf8Component, Utf8Path, Utf8PathBuf};
use std::io;
use thiserror::Error;

pub const HOUSEKEEPING_DIR: &str = ".labflow";
pub const MARKERS_DIR: &str = "markers";
pub const SNAPSHOTS_DIR: &str = "snapshots";
pub const OBJECTS_DIR: &str = "objects";
pub const LOGS_DIR: &str = "logs";
pub const STATE_FILE: &str = "state.json";
pub const CONFIG_FILE: &str = "config.toml";
pub const DEFAULT_DEFINITION_FILE: &str = "workflow.yml";
pub const MARKER_SUFFIX: &str = ".success";

/// Resolved locations inside one project.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProjectPaths {
    root: Utf8PathBuf,
}

impl ProjectPaths {
    #[must_use]
    pub fn new(root: impl Into<Utf8PathBuf>) -> Self {
        Self { root: root.into() }
    }

    #[must_use]
    pub fn root(&self) -> &Utf8Path {
        &self.root
    }

    #[must_use]
    pub fn housekeeping_dir(&self) -> Utf8PathBuf {
        self.root.join(HOUSEKEEPING_DIR)
    }

    #[must_use]
    pub fn state_file(&self) -> Utf8PathBuf {
        self.housekeeping_dir().join(STATE_FILE)
    }

    #[must_use]
    pub fn config_file(&self) -> Utf8PathBuf {
        self.housekeeping_dir().join(CONFIG_FILE)
    }

    #[must_use]
    pub fn snapshots_dir(&self) -> Utf8PathBuf {
        self.housekeeping_dir().join(SNAPSHOTS_DIR)
    }

    #[must_use]
    pub fn objects_dir(&self) -> Utf8PathBuf {
        self.snapshots_dir().join(OBJECTS_DIR)
    }

    #[must_use]
    pub fn markers_dir(&self) -> Utf8PathBuf {
        self.housekeeping_dir().join(MARKERS_DIR)
    }

    #[must_use]
    pub fn logs_dir(&self) -> Utf8PathBuf {
        self.housekeeping_dir().join(LOGS_DIR)
    }

    /// Success marker the executable `executable_ref` must create.
    #[must_use]
    pub fn marker_for(&self, executable_ref: &str) -> Utf8PathBuf {
        self.markers_dir().join(marker_file_name(executable_ref))
    }

    #[must_use]
    pub fn transcript_log(&self, step_id: &str, run: u32) -> Utf8PathBuf {
        self.logs_dir().join(format!("{step_id}_run_{run}.log"))
    }

    /// Create the housekeeping directories.
    pub fn ensure_layout(&self) -> io::Result<()> {
        for dir in [self.markers_dir(), self.objects_dir(), self.logs_dir()] {
            ensure_dir_all(&dir)?;
        }
        Ok(())
    }
}

/// `scripts/prep.py` -> `prep.success`
#[must_use]
pub fn marker_file_name(executable_ref: &str) -> String {
    let path = Utf8Path::new(executable_ref);
    let stem = path
        .file_stem()
        .or_else(|| path.file_name())
        .unwrap_or(executable_ref);
    format!("{stem}{MARKER_SUFFIX}")
}

/// Whether a project-relative path belongs to labflow's own bookkeeping.
///
/// `.labflow` itself counts as housekeeping; `.labflow/markers` and its
/// contents do not.
#[must_use]
pub fn is_housekeeping(rel: &Utf8Path) -> bool {
    let mut parts = rel.components().filter(|c| !matches!(c, Utf8Component::CurDir));
    match parts.next() {
        Some(Utf8Component::Normal(first)) if first == HOUSEKEEPING_DIR => {
            !matches!(parts.next(), Some(Utf8Component::Normal(second)) if second == MARKERS_DIR)
        }
        _ => false,
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PathError {
    #[error("Path is empty")]
    Empty,

    #[error("Absolute path not allowed: {path}")]
    Absolute { path: String },

    #[error("Path contains parent directory traversal: {path}")]
    ParentTraversal { path: String },
}

/// Normalize a user-supplied project-relative path.
///
/// `.`, `./` and the empty component collapse; `..` and absolute paths are
/// rejected. The project root itself normalizes to an empty path.
pub fn normalize_relative(path: &str) -> Result<Utf8PathBuf, PathError> {
    if path.trim().is_empty() {
        return Err(PathError::Empty);
    }
    let p = Utf8Path::new(path);
    let mut out = Utf8PathBuf::new();
    for component in p.components() {
        match component {
            Utf8Component::CurDir => {}
            Utf8Component::Normal(part) => out.push(part),
            Utf8Component::ParentDir => {
                return Err(PathError::ParentTraversal {
                    path: path.to_string(),
                });
            }
            Utf8Component::RootDir | Utf8Component::Prefix(_) => {
                return Err(PathError::Absolute {
                    path: path.to_string(),
                });
            }
        }
    }
    Ok(out)
}

/// Create `path` and its parents; an existing directory is not an error.
pub fn ensure_dir_all(path: &Utf8Path) -> io::Result<()> {
    match std::fs::create_dir_all(path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == io::ErrorKind::AlreadyExists && path.is_dir() => Ok(()),
        Err(e) => Err(e),
    }
}

/// Convert a std path into a UTF-8 path, failing on non-UTF-8 names.
pub fn to_utf8(path: std::path::PathBuf) -> io::Result<Utf8PathBuf> {
    Utf8PathBuf::from_path_buf(path).map_err(|p| {
        io::Error::new(
            io::ErrorKind::InvalidData,
            format!("path is not valid UTF-8: {}", p.display()),
        )
    })
}
