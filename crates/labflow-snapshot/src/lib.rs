//! Snapshot store.
//!
//! A snapshot captures the project tree (limited to a scope) before a run.
//! File bodies live once in a content-addressed object directory; each
//! snapshot is a manifest listing paths, kinds, hashes, modes and mtimes.
//! A snapshot exists iff its manifest exists, and the manifest is written
//! last.
//!
//! Restore is exact: paths absent from the snapshot are deleted first, then
//! every entry is extracted and its recorded mtime re-applied.

mod key;
mod manifest;
mod objects;
mod restore;
mod store;
mod walk;

pub use key::{SAFETY_PREFIX, SnapshotKey};
pub use manifest::{EntryKind, MANIFEST_FILE, Manifest, ManifestEntry};
pub use objects::GcReport;
pub use restore::RestoreReport;
pub use store::{CaptureReport, SnapshotStore};
pub use walk::Exclusions;
