use anyhow::{Context, Result};
use camino::{Utf8Path, Utf8PathBuf};
use globset::GlobSet;
use std::collections::BTreeMap;
use std::fs::{self, Metadata};
use std::io;

use labflow_utils::paths::{HOUSEKEEPING_DIR, MARKERS_DIR, is_housekeeping, to_utf8};

use crate::manifest::{EntryKind, ManifestEntry, to_parts};
use crate::objects::{ObjectStore, hash_file};

/// Paths a snapshot never captures and a restore never deletes.
#[derive(Debug, Clone, Default)]
pub struct Exclusions {
    definition: Option<Utf8PathBuf>,
    globs: GlobSet,
}

impl Exclusions {
    /// `definition` is the project-relative definition file, when it lives
    /// inside the project.
    #[must_use]
    pub fn new(definition: Option<Utf8PathBuf>, globs: GlobSet) -> Self {
        Self { definition, globs }
    }

    #[must_use]
    pub fn is_excluded(&self, rel: &Utf8Path) -> bool {
        is_housekeeping(rel)
            || self.definition.as_deref() == Some(rel)
            || self.globs.is_match(rel.as_std_path())
    }
}

/// How much work a scan does per regular file.
#[derive(Clone, Copy)]
pub(crate) enum ScanMode<'a> {
    /// Kinds and metadata only.
    Shallow,
    /// Hash every file.
    Hash,
    /// Hash and store every file as an object.
    Store(&'a ObjectStore),
}

#[derive(Debug, Default)]
pub(crate) struct ScanStats {
    pub(crate) new_objects: usize,
}

/// Walk `scope` under `root`, skipping exclusions and never following
/// symlinks. `.labflow/markers` is reached even though `.labflow` itself is
/// excluded. Sockets, fifos and devices are ignored.
pub(crate) fn scan(
    root: &Utf8Path,
    scope: &[Utf8PathBuf],
    exclusions: &Exclusions,
    mode: ScanMode<'_>,
) -> Result<(Vec<ManifestEntry>, ScanStats)> {
    let mut walker = Walker {
        root,
        exclusions,
        mode,
        entries: BTreeMap::new(),
        stats: ScanStats::default(),
    };

    for rel in scope {
        if rel.as_str().is_empty() {
            walker.walk_dir(Utf8Path::new(""))?;
            continue;
        }
        walker.visit_root(rel)?;
    }

    Ok((walker.entries.into_values().collect(), walker.stats))
}

struct Walker<'a> {
    root: &'a Utf8Path,
    exclusions: &'a Exclusions,
    mode: ScanMode<'a>,
    entries: BTreeMap<Utf8PathBuf, ManifestEntry>,
    stats: ScanStats,
}

impl Walker<'_> {
    fn visit_root(&mut self, rel: &Utf8Path) -> Result<()> {
        if self.exclusions.is_excluded(rel) {
            return self.walk_markers_under(rel);
        }
        let abs = self.root.join(rel);
        let meta = match fs::symlink_metadata(&abs) {
            Ok(meta) => meta,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(()),
            Err(e) => return Err(e).with_context(|| format!("Failed to stat: {abs}")),
        };
        self.record(rel, &meta)?;
        if meta.is_dir() {
            self.walk_dir(rel)?;
        }
        Ok(())
    }

    /// An excluded scope root may still contain the markers directory.
    fn walk_markers_under(&mut self, rel: &Utf8Path) -> Result<()> {
        let markers = Utf8Path::new(HOUSEKEEPING_DIR).join(MARKERS_DIR);
        if markers != rel && markers.starts_with(rel) {
            self.visit_root(&markers)?;
        }
        Ok(())
    }

    fn walk_dir(&mut self, rel_dir: &Utf8Path) -> Result<()> {
        let abs_dir = self.root.join(rel_dir);
        let read = fs::read_dir(&abs_dir).with_context(|| format!("Failed to list: {abs_dir}"))?;
        for dirent in read {
            let dirent = dirent.with_context(|| format!("Failed to list: {abs_dir}"))?;
            let name = to_utf8(dirent.file_name().into())
                .with_context(|| format!("Non UTF-8 file name in {abs_dir}"))?;
            let rel = rel_dir.join(&name);

            if self.exclusions.is_excluded(&rel) {
                self.walk_markers_under(&rel)?;
                continue;
            }

            let meta = dirent
                .metadata()
                .with_context(|| format!("Failed to stat: {}", self.root.join(&rel)))?;
            self.record(&rel, &meta)?;
            if meta.is_dir() {
                self.walk_dir(&rel)?;
            }
        }
        Ok(())
    }

    fn record(&mut self, rel: &Utf8Path, meta: &Metadata) -> Result<()> {
        let abs = self.root.join(rel);
        let file_type = meta.file_type();
        let (kind, size, blake3, link_target) = if file_type.is_symlink() {
            let target = fs::read_link(&abs).with_context(|| format!("Failed to read link: {abs}"))?;
            let target = to_utf8(target).with_context(|| format!("Non UTF-8 link target: {abs}"))?;
            (EntryKind::Symlink, 0, None, Some(target.into_string()))
        } else if file_type.is_dir() {
            (EntryKind::Dir, 0, None, None)
        } else if file_type.is_file() {
            let hash = match self.mode {
                ScanMode::Shallow => None,
                ScanMode::Hash => Some(hash_file(&abs)?),
                ScanMode::Store(objects) => {
                    let (hash, new) = objects.put_file(&abs)?;
                    if new {
                        self.stats.new_objects += 1;
                    }
                    Some(hash)
                }
            };
            (EntryKind::File, meta.len(), hash, None)
        } else {
            tracing::debug!(path = %rel, "skipping special file");
            return Ok(());
        };

        let modified = meta
            .modified()
            .with_context(|| format!("No modification time for: {abs}"))?;
        let (mtime_secs, mtime_nanos) = to_parts(modified);

        self.entries.insert(
            rel.to_path_buf(),
            ManifestEntry {
                path: rel.to_path_buf(),
                kind,
                size,
                blake3,
                link_target,
                mode: mode_of(meta),
                mtime_secs,
                mtime_nanos,
            },
        );
        Ok(())
    }
}

#[cfg(unix)]
fn mode_of(meta: &Metadata) -> u32 {
    use std::os::unix::fs::PermissionsExt;
    meta.permissions().mode() & 0o7777
}

#[cfg(not(unix))]
fn mode_of(meta: &Metadata) -> u32 {
    if meta.permissions().readonly() { 0o444 } else { 0o644 }
}
