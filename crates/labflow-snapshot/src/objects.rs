use anyhow::{Context, Result};
use camino::{Utf8Path, Utf8PathBuf};
use std::collections::HashSet;
use std::fs::{self, File};
use std::io;
use tempfile::NamedTempFile;

use labflow_utils::paths::ensure_dir_all;

/// Outcome of an object garbage collection.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GcReport {
    pub removed_objects: usize,
    pub freed_bytes: u64,
}

/// Content-addressed blob directory: `<dir>/<first two hex>/<blake3>`.
#[derive(Debug, Clone)]
pub(crate) struct ObjectStore {
    dir: Utf8PathBuf,
}

impl ObjectStore {
    pub(crate) fn new(dir: Utf8PathBuf) -> Self {
        Self { dir }
    }

    pub(crate) fn path_for(&self, hash: &str) -> Utf8PathBuf {
        let fan = hash.get(..2).unwrap_or("00");
        self.dir.join(fan).join(hash)
    }

    /// Hash `src` and store it unless an identical object already exists.
    /// Returns the hash and whether a new object was written.
    pub(crate) fn put_file(&self, src: &Utf8Path) -> Result<(String, bool)> {
        let hash = hash_file(src)?;
        let dest = self.path_for(&hash);
        if dest.is_file() {
            return Ok((hash, false));
        }

        let parent = dest.parent().unwrap_or(&self.dir);
        ensure_dir_all(parent).with_context(|| format!("Failed to create object directory: {parent}"))?;
        let mut tmp = NamedTempFile::new_in(parent)
            .with_context(|| format!("Failed to create temporary object in: {parent}"))?;
        let mut reader = File::open(src).with_context(|| format!("Failed to open: {src}"))?;
        io::copy(&mut reader, &mut tmp).with_context(|| format!("Failed to copy: {src}"))?;
        tmp.as_file().sync_all().context("Failed to sync object")?;

        match tmp.persist_noclobber(dest.as_std_path()) {
            Ok(_) => Ok((hash, true)),
            // Another capture stored the same content first.
            Err(_) if dest.is_file() => Ok((hash, false)),
            Err(e) => Err(e.error).with_context(|| format!("Failed to store object: {dest}")),
        }
    }

    /// Copy object `hash` to `dest` through a temporary file beside it.
    pub(crate) fn extract_to(&self, hash: &str, dest: &Utf8Path) -> Result<()> {
        let src = self.path_for(hash);
        let parent = dest
            .parent()
            .with_context(|| format!("Restore target has no parent: {dest}"))?;
        ensure_dir_all(parent).with_context(|| format!("Failed to create directory: {parent}"))?;
        let mut tmp = NamedTempFile::new_in(parent)
            .with_context(|| format!("Failed to create temporary file in: {parent}"))?;
        let mut reader =
            File::open(&src).with_context(|| format!("Snapshot object {hash} is missing"))?;
        io::copy(&mut reader, &mut tmp).with_context(|| format!("Failed to extract: {dest}"))?;
        tmp.persist(dest.as_std_path())
            .map_err(|e| e.error)
            .with_context(|| format!("Failed to replace: {dest}"))?;
        Ok(())
    }

    pub(crate) fn contains(&self, hash: &str) -> bool {
        self.path_for(hash).is_file()
    }

    /// Delete every object not in `referenced`, plus leftover temp files.
    pub(crate) fn gc(&self, referenced: &HashSet<String>) -> Result<GcReport> {
        let mut report = GcReport::default();
        let fans = match fs::read_dir(&self.dir) {
            Ok(fans) => fans,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(report),
            Err(e) => return Err(e).with_context(|| format!("Failed to list: {}", self.dir)),
        };
        for fan in fans {
            let fan = fan?;
            if !fan.file_type()?.is_dir() {
                continue;
            }
            for object in fs::read_dir(fan.path())? {
                let object = object?;
                let name = object.file_name();
                let keep = name.to_str().is_some_and(|n| referenced.contains(n));
                if !keep {
                    let size = object.metadata().map(|m| m.len()).unwrap_or(0);
                    fs::remove_file(object.path())
                        .with_context(|| format!("Failed to remove object: {}", object.path().display()))?;
                    report.removed_objects += 1;
                    report.freed_bytes += size;
                }
            }
            // Only succeeds once the fan directory is empty.
            let _ = fs::remove_dir(fan.path());
        }
        Ok(report)
    }
}

pub(crate) fn hash_file(path: &Utf8Path) -> Result<String> {
    let file = File::open(path).with_context(|| format!("Failed to open: {path}"))?;
    let mut hasher = blake3::Hasher::new();
    hasher
        .update_reader(file)
        .with_context(|| format!("Failed to hash: {path}"))?;
    Ok(hasher.finalize().to_hex().to_string())
}
