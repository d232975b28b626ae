use anyhow::{Context, Result, bail};
use camino::Utf8Path;
use std::collections::HashMap;
use std::fs::{self, File, FileTimes};
use std::io;

use labflow_utils::paths::ensure_dir_all;

use crate::manifest::{EntryKind, Manifest, ManifestEntry};
use crate::objects::{ObjectStore, hash_file};
use crate::walk::{Exclusions, ScanMode, scan};

/// What a restore changed.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RestoreReport {
    pub deleted: usize,
    pub written: usize,
    pub unchanged: usize,
}

pub(crate) fn restore(
    root: &Utf8Path,
    manifest: &Manifest,
    exclusions: &Exclusions,
    objects: &ObjectStore,
) -> Result<RestoreReport> {
    let mut report = RestoreReport::default();

    for entry in &manifest.entries {
        if let Some(hash) = &entry.blake3
            && !objects.contains(hash)
        {
            bail!("object {hash} for '{}' is missing", entry.path);
        }
    }

    let wanted: HashMap<&Utf8Path, &ManifestEntry> = manifest
        .entries
        .iter()
        .map(|e| (e.path.as_path(), e))
        .collect();

    report.deleted = delete_absent(root, manifest, exclusions, &wanted)?;

    for entry in &manifest.entries {
        if extract(root, entry, objects)? {
            report.written += 1;
        } else {
            report.unchanged += 1;
        }
    }

    apply_times(root, manifest)?;
    apply_modes(root, manifest)?;
    Ok(report)
}

/// Phase one: remove every current path in scope that the snapshot does not
/// hold with the same kind. Files and links go first, then directories
/// deepest-first. A directory still holding excluded paths is left alone.
fn delete_absent(
    root: &Utf8Path,
    manifest: &Manifest,
    exclusions: &Exclusions,
    wanted: &HashMap<&Utf8Path, &ManifestEntry>,
) -> Result<usize> {
    let (current, _) = scan(root, &manifest.scope, exclusions, ScanMode::Shallow)?;

    let mut files = Vec::new();
    let mut dirs = Vec::new();
    for entry in current {
        let keep = wanted.get(entry.path.as_path()).is_some_and(|w| w.kind == entry.kind);
        if keep {
            continue;
        }
        if entry.kind == EntryKind::Dir {
            dirs.push(entry.path);
        } else {
            files.push(entry.path);
        }
    }

    let mut deleted = 0;
    for rel in &files {
        let abs = root.join(rel);
        match fs::remove_file(&abs) {
            Ok(()) => deleted += 1,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => return Err(e).with_context(|| format!("Failed to delete: {abs}")),
        }
    }

    dirs.sort_by_key(|d| std::cmp::Reverse(d.components().count()));
    for rel in &dirs {
        let abs = root.join(rel);
        match fs::remove_dir(&abs) {
            Ok(()) => deleted += 1,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) if e.kind() == io::ErrorKind::DirectoryNotEmpty => {
                tracing::debug!(path = %rel, "directory kept: holds excluded paths");
            }
            Err(e) => return Err(e).with_context(|| format!("Failed to delete directory: {abs}")),
        }
    }
    Ok(deleted)
}

/// Phase two for one entry. Returns false when the path already matched.
fn extract(root: &Utf8Path, entry: &ManifestEntry, objects: &ObjectStore) -> Result<bool> {
    let abs = root.join(&entry.path);
    match entry.kind {
        EntryKind::Dir => {
            if abs.is_dir() {
                return Ok(false);
            }
            ensure_dir_all(&abs).with_context(|| format!("Failed to create directory: {abs}"))?;
            Ok(true)
        }
        EntryKind::File => {
            let hash = entry
                .blake3
                .as_deref()
                .with_context(|| format!("Manifest entry '{}' has no hash", entry.path))?;
            let same = fs::symlink_metadata(&abs)
                .is_ok_and(|m| m.is_file() && m.len() == entry.size)
                && hash_file(&abs).is_ok_and(|h| h == hash);
            if same {
                return Ok(false);
            }
            objects.extract_to(hash, &abs)?;
            Ok(true)
        }
        EntryKind::Symlink => {
            let target = entry
                .link_target
                .as_deref()
                .with_context(|| format!("Manifest entry '{}' has no link target", entry.path))?;
            if fs::read_link(&abs).is_ok_and(|t| t.as_os_str() == target) {
                return Ok(false);
            }
            match fs::remove_file(&abs) {
                Ok(()) => {}
                Err(e) if e.kind() == io::ErrorKind::NotFound => {}
                Err(e) => return Err(e).with_context(|| format!("Failed to replace link: {abs}")),
            }
            if let Some(parent) = abs.parent() {
                ensure_dir_all(parent)?;
            }
            make_symlink(target, &abs)?;
            Ok(true)
        }
    }
}

/// Re-apply recorded mtimes: files first, then directories deepest-first so
/// writes into a directory cannot disturb its restored time. Links keep
/// whatever time creating them produced.
fn apply_times(root: &Utf8Path, manifest: &Manifest) -> Result<()> {
    let mut dirs: Vec<&ManifestEntry> = Vec::new();
    for entry in &manifest.entries {
        match entry.kind {
            EntryKind::File => set_mtime(root, entry)?,
            EntryKind::Dir => dirs.push(entry),
            EntryKind::Symlink => {}
        }
    }
    dirs.sort_by_key(|d| std::cmp::Reverse(d.path.components().count()));
    for dir in dirs {
        set_mtime(root, dir)?;
    }
    Ok(())
}

fn set_mtime(root: &Utf8Path, entry: &ManifestEntry) -> Result<()> {
    let abs = root.join(&entry.path);
    let file = File::open(&abs).with_context(|| format!("Failed to open for timestamp: {abs}"))?;
    file.set_times(FileTimes::new().set_modified(entry.mtime()))
        .with_context(|| format!("Failed to set modification time: {abs}"))
}

/// Modes go last: chmod leaves mtimes alone, and a read-only directory must
/// not block the writes above.
#[cfg(unix)]
fn apply_modes(root: &Utf8Path, manifest: &Manifest) -> Result<()> {
    use std::os::unix::fs::PermissionsExt;
    for entry in &manifest.entries {
        if entry.kind == EntryKind::Symlink || entry.mode == 0 {
            continue;
        }
        let abs = root.join(&entry.path);
        fs::set_permissions(&abs, fs::Permissions::from_mode(entry.mode))
            .with_context(|| format!("Failed to set permissions: {abs}"))?;
    }
    Ok(())
}

#[cfg(not(unix))]
fn apply_modes(_root: &Utf8Path, _manifest: &Manifest) -> Result<()> {
    Ok(())
}

#[cfg(unix)]
fn make_symlink(target: &str, link: &Utf8Path) -> Result<()> {
    std::os::unix::fs::symlink(target, link).with_context(|| format!("Failed to create link: {link}"))
}

#[cfg(not(unix))]
fn make_symlink(_target: &str, link: &Utf8Path) -> Result<()> {
    bail!("symbolic links are not supported on this platform: {link}")
}
