//! Atomic file writes.
//!
//! Content goes to a temporary file in the target directory, is fsynced, and
//! is then renamed over the target, so readers observe either the old or the
//! new file and never a partial one. If the rename crosses filesystems
//! (`EXDEV`) the content is copied into a second temporary file beside the
//! target and renamed from there.

use anyhow::{Context, Result};
use camino::Utf8Path;
use std::fs;
use std::io::Write;
use std::path::Path;
use tempfile::NamedTempFile;

/// Result of an atomic write operation
#[derive(Debug, Clone, Default)]
pub struct AtomicWriteResult {
    pub bytes_written: usize,
    pub used_cross_filesystem_fallback: bool,
}

/// Atomically replace `path` with `content`.
pub fn write_file_atomic(path: &Utf8Path, content: &str) -> Result<AtomicWriteResult> {
    write_bytes_atomic(path, content.as_bytes())
}

/// Atomically replace `path` with `bytes`, creating parent directories.
pub fn write_bytes_atomic(path: &Utf8Path, bytes: &[u8]) -> Result<AtomicWriteResult> {
    let dir = path.parent().unwrap_or_else(|| Utf8Path::new("."));
    fs::create_dir_all(dir).with_context(|| format!("Failed to create parent directory: {dir}"))?;

    let temp = write_temp(dir, bytes)?;
    let temp_path = temp.path().to_path_buf();

    let mut result = AtomicWriteResult {
        bytes_written: bytes.len(),
        used_cross_filesystem_fallback: false,
    };

    match temp.persist(path.as_std_path()) {
        Ok(_) => {}
        Err(e) if is_cross_filesystem_error(&e.error) => {
            tracing::debug!(%path, "rename crossed filesystems; copying");
            result.used_cross_filesystem_fallback = true;
            cross_filesystem_copy(&temp_path, path)?;
        }
        Err(e) => {
            return Err(e.error).with_context(|| format!("Failed to atomically write file: {path}"));
        }
    }

    Ok(result)
}

fn write_temp(dir: &Utf8Path, bytes: &[u8]) -> Result<NamedTempFile> {
    let mut temp = NamedTempFile::new_in(dir)
        .with_context(|| format!("Failed to create temporary file in: {dir}"))?;
    temp.write_all(bytes)
        .context("Failed to write content to temporary file")?;
    temp.as_file()
        .sync_all()
        .context("Failed to fsync temporary file")?;
    Ok(temp)
}

#[cfg(unix)]
fn is_cross_filesystem_error(err: &std::io::Error) -> bool {
    err.raw_os_error() == Some(libc::EXDEV)
}

#[cfg(not(unix))]
fn is_cross_filesystem_error(_err: &std::io::Error) -> bool {
    false
}

fn cross_filesystem_copy(temp_path: &Path, target: &Utf8Path) -> Result<()> {
    let content = fs::read(temp_path).context("Failed to read temporary file for cross-filesystem copy")?;
    let dir = target.parent().unwrap_or_else(|| Utf8Path::new("."));
    write_temp(dir, &content)?
        .persist(target.as_std_path())
        .map_err(|e| e.error)
        .with_context(|| format!("Failed to persist during cross-filesystem copy: {target}"))?;
    let _ = fs::remove_file(temp_path);
    Ok(())
}
