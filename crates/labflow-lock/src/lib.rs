//! Advisory project lock.
//!
//! A project directory is operated on by at most one labflow coordinator at a
//! time. The lock lives at `<project>/.labflow/.lock`, is created with
//! `create_new` semantics and additionally held through an `fd-lock` write
//! guard for as long as the [`ProjectLock`] value is alive. Locks left behind by
//! crashed processes are detected via PID liveness and a time-to-live.

use camino::{Utf8Path, Utf8PathBuf};
use fd_lock::RwLock;
use serde::{Deserialize, Serialize};
use std::fs;
use std::io::{self, Write};
use std::process;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// Default age after which a lock whose owner is gone counts as stale.
pub const DEFAULT_TTL_SECS: u64 = 900;

const LOCK_FILE_NAME: &str = ".lock";
const HOUSEKEEPING_DIR: &str = ".labflow";

/// Contents of the lock file.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct LockInfo {
    pub pid: u32,
    /// Seconds since the UNIX epoch.
    pub created_at: u64,
    pub project: String,
    pub labflow_version: String,
}

#[derive(Debug, thiserror::Error)]
pub enum LockError {
    #[error("Project '{project}' is in use by another labflow process (PID {pid}, acquired {created_ago} ago)")]
    Held {
        project: String,
        pid: u32,
        created_ago: String,
    },

    #[error("Stale lock for project '{project}' (PID {pid}, age {age_secs}s). Use --force to override")]
    Stale {
        project: String,
        pid: u32,
        age_secs: u64,
    },

    #[error("Lock file is corrupted or invalid: {reason}")]
    Corrupted { reason: String },

    #[error("Failed to acquire lock: {reason}")]
    AcquisitionFailed { reason: String },

    #[error("Failed to release lock: {reason}")]
    ReleaseFailed { reason: String },

    #[error("IO error during lock operation: {0}")]
    Io(#[from] io::Error),
}

/// Exclusive lock over one project directory. Released on drop.
pub struct ProjectLock {
    lock_path: Utf8PathBuf,
    _guard: Option<Box<RwLock<fs::File>>>,
    info: LockInfo,
}

impl ProjectLock {
    /// Acquire the lock for `project_root`.
    ///
    /// `force` overrides a lock whose owner is still alive or whose TTL has
    /// not elapsed. A lock whose owner is dead and whose age exceeds the TTL
    /// is reported as [`LockError::Stale`] unless forced.
    pub fn acquire(
        project_root: &Utf8Path,
        force: bool,
        ttl_seconds: Option<u64>,
    ) -> Result<Self, LockError> {
        let dir = project_root.join(HOUSEKEEPING_DIR);
        fs::create_dir_all(&dir).map_err(|e| LockError::AcquisitionFailed {
            reason: format!("failed to create {dir}: {e}"),
        })?;
        let lock_path = Self::lock_path(project_root);
        let ttl = ttl_seconds.unwrap_or(DEFAULT_TTL_SECS);

        const MAX_ATTEMPTS: u32 = 3;
        for attempt in 0..MAX_ATTEMPTS {
            let info = LockInfo {
                pid: process::id(),
                created_at: now_secs(),
                project: project_root.to_string(),
                labflow_version: env!("CARGO_PKG_VERSION").to_string(),
            };

            match open_exclusive(&lock_path) {
                Ok(file) => return Self::finalize(lock_path, file, info),
                Err(e) if e.kind() == io::ErrorKind::AlreadyExists => {
                    Self::check_existing(&lock_path, project_root, force, ttl)?;
                    remove_stale(&lock_path)?;
                    tracing::warn!(path = %lock_path, "removed abandoned project lock");
                    if attempt + 1 < MAX_ATTEMPTS {
                        // another process may win the race to re-create it
                        std::thread::sleep(Duration::from_millis(10 * 2u64.pow(attempt)));
                    }
                }
                Err(e) => {
                    return Err(LockError::AcquisitionFailed {
                        reason: format!("failed to create {lock_path}: {e}"),
                    });
                }
            }
        }

        Err(LockError::AcquisitionFailed {
            reason: format!("gave up after {MAX_ATTEMPTS} attempts on {lock_path}"),
        })
    }

    /// Read the lock file of `project_root`, if any.
    pub fn read_info(project_root: &Utf8Path) -> Result<Option<LockInfo>, LockError> {
        let path = Self::lock_path(project_root);
        let content = match fs::read_to_string(&path) {
            Ok(c) => c,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(e) => {
                return Err(LockError::Corrupted {
                    reason: format!("failed to read {path}: {e}"),
                });
            }
        };
        serde_json::from_str(&content)
            .map(Some)
            .map_err(|e| LockError::Corrupted {
                reason: format!("failed to parse {path}: {e}"),
            })
    }

    #[must_use]
    pub fn lock_path(project_root: &Utf8Path) -> Utf8PathBuf {
        project_root.join(HOUSEKEEPING_DIR).join(LOCK_FILE_NAME)
    }

    #[must_use]
    pub const fn info(&self) -> &LockInfo {
        &self.info
    }

    #[must_use]
    pub fn path(&self) -> &Utf8Path {
        &self.lock_path
    }

    /// Release explicitly, surfacing removal errors that `Drop` swallows.
    pub fn release(mut self) -> Result<(), LockError> {
        self._guard.take();
        match fs::remove_file(&self.lock_path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(LockError::ReleaseFailed {
                reason: format!("failed to remove {}: {e}", self.lock_path),
            }),
        }
    }

    fn finalize(lock_path: Utf8PathBuf, file: fs::File, info: LockInfo) -> Result<Self, LockError> {
        let json = serde_json::to_string_pretty(&info).map_err(|e| LockError::AcquisitionFailed {
            reason: format!("failed to serialize lock info: {e}"),
        })?;

        let mut rw = Box::new(RwLock::new(file));
        {
            let guard = rw.try_write().map_err(|_| LockError::Held {
                project: info.project.clone(),
                pid: 0,
                created_ago: "unknown".to_string(),
            })?;
            let mut f = &*guard;
            f.write_all(json.as_bytes())?;
            f.flush()?;
            f.sync_all()?;
        }

        tracing::debug!(path = %lock_path, pid = info.pid, "acquired project lock");
        Ok(Self {
            lock_path,
            _guard: Some(rw),
            info,
        })
    }

    /// Returns `Ok(())` when the existing lock may be removed.
    fn check_existing(
        lock_path: &Utf8Path,
        project_root: &Utf8Path,
        force: bool,
        ttl_seconds: u64,
    ) -> Result<(), LockError> {
        const READ_RETRIES: u32 = 3;

        let mut existing = None;
        for attempt in 0..READ_RETRIES {
            match fs::read_to_string(lock_path) {
                Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(()),
                Ok(content) => match serde_json::from_str::<LockInfo>(&content) {
                    Ok(info) => {
                        existing = Some(info);
                        break;
                    }
                    // The owner may have created the file but not written it yet.
                    Err(e) if attempt + 1 < READ_RETRIES && (e.is_eof() || content.is_empty()) => {}
                    Err(e) if force => {
                        tracing::warn!(error = %e, "overriding unparseable lock file");
                        return Ok(());
                    }
                    Err(e) => {
                        return Err(LockError::Corrupted {
                            reason: format!("failed to parse {lock_path}: {e}"),
                        });
                    }
                },
                Err(_) if attempt + 1 < READ_RETRIES => {}
                Err(e) => {
                    return Err(LockError::Corrupted {
                        reason: format!("failed to read {lock_path}: {e}"),
                    });
                }
            }
            std::thread::sleep(Duration::from_millis(10));
        }

        let Some(existing) = existing else {
            return Err(LockError::Corrupted {
                reason: format!("{lock_path} stayed empty"),
            });
        };

        if force {
            return Ok(());
        }

        let age = now_secs().saturating_sub(existing.created_at);
        if is_process_running(existing.pid) || age <= ttl_seconds {
            return Err(LockError::Held {
                project: project_root.to_string(),
                pid: existing.pid,
                created_ago: format_age(age),
            });
        }

        Err(LockError::Stale {
            project: project_root.to_string(),
            pid: existing.pid,
            age_secs: age,
        })
    }
}

impl std::fmt::Debug for ProjectLock {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProjectLock")
            .field("lock_path", &self.lock_path)
            .field("info", &self.info)
            .finish_non_exhaustive()
    }
}

impl Drop for ProjectLock {
    fn drop(&mut self) {
        self._guard.take();
        let _ = fs::remove_file(&self.lock_path);
    }
}

fn open_exclusive(path: &Utf8Path) -> io::Result<fs::File> {
    fs::OpenOptions::new().create_new(true).write(true).open(path)
}

/// Rename-then-delete so a concurrent reader never sees a half-removed file.
fn remove_stale(lock_path: &Utf8Path) -> Result<(), LockError> {
    let stale = lock_path.with_extension(format!("stale.{}.{}", now_secs(), process::id()));
    match fs::rename(lock_path, &stale) {
        Ok(()) => {
            let _ = fs::remove_file(&stale);
            Ok(())
        }
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(LockError::AcquisitionFailed {
            reason: format!("failed to move stale lock aside: {e}"),
        }),
    }
}

fn now_secs() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

/// Whether `pid` names a live process.
#[must_use]
pub fn is_process_running(pid: u32) -> bool {
    #[cfg(unix)]
    {
        let Ok(raw) = i32::try_from(pid) else {
            return false;
        };
        // SAFETY: signal 0 performs permission and existence checks only.
        let rc = unsafe { libc::kill(raw, 0) };
        rc == 0 || io::Error::last_os_error().raw_os_error() == Some(libc::EPERM)
    }

    #[cfg(not(unix))]
    {
        let _ = pid;
        true
    }
}

fn format_age(secs: u64) -> String {
    match secs {
        s if s < 60 => format!("{s}s"),
        s if s < 3600 => format!("{}m", s / 60),
        s if s < 86_400 => format!("{}h", s / 3600),
        s => format!("{}d", s / 86_400),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn project() -> (TempDir, Utf8PathBuf) {
        let td = TempDir::new().unwrap();
        let root = Utf8PathBuf::from_path_buf(td.path().to_path_buf()).unwrap();
        (td, root)
    }

    fn plant_lock(root: &Utf8Path, pid: u32, created_at: u64) {
        let info = LockInfo {
            pid,
            created_at,
            project: root.to_string(),
            labflow_version: "0.0.0".to_string(),
        };
        fs::create_dir_all(root.join(".labflow")).unwrap();
        fs::write(
            ProjectLock::lock_path(root),
            serde_json::to_string(&info).unwrap(),
        )
        .unwrap();
    }

    #[test]
    fn test_acquire_writes_info_and_drop_releases() {
        let (_td, root) = project();
        {
            let lock = ProjectLock::acquire(&root, false, None).unwrap();
            assert_eq!(lock.info().pid, process::id());
            let on_disk = ProjectLock::read_info(&root).unwrap().unwrap();
            assert_eq!(&on_disk, lock.info());
        }
        assert!(!ProjectLock::lock_path(&root).exists());
    }

    #[test]
    fn test_second_acquire_is_rejected() {
        let (_td, root) = project();
        let _held = ProjectLock::acquire(&root, false, None).unwrap();
        let err = ProjectLock::acquire(&root, false, None).unwrap_err();
        assert!(matches!(err, LockError::Held { pid, .. } if pid == process::id()));
    }

    #[cfg(unix)]
    #[test]
    fn test_dead_owner_past_ttl_is_stale() {
        let (_td, root) = project();
        // PIDs near i32::MAX are never allocated on Linux.
        plant_lock(&root, 2_147_483_000, now_secs() - 10_000);

        let err = ProjectLock::acquire(&root, false, Some(60)).unwrap_err();
        assert!(matches!(err, LockError::Stale { .. }));

        let lock = ProjectLock::acquire(&root, true, Some(60)).unwrap();
        assert_eq!(lock.info().pid, process::id());
    }

    #[test]
    fn test_corrupted_lock_needs_force() {
        let (_td, root) = project();
        fs::create_dir_all(root.join(".labflow")).unwrap();
        fs::write(ProjectLock::lock_path(&root), "not json at all").unwrap();

        assert!(matches!(
            ProjectLock::acquire(&root, false, None).unwrap_err(),
            LockError::Corrupted { .. }
        ));
        assert!(ProjectLock::acquire(&root, true, None).is_ok());
    }

    #[test]
    fn test_explicit_release() {
        let (_td, root) = project();
        let lock = ProjectLock::acquire(&root, false, None).unwrap();
        lock.release().unwrap();
        assert!(ProjectLock::read_info(&root).unwrap().is_none());
    }

    #[test]
    fn test_format_age() {
        assert_eq!(format_age(5), "5s");
        assert_eq!(format_age(125), "2m");
        assert_eq!(format_age(7200), "2h");
        assert_eq!(format_age(200_000), "2d");
    }
}
