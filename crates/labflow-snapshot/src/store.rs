use anyhow::Context;
use camino::{Utf8Path, Utf8PathBuf};
use chrono::Utc;
use std::collections::HashSet;
use std::fs;
use std::io;
use std::time::Instant;

use labflow_utils::atomic_write::write_file_atomic;
use labflow_utils::error::SnapshotError;
use labflow_utils::paths::{HOUSEKEEPING_DIR, MARKERS_DIR, ProjectPaths, ensure_dir_all};

use crate::key::SnapshotKey;
use crate::manifest::{MANIFEST_FILE, MANIFEST_SCHEMA_VERSION, Manifest, ManifestEntry};
use crate::objects::{GcReport, ObjectStore};
use crate::restore::{RestoreReport, restore};
use crate::walk::{Exclusions, ScanMode, scan};

/// Summary of one capture.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CaptureReport {
    pub key: SnapshotKey,
    pub entries: usize,
    pub bytes: u64,
    pub new_objects: usize,
}

#[derive(Debug, Clone)]
pub struct SnapshotStore {
    root: Utf8PathBuf,
    snapshots_dir: Utf8PathBuf,
    objects: ObjectStore,
    exclusions: Exclusions,
}

impl SnapshotStore {
    #[must_use]
    pub fn new(paths: &ProjectPaths, exclusions: Exclusions) -> Self {
        Self {
            root: paths.root().to_path_buf(),
            snapshots_dir: paths.snapshots_dir(),
            objects: ObjectStore::new(paths.objects_dir()),
            exclusions,
        }
    }

    #[must_use]
    pub fn exclusions(&self) -> &Exclusions {
        &self.exclusions
    }

    fn dir_for(&self, key: &SnapshotKey) -> Utf8PathBuf {
        self.snapshots_dir.join(key.to_string())
    }

    fn manifest_path(&self, key: &SnapshotKey) -> Utf8PathBuf {
        self.dir_for(key).join(MANIFEST_FILE)
    }

    #[must_use]
    pub fn snapshot_exists(&self, key: &SnapshotKey) -> bool {
        self.manifest_path(key).is_file()
    }

    /// Every complete snapshot, sorted (runs grouped by step, ascending).
    pub fn list_keys(&self) -> Result<Vec<SnapshotKey>, SnapshotError> {
        let read = match fs::read_dir(&self.snapshots_dir) {
            Ok(read) => read,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(listing_error(&self.snapshots_dir, &e)),
        };

        let mut keys = Vec::new();
        for dirent in read {
            let dirent = dirent.map_err(|e| listing_error(&self.snapshots_dir, &e))?;
            let Some(name) = dirent.file_name().to_str().map(str::to_owned) else {
                continue;
            };
            // The objects directory and stray names are not snapshots.
            let Ok(key) = SnapshotKey::parse(&name) else {
                continue;
            };
            if self.snapshot_exists(&key) {
                keys.push(key);
            }
        }
        keys.sort();
        Ok(keys)
    }

    /// Run numbers with a surviving snapshot for `step_id`, ascending.
    pub fn surviving_runs(&self, step_id: &str) -> Result<Vec<u32>, SnapshotError> {
        Ok(self
            .list_keys()?
            .into_iter()
            .filter(|k| k.step_id() == Some(step_id))
            .filter_map(|k| k.run_number())
            .collect())
    }

    pub fn latest_surviving_run(&self, step_id: &str) -> Result<Option<u32>, SnapshotError> {
        Ok(self.surviving_runs(step_id)?.last().copied())
    }

    /// One plus the highest surviving run number; 1 for a step never run.
    pub fn next_run_number(&self, step_id: &str) -> Result<u32, SnapshotError> {
        Ok(self.latest_surviving_run(step_id)?.unwrap_or(0) + 1)
    }

    /// Capture the tree under `scope` just before `run` of `step_id`.
    ///
    /// A scope narrower than the whole project also captures the markers
    /// directory, so marker presence rolls back with the data.
    pub fn create_before_snapshot(
        &self,
        step_id: &str,
        run: u32,
        scope: &[Utf8PathBuf],
    ) -> Result<CaptureReport, SnapshotError> {
        let mut scope: Vec<Utf8PathBuf> = if scope.is_empty() {
            vec![Utf8PathBuf::new()]
        } else {
            scope.to_vec()
        };
        if !scope.iter().any(|p| p.as_str().is_empty()) {
            let markers = Utf8Path::new(HOUSEKEEPING_DIR).join(MARKERS_DIR);
            if !scope.contains(&markers) {
                scope.push(markers);
            }
        }
        self.capture(&SnapshotKey::run(step_id, run), &scope)
    }

    /// Capture the whole project under `_safety_{label}`, replacing any
    /// earlier snapshot with the same label.
    pub fn create_safety_snapshot(&self, label: &str) -> Result<CaptureReport, SnapshotError> {
        let key = SnapshotKey::safety(label);
        SnapshotKey::parse(&key.to_string())?;
        self.capture(&key, &[Utf8PathBuf::new()])
    }

    /// Capture under an explicit key; used for safety keys built with
    /// [`SnapshotKey::skip_to`] and [`SnapshotKey::decision`].
    pub fn create_snapshot(&self, key: &SnapshotKey) -> Result<CaptureReport, SnapshotError> {
        self.capture(key, &[Utf8PathBuf::new()])
    }

    fn capture(&self, key: &SnapshotKey, scope: &[Utf8PathBuf]) -> Result<CaptureReport, SnapshotError> {
        let started = Instant::now();
        let capture_err = |e: anyhow::Error| SnapshotError::Capture {
            key: key.to_string(),
            reason: format!("{e:#}"),
        };

        let dir = self.dir_for(key);
        if dir.exists() {
            fs::remove_dir_all(&dir)
                .with_context(|| format!("Failed to clear previous snapshot: {dir}"))
                .map_err(capture_err)?;
        }

        let (entries, stats) =
            scan(&self.root, scope, &self.exclusions, ScanMode::Store(&self.objects)).map_err(capture_err)?;

        let manifest = Manifest {
            schema_version: MANIFEST_SCHEMA_VERSION,
            key: key.to_string(),
            created_at: Utc::now(),
            scope: scope.to_vec(),
            entries,
        };
        let json = serde_json::to_string_pretty(&manifest)
            .context("Failed to serialize manifest")
            .map_err(capture_err)?;
        ensure_dir_all(&dir)
            .with_context(|| format!("Failed to create snapshot directory: {dir}"))
            .map_err(capture_err)?;
        write_file_atomic(&self.manifest_path(key), &json).map_err(capture_err)?;

        let report = CaptureReport {
            key: key.clone(),
            entries: manifest.entries.len(),
            bytes: manifest.total_bytes(),
            new_objects: stats.new_objects,
        };
        tracing::info!(
            key = %key,
            entries = report.entries,
            bytes = report.bytes,
            new_objects = report.new_objects,
            duration_ms = started.elapsed().as_millis() as u64,
            "snapshot created"
        );
        Ok(report)
    }

    /// Read a snapshot's manifest.
    pub fn manifest(&self, key: &SnapshotKey) -> Result<Manifest, SnapshotError> {
        let path = self.manifest_path(key);
        let content = match fs::read_to_string(&path) {
            Ok(content) => content,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                return Err(SnapshotError::NotFound {
                    key: key.to_string(),
                });
            }
            Err(e) => {
                return Err(SnapshotError::Corrupted {
                    key: key.to_string(),
                    reason: e.to_string(),
                });
            }
        };
        let manifest: Manifest = serde_json::from_str(&content).map_err(|e| SnapshotError::Corrupted {
            key: key.to_string(),
            reason: e.to_string(),
        })?;
        if manifest.schema_version != MANIFEST_SCHEMA_VERSION {
            return Err(SnapshotError::Corrupted {
                key: key.to_string(),
                reason: format!("unsupported manifest schema {}", manifest.schema_version),
            });
        }
        Ok(manifest)
    }

    /// Make the tree inside the snapshot's scope match it exactly.
    pub fn restore_snapshot(&self, key: &SnapshotKey) -> Result<RestoreReport, SnapshotError> {
        let started = Instant::now();
        let manifest = self.manifest(key)?;
        let report = restore(&self.root, &manifest, &self.exclusions, &self.objects).map_err(|e| {
            SnapshotError::Restore {
                key: key.to_string(),
                reason: format!("{e:#}"),
            }
        })?;
        tracing::info!(
            key = %key,
            deleted = report.deleted,
            written = report.written,
            unchanged = report.unchanged,
            duration_ms = started.elapsed().as_millis() as u64,
            "snapshot restored"
        );
        Ok(report)
    }

    /// Delete one snapshot and any objects only it referenced. Returns false
    /// when it did not exist.
    pub fn delete_snapshot(&self, key: &SnapshotKey) -> Result<bool, SnapshotError> {
        let existed = self.remove_dir(key)?;
        if existed {
            tracing::info!(key = %key, "snapshot deleted");
            self.gc()?;
        }
        Ok(existed)
    }

    /// Delete the snapshot for `run` of `step_id` and every later run.
    /// Returns the deleted run numbers.
    pub fn delete_run_snapshots_from(&self, step_id: &str, run: u32) -> Result<Vec<u32>, SnapshotError> {
        let doomed: Vec<u32> = self
            .surviving_runs(step_id)?
            .into_iter()
            .filter(|r| *r >= run)
            .collect();
        for r in &doomed {
            self.remove_dir(&SnapshotKey::run(step_id, *r))?;
        }
        if !doomed.is_empty() {
            tracing::info!(step_id = %step_id, from_run = run, runs = ?doomed, "run snapshots deleted");
            self.gc()?;
        }
        Ok(doomed)
    }

    /// The manifest goes first so the snapshot stops existing before its
    /// directory is torn down.
    fn remove_dir(&self, key: &SnapshotKey) -> Result<bool, SnapshotError> {
        let delete_err = |e: io::Error| SnapshotError::Corrupted {
            key: key.to_string(),
            reason: format!("failed to delete: {e}"),
        };
        let dir = self.dir_for(key);
        if !dir.exists() {
            return Ok(false);
        }
        let existed = self.snapshot_exists(key);
        match fs::remove_file(self.manifest_path(key)) {
            Ok(()) => {}
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => return Err(delete_err(e)),
        }
        fs::remove_dir_all(&dir).map_err(delete_err)?;
        Ok(existed)
    }

    /// Remove content objects no manifest references.
    pub fn gc(&self) -> Result<GcReport, SnapshotError> {
        let mut referenced = HashSet::new();
        for key in self.list_keys()? {
            let manifest = self.manifest(&key)?;
            referenced.extend(manifest.object_hashes().map(str::to_owned));
        }
        let report = self.objects.gc(&referenced).map_err(|e| SnapshotError::Corrupted {
            key: "objects".to_string(),
            reason: format!("{e:#}"),
        })?;
        if report.removed_objects > 0 {
            tracing::debug!(
                removed = report.removed_objects,
                freed_bytes = report.freed_bytes,
                "snapshot objects collected"
            );
        }
        Ok(report)
    }

    /// Describe the current tree under `scope` the way a snapshot would,
    /// without storing anything.
    pub fn capture_tree(&self, scope: &[Utf8PathBuf]) -> Result<Vec<ManifestEntry>, SnapshotError> {
        let (entries, _) = scan(&self.root, scope, &self.exclusions, ScanMode::Hash).map_err(|e| {
            SnapshotError::Capture {
                key: "<tree>".to_string(),
                reason: format!("{e:#}"),
            }
        })?;
        Ok(entries)
    }
}

fn listing_error(dir: &Utf8Path, e: &io::Error) -> SnapshotError {
    SnapshotError::Corrupted {
        key: dir.to_string(),
        reason: format!("failed to list snapshots: {e}"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use labflow_utils::test_support::TestProject;

    fn store(p: &TestProject) -> SnapshotStore {
        let paths = ProjectPaths::new(p.root());
        SnapshotStore::new(
            &paths,
            Exclusions::new(Some(Utf8PathBuf::from("workflow.yml")), globset::GlobSet::empty()),
        )
    }

    fn whole() -> Vec<Utf8PathBuf> {
        vec![Utf8PathBuf::new()]
    }

    #[test]
    fn test_run_numbers() {
        let p = TestProject::new();
        let s = store(&p);
        assert_eq!(s.next_run_number("prep").unwrap(), 1);
        s.create_before_snapshot("prep", 1, &whole()).unwrap();
        s.create_before_snapshot("prep", 2, &whole()).unwrap();
        s.create_before_snapshot("qc", 1, &whole()).unwrap();
        assert_eq!(s.surviving_runs("prep").unwrap(), [1, 2]);
        assert_eq!(s.next_run_number("prep").unwrap(), 3);
        assert_eq!(s.latest_surviving_run("report").unwrap(), None);
    }

    #[test]
    fn test_restore_is_exact_and_spares_exclusions() {
        let p = TestProject::new();
        let s = store(&p);
        p.workflow("steps: v1");
        p.write("data/in.csv", "original");
        s.create_before_snapshot("prep", 1, &whole()).unwrap();

        p.write("data/in.csv", "modified");
        p.write("data/new/out.csv", "created");
        p.write("results.txt", "x");
        p.workflow("steps: v2");
        p.write(".labflow/state.json", "{}");

        let report = s.restore_snapshot(&SnapshotKey::run("prep", 1)).unwrap();
        assert_eq!(p.read("data/in.csv").as_deref(), Some("original"));
        assert!(!p.exists("data/new"));
        assert!(!p.exists("results.txt"));
        assert_eq!(p.read("workflow.yml").as_deref(), Some("steps: v2"));
        assert!(p.exists(".labflow/state.json"));
        assert_eq!(report.deleted, 3);
        assert!(report.written >= 1);
    }

    #[test]
    fn test_restore_reapplies_mtimes() {
        let p = TestProject::new();
        let s = store(&p);
        let f = p.write("data/old.csv", "old");
        let past = std::time::UNIX_EPOCH + std::time::Duration::from_secs(1_000_000_000);
        std::fs::File::options()
            .write(true)
            .open(&f)
            .unwrap()
            .set_modified(past)
            .unwrap();
        s.create_before_snapshot("prep", 1, &whole()).unwrap();

        std::fs::write(&f, "new").unwrap();
        s.restore_snapshot(&SnapshotKey::run("prep", 1)).unwrap();
        assert_eq!(std::fs::metadata(&f).unwrap().modified().unwrap(), past);
    }

    #[test]
    fn test_scoped_snapshot_leaves_other_paths_and_tracks_markers() {
        let p = TestProject::new();
        let s = store(&p);
        p.write("data/a.txt", "a");
        p.write("notes.txt", "keep me");
        s.create_before_snapshot("prep", 1, &[Utf8PathBuf::from("data")]).unwrap();

        p.write("data/b.txt", "b");
        p.write("notes.txt", "edited");
        p.write(".labflow/markers/prep.success", "");
        s.restore_snapshot(&SnapshotKey::run("prep", 1)).unwrap();

        assert!(!p.exists("data/b.txt"));
        assert_eq!(p.read("notes.txt").as_deref(), Some("edited"));
        assert!(!p.exists(".labflow/markers/prep.success"));
    }

    #[test]
    fn test_delete_from_and_gc() {
        let p = TestProject::new();
        let s = store(&p);
        for run in 1..=3 {
            p.write("data/file.txt", &format!("content {run}"));
            s.create_before_snapshot("prep", run, &whole()).unwrap();
        }
        assert_eq!(s.delete_run_snapshots_from("prep", 2).unwrap(), [2, 3]);
        assert_eq!(s.surviving_runs("prep").unwrap(), [1]);
        assert!(s.delete_run_snapshots_from("prep", 5).unwrap().is_empty());
        // Only run 1's objects survive, so nothing is left to collect.
        assert_eq!(s.gc().unwrap(), GcReport::default());
        s.restore_snapshot(&SnapshotKey::run("prep", 1)).unwrap();
        assert_eq!(p.read("data/file.txt").as_deref(), Some("content 1"));
    }

    #[test]
    fn test_missing_and_incomplete_snapshots() {
        let p = TestProject::new();
        let s = store(&p);
        let key = SnapshotKey::run("prep", 1);
        assert!(!s.snapshot_exists(&key));
        assert!(matches!(s.restore_snapshot(&key), Err(SnapshotError::NotFound { .. })));

        // A directory without a manifest is an interrupted capture.
        p.write(".labflow/snapshots/prep_run_1/partial", "");
        assert!(!s.snapshot_exists(&key));
        assert!(s.list_keys().unwrap().is_empty());
        assert_eq!(s.next_run_number("prep").unwrap(), 1);
        s.create_before_snapshot("prep", 1, &whole()).unwrap();
        assert!(s.snapshot_exists(&key));
        assert!(!p.exists(".labflow/snapshots/prep_run_1/partial"));
    }

    #[test]
    fn test_safety_snapshots_do_not_count_as_runs() {
        let p = TestProject::new();
        let s = store(&p);
        s.create_snapshot(&SnapshotKey::skip_to("report")).unwrap();
        s.create_safety_snapshot("manual").unwrap();
        assert!(s.create_safety_snapshot("../x").is_err());
        assert_eq!(s.list_keys().unwrap().len(), 2);
        assert_eq!(s.next_run_number("report").unwrap(), 1);
        assert!(s.delete_snapshot(&SnapshotKey::skip_to("report")).unwrap());
        assert!(!s.delete_snapshot(&SnapshotKey::skip_to("report")).unwrap());
    }
}
