//! Phase-boundary snapshots: coarse-grained crash recovery.
//!
//! Distinct from the per-node checkpoint store (`CheckpointStore`): a
//! snapshot is a bundle of the checkpoint DB plus the human-authored
//! workspace files, copied at every phase boundary so a job can be rolled
//! back to the start of an earlier phase, not just resumed mid-phase.

use std::fs;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub type SnapshotResult<T> = Result<T, SnapshotError>;

#[derive(Error, Debug)]
pub enum SnapshotError {
    #[error("io error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("malformed metadata at {path}: {message}")]
    Metadata { path: PathBuf, message: String },
}

impl SnapshotError {
    fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }
}

/// `metadata.json` schema for one `phase_snapshots/job_<id>/phase_<n>/` entry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PhaseSnapshot {
    pub phase_number: u32,
    pub is_strategic_phase: bool,
    pub iteration: u64,
    pub message_count: usize,
    pub timestamp: DateTime<Utc>,
    #[serde(default)]
    pub todos_completed: usize,
    #[serde(default)]
    pub todos_total: usize,
    #[serde(default)]
    pub thread_id: Option<String>,
}

const WORKSPACE_FILES: &[&str] = &["workspace.md", "plan.md", "todos.yaml"];
const METADATA_FILE: &str = "metadata.json";
const CHECKPOINT_FILE: &str = "checkpoint.db";

/// Copies of workspace state kept at each phase boundary, under
/// `<base>/phase_snapshots/job_<id>/`.
pub struct SnapshotManager {
    base: PathBuf,
    job_id: String,
    workspace_root: PathBuf,
    checkpoint_path: PathBuf,
}

impl SnapshotManager {
    pub fn new(
        base: impl Into<PathBuf>,
        job_id: impl Into<String>,
        workspace_root: impl Into<PathBuf>,
        checkpoint_path: impl Into<PathBuf>,
    ) -> Self {
        Self {
            base: base.into(),
            job_id: job_id.into(),
            workspace_root: workspace_root.into(),
            checkpoint_path: checkpoint_path.into(),
        }
    }

    fn job_dir(&self) -> PathBuf {
        self.base.join(format!("job_{}", self.job_id))
    }

    fn phase_dir(&self, phase_number: u32) -> PathBuf {
        self.job_dir().join(format!("phase_{phase_number}"))
    }

    /// Copy the checkpoint DB, workspace files, and archive/ into a fresh
    /// `phase_<n>/` directory, then write `metadata.json`. Never fails the
    /// caller: missing source files are logged and skipped.
    #[allow(clippy::too_many_arguments)]
    pub fn create_snapshot(
        &self,
        phase_number: u32,
        iteration: u64,
        message_count: usize,
        is_strategic_phase: bool,
        todos_completed: usize,
        todos_total: usize,
        thread_id: Option<&str>,
    ) -> bool {
        let dir = self.phase_dir(phase_number);
        if let Err(e) = fs::create_dir_all(&dir) {
            tracing::error!(phase_number, error = %e, "failed to create snapshot directory");
            return false;
        }

        if self.checkpoint_path.exists() {
            if let Err(e) = copy_path(&self.checkpoint_path, &dir.join(CHECKPOINT_FILE)) {
                tracing::warn!(phase_number, error = %e, "failed to copy checkpoint db into snapshot");
            }
        } else {
            tracing::debug!(phase_number, "no checkpoint db to snapshot yet");
        }

        for name in WORKSPACE_FILES {
            let src = self.workspace_root.join(name);
            if !src.exists() {
                tracing::debug!(phase_number, file = name, "workspace file missing, skipping");
                continue;
            }
            if let Err(e) = fs::copy(&src, dir.join(name)) {
                tracing::warn!(phase_number, file = name, error = %e, "failed to copy workspace file into snapshot");
            }
        }

        let archive_src = self.workspace_root.join("archive");
        if archive_src.is_dir() && fs::read_dir(&archive_src).map(|mut d| d.next().is_some()).unwrap_or(false) {
            if let Err(e) = copy_dir_recursive(&archive_src, &dir.join("archive")) {
                tracing::warn!(phase_number, error = %e, "failed to copy archive into snapshot");
            }
        }

        let metadata = PhaseSnapshot {
            phase_number,
            is_strategic_phase,
            iteration,
            message_count,
            timestamp: Utc::now(),
            todos_completed,
            todos_total,
            thread_id: thread_id.map(str::to_string),
        };
        match serde_json::to_string_pretty(&metadata) {
            Ok(json) => {
                if let Err(e) = fs::write(dir.join(METADATA_FILE), json) {
                    tracing::error!(phase_number, error = %e, "failed to write snapshot metadata");
                    return false;
                }
            }
            Err(e) => {
                tracing::error!(phase_number, error = %e, "failed to serialize snapshot metadata");
                return false;
            }
        }

        true
    }

    pub fn get_snapshot(&self, phase_number: u32) -> Option<PhaseSnapshot> {
        let path = self.phase_dir(phase_number).join(METADATA_FILE);
        let text = fs::read_to_string(&path).ok()?;
        match serde_json::from_str(&text) {
            Ok(meta) => Some(meta),
            Err(e) => {
                tracing::warn!(path = %path.display(), error = %e, "malformed snapshot metadata");
                None
            }
        }
    }

    /// All snapshots for this job, ordered by `phase_number` ascending.
    pub fn list_snapshots(&self) -> Vec<PhaseSnapshot> {
        let job_dir = self.job_dir();
        let Ok(entries) = fs::read_dir(&job_dir) else {
            return Vec::new();
        };

        let mut snapshots: Vec<PhaseSnapshot> = entries
            .flatten()
            .filter(|e| e.path().is_dir())
            .filter_map(|e| {
                e.file_name()
                    .to_str()
                    .and_then(|n| n.strip_prefix("phase_"))
                    .and_then(|n| n.parse::<u32>().ok())
            })
            .filter_map(|n| self.get_snapshot(n))
            .collect();
        snapshots.sort_by_key(|s| s.phase_number);
        snapshots
    }

    pub fn get_latest_snapshot(&self) -> Option<PhaseSnapshot> {
        self.list_snapshots().into_iter().max_by_key(|s| s.phase_number)
    }

    /// Restore the checkpoint DB, workspace files, and `archive/` from the
    /// snapshot for `phase_number`. Backs up the live checkpoint DB to
    /// `.db.backup` first. Missing files in the snapshot leave the live
    /// copy untouched rather than deleting it.
    pub fn recover_to_phase(&self, phase_number: u32) -> bool {
        let dir = self.phase_dir(phase_number);
        if !dir.is_dir() {
            tracing::error!(phase_number, "no snapshot directory to recover from");
            return false;
        }

        if self.checkpoint_path.exists() {
            let backup = checkpoint_backup_path(&self.checkpoint_path);
            if let Err(e) = copy_path(&self.checkpoint_path, &backup) {
                tracing::error!(phase_number, error = %e, "failed to back up checkpoint db before recovery");
                return false;
            }
        }

        let snapshot_checkpoint = dir.join(CHECKPOINT_FILE);
        if snapshot_checkpoint.exists() {
            if let Err(e) = copy_path(&snapshot_checkpoint, &self.checkpoint_path) {
                tracing::error!(phase_number, error = %e, "failed to restore checkpoint db");
                return false;
            }
        }

        for name in WORKSPACE_FILES {
            let src = dir.join(name);
            if src.exists() {
                if let Err(e) = fs::copy(&src, self.workspace_root.join(name)) {
                    tracing::warn!(phase_number, file = name, error = %e, "failed to restore workspace file");
                }
            }
        }

        let snapshot_archive = dir.join("archive");
        let live_archive = self.workspace_root.join("archive");
        if snapshot_archive.is_dir() {
            let _ = fs::remove_dir_all(&live_archive);
            if let Err(e) = copy_dir_recursive(&snapshot_archive, &live_archive) {
                tracing::warn!(phase_number, error = %e, "failed to restore archive");
            }
        } else {
            let _ = fs::remove_dir_all(&live_archive);
            let _ = fs::create_dir_all(&live_archive);
        }

        true
    }

    /// Remove all snapshots with `phase_number > n`. Returns how many were
    /// removed. Used after a recovery to drop stale later snapshots.
    pub fn delete_snapshots_after(&self, n: u32) -> usize {
        let mut removed = 0;
        for snapshot in self.list_snapshots() {
            if snapshot.phase_number > n {
                let dir = self.phase_dir(snapshot.phase_number);
                if fs::remove_dir_all(&dir).is_ok() {
                    removed += 1;
                }
            }
        }
        removed
    }

    /// Remove every snapshot for this job.
    pub fn cleanup(&self) -> bool {
        let dir = self.job_dir();
        if !dir.exists() {
            return true;
        }
        fs::remove_dir_all(&dir).is_ok()
    }
}

fn checkpoint_backup_path(checkpoint_path: &Path) -> PathBuf {
    let mut name = checkpoint_path
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_else(|| "checkpoint".to_string());
    name.push_str(".backup");
    checkpoint_path.with_file_name(name)
}

/// Copy `src` to `dst`, recursing if `src` is a directory (RocksDB stores
/// are directories of SST/log files, not single files).
fn copy_path(src: &Path, dst: &Path) -> std::io::Result<()> {
    if src.is_dir() {
        copy_dir_recursive(src, dst)
    } else {
        if let Some(parent) = dst.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::copy(src, dst)?;
        Ok(())
    }
}

fn copy_dir_recursive(src: &Path, dst: &Path) -> std::io::Result<()> {
    fs::create_dir_all(dst)?;
    for entry in fs::read_dir(src)? {
        let entry = entry?;
        let src_path = entry.path();
        let dst_path = dst.join(entry.file_name());
        if src_path.is_dir() {
            copy_dir_recursive(&src_path, &dst_path)?;
        } else {
            fs::copy(&src_path, &dst_path)?;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn manager(base: &Path, workspace_root: &Path, checkpoint: &Path) -> SnapshotManager {
        SnapshotManager::new(base.join("phase_snapshots"), "job1", workspace_root, checkpoint)
    }

    #[test]
    fn create_snapshot_tolerates_missing_files() {
        let dir = tempdir().unwrap();
        let workspace_root = dir.path().join("workspace");
        fs::create_dir_all(&workspace_root).unwrap();
        let checkpoint = dir.path().join("checkpoints/job1.db");
        let mgr = manager(dir.path(), &workspace_root, &checkpoint);

        assert!(mgr.create_snapshot(1, 10, 5, true, 2, 4, Some("t1")));
        let snap = mgr.get_snapshot(1).unwrap();
        assert_eq!(snap.phase_number, 1);
        assert_eq!(snap.thread_id.as_deref(), Some("t1"));
    }

    #[test]
    fn list_snapshots_sorted_by_phase_number() {
        let dir = tempdir().unwrap();
        let workspace_root = dir.path().join("workspace");
        fs::create_dir_all(&workspace_root).unwrap();
        let checkpoint = dir.path().join("checkpoints/job1.db");
        let mgr = manager(dir.path(), &workspace_root, &checkpoint);

        mgr.create_snapshot(2, 1, 1, false, 0, 0, None);
        mgr.create_snapshot(1, 1, 1, true, 0, 0, None);
        let numbers: Vec<u32> = mgr.list_snapshots().iter().map(|s| s.phase_number).collect();
        assert_eq!(numbers, vec![1, 2]);
    }

    #[test]
    fn recover_restores_workspace_files_and_backs_up_checkpoint() {
        let dir = tempdir().unwrap();
        let workspace_root = dir.path().join("workspace");
        fs::create_dir_all(&workspace_root).unwrap();
        fs::write(workspace_root.join("plan.md"), "phase 1 plan").unwrap();
        let checkpoint = dir.path().join("checkpoints/job1.db");
        fs::create_dir_all(checkpoint.parent().unwrap()).unwrap();
        fs::write(&checkpoint, b"phase1-state").unwrap();

        let mgr = manager(dir.path(), &workspace_root, &checkpoint);
        assert!(mgr.create_snapshot(1, 1, 1, true, 0, 0, None));

        fs::write(workspace_root.join("plan.md"), "phase 2 plan").unwrap();
        fs::write(&checkpoint, b"phase2-state").unwrap();

        assert!(mgr.recover_to_phase(1));
        assert_eq!(fs::read_to_string(workspace_root.join("plan.md")).unwrap(), "phase 1 plan");
        assert_eq!(fs::read(&checkpoint).unwrap(), b"phase1-state");
        assert!(checkpoint_backup_path(&checkpoint).exists());
    }

    #[test]
    fn delete_snapshots_after_drops_later_phases_only() {
        let dir = tempdir().unwrap();
        let workspace_root = dir.path().join("workspace");
        fs::create_dir_all(&workspace_root).unwrap();
        let checkpoint = dir.path().join("checkpoints/job1.db");
        let mgr = manager(dir.path(), &workspace_root, &checkpoint);

        mgr.create_snapshot(1, 1, 1, true, 0, 0, None);
        mgr.create_snapshot(2, 1, 1, false, 0, 0, None);
        mgr.create_snapshot(3, 1, 1, true, 0, 0, None);

        assert_eq!(mgr.delete_snapshots_after(1), 2);
        assert_eq!(mgr.list_snapshots().len(), 1);
    }

    #[test]
    fn cleanup_removes_all_snapshots() {
        let dir = tempdir().unwrap();
        let workspace_root = dir.path().join("workspace");
        fs::create_dir_all(&workspace_root).unwrap();
        let checkpoint = dir.path().join("checkpoints/job1.db");
        let mgr = manager(dir.path(), &workspace_root, &checkpoint);
        mgr.create_snapshot(1, 1, 1, true, 0, 0, None);
        assert!(mgr.cleanup());
        assert!(mgr.list_snapshots().is_empty());
    }
}
