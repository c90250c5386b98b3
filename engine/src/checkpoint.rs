//! The fine-grained, per-node checkpoint store.
//!
//! A key-value store indexed by `thread_id`, holding the latest serialized
//! `JobState` so a job can resume mid-phase after a crash. Distinct from
//! [`crate::snapshot::SnapshotManager`], which copies coarse-grained state at
//! phase boundaries only. Grounded on the teacher's RocksDB state store.

use std::path::{Path, PathBuf};
use std::sync::RwLock;

use rocksdb::DB;
use thiserror::Error;

pub type CheckpointResult<T> = Result<T, CheckpointError>;

#[derive(Error, Debug)]
pub enum CheckpointError {
    #[error("rocksdb error: {0}")]
    Db(#[from] rocksdb::Error),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// A key-value store over serialized job state, indexed by `thread_id`.
pub trait CheckpointStore: Send + Sync {
    /// Write (overwriting) the latest state for `thread_id`.
    fn put(&self, thread_id: &str, bytes: &[u8]) -> CheckpointResult<()>;

    /// Read the latest state for `thread_id`, if any.
    fn get(&self, thread_id: &str) -> CheckpointResult<Option<Vec<u8>>>;

    /// Every `thread_id` with a stored state, in no particular order. Used
    /// by the resume path's checkpoint-scan fallback when a snapshot lacks
    /// its own `thread_id`.
    fn list_thread_ids(&self) -> CheckpointResult<Vec<String>>;

    /// Path to the underlying store, for `SnapshotManager` to copy whole.
    fn path(&self) -> &Path;
}

/// RocksDB-backed checkpoint store, one database per job
/// (`checkpoints/job_<id>.db`).
pub struct RocksDbCheckpointStore {
    db: RwLock<DB>,
    path: PathBuf,
}

impl RocksDbCheckpointStore {
    pub fn open(path: impl Into<PathBuf>) -> CheckpointResult<Self> {
        let path = path.into();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let mut opts = rocksdb::Options::default();
        opts.create_if_missing(true);
        let db = DB::open(&opts, &path)?;
        Ok(Self {
            db: RwLock::new(db),
            path,
        })
    }
}

impl CheckpointStore for RocksDbCheckpointStore {
    fn put(&self, thread_id: &str, bytes: &[u8]) -> CheckpointResult<()> {
        let db = self.db.write().expect("checkpoint db lock poisoned");
        db.put(thread_id.as_bytes(), bytes)?;
        Ok(())
    }

    fn get(&self, thread_id: &str) -> CheckpointResult<Option<Vec<u8>>> {
        let db = self.db.read().expect("checkpoint db lock poisoned");
        Ok(db.get(thread_id.as_bytes())?)
    }

    fn list_thread_ids(&self) -> CheckpointResult<Vec<String>> {
        let db = self.db.read().expect("checkpoint db lock poisoned");
        let ids = db
            .iterator(rocksdb::IteratorMode::Start)
            .filter_map(|item| item.ok())
            .map(|(key, _)| String::from_utf8_lossy(&key).into_owned())
            .collect();
        Ok(ids)
    }

    fn path(&self) -> &Path {
        &self.path
    }
}

/// Serialize a `JobState`-shaped value with bincode for checkpoint storage.
pub fn encode<T: serde::Serialize>(value: &T) -> CheckpointResult<Vec<u8>> {
    bincode::serde::encode_to_vec(value, bincode::config::standard())
        .map_err(|e| CheckpointError::Io(std::io::Error::new(std::io::ErrorKind::InvalidData, e.to_string())))
}

/// Deserialize a value previously written with [`encode`].
pub fn decode<T: serde::de::DeserializeOwned>(bytes: &[u8]) -> CheckpointResult<T> {
    let (value, _) = bincode::serde::decode_from_slice(bytes, bincode::config::standard())
        .map_err(|e| CheckpointError::Io(std::io::Error::new(std::io::ErrorKind::InvalidData, e.to_string())))?;
    Ok(value)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::{Deserialize, Serialize};
    use tempfile::tempdir;

    #[derive(Debug, Serialize, Deserialize, PartialEq)]
    struct Sample {
        iteration: u64,
        phase: String,
    }

    #[test]
    fn put_then_get_round_trips() {
        let dir = tempdir().unwrap();
        let store = RocksDbCheckpointStore::open(dir.path().join("job1.db")).unwrap();
        let value = Sample {
            iteration: 7,
            phase: "tactical".to_string(),
        };
        store.put("thread-1", &encode(&value).unwrap()).unwrap();

        let bytes = store.get("thread-1").unwrap().unwrap();
        let restored: Sample = decode(&bytes).unwrap();
        assert_eq!(restored, value);
    }

    #[test]
    fn get_missing_thread_returns_none() {
        let dir = tempdir().unwrap();
        let store = RocksDbCheckpointStore::open(dir.path().join("job1.db")).unwrap();
        assert!(store.get("missing").unwrap().is_none());
    }

    #[test]
    fn list_thread_ids_reflects_writes() {
        let dir = tempdir().unwrap();
        let store = RocksDbCheckpointStore::open(dir.path().join("job1.db")).unwrap();
        store.put("a", b"x").unwrap();
        store.put("b", b"y").unwrap();
        let mut ids = store.list_thread_ids().unwrap();
        ids.sort();
        assert_eq!(ids, vec!["a".to_string(), "b".to_string()]);
    }
}
