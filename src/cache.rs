//! Snapshot Cache: one JSON file per project root, keyed by a hash of the
//! canonical root path. Loads are forgiving (anything wrong is a miss and
//! forces a full rescan); saves are guarded by a generation marker observed
//! at load time plus a sidecar flock, so a second session can never silently
//! overwrite newer state.

use crate::errors::CacheError;
use crate::fingerprint::project_key;
use crate::snapshot::Snapshot;
use fs2::FileExt;
use serde::{Deserialize, Serialize};
use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;

/// On-disk wrapper: the logical snapshot plus the concurrency marker.
#[derive(Debug, Serialize, Deserialize)]
struct CacheFile {
    generation: u64,
    snapshot: Snapshot,
}

pub struct SnapshotStore {
    dir: PathBuf,
    /// Generation observed on the last load for this root, `None` when the
    /// file was missing or undecodable.
    loaded_generation: Option<u64>,
}

impl SnapshotStore {
    pub fn new(dir: impl AsRef<Path>) -> Self {
        Self {
            dir: dir.as_ref().to_path_buf(),
            loaded_generation: None,
        }
    }

    /// Default cache location: `<user cache dir>/repostate/snapshots`.
    pub fn default_dir() -> PathBuf {
        dirs::cache_dir()
            .unwrap_or_else(std::env::temp_dir)
            .join("repostate")
            .join("snapshots")
    }

    pub fn file_path(&self, root: &Path) -> PathBuf {
        self.dir.join(format!("{}.json", project_key(root)))
    }

    /// Load the cached snapshot for (root, patterns). Any identity or
    /// version mismatch, corrupt file, or read failure is a miss — callers
    /// fall back to a full scan.
    pub fn load(&mut self, root: &Path, ignore_patterns: &[String]) -> Option<Snapshot> {
        self.loaded_generation = None;
        let path = self.file_path(root);
        let raw = fs::read_to_string(&path).ok()?;
        let file: CacheFile = serde_json::from_str(&raw).ok()?;
        // Remember the marker even on an identity mismatch: a later save
        // for this root still must not clobber a foreign generation.
        self.loaded_generation = Some(file.generation);

        let root_str = root.to_string_lossy();
        if !file.snapshot.matches_identity(&root_str, ignore_patterns) {
            return None;
        }
        Some(file.snapshot)
    }

    /// Persist the snapshot atomically. Fails with
    /// `CacheError::ConcurrentModification` if the on-disk generation no
    /// longer matches the one observed at load time.
    pub fn save(&mut self, root: &Path, snapshot: &Snapshot) -> Result<(), CacheError> {
        fs::create_dir_all(&self.dir).map_err(|source| CacheError::Io {
            path: self.dir.clone(),
            source,
        })?;

        let path = self.file_path(root);
        let _lock = SaveLock::acquire(&path)?;

        let on_disk = read_generation(&path);
        if on_disk != self.loaded_generation {
            return Err(CacheError::ConcurrentModification { path });
        }

        let next = self.loaded_generation.map(|g| g + 1).unwrap_or(1);
        let payload = serde_json::to_vec_pretty(&CacheFile {
            generation: next,
            snapshot: snapshot.clone(),
        })?;

        let mut tmp = NamedTempFile::new_in(&self.dir).map_err(|source| CacheError::Io {
            path: self.dir.clone(),
            source,
        })?;
        tmp.write_all(&payload).map_err(|source| CacheError::Io {
            path: path.clone(),
            source,
        })?;
        tmp.persist(&path).map_err(|err| CacheError::Io {
            path: path.clone(),
            source: err.error,
        })?;

        self.loaded_generation = Some(next);
        Ok(())
    }
}

fn read_generation(path: &Path) -> Option<u64> {
    let raw = fs::read_to_string(path).ok()?;
    let file: CacheFile = serde_json::from_str(&raw).ok()?;
    Some(file.generation)
}

/// Sidecar flock held for the duration of the generation check-and-write.
/// Released when the fd closes on drop.
struct SaveLock {
    _file: File,
}

impl SaveLock {
    fn acquire(target: &Path) -> Result<Self, CacheError> {
        let mut lock_os = target.as_os_str().to_owned();
        lock_os.push(".lock");
        let lock_path = PathBuf::from(lock_os);

        let file = File::create(&lock_path).map_err(|source| CacheError::Io {
            path: lock_path.clone(),
            source,
        })?;
        // Blocking exclusive lock — waits if another process holds it
        file.lock_exclusive().map_err(|source| CacheError::Io {
            path: lock_path,
            source,
        })?;
        Ok(Self { _file: file })
    }
}
