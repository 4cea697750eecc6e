//! Snapshot persistence for the membership map.
//!
//! The registry hands a fully-materialized copy of its map to a
//! [`SnapshotStore`] after every mutation. Stores hold no business logic:
//! they load and save an opaque identity → record mapping, last write wins.

use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Mutex;

use beacon_core::MembershipMap;
use thiserror::Error;
use tracing::debug;

/// Errors raised while loading or saving a snapshot.
///
/// Messages are captured as strings so the error can be cloned to every
/// caller waiting on the same write.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum SnapshotError {
    /// Reading, writing or renaming the snapshot file failed.
    #[error("snapshot I/O error at {path}: {message}")]
    Io { path: PathBuf, message: String },

    /// The snapshot file exists but is not a valid membership map.
    #[error("corrupt snapshot at {path}: {message}")]
    Corrupt { path: PathBuf, message: String },

    /// The membership map could not be encoded.
    #[error("failed to encode snapshot: {0}")]
    Encode(String),

    /// The store refused the write (used by test stores).
    #[error("snapshot store unavailable: {0}")]
    Unavailable(String),
}

impl SnapshotError {
    fn io(path: &Path, err: std::io::Error) -> Self {
        Self::Io {
            path: path.to_path_buf(),
            message: err.to_string(),
        }
    }
}

/// Pluggable persistence for the registry's membership map.
///
/// Calls are blocking; the registry runs them off the async executor.
pub trait SnapshotStore: Send + Sync + fmt::Debug {
    /// Loads the last saved map. A store with nothing saved yet returns an empty map.
    fn load(&self) -> Result<MembershipMap, SnapshotError>;

    /// Replaces the saved map with `snapshot`.
    fn save(&self, snapshot: &MembershipMap) -> Result<(), SnapshotError>;
}

// ============================================================================
// JSON File Store
// ============================================================================

/// Stores the map as pretty-printed JSON in a single file.
///
/// Writes go to a sibling temp file that is then renamed over the target,
/// so a crash mid-write leaves the previous snapshot intact.
#[derive(Debug, Clone)]
pub struct JsonFileStore {
    path: PathBuf,
}

impl JsonFileStore {
    /// Creates a store backed by `path`.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Returns the snapshot file path.
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn temp_path(&self) -> PathBuf {
        let mut name = self
            .path
            .file_name()
            .map(|n| n.to_os_string())
            .unwrap_or_default();
        name.push(".tmp");
        self.path.with_file_name(name)
    }
}

impl SnapshotStore for JsonFileStore {
    fn load(&self) -> Result<MembershipMap, SnapshotError> {
        if !self.path.exists() {
            debug!(path = %self.path.display(), "No snapshot file yet");
            return Ok(MembershipMap::new());
        }

        let raw = fs::read_to_string(&self.path).map_err(|e| SnapshotError::io(&self.path, e))?;
        if raw.trim().is_empty() {
            return Ok(MembershipMap::new());
        }

        serde_json::from_str(&raw).map_err(|e| SnapshotError::Corrupt {
            path: self.path.clone(),
            message: e.to_string(),
        })
    }

    fn save(&self, snapshot: &MembershipMap) -> Result<(), SnapshotError> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() && !parent.exists() {
                fs::create_dir_all(parent).map_err(|e| SnapshotError::io(parent, e))?;
            }
        }

        let json = serde_json::to_string_pretty(snapshot)
            .map_err(|e| SnapshotError::Encode(e.to_string()))?;

        let temp = self.temp_path();
        fs::write(&temp, json).map_err(|e| SnapshotError::io(&temp, e))?;
        fs::rename(&temp, &self.path).map_err(|e| SnapshotError::io(&self.path, e))?;
        Ok(())
    }
}

// ============================================================================
// In-Memory Store
// ============================================================================

/// Keeps the snapshot in memory. Used by tests and ephemeral registries.
#[derive(Debug, Default)]
pub struct MemoryStore {
    snapshot: Mutex<MembershipMap>,
    saves: AtomicUsize,
    failing: AtomicBool,
}

impl MemoryStore {
    /// Creates an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a store that loads `snapshot`.
    pub fn with_snapshot(snapshot: MembershipMap) -> Self {
        Self {
            snapshot: Mutex::new(snapshot),
            ..Self::default()
        }
    }

    /// Returns the last saved map.
    pub fn saved(&self) -> MembershipMap {
        self.snapshot
            .lock()
            .map(|s| s.clone())
            .unwrap_or_else(|e| e.into_inner().clone())
    }

    /// Number of successful saves so far.
    pub fn save_count(&self) -> usize {
        self.saves.load(Ordering::SeqCst)
    }

    /// Makes every subsequent load and save fail (or succeed again).
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    fn check_available(&self) -> Result<(), SnapshotError> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(SnapshotError::Unavailable("memory store set to fail".to_string()));
        }
        Ok(())
    }
}

impl SnapshotStore for MemoryStore {
    fn load(&self) -> Result<MembershipMap, SnapshotError> {
        self.check_available()?;
        Ok(self.saved())
    }

    fn save(&self, snapshot: &MembershipMap) -> Result<(), SnapshotError> {
        self.check_available()?;
        let mut guard = self.snapshot.lock().unwrap_or_else(|e| e.into_inner());
        *guard = snapshot.clone();
        self.saves.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}
