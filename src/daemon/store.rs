//! Persistence for the timer state.
//!
//! The engine saves a snapshot after every mutation and loads it once at
//! startup for crash recovery. Failures are reported to the caller, which
//! logs them and keeps running from memory.

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use thiserror::Error;

use crate::types::TimerState;

// ============================================================================
// StoreError
// ============================================================================

/// Errors raised by a [`StateStore`].
#[derive(Debug, Error)]
pub enum StoreError {
    /// Filesystem error
    #[error("state file I/O failed for {path}: {source}")]
    Io {
        /// File involved
        path: PathBuf,
        /// Underlying error
        #[source]
        source: std::io::Error,
    },

    /// The stored record could not be encoded or decoded
    #[error("state record is malformed: {0}")]
    Malformed(#[from] serde_json::Error),

    /// The store refused the write
    #[error("state store unavailable: {0}")]
    Unavailable(String),
}

impl StoreError {
    fn io(path: &Path, source: std::io::Error) -> Self {
        Self::Io {
            path: path.to_path_buf(),
            source,
        }
    }
}

// ============================================================================
// StateStore
// ============================================================================

/// Durable storage for a single [`TimerState`] record.
pub trait StateStore: Send {
    /// Loads the last saved record, if any.
    fn load(&self) -> Result<Option<TimerState>, StoreError>;

    /// Replaces the saved record.
    fn save(&mut self, state: &TimerState) -> Result<(), StoreError>;

    /// Removes the saved record.
    fn clear(&mut self) -> Result<(), StoreError>;
}

// ============================================================================
// FileStateStore
// ============================================================================

/// JSON file store. Writes go to a sibling temp file and are renamed into
/// place so a crash never leaves a half-written record.
#[derive(Debug, Clone)]
pub struct FileStateStore {
    path: PathBuf,
}

impl FileStateStore {
    /// Creates a store backed by `path`. The file need not exist yet.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
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

impl StateStore for FileStateStore {
    fn load(&self) -> Result<Option<TimerState>, StoreError> {
        let bytes = match fs::read(&self.path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(StoreError::io(&self.path, e)),
        };
        let state = serde_json::from_slice(&bytes)?;
        Ok(Some(state))
    }

    fn save(&mut self, state: &TimerState) -> Result<(), StoreError> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent).map_err(|e| StoreError::io(parent, e))?;
        }

        let json = serde_json::to_vec_pretty(state)?;
        let tmp = self.temp_path();
        {
            let mut file = fs::File::create(&tmp).map_err(|e| StoreError::io(&tmp, e))?;
            file.write_all(&json).map_err(|e| StoreError::io(&tmp, e))?;
            file.sync_all().map_err(|e| StoreError::io(&tmp, e))?;
        }
        fs::rename(&tmp, &self.path).map_err(|e| StoreError::io(&self.path, e))
    }

    fn clear(&mut self) -> Result<(), StoreError> {
        match fs::remove_file(&self.path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(StoreError::io(&self.path, e)),
        }
    }
}

// ============================================================================
// MemoryStateStore
// ============================================================================

/// In-memory store used with `--no-persist` and in tests.
///
/// Clones share the same record. Saves can be made to fail on demand.
#[derive(Debug, Clone, Default)]
pub struct MemoryStateStore {
    record: Arc<Mutex<Option<TimerState>>>,
    fail_saves: Arc<AtomicBool>,
    save_count: Arc<AtomicUsize>,
}

impl MemoryStateStore {
    /// Creates an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a store that already holds `state`.
    pub fn with_state(state: TimerState) -> Self {
        let store = Self::default();
        if let Ok(mut record) = store.record.lock() {
            *record = Some(state);
        }
        store
    }

    /// Makes subsequent saves fail (or succeed again).
    pub fn set_fail_saves(&self, fail: bool) {
        self.fail_saves.store(fail, Ordering::SeqCst);
    }

    /// Returns the currently stored record.
    pub fn snapshot(&self) -> Option<TimerState> {
        self.record.lock().ok().and_then(|r| r.clone())
    }

    /// Number of successful saves so far.
    pub fn save_count(&self) -> usize {
        self.save_count.load(Ordering::SeqCst)
    }
}

impl StateStore for MemoryStateStore {
    fn load(&self) -> Result<Option<TimerState>, StoreError> {
        Ok(self.snapshot())
    }

    fn save(&mut self, state: &TimerState) -> Result<(), StoreError> {
        if self.fail_saves.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable("saves disabled".to_string()));
        }
        let mut record = self
            .record
            .lock()
            .map_err(|e| StoreError::Unavailable(e.to_string()))?;
        *record = Some(state.clone());
        self.save_count.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn clear(&mut self) -> Result<(), StoreError> {
        let mut record = self
            .record
            .lock()
            .map_err(|e| StoreError::Unavailable(e.to_string()))?;
        *record = None;
        Ok(())
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::SurfaceId;

    mod file_store_tests {
        use super::*;

        #[test]
        fn test_load_missing_file_is_none() {
            let dir = tempfile::tempdir().unwrap();
            let store = FileStateStore::new(dir.path().join("state.json"));

            assert!(store.load().unwrap().is_none());
        }

        #[test]
        fn test_save_then_load() {
            let dir = tempfile::tempdir().unwrap();
            let mut store = FileStateStore::new(dir.path().join("nested").join("state.json"));

            let mut state = TimerState::new(300);
            state.attach(SurfaceId::new("w"));
            state.start(1_000);
            store.save(&state).unwrap();

            assert_eq!(store.load().unwrap(), Some(state));
            assert!(!store.temp_path().exists());
        }

        #[test]
        fn test_load_malformed_record() {
            let dir = tempfile::tempdir().unwrap();
            let path = dir.path().join("state.json");
            fs::write(&path, "{ not json").unwrap();

            let store = FileStateStore::new(&path);
            assert!(matches!(store.load(), Err(StoreError::Malformed(_))));
        }

        #[test]
        fn test_clear_is_idempotent() {
            let dir = tempfile::tempdir().unwrap();
            let mut store = FileStateStore::new(dir.path().join("state.json"));

            store.save(&TimerState::default()).unwrap();
            store.clear().unwrap();
            store.clear().unwrap();
            assert!(store.load().unwrap().is_none());
        }
    }

    mod memory_store_tests {
        use super::*;

        #[test]
        fn test_clones_share_record() {
            let store = MemoryStateStore::new();
            let mut writer = store.clone();

            writer.save(&TimerState::new(120)).unwrap();
            assert_eq!(store.snapshot().map(|s| s.total_duration_seconds), Some(120));
            assert_eq!(store.save_count(), 1);
        }

        #[test]
        fn test_failing_saves() {
            let mut store = MemoryStateStore::new();
            store.set_fail_saves(true);

            assert!(store.save(&TimerState::default()).is_err());
            assert!(store.snapshot().is_none());

            store.set_fail_saves(false);
            assert!(store.save(&TimerState::default()).is_ok());
        }
    }
}
