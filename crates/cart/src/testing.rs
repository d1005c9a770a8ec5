//! Test doubles for storage.
//!
//! [`RecordingStore`] wraps a [`MemoryStore`] and remembers every write, so
//! tests can assert how many writes a sequence of mutations produced and
//! what the last one contained. Reads and writes can be made to fail on
//! demand.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, PoisonError};

use crate::storage::{KeyValueStore, MemoryStore, StorageError};

/// A [`KeyValueStore`] that records writes.
#[derive(Debug, Default)]
pub struct RecordingStore {
    inner: MemoryStore,
    writes: Mutex<Vec<(String, String)>>,
    fail_reads: AtomicBool,
    fail_writes: AtomicBool,
}

impl RecordingStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Make subsequent reads fail (or succeed again).
    pub fn fail_reads(&self, fail: bool) {
        self.fail_reads.store(fail, Ordering::SeqCst);
    }

    /// Make subsequent writes fail (or succeed again). Failed writes are not
    /// recorded.
    pub fn fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    /// Number of successful `set_item` calls.
    #[must_use]
    pub fn write_count(&self) -> usize {
        self.lock().len()
    }

    /// Value of the most recent successful write.
    #[must_use]
    pub fn last_write(&self) -> Option<String> {
        self.lock().last().map(|(_, value)| value.clone())
    }

    /// Every successful write as `(key, value)`, oldest first.
    #[must_use]
    pub fn writes(&self) -> Vec<(String, String)> {
        self.lock().clone()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Vec<(String, String)>> {
        self.writes.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl KeyValueStore for RecordingStore {
    fn get_item(&self, key: &str) -> Result<Option<String>, StorageError> {
        if self.fail_reads.load(Ordering::SeqCst) {
            return Err(StorageError::Unavailable("reads disabled".to_string()));
        }
        self.inner.get_item(key)
    }

    fn set_item(&self, key: &str, value: &str) -> Result<(), StorageError> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(StorageError::QuotaExceeded {
                key: key.to_string(),
                needed: key.len() + value.len(),
                limit: 0,
            });
        }
        self.inner.set_item(key, value)?;
        self.lock().push((key.to_string(), value.to_string()));
        Ok(())
    }

    fn remove_item(&self, key: &str) -> Result<(), StorageError> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(StorageError::Unavailable("writes disabled".to_string()));
        }
        self.inner.remove_item(key)
    }
}
