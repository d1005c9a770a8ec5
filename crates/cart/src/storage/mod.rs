//! Host key-value storage.
//!
//! The cart runs against a small model of a browser's storage:
//!
//! - [`KeyValueStore`] - synchronous string get/set/remove, implemented by
//!   [`MemoryStore`] and [`FileStore`]
//! - [`StorageOrigin`] - one backend shared by every execution context of an
//!   origin, plus the broadcast channel that carries [`StorageEvent`]s
//! - [`BrowsingContext`] - one "tab": a [`KeyValueStore`] whose writes are
//!   announced to every *other* context of the same origin
//! - [`CartStorage`] - the cart's adapter over a store under one fixed key

pub mod adapter;
pub mod file;
pub mod memory;
pub mod origin;

use thiserror::Error;

pub use adapter::{CartStorage, decode_snapshot, encode_snapshot};
pub use file::FileStore;
pub use memory::MemoryStore;
pub use origin::{BrowsingContext, ContextId, StorageEvents, StorageOrigin};

/// Errors reported by storage backends.
#[derive(Debug, Error)]
pub enum StorageError {
    /// Writing the value would exceed the backend's quota.
    #[error("quota exceeded writing {key}: need {needed} bytes, limit {limit}")]
    QuotaExceeded {
        key: String,
        needed: usize,
        limit: usize,
    },

    /// Filesystem operation failed.
    #[error("storage I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The backend cannot be used right now (e.g. poisoned lock).
    #[error("storage unavailable: {0}")]
    Unavailable(String),
}

/// Synchronous string key-value storage.
///
/// Mirrors the host's persistent storage API: values are text, a missing key
/// reads as `None`, and writes may fail (quota, I/O).
pub trait KeyValueStore: Send + Sync {
    /// Read the value stored under `key`.
    ///
    /// # Errors
    ///
    /// Returns `StorageError` if the backend cannot be read.
    fn get_item(&self, key: &str) -> Result<Option<String>, StorageError>;

    /// Store `value` under `key`, replacing any previous value.
    ///
    /// # Errors
    ///
    /// Returns `StorageError` if the value cannot be written.
    fn set_item(&self, key: &str, value: &str) -> Result<(), StorageError>;

    /// Delete `key`. Removing a missing key is not an error.
    ///
    /// # Errors
    ///
    /// Returns `StorageError` if the backend cannot be written.
    fn remove_item(&self, key: &str) -> Result<(), StorageError>;
}

/// A storage mutation observed from another execution context.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StorageEvent {
    /// Key that changed.
    pub key: String,
    /// Value before the write, if any.
    pub old_value: Option<String>,
    /// Value after the write; `None` when the key was removed.
    pub new_value: Option<String>,
    /// Context that performed the write.
    pub source: ContextId,
}
