//! In-process storage backend.

use std::collections::HashMap;
use std::sync::Mutex;

use super::{KeyValueStore, StorageError};

/// `HashMap`-backed storage, optionally limited to a byte quota.
///
/// The quota counts key and value bytes across all entries, the way browser
/// storage quotas do, so a large enough cart fails with
/// [`StorageError::QuotaExceeded`] instead of growing without bound.
#[derive(Debug, Default)]
pub struct MemoryStore {
    items: Mutex<HashMap<String, String>>,
    quota_bytes: Option<usize>,
}

impl MemoryStore {
    /// Create an empty store without a quota.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Create an empty store limited to `quota_bytes`.
    #[must_use]
    pub fn with_quota(quota_bytes: usize) -> Self {
        Self {
            items: Mutex::default(),
            quota_bytes: Some(quota_bytes),
        }
    }

    /// Number of stored keys.
    #[must_use]
    pub fn len(&self) -> usize {
        self.items.lock().map_or(0, |items| items.len())
    }

    /// Whether the store holds no keys.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, HashMap<String, String>>, StorageError> {
        self.items
            .lock()
            .map_err(|_| StorageError::Unavailable("memory store lock poisoned".to_string()))
    }
}

impl KeyValueStore for MemoryStore {
    fn get_item(&self, key: &str) -> Result<Option<String>, StorageError> {
        Ok(self.lock()?.get(key).cloned())
    }

    fn set_item(&self, key: &str, value: &str) -> Result<(), StorageError> {
        let mut items = self.lock()?;

        if let Some(limit) = self.quota_bytes {
            let others: usize = items
                .iter()
                .filter(|(k, _)| k.as_str() != key)
                .map(|(k, v)| k.len() + v.len())
                .sum();
            let needed = others + key.len() + value.len();
            if needed > limit {
                return Err(StorageError::QuotaExceeded {
                    key: key.to_string(),
                    needed,
                    limit,
                });
            }
        }

        items.insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn remove_item(&self, key: &str) -> Result<(), StorageError> {
        self.lock()?.remove(key);
        Ok(())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_get_missing_is_none() {
        let store = MemoryStore::new();
        assert_eq!(store.get_item("cart").unwrap(), None);
    }

    #[test]
    fn test_set_get_remove() {
        let store = MemoryStore::new();
        store.set_item("cart", "[]").unwrap();
        assert_eq!(store.get_item("cart").unwrap().as_deref(), Some("[]"));
        assert_eq!(store.len(), 1);

        store.remove_item("cart").unwrap();
        assert!(store.is_empty());
        store.remove_item("cart").unwrap();
    }

    #[test]
    fn test_quota_exceeded() {
        let store = MemoryStore::with_quota(10);
        store.set_item("k", "12345").unwrap();

        let err = store.set_item("k", "1234567890").unwrap_err();
        assert!(matches!(
            err,
            StorageError::QuotaExceeded {
                needed: 11,
                limit: 10,
                ..
            }
        ));
        // Failed write leaves the previous value in place.
        assert_eq!(store.get_item("k").unwrap().as_deref(), Some("12345"));
    }

    #[test]
    fn test_quota_counts_replacement_not_sum() {
        let store = MemoryStore::with_quota(8);
        store.set_item("k", "1234567").unwrap();
        store.set_item("k", "7654321").unwrap();
    }
}
