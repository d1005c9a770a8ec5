//! Durable store adapter for the cart.
//!
//! Every read and write of the cart snapshot goes through [`CartStorage`].
//! Its two operations never fail from the caller's point of view: a snapshot
//! that cannot be read loads as an empty cart, and a snapshot that cannot be
//! written is logged and dropped while the in-memory cart stays
//! authoritative.

use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;

use tracing::{debug, error, warn};

use super::KeyValueStore;
use crate::error::{CartError, DecodeError};
use crate::models::CartLine;

/// Cart snapshot persistence under one fixed key.
#[derive(Clone)]
pub struct CartStorage {
    store: Arc<dyn KeyValueStore>,
    key: String,
}

impl CartStorage {
    /// Wrap `store`, keeping the snapshot under `key`.
    #[must_use]
    pub fn new(store: Arc<dyn KeyValueStore>, key: impl Into<String>) -> Self {
        Self {
            store,
            key: key.into(),
        }
    }

    /// The durable key.
    #[must_use]
    pub fn key(&self) -> &str {
        &self.key
    }

    /// Load the stored cart.
    ///
    /// A missing key is an empty cart. Read or decode failures are logged as
    /// [`CartError::HydrationDecode`] and also yield an empty cart.
    #[must_use]
    pub fn load(&self) -> Vec<CartLine> {
        match self.try_load() {
            Ok(lines) => {
                debug!(key = %self.key, lines = lines.len(), "Loaded cart snapshot");
                lines
            }
            Err(source) => {
                let err = CartError::HydrationDecode {
                    key: self.key.clone(),
                    source,
                };
                warn!(error = %err, kind = err.kind(), "Discarding unreadable cart snapshot");
                Vec::new()
            }
        }
    }

    /// Write `lines` as the stored cart.
    ///
    /// Returns whether the write reached storage. Failures are logged as
    /// [`CartError::PersistenceWrite`] (or [`CartError::Encode`]); the
    /// return value is informational only.
    pub fn save(&self, lines: &[CartLine]) -> bool {
        let payload = match encode_snapshot(lines) {
            Ok(payload) => payload,
            Err(e) => {
                let err = CartError::Encode(e);
                error!(error = %err, kind = err.kind(), "Failed to encode cart snapshot");
                return false;
            }
        };

        match self.store.set_item(&self.key, &payload) {
            Ok(()) => {
                debug!(key = %self.key, lines = lines.len(), bytes = payload.len(), "Saved cart snapshot");
                true
            }
            Err(source) => {
                let err = CartError::PersistenceWrite {
                    key: self.key.clone(),
                    source,
                };
                error!(error = %err, kind = err.kind(), "Failed to persist cart snapshot");
                false
            }
        }
    }

    fn try_load(&self) -> Result<Vec<CartLine>, DecodeError> {
        match self.store.get_item(&self.key)? {
            Some(raw) => Ok(decode_snapshot(&raw)?),
            None => Ok(Vec::new()),
        }
    }
}

impl fmt::Debug for CartStorage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CartStorage")
            .field("key", &self.key)
            .finish_non_exhaustive()
    }
}

/// Serialize cart lines as a JSON array.
///
/// # Errors
///
/// Returns the `serde_json` error if serialization fails.
pub fn encode_snapshot(lines: &[CartLine]) -> Result<String, serde_json::Error> {
    serde_json::to_string(lines)
}

/// Parse a JSON snapshot into normalized cart lines.
///
/// Keys and totals are re-derived, zero-quantity lines are dropped and the
/// first line wins when several share a key.
///
/// # Errors
///
/// Returns the `serde_json` error if `raw` is not an array of cart lines.
pub fn decode_snapshot(raw: &str) -> Result<Vec<CartLine>, serde_json::Error> {
    let decoded: Vec<CartLine> = serde_json::from_str(raw)?;
    let mut seen = HashSet::with_capacity(decoded.len());
    Ok(decoded
        .into_iter()
        .filter_map(CartLine::normalized)
        .filter(|line| seen.insert(line.line_key().clone()))
        .collect())
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::indexing_slicing)]
mod tests {
    use super::*;
    use crate::models::LineInput;
    use crate::storage::MemoryStore;
    use bazaar_core::Price;

    const KEY: &str = "bazaar_cart";

    fn line(service: &str, qty: i64) -> CartLine {
        CartLine::from_input(LineInput::basic(
            service,
            service.to_uppercase(),
            Price::from_cents(1000).unwrap(),
            qty,
        ))
        .unwrap()
    }

    fn storage() -> (Arc<MemoryStore>, CartStorage) {
        let store = Arc::new(MemoryStore::new());
        let storage = CartStorage::new(store.clone(), KEY);
        (store, storage)
    }

    #[test]
    fn test_load_missing_is_empty() {
        let (_, storage) = storage();
        assert!(storage.load().is_empty());
    }

    #[test]
    fn test_save_then_load() {
        let (_, storage) = storage();
        let lines = vec![line("a", 1), line("b", 2)];
        assert!(storage.save(&lines));
        assert_eq!(storage.load(), lines);
    }

    #[test]
    fn test_load_malformed_is_empty() {
        let (store, storage) = storage();
        store.set_item(KEY, "{not json").unwrap();
        assert!(storage.load().is_empty());

        store.set_item(KEY, "{\"lines\": []}").unwrap();
        assert!(storage.load().is_empty());
    }

    #[test]
    fn test_save_failure_is_swallowed() {
        let store = Arc::new(MemoryStore::with_quota(8));
        let storage = CartStorage::new(store.clone(), KEY);
        assert!(!storage.save(&[line("a", 1)]));
        assert_eq!(store.get_item(KEY).unwrap(), None);
    }

    #[test]
    fn test_decode_drops_zero_quantity_and_duplicates() {
        let first = line("a", 1);
        let mut raw: Vec<serde_json::Value> = vec![
            serde_json::to_value(&first).unwrap(),
            serde_json::to_value(line("a", 5)).unwrap(),
            serde_json::to_value(line("b", 1)).unwrap(),
        ];
        if let Some(serde_json::Value::Object(b)) = raw.get_mut(2) {
            b.insert("quantity".to_string(), serde_json::json!(0));
        }
        let text = serde_json::to_string(&raw).unwrap();

        let decoded = decode_snapshot(&text).unwrap();
        assert_eq!(decoded, vec![first]);
    }

    #[test]
    fn test_encode_is_json_array() {
        let text = encode_snapshot(&[line("a", 2)]).unwrap();
        let value: serde_json::Value = serde_json::from_str(&text).unwrap();
        assert!(value.is_array());
        assert_eq!(value[0]["quantity"], 2);
        assert_eq!(value[0]["lineTotal"], "20.00");
    }
}
