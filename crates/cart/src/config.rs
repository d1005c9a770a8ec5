//! Cart configuration loaded from environment variables.
//!
//! # Environment Variables
//!
//! All variables are optional.
//!
//! - `CART_STORAGE_KEY` - Durable key the cart snapshot lives under (default: `bazaar_cart`)
//! - `CART_DEBOUNCE_MS` - Quiescence window before a local change is written (default: 300)
//! - `CART_DATA_DIR` - Directory for the file-backed store (default: `.bazaar`)
//! - `CART_QUOTA_BYTES` - Byte quota for either store (default: unlimited)
//! - `CART_BROADCAST_CAPACITY` - Events a slow context may lag behind (default: 64)
//! - `SENTRY_DSN` - Sentry error tracking DSN
//! - `SENTRY_ENVIRONMENT` - Sentry environment name

use std::path::PathBuf;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;

use crate::scheduler::DEFAULT_DEBOUNCE;
use crate::storage::{FileStore, MemoryStore, StorageError, StorageOrigin};

/// Default durable key for the cart snapshot.
pub const DEFAULT_STORAGE_KEY: &str = "bazaar_cart";

/// Default broadcast channel capacity per origin.
pub const DEFAULT_BROADCAST_CAPACITY: usize = 64;

const DEFAULT_DATA_DIR: &str = ".bazaar";

/// Configuration errors that can occur during loading.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Invalid environment variable {0}: {1}")]
    InvalidEnvVar(String, String),
}

/// Cart store configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CartConfig {
    /// Durable key the snapshot is stored under
    pub storage_key: String,
    /// Quiescence window for debounced writes
    pub debounce: Duration,
    /// Directory used by the file-backed store
    pub data_dir: PathBuf,
    /// Byte quota for the storage backend, if any
    pub quota_bytes: Option<usize>,
    /// Broadcast channel capacity
    pub broadcast_capacity: usize,
    /// Sentry DSN for error tracking
    pub sentry_dsn: Option<String>,
    /// Sentry environment name
    pub sentry_environment: Option<String>,
}

impl Default for CartConfig {
    fn default() -> Self {
        Self {
            storage_key: DEFAULT_STORAGE_KEY.to_string(),
            debounce: DEFAULT_DEBOUNCE,
            data_dir: PathBuf::from(DEFAULT_DATA_DIR),
            quota_bytes: None,
            broadcast_capacity: DEFAULT_BROADCAST_CAPACITY,
            sentry_dsn: None,
            sentry_environment: None,
        }
    }
}

impl CartConfig {
    /// Load configuration from environment variables.
    ///
    /// Calls `dotenvy::dotenv()` to load from `.env` file if present.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` if a variable is set but cannot be parsed.
    pub fn from_env() -> Result<Self, ConfigError> {
        // Load .env file if present (ignore errors if not found)
        let _ = dotenvy::dotenv();
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load configuration through an arbitrary variable lookup.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` if a variable is set but cannot be parsed.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let storage_key = get_optional(&lookup, "CART_STORAGE_KEY")
            .unwrap_or_else(|| DEFAULT_STORAGE_KEY.to_string());
        if storage_key.trim().is_empty() {
            return Err(ConfigError::InvalidEnvVar(
                "CART_STORAGE_KEY".to_string(),
                "must not be empty".to_string(),
            ));
        }

        let debounce = get_parsed::<u64>(&lookup, "CART_DEBOUNCE_MS")?
            .map_or(DEFAULT_DEBOUNCE, Duration::from_millis);
        let data_dir = get_optional(&lookup, "CART_DATA_DIR")
            .map_or_else(|| PathBuf::from(DEFAULT_DATA_DIR), PathBuf::from);
        let quota_bytes = get_parsed::<usize>(&lookup, "CART_QUOTA_BYTES")?;
        let broadcast_capacity = get_parsed::<usize>(&lookup, "CART_BROADCAST_CAPACITY")?
            .unwrap_or(DEFAULT_BROADCAST_CAPACITY);
        if broadcast_capacity == 0 {
            return Err(ConfigError::InvalidEnvVar(
                "CART_BROADCAST_CAPACITY".to_string(),
                "must be at least 1".to_string(),
            ));
        }

        Ok(Self {
            storage_key,
            debounce,
            data_dir,
            quota_bytes,
            broadcast_capacity,
            sentry_dsn: get_optional(&lookup, "SENTRY_DSN"),
            sentry_environment: get_optional(&lookup, "SENTRY_ENVIRONMENT"),
        })
    }

    /// An origin backed by an in-memory store, honoring `quota_bytes`.
    #[must_use]
    pub fn memory_origin(&self) -> StorageOrigin {
        let backend = self
            .quota_bytes
            .map_or_else(MemoryStore::new, MemoryStore::with_quota);
        StorageOrigin::new(Arc::new(backend), self.broadcast_capacity)
    }

    /// An origin backed by files under `data_dir`, honoring `quota_bytes`.
    ///
    /// # Errors
    ///
    /// Returns `StorageError` if the directory cannot be created.
    pub fn file_origin(&self) -> Result<StorageOrigin, StorageError> {
        let backend = match self.quota_bytes {
            Some(quota) => FileStore::with_quota(self.data_dir.clone(), quota)?,
            None => FileStore::open(self.data_dir.clone())?,
        };
        Ok(StorageOrigin::new(
            Arc::new(backend),
            self.broadcast_capacity,
        ))
    }
}

// =============================================================================
// Helper Functions
// =============================================================================

/// Get an optional variable, treating blank values as unset.
fn get_optional(lookup: &impl Fn(&str) -> Option<String>, key: &str) -> Option<String> {
    lookup(key).filter(|value| !value.trim().is_empty())
}

/// Get an optional variable and parse it.
fn get_parsed<T>(
    lookup: &impl Fn(&str) -> Option<String>,
    key: &str,
) -> Result<Option<T>, ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    get_optional(lookup, key)
        .map(|value| {
            value
                .trim()
                .parse::<T>()
                .map_err(|e| ConfigError::InvalidEnvVar(key.to_string(), e.to_string()))
        })
        .transpose()
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect();
        move |key| vars.get(key).cloned()
    }

    #[test]
    fn test_defaults_when_unset() {
        let config = CartConfig::from_lookup(lookup(&[])).unwrap();
        assert_eq!(config, CartConfig::default());
        assert_eq!(config.storage_key, "bazaar_cart");
        assert_eq!(config.debounce, Duration::from_millis(300));
        assert_eq!(config.broadcast_capacity, 64);
    }

    #[test]
    fn test_overrides() {
        let config = CartConfig::from_lookup(lookup(&[
            ("CART_STORAGE_KEY", "other_cart"),
            ("CART_DEBOUNCE_MS", "50"),
            ("CART_DATA_DIR", "/tmp/carts"),
            ("CART_QUOTA_BYTES", "4096"),
            ("CART_BROADCAST_CAPACITY", "8"),
            ("SENTRY_DSN", "https://key@sentry.invalid/1"),
        ]))
        .unwrap();

        assert_eq!(config.storage_key, "other_cart");
        assert_eq!(config.debounce, Duration::from_millis(50));
        assert_eq!(config.data_dir, PathBuf::from("/tmp/carts"));
        assert_eq!(config.quota_bytes, Some(4096));
        assert_eq!(config.broadcast_capacity, 8);
        assert!(config.sentry_dsn.is_some());
        assert!(config.sentry_environment.is_none());
    }

    #[test]
    fn test_blank_values_are_unset() {
        let config = CartConfig::from_lookup(lookup(&[("CART_DEBOUNCE_MS", "  ")])).unwrap();
        assert_eq!(config.debounce, DEFAULT_DEBOUNCE);
    }

    #[test]
    fn test_invalid_number() {
        let err = CartConfig::from_lookup(lookup(&[("CART_DEBOUNCE_MS", "soon")])).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidEnvVar(ref key, _) if key == "CART_DEBOUNCE_MS"));
    }

    #[test]
    fn test_zero_capacity_rejected() {
        let err =
            CartConfig::from_lookup(lookup(&[("CART_BROADCAST_CAPACITY", "0")])).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidEnvVar(_, _)));
    }

    #[test]
    fn test_memory_origin_honors_quota() {
        use crate::storage::KeyValueStore;

        let config = CartConfig {
            quota_bytes: Some(16),
            ..CartConfig::default()
        };
        let context = config.memory_origin().open_context();
        assert!(context.set_item("k", "small").is_ok());
        assert!(context.set_item("k", &"x".repeat(64)).is_err());
    }

    #[test]
    fn test_file_origin_honors_quota() {
        use crate::storage::KeyValueStore;

        let dir = tempfile::tempdir().unwrap();
        let config = CartConfig {
            data_dir: dir.path().to_path_buf(),
            quota_bytes: Some(16),
            ..CartConfig::default()
        };
        let context = config.file_origin().unwrap().open_context();
        assert!(context.set_item("k", "small").is_ok());
        assert!(matches!(
            context.set_item("k", &"x".repeat(64)),
            Err(StorageError::QuotaExceeded { .. })
        ));
        assert_eq!(context.get_item("k").unwrap().as_deref(), Some("small"));
    }

    #[test]
    fn test_file_origin_creates_dir() {
        let dir = tempfile::tempdir().unwrap();
        let config = CartConfig {
            data_dir: dir.path().join("nested"),
            ..CartConfig::default()
        };
        assert!(config.file_origin().is_ok());
        assert!(dir.path().join("nested").is_dir());
    }
}
