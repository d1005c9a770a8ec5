//! Filesystem storage backend.
//!
//! One file per key under a data directory. Each write goes to its own
//! uniquely named temporary file in the same directory that is then
//! persisted over the target, so a reader never sees a half written snapshot
//! and concurrent writers never share a temporary path.
//!
//! An optional byte quota counts file stems and contents across the
//! directory, matching [`MemoryStore`](super::MemoryStore).

use std::fmt::Write as _;
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use super::{KeyValueStore, StorageError};

const FILE_EXTENSION: &str = "json";

/// Directory-backed storage that survives process restarts.
#[derive(Debug, Clone)]
pub struct FileStore {
    dir: PathBuf,
    quota_bytes: Option<usize>,
}

impl FileStore {
    /// Open (and create if needed) a store rooted at `dir`.
    ///
    /// # Errors
    ///
    /// Returns `StorageError::Io` if the directory cannot be created.
    pub fn open(dir: impl Into<PathBuf>) -> Result<Self, StorageError> {
        let dir = dir.into();
        fs::create_dir_all(&dir)?;
        Ok(Self {
            dir,
            quota_bytes: None,
        })
    }

    /// Open a store rooted at `dir` and limited to `quota_bytes`.
    ///
    /// # Errors
    ///
    /// Returns `StorageError::Io` if the directory cannot be created.
    pub fn with_quota(dir: impl Into<PathBuf>, quota_bytes: usize) -> Result<Self, StorageError> {
        let mut store = Self::open(dir)?;
        store.quota_bytes = Some(quota_bytes);
        Ok(store)
    }

    /// Directory holding the stored files.
    #[must_use]
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Path of the file that holds `key`.
    #[must_use]
    pub fn path_for(&self, key: &str) -> PathBuf {
        self.dir.join(format!("{}.{FILE_EXTENSION}", file_stem(key)))
    }

    /// Bytes held by every stored key except the one at `skip`.
    fn used_bytes_except(&self, skip: &Path) -> Result<usize, StorageError> {
        let mut used: usize = 0;
        for entry in fs::read_dir(&self.dir)? {
            let path = entry?.path();
            if path == skip || path.extension().is_none_or(|ext| ext != FILE_EXTENSION) {
                continue;
            }
            let stem_len = path.file_stem().map_or(0, |stem| stem.len());
            let len = match fs::metadata(&path) {
                Ok(meta) => usize::try_from(meta.len()).unwrap_or(usize::MAX),
                Err(e) if e.kind() == ErrorKind::NotFound => continue,
                Err(e) => return Err(e.into()),
            };
            used = used.saturating_add(stem_len).saturating_add(len);
        }
        Ok(used)
    }
}

impl KeyValueStore for FileStore {
    fn get_item(&self, key: &str) -> Result<Option<String>, StorageError> {
        match fs::read_to_string(self.path_for(key)) {
            Ok(value) => Ok(Some(value)),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    fn set_item(&self, key: &str, value: &str) -> Result<(), StorageError> {
        let path = self.path_for(key);

        if let Some(limit) = self.quota_bytes {
            let needed = self
                .used_bytes_except(&path)?
                .saturating_add(file_stem(key).len())
                .saturating_add(value.len());
            if needed > limit {
                return Err(StorageError::QuotaExceeded {
                    key: key.to_string(),
                    needed,
                    limit,
                });
            }
        }

        let tmp = tempfile::NamedTempFile::new_in(&self.dir)?;
        fs::write(tmp.path(), value)?;
        tmp.persist(&path).map_err(|e| e.error)?;
        Ok(())
    }

    fn remove_item(&self, key: &str) -> Result<(), StorageError> {
        match fs::remove_file(self.path_for(key)) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

/// Map a key to a safe file stem.
///
/// ASCII alphanumerics, `-` and `_` pass through; every other byte becomes
/// `%XX`, so distinct keys always map to distinct files.
fn file_stem(key: &str) -> String {
    let mut stem = String::with_capacity(key.len());
    for byte in key.bytes() {
        if byte.is_ascii_alphanumeric() || byte == b'-' || byte == b'_' {
            stem.push(char::from(byte));
        } else {
            let _ = write!(stem, "%{byte:02X}");
        }
    }
    stem
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::indexing_slicing)]
mod tests {
    use super::*;

    #[test]
    fn test_file_stem_escapes_unsafe_bytes() {
        assert_eq!(file_stem("bazaar_cart"), "bazaar_cart");
        assert_eq!(file_stem("../etc"), "%2E%2E%2Fetc");
        assert_ne!(file_stem("a b"), file_stem("a%20b"));
    }

    #[test]
    fn test_round_trip_and_missing() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileStore::open(dir.path()).unwrap();

        assert_eq!(store.get_item("cart").unwrap(), None);
        store.set_item("cart", "[1]").unwrap();
        assert_eq!(store.get_item("cart").unwrap().as_deref(), Some("[1]"));
        assert!(store.path_for("cart").exists());
    }

    #[test]
    fn test_values_survive_reopen() {
        let dir = tempfile::tempdir().unwrap();
        FileStore::open(dir.path())
            .unwrap()
            .set_item("cart", "[2]")
            .unwrap();

        let reopened = FileStore::open(dir.path()).unwrap();
        assert_eq!(reopened.get_item("cart").unwrap().as_deref(), Some("[2]"));
    }

    #[test]
    fn test_remove_missing_is_ok() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileStore::open(dir.path()).unwrap();
        store.remove_item("cart").unwrap();

        store.set_item("cart", "[]").unwrap();
        store.remove_item("cart").unwrap();
        assert_eq!(store.get_item("cart").unwrap(), None);
    }

    #[test]
    fn test_concurrent_writers_never_fail() {
        let dir = tempfile::tempdir().unwrap();
        let writers: Vec<_> = ["a", "b"]
            .into_iter()
            .map(|fill| {
                let store = FileStore::open(dir.path()).unwrap();
                let value = fill.repeat(64 * 1024);
                std::thread::spawn(move || {
                    for _ in 0..50 {
                        store.set_item("cart", &value).unwrap();
                    }
                    value
                })
            })
            .collect();
        let written: Vec<String> = writers.into_iter().map(|w| w.join().unwrap()).collect();

        let stored = FileStore::open(dir.path())
            .unwrap()
            .get_item("cart")
            .unwrap()
            .unwrap();
        assert!(written.contains(&stored));

        let leftovers = fs::read_dir(dir.path()).unwrap().count();
        assert_eq!(leftovers, 1);
    }

    #[test]
    fn test_quota_counts_every_file() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileStore::with_quota(dir.path(), 20).unwrap();

        store.set_item("a", "12345").unwrap();
        store.set_item("b", "12345").unwrap();
        // Replacing a key only counts its new value.
        store.set_item("a", "1234567").unwrap();

        let err = store.set_item("c", "1234567").unwrap_err();
        assert!(matches!(
            err,
            StorageError::QuotaExceeded {
                needed: 22,
                limit: 20,
                ..
            }
        ));
        assert_eq!(store.get_item("c").unwrap(), None);
        assert_eq!(store.get_item("a").unwrap().as_deref(), Some("1234567"));
    }

    #[test]
    fn test_open_creates_nested_dir() {
        let dir = tempfile::tempdir().unwrap();
        let nested = dir.path().join("a").join("b");
        let store = FileStore::open(&nested).unwrap();
        assert_eq!(store.dir(), nested.as_path());
        assert!(nested.is_dir());
    }
}
