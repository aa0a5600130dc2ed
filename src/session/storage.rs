//! Key/value backends for persisted snapshots.

use std::collections::HashMap;
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use crate::core::StorageError;

/// Byte-oriented persistent storage, keyed by string.
///
/// Backends may refuse writes with [`StorageError::QuotaExceeded`]; callers
/// are expected to free space with [`clear`](Self::clear) and retry.
pub trait SnapshotStorage: Send + Sync {
    /// Read a value, `None` if absent.
    fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StorageError>;

    /// Write a value, replacing any previous one.
    fn set(&self, key: &str, value: &[u8]) -> Result<(), StorageError>;

    /// Delete a value. Absent keys are not an error.
    fn remove(&self, key: &str) -> Result<(), StorageError>;

    /// Delete every value this backend holds.
    fn clear(&self) -> Result<(), StorageError>;
}

/// In-memory storage with an optional total byte quota.
#[derive(Debug, Default)]
pub struct MemoryStorage {
    entries: Mutex<HashMap<String, Vec<u8>>>,
    quota: Option<usize>,
}

impl MemoryStorage {
    /// Unbounded storage.
    pub fn new() -> Self {
        Self::default()
    }

    /// Storage that refuses writes once `quota` bytes are held.
    pub fn with_quota(quota: usize) -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            quota: Some(quota),
        }
    }

    /// Number of stored keys.
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    /// Whether nothing is stored.
    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<String, Vec<u8>>> {
        // A panic while holding the lock leaves the map itself consistent.
        self.entries.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl SnapshotStorage for MemoryStorage {
    fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StorageError> {
        Ok(self.lock().get(key).cloned())
    }

    fn set(&self, key: &str, value: &[u8]) -> Result<(), StorageError> {
        let mut entries = self.lock();
        if let Some(quota) = self.quota {
            let used: usize = entries
                .iter()
                .filter(|(k, _)| k.as_str() != key)
                .map(|(k, v)| k.len() + v.len())
                .sum();
            let needed = key.len() + value.len();
            let available = quota.saturating_sub(used);
            if needed > available {
                return Err(StorageError::QuotaExceeded { needed, available });
            }
        }
        entries.insert(key.to_string(), value.to_vec());
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<(), StorageError> {
        self.lock().remove(key);
        Ok(())
    }

    fn clear(&self) -> Result<(), StorageError> {
        self.lock().clear();
        Ok(())
    }
}

/// One file per key inside a directory.
///
/// Writes go through a temporary file and a rename, so a crash never leaves
/// a half-written snapshot behind.
#[derive(Debug, Clone)]
pub struct FileStorage {
    dir: PathBuf,
}

const FILE_EXTENSION: &str = "snapshot";

impl FileStorage {
    /// Use `dir`, creating it if needed.
    pub fn open(dir: impl Into<PathBuf>) -> Result<Self, StorageError> {
        let dir = dir.into();
        fs::create_dir_all(&dir)?;
        Ok(Self { dir })
    }

    /// Backing directory.
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path_for(&self, key: &str) -> PathBuf {
        self.dir
            .join(format!("{}.{FILE_EXTENSION}", sanitize_key(key)))
    }
}

/// Map an arbitrary key (usually a URL path) to a safe file stem.
fn sanitize_key(key: &str) -> String {
    let stem: String = key
        .trim_matches('/')
        .chars()
        .map(|c| match c {
            'a'..='z' | 'A'..='Z' | '0'..='9' | '-' | '_' => c,
            _ => '_',
        })
        .collect();
    if stem.is_empty() {
        "_root".to_string()
    } else {
        stem
    }
}

impl SnapshotStorage for FileStorage {
    fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StorageError> {
        match fs::read(self.path_for(key)) {
            Ok(bytes) => Ok(Some(bytes)),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    fn set(&self, key: &str, value: &[u8]) -> Result<(), StorageError> {
        let path = self.path_for(key);
        let tmp = path.with_extension("tmp");
        fs::write(&tmp, value)?;
        fs::rename(&tmp, &path)?;
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<(), StorageError> {
        match fs::remove_file(self.path_for(key)) {
            Err(e) if e.kind() != ErrorKind::NotFound => Err(e.into()),
            _ => Ok(()),
        }
    }

    fn clear(&self) -> Result<(), StorageError> {
        for entry in fs::read_dir(&self.dir)? {
            let path = entry?.path();
            let ours = path
                .extension()
                .is_some_and(|ext| ext == FILE_EXTENSION || ext == "tmp");
            if ours && path.is_file() {
                fs::remove_file(&path)?;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_memory_roundtrip() {
        let storage = MemoryStorage::new();
        assert!(storage.get("a").unwrap().is_none());
        storage.set("a", b"hello").unwrap();
        assert_eq!(storage.get("a").unwrap().unwrap(), b"hello");
        storage.remove("a").unwrap();
        assert!(storage.is_empty());
        storage.remove("a").unwrap();
    }

    #[test]
    fn test_memory_quota() {
        let storage = MemoryStorage::with_quota(16);
        storage.set("a", b"0123456789").unwrap();
        let err = storage.set("b", b"0123456789").unwrap_err();
        assert!(matches!(err, StorageError::QuotaExceeded { needed: 11, available: 5 }));

        // Overwriting a key does not count its old value.
        storage.set("a", b"9876543210").unwrap();

        storage.clear().unwrap();
        storage.set("b", b"0123456789").unwrap();
        assert_eq!(storage.len(), 1);
    }

    #[test]
    fn test_sanitize_key() {
        assert_eq!(sanitize_key("/events/tour-2024/"), "events_tour-2024");
        assert_eq!(sanitize_key("/"), "_root");
        assert_eq!(sanitize_key("../etc/passwd"), "___etc_passwd");
    }

    #[test]
    fn test_file_storage() {
        let dir = tempfile::tempdir().unwrap();
        let storage = FileStorage::open(dir.path().join("snapshots")).unwrap();

        assert!(storage.get("/events/a").unwrap().is_none());
        storage.set("/events/a", b"one").unwrap();
        storage.set("/events/b", b"two").unwrap();
        assert_eq!(storage.get("/events/a").unwrap().unwrap(), b"one");

        storage.set("/events/a", b"uno").unwrap();
        assert_eq!(storage.get("/events/a").unwrap().unwrap(), b"uno");

        storage.remove("/events/a").unwrap();
        assert!(storage.get("/events/a").unwrap().is_none());
        storage.remove("/events/a").unwrap();

        storage.clear().unwrap();
        assert!(storage.get("/events/b").unwrap().is_none());
    }
}
