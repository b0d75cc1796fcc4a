//! Key-value storage backends.
//!
//! The persistence layer only ever talks to a [`StorageBackend`]. Two
//! implementations ship with the crate:
//!
//! - [`FileStorage`]: one JSON file per key under a data directory, with a
//!   fixed byte quota across all keys.
//! - [`MemoryStorage`]: a `HashMap`, optionally capacity-limited or disabled
//!   outright, used by tests and as an in-memory fallback.

use std::collections::HashMap;
use std::fs::{self, File};
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};

use tracing::debug;

use crate::error::{Result, StorageError};

/// Default quota for a backend, mirroring the usual browser local storage limit.
pub const DEFAULT_CAPACITY: usize = 5 * 1024 * 1024;

pub trait StorageBackend {
    fn get_item(&self, key: &str) -> Result<Option<String>>;
    fn set_item(&mut self, key: &str, value: &str) -> Result<()>;
    fn remove_item(&mut self, key: &str) -> Result<()>;
}

#[derive(Debug, Clone)]
pub struct MemoryStorage {
    entries: HashMap<String, String>,
    capacity: usize,
    enabled: bool,
}

impl Default for MemoryStorage {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_CAPACITY)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            entries: HashMap::new(),
            capacity,
            enabled: true,
        }
    }

    /// A backend that refuses every access.
    pub fn disabled() -> Self {
        Self {
            enabled: false,
            ..Self::new()
        }
    }

    fn check_enabled(&self) -> Result<()> {
        if self.enabled {
            Ok(())
        } else {
            Err(StorageError::Unavailable("memory storage is disabled".into()))
        }
    }

    fn used_without(&self, key: &str) -> usize {
        self.entries
            .iter()
            .filter(|(k, _)| k.as_str() != key)
            .map(|(k, v)| k.len() + v.len())
            .sum()
    }
}

impl StorageBackend for MemoryStorage {
    fn get_item(&self, key: &str) -> Result<Option<String>> {
        self.check_enabled()?;
        Ok(self.entries.get(key).cloned())
    }

    fn set_item(&mut self, key: &str, value: &str) -> Result<()> {
        self.check_enabled()?;
        let needed = self.used_without(key) + key.len() + value.len();
        if needed > self.capacity {
            return Err(StorageError::QuotaExceeded {
                needed,
                capacity: self.capacity,
            });
        }
        self.entries.insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn remove_item(&mut self, key: &str) -> Result<()> {
        self.check_enabled()?;
        self.entries.remove(key);
        Ok(())
    }
}

#[derive(Debug, Clone)]
pub struct FileStorage {
    dir: PathBuf,
    capacity: usize,
}

impl FileStorage {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            capacity: DEFAULT_CAPACITY,
        }
    }

    pub fn with_capacity(mut self, capacity: usize) -> Self {
        self.capacity = capacity;
        self
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path_for(&self, key: &str) -> PathBuf {
        self.dir.join(format!("{key}.json"))
    }

    fn temp_path_for(&self, key: &str) -> PathBuf {
        self.dir.join(format!("{key}.json.tmp"))
    }

    fn used_without(&self, key: &str) -> Result<usize> {
        let skip = self.path_for(key);
        let entries = match fs::read_dir(&self.dir) {
            Ok(entries) => entries,
            Err(err) if err.kind() == ErrorKind::NotFound => return Ok(0),
            Err(err) => return Err(err.into()),
        };
        let mut used = 0;
        for entry in entries {
            let path = entry?.path();
            if path == skip || !matches!(path.extension(), Some(ext) if ext == "json") {
                continue;
            }
            used += fs::metadata(&path)?.len() as usize;
        }
        Ok(used)
    }
}

/// Writes `content` next to `path` and renames it into place, so a failed
/// write never leaves `path` truncated.
fn atomic_write(path: &Path, tmp_path: &Path, content: &str) -> std::io::Result<()> {
    let written = File::create(tmp_path).and_then(|mut file| {
        file.write_all(content.as_bytes())?;
        file.sync_all()
    });
    if let Err(err) = written {
        let _ = fs::remove_file(tmp_path);
        return Err(err);
    }
    fs::rename(tmp_path, path)?;

    if let Some(dir) = path.parent() {
        if let Ok(d) = File::open(dir) {
            let _ = d.sync_all();
        }
    }
    Ok(())
}

impl StorageBackend for FileStorage {
    fn get_item(&self, key: &str) -> Result<Option<String>> {
        match fs::read_to_string(self.path_for(key)) {
            Ok(data) => Ok(Some(data)),
            Err(err) if err.kind() == ErrorKind::NotFound => Ok(None),
            Err(err) => Err(err.into()),
        }
    }

    fn set_item(&mut self, key: &str, value: &str) -> Result<()> {
        let needed = self.used_without(key)? + value.len();
        if needed > self.capacity {
            return Err(StorageError::QuotaExceeded {
                needed,
                capacity: self.capacity,
            });
        }
        fs::create_dir_all(&self.dir)?;
        let path = self.path_for(key);
        debug!(?path, bytes = value.len(), "writing storage entry");
        atomic_write(&path, &self.temp_path_for(key), value)?;
        Ok(())
    }

    fn remove_item(&mut self, key: &str) -> Result<()> {
        match fs::remove_file(self.path_for(key)) {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == ErrorKind::NotFound => Ok(()),
            Err(err) => Err(err.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_memory_storage_roundtrip() {
        let mut storage = MemoryStorage::new();
        assert_eq!(storage.get_item("k").unwrap(), None);
        storage.set_item("k", "v").unwrap();
        assert_eq!(storage.get_item("k").unwrap().as_deref(), Some("v"));
        storage.remove_item("k").unwrap();
        storage.remove_item("k").unwrap();
        assert_eq!(storage.get_item("k").unwrap(), None);
    }

    #[test]
    fn test_memory_storage_quota() {
        let mut storage = MemoryStorage::with_capacity(8);
        storage.set_item("k", "1234").unwrap();
        // Overwriting the same key does not count the old value.
        storage.set_item("k", "1234567").unwrap();
        let err = storage.set_item("other", "xx").unwrap_err();
        assert!(err.is_quota());
        assert_eq!(storage.get_item("k").unwrap().as_deref(), Some("1234567"));
    }

    #[test]
    fn test_disabled_memory_storage() {
        let mut storage = MemoryStorage::disabled();
        assert!(matches!(
            storage.set_item("k", "v"),
            Err(StorageError::Unavailable(_))
        ));
        assert!(storage.get_item("k").is_err());
        assert!(storage.remove_item("k").is_err());
    }

    #[test]
    fn test_file_storage_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let mut storage = FileStorage::new(dir.path().join("data"));
        assert_eq!(storage.get_item("kanban-tasks").unwrap(), None);
        storage.set_item("kanban-tasks", "[]").unwrap();
        assert!(dir.path().join("data/kanban-tasks.json").exists());
        assert_eq!(
            storage.get_item("kanban-tasks").unwrap().as_deref(),
            Some("[]")
        );
        storage.remove_item("kanban-tasks").unwrap();
        storage.remove_item("kanban-tasks").unwrap();
        assert_eq!(storage.get_item("kanban-tasks").unwrap(), None);
    }

    #[test]
    fn test_failed_file_write_keeps_previous_value() {
        let dir = tempfile::tempdir().unwrap();
        let mut storage = FileStorage::new(dir.path());
        storage.set_item("kanban-tasks", "[1]").unwrap();

        // A directory in the temp file's place makes the write fail.
        fs::create_dir(dir.path().join("kanban-tasks.json.tmp")).unwrap();
        assert!(matches!(
            storage.set_item("kanban-tasks", "[1,2]"),
            Err(StorageError::Io(_))
        ));
        assert_eq!(
            storage.get_item("kanban-tasks").unwrap().as_deref(),
            Some("[1]")
        );

        fs::remove_dir(dir.path().join("kanban-tasks.json.tmp")).unwrap();
        storage.set_item("kanban-tasks", "[1,2]").unwrap();
        assert_eq!(
            storage.get_item("kanban-tasks").unwrap().as_deref(),
            Some("[1,2]")
        );
        assert!(!dir.path().join("kanban-tasks.json.tmp").exists());
    }

    #[test]
    fn test_file_storage_quota() {
        let dir = tempfile::tempdir().unwrap();
        let mut storage = FileStorage::new(dir.path()).with_capacity(10);
        storage.set_item("a", "12345").unwrap();
        storage.set_item("a", "1234567890").unwrap();
        let err = storage.set_item("b", "1").unwrap_err();
        assert!(err.is_quota());
        assert_eq!(storage.get_item("b").unwrap(), None);
    }
}
