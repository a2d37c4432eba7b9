/*!
 * Durable Key-Value Storage
 * String sets under well-known keys, one JSON document on disk
 */

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("failed to access {}: {}", .path.display(), .source)]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("corrupt state file {}: {}", .path.display(), .source)]
    Corrupt {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

pub trait KeyValueStore: Send + Sync {
    /// `None` when nothing was ever stored under `key`.
    fn get_set(&self, key: &str) -> Result<Option<BTreeSet<String>>, StorageError>;

    /// Replace whatever is stored under `key`.
    fn put_set(&self, key: &str, values: &BTreeSet<String>) -> Result<(), StorageError>;
}

type Document = BTreeMap<String, BTreeSet<String>>;

/// All keys live in a single JSON object, rewritten atomically on every put.
pub struct JsonFileStore {
    path: PathBuf,
}

impl JsonFileStore {
    pub fn new<P: AsRef<Path>>(path: P) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn read_document(&self) -> Result<Document, StorageError> {
        let contents = match fs::read_to_string(&self.path) {
            Ok(contents) => contents,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Document::new()),
            Err(source) => {
                return Err(StorageError::Io {
                    path: self.path.clone(),
                    source,
                })
            }
        };

        serde_json::from_str(&contents).map_err(|source| StorageError::Corrupt {
            path: self.path.clone(),
            source,
        })
    }

    fn write_document(&self, document: &Document) -> Result<(), StorageError> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent).map_err(io_err(parent))?;
        }

        let contents = serde_json::to_string_pretty(document).map_err(|source| {
            StorageError::Corrupt {
                path: self.path.clone(),
                source,
            }
        })?;

        // Write to a sibling temp file, then rename over the real one
        let temp_path = self.path.with_extension("json.tmp");
        fs::write(&temp_path, contents).map_err(io_err(&temp_path))?;
        fs::rename(&temp_path, &self.path).map_err(io_err(&self.path))?;

        tracing::debug!("Saved state to {}", self.path.display());
        Ok(())
    }
}

impl KeyValueStore for JsonFileStore {
    fn get_set(&self, key: &str) -> Result<Option<BTreeSet<String>>, StorageError> {
        Ok(self.read_document()?.remove(key))
    }

    fn put_set(&self, key: &str, values: &BTreeSet<String>) -> Result<(), StorageError> {
        // Other keys survive; an unreadable document is replaced wholesale
        let mut document = self.read_document().unwrap_or_else(|e| {
            tracing::warn!("Discarding unreadable state: {}", e);
            Document::new()
        });
        document.insert(key.to_string(), values.clone());
        self.write_document(&document)
    }
}

fn io_err(path: &Path) -> impl FnOnce(io::Error) -> StorageError {
    let path = path.to_path_buf();
    move |source| StorageError::Io { path, source }
}

#[derive(Default)]
pub struct MemoryStore {
    sets: Mutex<HashMap<String, BTreeSet<String>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl KeyValueStore for MemoryStore {
    fn get_set(&self, key: &str) -> Result<Option<BTreeSet<String>>, StorageError> {
        let sets = self.sets.lock().unwrap_or_else(|p| p.into_inner());
        Ok(sets.get(key).cloned())
    }

    fn put_set(&self, key: &str, values: &BTreeSet<String>) -> Result<(), StorageError> {
        let mut sets = self.sets.lock().unwrap_or_else(|p| p.into_inner());
        sets.insert(key.to_string(), values.clone());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn set(values: &[&str]) -> BTreeSet<String> {
        values.iter().map(|v| v.to_string()).collect()
    }

    #[test]
    fn missing_file_reads_as_absent() {
        let dir = TempDir::new().unwrap();
        let store = JsonFileStore::new(dir.path().join("state.json"));
        assert_eq!(store.get_set("blocked").unwrap(), None);
    }

    #[test]
    fn put_creates_parent_dirs_and_leaves_no_temp_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("nested").join("state.json");
        let store = JsonFileStore::new(&path);

        store.put_set("blocked", &set(&["AA:BB:CC:DD:EE:FF"])).unwrap();

        assert!(path.exists());
        assert!(!path.with_extension("json.tmp").exists());
        assert_eq!(
            store.get_set("blocked").unwrap(),
            Some(set(&["AA:BB:CC:DD:EE:FF"]))
        );
    }

    #[test]
    fn put_overwrites_instead_of_appending() {
        let dir = TempDir::new().unwrap();
        let store = JsonFileStore::new(dir.path().join("state.json"));

        store.put_set("blocked", &set(&["A", "B"])).unwrap();
        store.put_set("blocked", &set(&["C"])).unwrap();

        assert_eq!(store.get_set("blocked").unwrap(), Some(set(&["C"])));
    }

    #[test]
    fn keys_are_independent() {
        let dir = TempDir::new().unwrap();
        let store = JsonFileStore::new(dir.path().join("state.json"));

        store.put_set("one", &set(&["A"])).unwrap();
        store.put_set("two", &set(&["B"])).unwrap();

        assert_eq!(store.get_set("one").unwrap(), Some(set(&["A"])));
        assert_eq!(store.get_set("two").unwrap(), Some(set(&["B"])));
    }

    #[test]
    fn corrupt_file_is_reported() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("state.json");
        fs::write(&path, "{ not json").unwrap();

        let store = JsonFileStore::new(&path);
        assert!(matches!(
            store.get_set("blocked"),
            Err(StorageError::Corrupt { .. })
        ));

        // A put recovers the file
        store.put_set("blocked", &set(&["A"])).unwrap();
        assert_eq!(store.get_set("blocked").unwrap(), Some(set(&["A"])));
    }

    #[test]
    fn memory_store_round_trips() {
        let store = MemoryStore::new();
        assert_eq!(store.get_set("blocked").unwrap(), None);
        store.put_set("blocked", &set(&["A"])).unwrap();
        assert_eq!(store.get_set("blocked").unwrap(), Some(set(&["A"])));
    }
}
