//! Insertion-ordered JSON object persisted to a single file.

use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::sync::{RwLock, RwLockWriteGuard};

use indexmap::IndexMap;
use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::error::StoreError;

/// A string-keyed map mirrored to a pretty-printed JSON file.
///
/// Every mutation rewrites the whole file while the write guard is held, so
/// writes to the file happen in the same order as writes to the map and a
/// read-modify-write through [`update`](Self::update) cannot lose a
/// concurrent update. The guard is never held across an `.await`.
#[derive(Debug)]
pub struct JsonMapStore<V> {
    path: PathBuf,
    entries: RwLock<IndexMap<String, V>>,
}

impl<V> JsonMapStore<V>
where
    V: Serialize + DeserializeOwned + Clone,
{
    /// Loads the store from `path`.
    ///
    /// A missing file yields an empty store. An unreadable or malformed file
    /// is logged and also yields an empty store; it is overwritten on the
    /// next successful mutation.
    pub fn load(path: impl AsRef<Path>) -> Self {
        let path = path.as_ref().to_path_buf();
        let entries = match std::fs::read_to_string(&path) {
            Ok(contents) => match serde_json::from_str::<IndexMap<String, V>>(&contents) {
                Ok(entries) => {
                    tracing::info!(path = %path.display(), count = entries.len(), "loaded store");
                    entries
                }
                Err(e) => {
                    tracing::warn!(path = %path.display(), "store file is malformed, starting empty: {}", e);
                    IndexMap::new()
                }
            },
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::info!(path = %path.display(), "store file not found, starting empty");
                IndexMap::new()
            }
            Err(e) => {
                tracing::warn!(path = %path.display(), "failed to read store file, starting empty: {}", e);
                IndexMap::new()
            }
        };

        Self {
            path,
            entries: RwLock::new(entries),
        }
    }

    pub fn get(&self, key: &str) -> Option<V> {
        self.read(|entries| entries.get(key).cloned())
    }

    pub fn len(&self) -> usize {
        self.read(IndexMap::len)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// All entries in insertion order.
    pub fn list(&self) -> Vec<(String, V)> {
        self.read(|entries| {
            entries
                .iter()
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect()
        })
    }

    /// Inserts or overwrites `key`. Overwriting keeps the original position.
    pub fn set(&self, key: impl Into<String>, value: V) -> Result<(), StoreError> {
        let mut entries = self.write_guard();
        entries.insert(key.into(), value);
        self.persist(&entries)
    }

    /// Atomically replaces the value at `key` with `f(current)`.
    ///
    /// Returns the stored value. If persisting fails the new value is still
    /// kept in memory and the error is returned.
    pub fn update<F>(&self, key: impl Into<String>, f: F) -> Result<V, StoreError>
    where
        F: FnOnce(Option<&V>) -> V,
    {
        let key = key.into();
        let mut entries = self.write_guard();
        let next = f(entries.get(&key));
        entries.insert(key, next.clone());
        self.persist(&entries)?;
        Ok(next)
    }

    /// Removes `key`, returning whether it existed.
    ///
    /// Nothing is written when the key was absent.
    pub fn remove(&self, key: &str) -> Result<bool, StoreError> {
        let mut entries = self.write_guard();
        if entries.shift_remove(key).is_none() {
            return Ok(false);
        }
        self.persist(&entries)?;
        Ok(true)
    }

    fn read<T>(&self, f: impl FnOnce(&IndexMap<String, V>) -> T) -> T {
        let entries = self.entries.read().unwrap_or_else(|e| e.into_inner());
        f(&entries)
    }

    fn write_guard(&self) -> RwLockWriteGuard<'_, IndexMap<String, V>> {
        self.entries.write().unwrap_or_else(|e| e.into_inner())
    }

    /// Writes the full map to a sibling temp file and renames it into place.
    fn persist(&self, entries: &IndexMap<String, V>) -> Result<(), StoreError> {
        let json = serde_json::to_string_pretty(entries)?;

        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(|source| self.io_error(source))?;
        }

        let tmp = self.temp_path();
        std::fs::write(&tmp, json).map_err(|source| self.io_error(source))?;
        std::fs::rename(&tmp, &self.path).map_err(|source| self.io_error(source))?;

        tracing::debug!(path = %self.path.display(), count = entries.len(), "persisted store");
        Ok(())
    }

    fn temp_path(&self) -> PathBuf {
        let mut name = self
            .path
            .file_name()
            .map(|n| n.to_os_string())
            .unwrap_or_else(|| OsString::from("store"));
        name.push(".tmp");
        self.path.with_file_name(name)
    }

    fn io_error(&self, source: std::io::Error) -> StoreError {
        StoreError::Io {
            path: self.path.clone(),
            source,
        }
    }
}
