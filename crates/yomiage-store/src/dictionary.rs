//! Pronunciation dictionary: trigger text → replacement text.

use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};

use crate::error::StoreError;
use crate::map::JsonMapStore;

/// Dictionary persisted as `{ "<trigger>": "<replacement>" }`.
///
/// Entries keep insertion order, which is also the order substitutions are
/// applied in.
#[derive(Debug)]
pub struct DictionaryStore {
    inner: JsonMapStore<String>,
    revision: AtomicU64,
}

impl DictionaryStore {
    pub fn load(path: impl AsRef<Path>) -> Self {
        Self {
            inner: JsonMapStore::load(path),
            revision: AtomicU64::new(0),
        }
    }

    /// Adds or overwrites an entry. Empty triggers are rejected.
    pub fn add(&self, key: &str, replacement: &str) -> Result<(), StoreError> {
        if key.is_empty() {
            return Err(StoreError::InvalidValue(
                "dictionary key must not be empty".to_string(),
            ));
        }
        let result = self.inner.set(key, replacement.to_string());
        // The in-memory map changed even when persisting failed.
        self.revision.fetch_add(1, Ordering::SeqCst);
        result
    }

    /// Removes an entry, returning whether it existed.
    pub fn remove(&self, key: &str) -> Result<bool, StoreError> {
        let result = self.inner.remove(key);
        if !matches!(result, Ok(false)) {
            self.revision.fetch_add(1, Ordering::SeqCst);
        }
        result
    }

    /// Bumped by every mutation. Lets readers cache work derived from
    /// [`entries`](Self::entries).
    pub fn revision(&self) -> u64 {
        self.revision.load(Ordering::SeqCst)
    }

    pub fn get(&self, key: &str) -> Option<String> {
        self.inner.get(key)
    }

    /// All entries in application order.
    pub fn entries(&self) -> Vec<(String, String)> {
        self.inner.list()
    }

    pub fn len(&self) -> usize {
        self.inner.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }
}
