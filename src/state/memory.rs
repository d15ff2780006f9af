use super::backend::{BackendError, StateBackend};
use super::key::Key;

use dashmap::DashMap;
use serde_json::Value;

/// Reference backend: a concurrent hash map per partition.
#[derive(Default)]
pub struct InMemoryBackend {
    entries: DashMap<Key, Value>,
}

impl InMemoryBackend {
    pub fn new() -> Self {
        Self {
            entries: DashMap::new(),
        }
    }

    /// Builds a backend pre-populated with a partition snapshot.
    pub fn from_entries(entries: Vec<(Key, Value)>) -> Self {
        let backend = Self::new();
        for (key, value) in entries {
            backend.entries.insert(key, value);
        }
        backend
    }
}

impl StateBackend for InMemoryBackend {
    fn get(&self, key: &Key) -> Result<Option<Value>, BackendError> {
        Ok(self.entries.get(key).map(|entry| entry.value().clone()))
    }

    fn put(&self, key: Key, value: Value) -> Result<(), BackendError> {
        self.entries.insert(key, value);
        Ok(())
    }

    fn batch_insert(&self, entries: Vec<(Key, Value)>) -> Result<(), BackendError> {
        for (key, value) in entries {
            self.entries.insert(key, value);
        }
        Ok(())
    }

    fn snapshot(&self) -> Result<Vec<(Key, Value)>, BackendError> {
        let mut entries = Vec::with_capacity(self.entries.len());
        for entry in self.entries.iter() {
            entries.push((entry.key().clone(), entry.value().clone()));
        }
        Ok(entries)
    }

    fn len(&self) -> usize {
        self.entries.len()
    }
}
