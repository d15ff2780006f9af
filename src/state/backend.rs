use super::key::Key;
use super::memory::InMemoryBackend;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;
use thiserror::Error;

#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("state backend failure: {0}")]
pub struct BackendError(pub String);

/// Pluggable key/value store scoped to one partition of one operator.
///
/// Implementations only ever see keys that hash into their partition, and the
/// owning worker serialises all access per partition.
pub trait StateBackend: Send + Sync {
    fn get(&self, key: &Key) -> Result<Option<Value>, BackendError>;

    fn put(&self, key: Key, value: Value) -> Result<(), BackendError>;

    fn batch_insert(&self, entries: Vec<(Key, Value)>) -> Result<(), BackendError> {
        for (key, value) in entries {
            self.put(key, value)?;
        }
        Ok(())
    }

    /// Every entry currently stored, used to hand the partition to a new owner.
    fn snapshot(&self) -> Result<Vec<(Key, Value)>, BackendError>;

    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// The kind of backend a graph declares for all of its operators.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum StateBackendKind {
    #[default]
    InMemory,
}

impl StateBackendKind {
    pub fn create(&self) -> Arc<dyn StateBackend> {
        match self {
            StateBackendKind::InMemory => Arc::new(InMemoryBackend::new()),
        }
    }
}
