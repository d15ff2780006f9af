//! Invocation Context
//!
//! The handle a handler receives for one invocation. All state access and
//! remote-call chaining go through it.
//!
//! Effects are staged: `put`, `batch_insert` and `call_remote_async` only
//! record their intent. The partition executor applies them after the handler
//! returns `Ok`, and drops them when it returns `Err`.

use crate::protocol::RequestId;
use crate::state::{BackendError, Key, StateBackend, partition_for};

use anyhow::{anyhow, bail};
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard};

/// A follow-up invocation requested by a handler.
#[derive(Debug, Clone, PartialEq)]
pub struct RemoteCall {
    pub operator: String,
    pub function: String,
    pub key: Key,
    pub params: Vec<Value>,
}

/// Everything a handler asked for during one invocation.
#[derive(Debug, Default)]
pub struct StagedEffects {
    pub writes: BTreeMap<Key, Value>,
    pub remote_calls: Vec<RemoteCall>,
    /// First backend failure observed by the handler, if any.
    pub fault: Option<BackendError>,
}

struct ContextInner {
    operator: String,
    key: Option<Key>,
    partition: u32,
    partitions: u32,
    request_id: RequestId,
    backend: Arc<dyn StateBackend>,
    staged: Mutex<StagedEffects>,
}

#[derive(Clone)]
pub struct InvocationContext {
    inner: Arc<ContextInner>,
}

impl InvocationContext {
    /// Context bound to one key.
    pub fn keyed(
        operator: &str,
        key: Key,
        partition: u32,
        partitions: u32,
        request_id: RequestId,
        backend: Arc<dyn StateBackend>,
    ) -> Self {
        Self::build(operator, Some(key), partition, partitions, request_id, backend)
    }

    /// Context bound to a whole partition, used for batch loads.
    pub fn partition_scoped(
        operator: &str,
        partition: u32,
        partitions: u32,
        request_id: RequestId,
        backend: Arc<dyn StateBackend>,
    ) -> Self {
        Self::build(operator, None, partition, partitions, request_id, backend)
    }

    fn build(
        operator: &str,
        key: Option<Key>,
        partition: u32,
        partitions: u32,
        request_id: RequestId,
        backend: Arc<dyn StateBackend>,
    ) -> Self {
        Self {
            inner: Arc::new(ContextInner {
                operator: operator.to_string(),
                key,
                partition,
                partitions,
                request_id,
                backend,
                staged: Mutex::new(StagedEffects::default()),
            }),
        }
    }

    pub fn operator(&self) -> &str {
        &self.inner.operator
    }

    pub fn partition(&self) -> u32 {
        self.inner.partition
    }

    pub fn request_id(&self) -> RequestId {
        self.inner.request_id
    }

    /// The key this invocation is bound to.
    ///
    /// Fails for partition-scoped (batch) invocations.
    pub fn key(&self) -> anyhow::Result<&Key> {
        self.inner
            .key
            .as_ref()
            .ok_or_else(|| anyhow!("invocation on {} is not bound to a key", self.inner.operator))
    }

    /// Current state of the bound key, including this invocation's own writes.
    pub fn get(&self) -> anyhow::Result<Option<Value>> {
        let key = self.key()?.clone();

        if let Some(value) = self.staged().writes.get(&key) {
            return Ok(Some(value.clone()));
        }

        match self.inner.backend.get(&key) {
            Ok(value) => Ok(value),
            Err(e) => {
                self.record_fault(e.clone());
                Err(e.into())
            }
        }
    }

    /// Overwrites the state of the bound key.
    pub fn put(&self, value: Value) -> anyhow::Result<()> {
        let key = self.key()?.clone();
        self.staged().writes.insert(key, value);
        Ok(())
    }

    /// Overwrites many keys of this partition at once.
    ///
    /// Every key must hash into the invocation's partition.
    pub fn batch_insert(&self, entries: Vec<(Key, Value)>) -> anyhow::Result<()> {
        for (key, _) in &entries {
            let target = partition_for(key, self.inner.partitions);
            if target != self.inner.partition {
                bail!(
                    "key {} belongs to partition {} of {}, not {}",
                    key,
                    target,
                    self.inner.operator,
                    self.inner.partition
                );
            }
        }

        let mut staged = self.staged();
        for (key, value) in entries {
            staged.writes.insert(key, value);
        }
        Ok(())
    }

    /// Schedules `function` on `key` of `operator`, dispatched after this
    /// handler returns successfully.
    pub fn call_remote_async(
        &self,
        operator: &str,
        function: &str,
        key: impl Into<Key>,
        params: Vec<Value>,
    ) {
        self.staged().remote_calls.push(RemoteCall {
            operator: operator.to_string(),
            function: function.to_string(),
            key: key.into(),
            params,
        });
    }

    /// Takes the staged effects, leaving the context empty.
    pub(crate) fn take_effects(&self) -> StagedEffects {
        std::mem::take(&mut *self.staged())
    }

    fn record_fault(&self, fault: BackendError) {
        let mut staged = self.staged();
        if staged.fault.is_none() {
            staged.fault = Some(fault);
        }
    }

    fn staged(&self) -> MutexGuard<'_, StagedEffects> {
        self.inner
            .staged
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}
