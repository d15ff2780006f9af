//! Operator Handler Registry
//!
//! An operator maps function names to async handler closures, in the same
//! shape as a task registry: handlers are type-erased into boxed futures so
//! arbitrary `async` closures can live side by side in one map.

use crate::error::GraphError;
use crate::protocol::OperatorDescriptor;
use crate::worker::InvocationContext;

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use serde_json::Value;
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};

/// A type-erased handler: takes the invocation context and the call parameters.
///
/// `Ok` is the value returned to the client; `Err` is a domain error reported
/// in the response payload.
pub type HandlerFn = Arc<
    dyn Fn(InvocationContext, Vec<Value>) -> Pin<Box<dyn Future<Output = anyhow::Result<Value>> + Send>>
        + Send
        + Sync,
>;

struct OperatorInner {
    name: String,
    partitions: AtomicU32,
    handlers: DashMap<String, HandlerFn>,
    /// Name of the submitted graph this operator belongs to.
    sealed_by: Mutex<Option<String>>,
}

/// A named, partitioned collection of handlers.
///
/// Cheap to clone; clones share the same registry.
#[derive(Clone)]
pub struct Operator {
    inner: Arc<OperatorInner>,
}

impl Operator {
    /// Creates an operator with a single partition.
    pub fn new(name: &str) -> Self {
        Self {
            inner: Arc::new(OperatorInner {
                name: name.to_string(),
                partitions: AtomicU32::new(1),
                handlers: DashMap::new(),
                sealed_by: Mutex::new(None),
            }),
        }
    }

    pub fn with_partitions(name: &str, partitions: u32) -> Result<Self, GraphError> {
        let operator = Self::new(name);
        operator.set_partition_count(partitions)?;
        Ok(operator)
    }

    pub fn name(&self) -> &str {
        &self.inner.name
    }

    pub fn partitions(&self) -> u32 {
        self.inner.partitions.load(Ordering::SeqCst)
    }

    pub fn set_partition_count(&self, partitions: u32) -> Result<(), GraphError> {
        self.ensure_mutable()?;
        if partitions == 0 {
            return Err(GraphError::InvalidPartitionCount {
                operator: self.inner.name.clone(),
                requested: partitions,
            });
        }
        self.inner.partitions.store(partitions, Ordering::SeqCst);
        Ok(())
    }

    /// Registers `handler` under `function`.
    ///
    /// # Errors
    /// * `DuplicateFunction` if the name is already taken on this operator.
    /// * `OperatorSealed` once the operator's graph has been submitted.
    pub fn register<F, Fut>(&self, function: &str, handler: F) -> Result<(), GraphError>
    where
        F: Fn(InvocationContext, Vec<Value>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<Value>> + Send + 'static,
    {
        self.ensure_mutable()?;

        let handler_fn: HandlerFn = Arc::new(move |ctx: InvocationContext, params: Vec<Value>| {
            Box::pin(handler(ctx, params))
                as Pin<Box<dyn Future<Output = anyhow::Result<Value>> + Send>>
        });

        match self.inner.handlers.entry(function.to_string()) {
            Entry::Occupied(_) => Err(GraphError::DuplicateFunction {
                operator: self.inner.name.clone(),
                function: function.to_string(),
            }),
            Entry::Vacant(slot) => {
                slot.insert(handler_fn);
                tracing::debug!("Registered {}.{}", self.inner.name, function);
                Ok(())
            }
        }
    }

    pub fn handler(&self, function: &str) -> Option<HandlerFn> {
        self.inner
            .handlers
            .get(function)
            .map(|entry| entry.value().clone())
    }

    pub fn has_function(&self, function: &str) -> bool {
        self.inner.handlers.contains_key(function)
    }

    /// Registered function names, sorted.
    pub fn function_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .inner
            .handlers
            .iter()
            .map(|entry| entry.key().clone())
            .collect();
        names.sort();
        names
    }

    pub fn descriptor(&self) -> OperatorDescriptor {
        OperatorDescriptor {
            name: self.inner.name.clone(),
            partitions: self.partitions(),
            functions: self.function_names(),
        }
    }

    /// The graph this operator was submitted with, if any.
    pub fn sealed_by(&self) -> Option<String> {
        self.lock_seal().clone()
    }

    pub fn is_sealed(&self) -> bool {
        self.lock_seal().is_some()
    }

    /// Freezes the operator as part of `graph`.
    ///
    /// Returns `Ok(true)` when this call sealed it and `Ok(false)` when it was
    /// already sealed by the same graph.
    pub(crate) fn seal(&self, graph: &str) -> Result<bool, GraphError> {
        let mut sealed_by = self.lock_seal();
        match sealed_by.as_deref() {
            None => {
                *sealed_by = Some(graph.to_string());
                Ok(true)
            }
            Some(owner) if owner == graph => Ok(false),
            Some(_) => Err(GraphError::OperatorSealed(self.inner.name.clone())),
        }
    }

    pub(crate) fn unseal(&self, graph: &str) {
        let mut sealed_by = self.lock_seal();
        if sealed_by.as_deref() == Some(graph) {
            *sealed_by = None;
        }
    }

    fn ensure_mutable(&self) -> Result<(), GraphError> {
        if self.is_sealed() {
            return Err(GraphError::OperatorSealed(self.inner.name.clone()));
        }
        Ok(())
    }

    fn lock_seal(&self) -> std::sync::MutexGuard<'_, Option<String>> {
        // The guarded value is a plain Option, so a poisoned lock is still consistent.
        self.inner
            .sealed_by
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl std::fmt::Debug for Operator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Operator")
            .field("name", &self.inner.name)
            .field("partitions", &self.partitions())
            .field("functions", &self.function_names())
            .finish()
    }
}
