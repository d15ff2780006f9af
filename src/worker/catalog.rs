use crate::graph::{DataflowGraph, Operator};
use crate::protocol::OperatorDescriptor;

use dashmap::DashMap;
use std::sync::Arc;

/// Operator code available to a worker process, looked up by operator name
/// when an assignment names it.
pub struct OperatorCatalog {
    operators: DashMap<String, Operator>,
}

impl OperatorCatalog {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn from_operators<I>(operators: I) -> Arc<Self>
    where
        I: IntoIterator<Item = Operator>,
    {
        let catalog = Self::default();
        for operator in operators {
            catalog.insert(operator);
        }
        Arc::new(catalog)
    }

    pub fn from_graph(graph: &DataflowGraph) -> Arc<Self> {
        Self::from_operators(graph.operators().iter().cloned())
    }

    pub fn insert(&self, operator: Operator) {
        tracing::debug!("Catalog: added operator {}", operator.name());
        self.operators.insert(operator.name().to_string(), operator);
    }

    pub fn get(&self, name: &str) -> Option<Operator> {
        self.operators.get(name).map(|entry| entry.value().clone())
    }

    /// Functions `descriptor` declares that the local operator code lacks.
    ///
    /// An operator missing from the catalog lacks all of them.
    pub fn missing_functions(&self, descriptor: &OperatorDescriptor) -> Vec<String> {
        let local = self.get(&descriptor.name);
        descriptor
            .functions
            .iter()
            .filter(|function| !local.as_ref().is_some_and(|op| op.has_function(function)))
            .cloned()
            .collect()
    }

    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .operators
            .iter()
            .map(|entry| entry.key().clone())
            .collect();
        names.sort();
        names
    }
}

impl Default for OperatorCatalog {
    fn default() -> Self {
        Self {
            operators: DashMap::new(),
        }
    }
}
