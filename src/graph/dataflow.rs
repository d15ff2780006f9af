use super::operator::Operator;
use crate::error::GraphError;
use crate::protocol::GraphDescriptor;
use crate::state::StateBackendKind;

use std::collections::HashSet;

/// A named set of operators submitted together.
#[derive(Debug, Clone)]
pub struct DataflowGraph {
    name: String,
    backend: StateBackendKind,
    operators: Vec<Operator>,
}

impl DataflowGraph {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            backend: StateBackendKind::default(),
            operators: Vec::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn backend(&self) -> StateBackendKind {
        self.backend
    }

    pub fn operators(&self) -> &[Operator] {
        &self.operators
    }

    pub fn operator(&self, name: &str) -> Option<&Operator> {
        self.operators.iter().find(|op| op.name() == name)
    }

    /// Adds operators, all or nothing.
    ///
    /// # Errors
    /// * `DuplicateOperator` if a name collides with an added operator or
    ///   appears twice in `operators`.
    /// * `OperatorSealed` if an operator already belongs to a submitted graph.
    pub fn add_operators<I>(&mut self, operators: I) -> Result<(), GraphError>
    where
        I: IntoIterator<Item = Operator>,
    {
        let incoming: Vec<Operator> = operators.into_iter().collect();
        let mut names: HashSet<String> =
            self.operators.iter().map(|op| op.name().to_string()).collect();

        for operator in &incoming {
            if operator.is_sealed() {
                return Err(GraphError::OperatorSealed(operator.name().to_string()));
            }
            if !names.insert(operator.name().to_string()) {
                return Err(GraphError::DuplicateOperator(operator.name().to_string()));
            }
        }

        self.operators.extend(incoming);
        Ok(())
    }

    pub fn add_operator(&mut self, operator: Operator) -> Result<(), GraphError> {
        self.add_operators([operator])
    }

    pub fn is_sealed(&self) -> bool {
        !self.operators.is_empty()
            && self
                .operators
                .iter()
                .all(|op| op.sealed_by().as_deref() == Some(self.name.as_str()))
    }

    /// Freezes every operator for submission and returns the descriptor.
    ///
    /// Sealing the same graph again is a no-op. If any operator already belongs
    /// to another graph, the operators sealed by this call are released.
    pub fn seal(&self) -> Result<GraphDescriptor, GraphError> {
        if self.operators.is_empty() {
            return Err(GraphError::EmptyGraph(self.name.clone()));
        }

        let mut sealed_now = Vec::new();
        for operator in &self.operators {
            match operator.seal(&self.name) {
                Ok(true) => sealed_now.push(operator),
                Ok(false) => {}
                Err(e) => {
                    for sealed in sealed_now {
                        sealed.unseal(&self.name);
                    }
                    return Err(e);
                }
            }
        }

        Ok(self.descriptor())
    }

    /// Releases the operators after a submission the coordinator did not keep.
    pub(crate) fn release(&self) {
        for operator in &self.operators {
            operator.unseal(&self.name);
        }
    }

    pub fn descriptor(&self) -> GraphDescriptor {
        GraphDescriptor {
            name: self.name.clone(),
            backend: self.backend,
            operators: self.operators.iter().map(|op| op.descriptor()).collect(),
        }
    }
}
