use crate::protocol::GraphDescriptor;
use crate::scheduler::Assignment;

use serde::{Deserialize, Serialize};

/// Placement lifecycle of one graph.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum GraphState {
    /// Stored, but no successful placement yet (or the last one failed).
    Submitted,
    /// A scheduling round is in progress.
    Assigning,
    /// Every partition has an owner.
    Active,
}

#[derive(Debug, Clone)]
pub struct GraphRecord {
    pub descriptor: GraphDescriptor,
    pub state: GraphState,
    pub assignment: Option<Assignment>,
    pub last_error: Option<String>,
}

impl GraphRecord {
    pub fn new(descriptor: GraphDescriptor) -> Self {
        Self {
            descriptor,
            state: GraphState::Submitted,
            assignment: None,
            last_error: None,
        }
    }
}
