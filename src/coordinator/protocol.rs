use super::types::GraphState;
use crate::error::SubmissionError;
use crate::membership::types::WorkerInfo;
use crate::protocol::GraphDescriptor;
use crate::scheduler::Assignment;

use serde::{Deserialize, Serialize};

pub const ENDPOINT_SUBMIT_GRAPH: &str = "/graph/submit";
pub const ENDPOINT_GRAPH_STATUS: &str = "/graph/:name";
pub const ENDPOINT_WORKERS: &str = "/workers";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubmitGraphRequest {
    pub graph: GraphDescriptor,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubmitGraphResponse {
    pub accepted: bool,
    /// Epoch of the initial assignment when accepted.
    pub epoch: Option<u64>,
    pub error: Option<SubmissionError>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GraphStatusResponse {
    pub name: String,
    pub state: GraphState,
    pub assignment: Option<Assignment>,
    pub last_error: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkersResponse {
    pub workers: Vec<WorkerInfo>,
}
