//! Error Taxonomy
//!
//! Typed errors for every failure class the engine surfaces to callers:
//! graph construction, submission/scheduling, transport, wire codec and the
//! client-side correlation layer. Handler (domain) failures are not errors at
//! this level; they travel inside `ResponsePayload`.

use crate::protocol::types::RequestId;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;

/// Errors raised while building operators and dataflow graphs.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum GraphError {
    #[error("function '{function}' is already registered on operator '{operator}'")]
    DuplicateFunction { operator: String, function: String },

    #[error("operator '{0}' is already part of the graph")]
    DuplicateOperator(String),

    #[error("operator '{operator}' needs at least one partition (got {requested})")]
    InvalidPartitionCount { operator: String, requested: u32 },

    #[error("operator '{0}' belongs to a submitted graph and can no longer be modified")]
    OperatorSealed(String),

    #[error("graph '{0}' has no operators")]
    EmptyGraph(String),
}

/// Reasons a graph submission is rejected.
///
/// Serializable because the coordinator returns it verbatim in the HTTP
/// rejection body.
#[derive(Debug, Clone, Error, PartialEq, Eq, Serialize, Deserialize)]
pub enum SubmissionError {
    #[error("graph '{0}' is already active")]
    Conflict(String),

    #[error("operator '{operator}' is already declared by graph '{graph}'")]
    OperatorInUse { operator: String, graph: String },

    #[error("no workers available to place graph '{0}'")]
    NoWorkers(String),

    #[error("invalid graph: {0}")]
    Invalid(String),

    #[error("unknown graph '{0}'")]
    UnknownGraph(String),

    #[error("failed to disseminate assignment: {0}")]
    Dissemination(String),

    #[error("coordinator unreachable: {0}")]
    Unreachable(String),
}

/// Errors produced by a scheduling strategy.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum SchedulerError {
    #[error("no workers available to place graph '{0}'")]
    NoWorkers(String),

    #[error("failed to publish assignment: {0}")]
    Publish(String),
}

impl From<SchedulerError> for SubmissionError {
    fn from(err: SchedulerError) -> Self {
        match err {
            SchedulerError::NoWorkers(graph) => SubmissionError::NoWorkers(graph),
            SchedulerError::Publish(reason) => SubmissionError::Dissemination(reason),
        }
    }
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum TransportError {
    #[error("transport is closed")]
    Closed,

    #[error("producer is no longer running")]
    ProducerStopped,
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum CodecError {
    #[error("failed to encode message: {0}")]
    Encode(String),

    #[error("failed to decode message: {0}")]
    Decode(String),
}

/// Errors surfaced by the client correlation layer.
#[derive(Debug, Error)]
pub enum ClientError {
    /// No reply carrying the request id arrived within the configured timeout.
    #[error("request {request_id} timed out after {timeout:?}")]
    TimedOut {
        request_id: RequestId,
        timeout: Duration,
    },

    /// A reply arrived for a future that had already been completed.
    #[error("request {request_id} was already completed; duplicate or out-of-order delivery")]
    AlreadyCompleted { request_id: RequestId },

    /// The session observed a protocol violation earlier and refuses further work.
    #[error("client session is poisoned by a protocol violation: {0}")]
    ProtocolViolation(String),

    #[error("client is closed")]
    Closed,

    #[error("reply receive loop stopped before request {0} completed")]
    ReceiveLoopStopped(RequestId),

    #[error("request {request_id} could not be delivered: {reason}")]
    Undelivered {
        request_id: RequestId,
        reason: String,
    },

    #[error("operator '{0}' is not part of any graph submitted by this client")]
    UnknownOperator(String),

    #[error("partition {partition} is out of range for operator '{operator}' ({partitions} partitions)")]
    InvalidPartition {
        operator: String,
        partition: u32,
        partitions: u32,
    },

    #[error(transparent)]
    Graph(#[from] GraphError),

    #[error(transparent)]
    Submission(#[from] SubmissionError),

    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error(transparent)]
    Codec(#[from] CodecError),

    #[error("client runtime error: {0}")]
    Runtime(#[from] std::io::Error),
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("invalid configuration value for {name}: {reason}")]
pub struct ConfigError {
    pub name: String,
    pub reason: String,
}
