use super::types::{RequestId, json_string};
use crate::error::CodecError;
use crate::membership::types::WorkerId;
use crate::state::Key;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A keyed invocation routed to `partition_for(key, partitions)` of `operator`.
///
/// Chained links reuse the originating `request_id` and carry its
/// `in_timestamp` forward so the terminal response reports end-to-end timing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InvocationEvent {
    pub request_id: RequestId,
    pub operator: String,
    pub key: Key,
    pub function: String,
    #[serde(with = "json_string")]
    pub params: Vec<Value>,
    /// Reply topic of the waiting client; `None` for detached links.
    pub reply_to: Option<String>,
    /// Set on chained links; the original request uses its record timestamp.
    pub in_timestamp: Option<u64>,
    /// Chain depth, 0 for client-originated requests.
    pub hop: u32,
}

/// Bulk load addressed directly at one partition. Produces no response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BatchInsertEvent {
    pub request_id: RequestId,
    pub operator: String,
    pub partition: u32,
    pub function: String,
    #[serde(with = "json_string")]
    pub entries: Vec<(Key, Value)>,
}

/// Everything that travels on an operator topic.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum EngineMessage {
    Invoke(InvocationEvent),
    BatchInsert(BatchInsertEvent),
}

/// Outcome of an invocation as seen by the client.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ResponsePayload {
    /// The handler's return value.
    Value(#[serde(with = "json_string")] Value),
    /// The handler returned an error (entity missing, insufficient funds, ...).
    DomainError(String),
    /// Unknown operator or function, or a misrouted request. Never retried.
    RoutingError(String),
    /// The state backend failed while serving the request.
    BackendFailure(String),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InvocationResponse {
    pub request_id: RequestId,
    pub in_timestamp: u64,
    pub out_timestamp: u64,
    pub payload: ResponsePayload,
}

/// Worker -> coordinator liveness traffic.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ControlMessage {
    Register { worker: WorkerId },
    Heartbeat { worker: WorkerId },
    Deregister { worker: WorkerId },
}

/// State of one partition shipped from its previous owner to its new owner.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PartitionHandoff {
    pub graph: String,
    pub epoch: u64,
    pub operator: String,
    pub partition: u32,
    pub from: WorkerId,
    pub to: WorkerId,
    #[serde(with = "json_string")]
    pub entries: Vec<(Key, Value)>,
}

/// JSON form of a key/value mapping as handed to batch-insert handlers.
pub fn entries_to_value(entries: &[(Key, Value)]) -> Value {
    Value::Array(
        entries
            .iter()
            .map(|(key, value)| Value::Array(vec![key.to_value(), value.clone()]))
            .collect(),
    )
}

/// Parses the parameter a batch-insert handler receives back into entries.
pub fn entries_from_value(value: &Value) -> Result<Vec<(Key, Value)>, CodecError> {
    let pairs = value
        .as_array()
        .ok_or_else(|| CodecError::Decode("batch entries must be an array".to_string()))?;

    let mut entries = Vec::with_capacity(pairs.len());
    for pair in pairs {
        match pair.as_array().map(|p| p.as_slice()) {
            Some([key, value]) => {
                let key = Key::from_value(key).ok_or_else(|| {
                    CodecError::Decode(format!("batch key {} is not an integer or string", key))
                })?;
                entries.push((key, value.clone()));
            }
            _ => {
                return Err(CodecError::Decode(
                    "batch entry must be a [key, value] pair".to_string(),
                ));
            }
        }
    }
    Ok(entries)
}
