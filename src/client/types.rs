use crate::protocol::{InvocationResponse, RequestId, ResponsePayload};

use serde_json::Value;

/// A reply as seen by the caller of `get()`.
#[derive(Debug, Clone, PartialEq)]
pub struct EngineResponse {
    pub request_id: RequestId,
    /// When the engine accepted the originating request (ms since epoch).
    pub in_timestamp: u64,
    /// When the engine produced this response (ms since epoch).
    pub out_timestamp: u64,
    pub payload: ResponsePayload,
}

impl EngineResponse {
    pub fn engine_latency_ms(&self) -> u64 {
        self.out_timestamp.saturating_sub(self.in_timestamp)
    }

    pub fn is_ok(&self) -> bool {
        matches!(self.payload, ResponsePayload::Value(_))
    }

    /// The handler's return value, if it succeeded.
    pub fn value(&self) -> Option<&Value> {
        match &self.payload {
            ResponsePayload::Value(value) => Some(value),
            _ => None,
        }
    }

    /// The failure description of a domain, routing or backend error.
    pub fn error(&self) -> Option<&str> {
        match &self.payload {
            ResponsePayload::Value(_) => None,
            ResponsePayload::DomainError(reason)
            | ResponsePayload::RoutingError(reason)
            | ResponsePayload::BackendFailure(reason) => Some(reason),
        }
    }

    pub fn is_domain_error(&self) -> bool {
        matches!(self.payload, ResponsePayload::DomainError(_))
    }

    pub fn is_routing_error(&self) -> bool {
        matches!(self.payload, ResponsePayload::RoutingError(_))
    }
}

impl From<InvocationResponse> for EngineResponse {
    fn from(response: InvocationResponse) -> Self {
        Self {
            request_id: response.request_id,
            in_timestamp: response.in_timestamp,
            out_timestamp: response.out_timestamp,
            payload: response.payload,
        }
    }
}
