use crate::error::SubmissionError;
use crate::state::StateBackendKind;

use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;
use uuid::Uuid;

/// Globally unique identifier of one client request (16 random bytes).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct RequestId(pub Uuid);

impl RequestId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for RequestId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Submission-time view of one operator: everything the coordinator and the
/// workers need, without the handler code itself.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OperatorDescriptor {
    pub name: String,
    pub partitions: u32,
    pub functions: Vec<String>,
}

/// The graph definition sent once to the coordinator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GraphDescriptor {
    pub name: String,
    pub backend: StateBackendKind,
    pub operators: Vec<OperatorDescriptor>,
}

impl GraphDescriptor {
    /// Checks the invariants a submitted topology must satisfy.
    pub fn validate(&self) -> Result<(), SubmissionError> {
        if self.name.trim().is_empty() {
            return Err(SubmissionError::Invalid("graph name is empty".to_string()));
        }
        if self.operators.is_empty() {
            return Err(SubmissionError::Invalid(format!(
                "graph '{}' has no operators",
                self.name
            )));
        }

        let mut seen = HashSet::new();
        for operator in &self.operators {
            if !seen.insert(operator.name.as_str()) {
                return Err(SubmissionError::Invalid(format!(
                    "operator '{}' appears more than once",
                    operator.name
                )));
            }
            if operator.partitions == 0 {
                return Err(SubmissionError::Invalid(format!(
                    "operator '{}' has zero partitions",
                    operator.name
                )));
            }
        }

        Ok(())
    }

    pub fn operator(&self, name: &str) -> Option<&OperatorDescriptor> {
        self.operators.iter().find(|op| op.name == name)
    }

    pub fn total_partitions(&self) -> usize {
        self.operators.iter().map(|op| op.partitions as usize).sum()
    }
}

/// Helper to get the current system time in milliseconds.
pub fn now_ms() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

/// Serializes a value as an embedded JSON string.
///
/// Used with `#[serde(with = "json_string")]` on fields holding
/// `serde_json::Value` so that envelopes stay bincode-compatible.
pub mod json_string {
    use serde::de::{DeserializeOwned, Error as _};
    use serde::{Deserialize, Deserializer, Serialize, Serializer};

    pub fn serialize<T, S>(value: &T, serializer: S) -> Result<S::Ok, S::Error>
    where
        T: Serialize,
        S: Serializer,
    {
        let json = serde_json::to_string(value).map_err(serde::ser::Error::custom)?;
        serializer.serialize_str(&json)
    }

    pub fn deserialize<'de, T, D>(deserializer: D) -> Result<T, D::Error>
    where
        T: DeserializeOwned,
        D: Deserializer<'de>,
    {
        let json = String::deserialize(deserializer)?;
        serde_json::from_str(&json).map_err(D::Error::custom)
    }
}
