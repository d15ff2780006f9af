use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Instant;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct WorkerId(pub String);

impl WorkerId {
    pub fn new() -> Self {
        Self(format!("worker-{}", uuid::Uuid::new_v4()))
    }
}

impl Default for WorkerId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for WorkerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum WorkerState {
    Alive,
    Suspect,
    Dead,
}

/// The coordinator's view of one worker.
///
/// Suspect workers keep their partitions; only `Dead` removes a worker from
/// the placement set, so a slow heartbeat never causes a reshuffle on its own.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerInfo {
    pub id: WorkerId,
    pub state: WorkerState,
    pub heartbeats: u64,
    pub registered_at_ms: u64,

    #[serde(skip)]
    pub last_seen: Option<Instant>,
}

impl WorkerInfo {
    pub fn is_live(&self) -> bool {
        self.state != WorkerState::Dead
    }
}
