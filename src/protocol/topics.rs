//! Topic names used on the transport.
//!
//! Every operator owns a topic named after it, with one transport partition per
//! operator partition. The remaining topics have a single partition.

use uuid::Uuid;

/// Workers -> coordinator registration and heartbeats.
pub const CONTROL_TOPIC: &str = "stateflow.control";
/// Coordinator -> workers assignments.
pub const ASSIGNMENT_TOPIC: &str = "stateflow.assignments";
/// Worker -> worker partition state transfer.
pub const HANDOFF_TOPIC: &str = "stateflow.handoff";

/// Consumer group shared by all workers on operator topics, so a partition's
/// next owner resumes where the previous one committed.
pub const WORKER_GROUP: &str = "stateflow.workers";
pub const COORDINATOR_GROUP: &str = "stateflow.coordinator";

pub fn operator_topic(operator: &str) -> String {
    operator.to_string()
}

/// A fresh reply topic for one client session.
pub fn reply_topic() -> String {
    format!("stateflow.replies.{}", Uuid::new_v4())
}
