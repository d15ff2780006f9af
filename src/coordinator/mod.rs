//! Coordinator Module
//!
//! Holds the submitted dataflow graphs and keeps each one placed on the live
//! workers.
//!
//! ## Responsibilities
//! - **Submission**: validates a graph descriptor, rejects duplicates of a
//!   placed graph and triggers the initial scheduling round.
//! - **Membership**: consumes worker registrations and heartbeats from the
//!   control topic and runs failure detection.
//! - **Rebalancing**: reschedules every placed graph when the live worker set
//!   changes (`Active -> Assigning -> Active`).
//! - **HTTP API**: `POST /graph/submit`, `GET /graph/:name`, `GET /workers`.

pub mod handlers;
pub mod protocol;
pub mod service;
pub mod types;

pub use handlers::router;
pub use service::Coordinator;
pub use types::{GraphRecord, GraphState};
