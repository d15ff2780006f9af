//! Worker Execution Module
//!
//! Workers own partitions and execute the invocations addressed to them.
//!
//! ## Responsibilities
//! - **Membership**: registers with the coordinator and heartbeats on the control topic.
//! - **Ownership**: applies assignments, starting an executor per gained
//!   partition and stopping (and handing off) lost ones.
//! - **Execution**: runs handlers one at a time per partition against a
//!   partition-scoped state backend, then commits their writes and chains
//!   their remote calls.
//!
//! ## Core Concepts
//! - **Single ownership**: only the executor of a partition touches its
//!   backend, so invocations of one key never overlap.
//! - **Chaining**: remote calls are dispatched after the originating handler
//!   succeeded. The last call issued inherits the obligation to reply.

pub mod catalog;
pub mod context;
pub mod handoff;
pub mod partition;
pub mod service;

pub use catalog::OperatorCatalog;
pub use context::{InvocationContext, RemoteCall};
pub use service::{Worker, WorkerSettings};

#[cfg(test)]
mod tests;
