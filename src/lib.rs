//! Stateflow: Partitioned Stateful Function Engine
//!
//! This library crate defines the modules that make up the engine. It serves
//! as the foundation for the binary executable (`main.rs`).
//!
//! ## Architecture Modules
//! - **`graph`**: Operators (partitioned handler registries) and the dataflow
//!   graphs clients submit.
//! - **`coordinator`**: Stores submitted graphs, tracks worker membership and
//!   keeps every graph placed. Exposes the HTTP submission API.
//! - **`scheduler`**: Pluggable placement strategies mapping each
//!   `(operator, partition)` to exactly one worker.
//! - **`worker`**: Owns partitions and runs one invocation at a time per
//!   partition, committing state and chaining remote calls.
//! - **`client`**: Request/reply correlation with async and blocking clients.
//! - **`transport`**: The topic/partition broker contract and an in-memory broker.
//! - **`state`**: Keys, partitioning and per-partition state backends.
//! - **`protocol`**: Wire messages and their codec.
//! - **`membership`**: Worker liveness as seen by the coordinator.
//! - **`cluster`**: In-process assembly of a coordinator and its workers.
//! - **`ycsb`**: The reference benchmark operator.

pub mod client;
pub mod cluster;
pub mod config;
pub mod coordinator;
pub mod error;
pub mod graph;
pub mod membership;
pub mod protocol;
pub mod scheduler;
pub mod state;
pub mod transport;
pub mod worker;
pub mod ycsb;
