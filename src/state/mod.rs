//! Keyed State Module
//!
//! Partition-scoped key/value state owned by exactly one worker at a time.
//!
//! ## Core Concepts
//! - **Keys**: `Key` is either an integer or a string; integers hash to themselves.
//! - **Partitioning**: `partition_for` maps a key onto `[0, partitions)` deterministically.
//! - **Backends**: `StateBackend` is the pluggable store; `InMemoryBackend` is the reference implementation.

pub mod backend;
pub mod key;
pub mod memory;
pub mod partitioner;

pub use backend::{BackendError, StateBackend, StateBackendKind};
pub use key::Key;
pub use memory::InMemoryBackend;
pub use partitioner::partition_for;
