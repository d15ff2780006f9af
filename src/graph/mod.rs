//! Operators and Dataflow Graphs
//!
//! Application code builds operators (named, partitioned handler registries)
//! and groups them into a `DataflowGraph` that is submitted once.
//!
//! ## Lifecycle
//! - **Building**: handlers and partition counts may change freely.
//! - **Sealed**: submitting a graph seals its operators; from then on
//!   `register` and `set_partition_count` fail with `OperatorSealed`, and the
//!   operators cannot join another graph.

pub mod dataflow;
pub mod operator;

pub use dataflow::DataflowGraph;
pub use operator::{HandlerFn, Operator};
