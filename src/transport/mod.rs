//! Message Transport Module
//!
//! The engine talks to a topic-based publish/subscribe broker that is reliable
//! and ordered per topic-partition. This module defines that contract and ships
//! an in-memory reference broker used by local clusters and tests.
//!
//! ## Contract
//! - **Publish**: appends a record to `(topic, partition)` and returns its offset
//!   and broker append timestamp.
//! - **Subscribe**: yields records of one `(topic, partition)` in offset order,
//!   starting at the consumer group's committed offset.
//! - **Commit**: records the next offset a consumer group should resume from.

pub mod broker;
pub mod types;

pub use broker::InMemoryBroker;
pub use types::{Record, RecordMetadata, Subscription};

use crate::error::TransportError;
use async_trait::async_trait;

#[async_trait]
pub trait Transport: Send + Sync {
    async fn publish(
        &self,
        topic: &str,
        partition: u32,
        payload: Vec<u8>,
    ) -> Result<RecordMetadata, TransportError>;

    async fn subscribe(
        &self,
        topic: &str,
        partition: u32,
        group: &str,
    ) -> Result<Subscription, TransportError>;

    async fn commit(
        &self,
        topic: &str,
        partition: u32,
        group: &str,
        next_offset: u64,
    ) -> Result<(), TransportError>;
}

#[cfg(test)]
mod tests;
