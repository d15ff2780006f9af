//! In-Memory Reference Broker
//!
//! A Kafka-shaped broker living inside one process. Each topic-partition keeps
//! an append-only log; subscribers first replay the log from their group's
//! committed offset and then receive live appends, all under the same lock so
//! no record is skipped or reordered between replay and live delivery.
//!
//! Logs are retained for the lifetime of the broker.

use super::Transport;
use super::types::{Record, RecordMetadata, Subscription};
use crate::error::TransportError;
use crate::protocol::now_ms;

use async_trait::async_trait;
use dashmap::DashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;

#[derive(Default)]
struct TopicPartition {
    log: Vec<Record>,
    subscribers: Vec<mpsc::UnboundedSender<Record>>,
}

/// Structure: `(topic, partition) -> log + live subscribers`.
pub struct InMemoryBroker {
    partitions: DashMap<(String, u32), Arc<Mutex<TopicPartition>>>,
    /// Structure: `(group, topic, partition) -> next offset to consume`.
    committed: DashMap<(String, String, u32), u64>,
    closed: AtomicBool,
}

impl InMemoryBroker {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    fn topic_partition(&self, topic: &str, partition: u32) -> Arc<Mutex<TopicPartition>> {
        self.partitions
            .entry((topic.to_string(), partition))
            .or_default()
            .clone()
    }

    fn ensure_open(&self) -> Result<(), TransportError> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(TransportError::Closed);
        }
        Ok(())
    }

    /// Offset the next published record of `(topic, partition)` will get.
    pub fn end_offset(&self, topic: &str, partition: u32) -> u64 {
        let Some(tp) = self.partitions.get(&(topic.to_string(), partition)) else {
            return 0;
        };
        let end = match tp.lock() {
            Ok(tp) => tp.log.len() as u64,
            Err(_) => 0,
        };
        end
    }

    pub fn committed_offset(&self, group: &str, topic: &str, partition: u32) -> Option<u64> {
        self.committed
            .get(&(group.to_string(), topic.to_string(), partition))
            .map(|offset| *offset)
    }

    /// Ends every subscription and rejects further traffic.
    pub fn shutdown(&self) {
        self.closed.store(true, Ordering::SeqCst);
        for entry in self.partitions.iter() {
            if let Ok(mut tp) = entry.value().lock() {
                tp.subscribers.clear();
            }
        }
        tracing::info!("In-memory broker shut down");
    }
}

impl Default for InMemoryBroker {
    fn default() -> Self {
        Self {
            partitions: DashMap::new(),
            committed: DashMap::new(),
            closed: AtomicBool::new(false),
        }
    }
}

#[async_trait]
impl Transport for InMemoryBroker {
    async fn publish(
        &self,
        topic: &str,
        partition: u32,
        payload: Vec<u8>,
    ) -> Result<RecordMetadata, TransportError> {
        self.ensure_open()?;

        let tp = self.topic_partition(topic, partition);
        let mut tp = tp.lock().map_err(|_| TransportError::Closed)?;

        let record = Record {
            topic: topic.to_string(),
            partition,
            offset: tp.log.len() as u64,
            timestamp_ms: now_ms(),
            payload,
        };

        // Dropped receivers are pruned here.
        tp.subscribers
            .retain(|subscriber| subscriber.send(record.clone()).is_ok());

        let metadata = RecordMetadata {
            topic: record.topic.clone(),
            partition,
            offset: record.offset,
            timestamp_ms: record.timestamp_ms,
        };
        tp.log.push(record);

        tracing::trace!(
            "Published {}[{}]@{}",
            metadata.topic,
            metadata.partition,
            metadata.offset
        );

        Ok(metadata)
    }

    async fn subscribe(
        &self,
        topic: &str,
        partition: u32,
        group: &str,
    ) -> Result<Subscription, TransportError> {
        self.ensure_open()?;

        let start = self.committed_offset(group, topic, partition).unwrap_or(0);
        let (tx, rx) = mpsc::unbounded_channel();

        let tp = self.topic_partition(topic, partition);
        let mut tp = tp.lock().map_err(|_| TransportError::Closed)?;

        for record in tp.log.iter().skip(start as usize) {
            // The receiver is still in scope, so this cannot fail.
            let _ = tx.send(record.clone());
        }
        tp.subscribers.push(tx);

        tracing::debug!(
            "Group {} subscribed to {}[{}] from offset {}",
            group,
            topic,
            partition,
            start
        );

        Ok(Subscription::new(topic, partition, rx))
    }

    async fn commit(
        &self,
        topic: &str,
        partition: u32,
        group: &str,
        next_offset: u64,
    ) -> Result<(), TransportError> {
        self.ensure_open()?;

        let mut committed = self
            .committed
            .entry((group.to_string(), topic.to_string(), partition))
            .or_insert(0);

        // Commits never move backwards.
        if next_offset > *committed {
            *committed = next_offset;
        }
        Ok(())
    }
}
