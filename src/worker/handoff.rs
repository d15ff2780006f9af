use crate::protocol::PartitionHandoff;
use crate::state::Key;

use dashmap::DashMap;
use serde_json::Value;
use std::time::Duration;
use tokio::sync::Notify;

/// Partition snapshots addressed to this worker, waiting to be picked up.
///
/// Structure: `(operator, partition, epoch) -> entries`. Once a partition has
/// settled at some epoch, snapshots for that epoch or older are dropped.
#[derive(Default)]
pub struct HandoffInbox {
    received: DashMap<(String, u32, u64), Vec<(Key, Value)>>,
    /// Structure: `(operator, partition) -> newest settled epoch`.
    settled: DashMap<(String, u32), u64>,
    arrived: Notify,
}

impl HandoffInbox {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn deliver(&self, handoff: PartitionHandoff) {
        let partition_key = (handoff.operator.clone(), handoff.partition);
        if let Some(settled) = self.settled.get(&partition_key)
            && *settled >= handoff.epoch
        {
            tracing::warn!(
                "Dropping late handoff of {}[{}] from {} (epoch {}, settled at {})",
                handoff.operator,
                handoff.partition,
                handoff.from,
                handoff.epoch,
                *settled
            );
            return;
        }

        tracing::debug!(
            "Received handoff of {}[{}] from {} ({} entries, epoch {})",
            handoff.operator,
            handoff.partition,
            handoff.from,
            handoff.entries.len(),
            handoff.epoch
        );
        self.received.insert(
            (handoff.operator, handoff.partition, handoff.epoch),
            handoff.entries,
        );
        self.arrived.notify_waiters();
    }

    /// Waits up to `timeout` for the snapshot of `(operator, partition)` sent
    /// for assignment `epoch`.
    pub async fn wait(
        &self,
        operator: &str,
        partition: u32,
        epoch: u64,
        timeout: Duration,
    ) -> Option<Vec<(Key, Value)>> {
        let deadline = tokio::time::Instant::now() + timeout;
        let key = (operator.to_string(), partition, epoch);

        loop {
            let notified = self.arrived.notified();
            tokio::pin!(notified);
            // Register before checking so a delivery in between is not missed.
            notified.as_mut().enable();

            if let Some((_, entries)) = self.received.remove(&key) {
                return Some(entries);
            }

            if tokio::time::timeout_at(deadline, notified).await.is_err() {
                return None;
            }
        }
    }

    /// Marks `(operator, partition)` as settled at `epoch` and drops every
    /// snapshot for it up to that epoch.
    pub fn settle(&self, operator: &str, partition: u32, epoch: u64) {
        self.settled
            .entry((operator.to_string(), partition))
            .and_modify(|settled| *settled = (*settled).max(epoch))
            .or_insert(epoch);
        self.received
            .retain(|(op, p, e), _| !(op == operator && *p == partition && *e <= epoch));
    }

    pub fn pending(&self) -> usize {
        self.received.len()
    }
}
