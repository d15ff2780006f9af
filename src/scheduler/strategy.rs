use super::types::{Assignment, Placement, WorkerLoad, with_handoffs};
use crate::error::SchedulerError;
use crate::membership::types::WorkerId;
use crate::protocol::topics::ASSIGNMENT_TOPIC;
use crate::protocol::{GraphDescriptor, encode};
use crate::transport::{RecordMetadata, Transport};

use async_trait::async_trait;

/// A partition placement algorithm.
///
/// Implementations only decide *where* partitions go (`place`); computing
/// handoffs and publishing the result is shared by `schedule`.
#[async_trait]
pub trait Scheduler: Send + Sync {
    fn name(&self) -> &'static str;

    /// Maps every partition of `graph` onto one of `workers`.
    ///
    /// `previous` is the graph's current assignment, if any; strategies may
    /// use it to avoid moving partitions. `base_load` counts the partitions
    /// other graphs already place on each worker.
    fn place(
        &self,
        workers: &[WorkerId],
        graph: &GraphDescriptor,
        previous: Option<&Assignment>,
        base_load: &WorkerLoad,
    ) -> Result<Vec<Placement>, SchedulerError>;

    /// Places `graph` and disseminates the resulting assignment on `network`.
    async fn schedule(
        &self,
        workers: &[WorkerId],
        graph: &GraphDescriptor,
        previous: Option<&Assignment>,
        base_load: &WorkerLoad,
        epoch: u64,
        network: &dyn Transport,
    ) -> Result<Assignment, SchedulerError> {
        if workers.is_empty() {
            return Err(SchedulerError::NoWorkers(graph.name.clone()));
        }

        let placements = self.place(workers, graph, previous, base_load)?;
        let placements = with_handoffs(placements, previous, workers);
        let assignment = Assignment::new(graph.clone(), epoch, placements, workers.to_vec());

        let metadata = publish_assignment(&assignment, network).await?;
        tracing::info!(
            "{} scheduler placed {} partitions of graph '{}' on {} workers (epoch {}, offset {})",
            self.name(),
            assignment.placements.len(),
            graph.name,
            workers.len(),
            epoch,
            metadata.offset
        );

        Ok(assignment)
    }
}

pub async fn publish_assignment(
    assignment: &Assignment,
    network: &dyn Transport,
) -> Result<RecordMetadata, SchedulerError> {
    let payload = encode(assignment).map_err(|e| SchedulerError::Publish(e.to_string()))?;
    network
        .publish(ASSIGNMENT_TOPIC, 0, payload)
        .await
        .map_err(|e| SchedulerError::Publish(e.to_string()))
}

/// `base_load` restricted to `workers`, with zero for workers it does not mention.
pub(crate) fn seeded_load(workers: &[WorkerId], base_load: &WorkerLoad) -> WorkerLoad {
    workers
        .iter()
        .map(|w| (w.clone(), base_load.get(w).copied().unwrap_or(0)))
        .collect()
}

/// Sorted, de-duplicated copy of a worker list.
pub(crate) fn normalized(workers: &[WorkerId]) -> Vec<WorkerId> {
    let mut workers = workers.to_vec();
    workers.sort();
    workers.dedup();
    workers
}
