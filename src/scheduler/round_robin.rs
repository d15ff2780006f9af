use super::strategy::{Scheduler, normalized, seeded_load};
use super::types::{Assignment, Placement, WorkerLoad};
use crate::error::SchedulerError;
use crate::membership::types::WorkerId;
use crate::protocol::GraphDescriptor;

/// Deals partitions out over the sorted worker list, operator by operator.
///
/// The deal starts at the worker carrying the least load from other graphs
/// (smallest id on ties). Ignores the previous assignment: the result depends
/// only on the worker set, the graph and that load, so any membership change
/// may move every partition.
pub struct RoundRobinScheduler;

impl Scheduler for RoundRobinScheduler {
    fn name(&self) -> &'static str {
        "round_robin"
    }

    fn place(
        &self,
        workers: &[WorkerId],
        graph: &GraphDescriptor,
        _previous: Option<&Assignment>,
        base_load: &WorkerLoad,
    ) -> Result<Vec<Placement>, SchedulerError> {
        let workers = normalized(workers);
        if workers.is_empty() {
            return Err(SchedulerError::NoWorkers(graph.name.clone()));
        }

        let load = seeded_load(&workers, base_load);
        let mut slot = workers
            .iter()
            .enumerate()
            .min_by_key(|(_, w)| load.get(*w).copied().unwrap_or(0))
            .map(|(index, _)| index)
            .unwrap_or(0);

        let mut placements = Vec::with_capacity(graph.total_partitions());
        for operator in &graph.operators {
            for partition in 0..operator.partitions {
                let worker = workers[slot % workers.len()].clone();
                placements.push(Placement::new(&operator.name, partition, worker));
                slot += 1;
            }
        }

        Ok(placements)
    }
}
