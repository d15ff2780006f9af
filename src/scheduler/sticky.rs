use super::strategy::{Scheduler, normalized, seeded_load};
use super::types::{Assignment, Placement, WorkerLoad};
use crate::error::SchedulerError;
use crate::membership::types::WorkerId;
use crate::protocol::GraphDescriptor;

use std::collections::{BTreeMap, HashSet};

/// Greedy least-loaded placement that keeps partitions where they are.
///
/// 1. Partitions whose previous owner is still live stay put.
/// 2. Orphaned partitions go, one at a time, to the least-loaded worker.
/// 3. While a worker holding one of this graph's partitions carries more than
///    one partition above the least-loaded worker, one such partition moves.
///
/// Load counts start from the partitions other graphs place on each worker.
/// With an unchanged worker set and load the previous assignment is already
/// balanced, so rescheduling returns it untouched.
pub struct StickyScheduler;

type Slot = (String, u32);

impl StickyScheduler {
    fn least_loaded(load: &WorkerLoad) -> Option<WorkerId> {
        // BTreeMap iteration is ordered by id, so `min_by_key` breaks ties on the smallest id.
        load.iter()
            .min_by_key(|(_, count)| **count)
            .map(|(worker, _)| worker.clone())
    }

    /// Most loaded worker that owns at least one of `owners`' slots.
    fn most_loaded(load: &WorkerLoad, owners: &BTreeMap<Slot, WorkerId>) -> Option<WorkerId> {
        let holding: HashSet<&WorkerId> = owners.values().collect();
        // `max_by_key` returns the last maximum, i.e. the largest id among ties.
        load.iter()
            .filter(|(worker, _)| holding.contains(worker))
            .max_by_key(|(_, count)| **count)
            .map(|(worker, _)| worker.clone())
    }
}

impl Scheduler for StickyScheduler {
    fn name(&self) -> &'static str {
        "sticky"
    }

    fn place(
        &self,
        workers: &[WorkerId],
        graph: &GraphDescriptor,
        previous: Option<&Assignment>,
        base_load: &WorkerLoad,
    ) -> Result<Vec<Placement>, SchedulerError> {
        let workers = normalized(workers);
        if workers.is_empty() {
            return Err(SchedulerError::NoWorkers(graph.name.clone()));
        }

        let live: HashSet<&WorkerId> = workers.iter().collect();
        let mut load = seeded_load(&workers, base_load);

        let slots: Vec<Slot> = graph
            .operators
            .iter()
            .flat_map(|op| (0..op.partitions).map(move |p| (op.name.clone(), p)))
            .collect();

        let mut owners: BTreeMap<Slot, WorkerId> = BTreeMap::new();

        // 1. Keep surviving owners.
        if let Some(previous) = previous
            && previous.graph_name() == graph.name
        {
            for (operator, partition) in &slots {
                if let Some(owner) = previous.owner_of(operator, *partition)
                    && live.contains(owner)
                {
                    owners.insert((operator.clone(), *partition), owner.clone());
                    *load.entry(owner.clone()).or_insert(0) += 1;
                }
            }
        }

        // 2. Place orphans.
        for slot in &slots {
            if owners.contains_key(slot) {
                continue;
            }
            let Some(target) = Self::least_loaded(&load) else {
                return Err(SchedulerError::NoWorkers(graph.name.clone()));
            };
            *load.entry(target.clone()).or_insert(0) += 1;
            owners.insert(slot.clone(), target);
        }

        // 3. Rebalance with minimal moves.
        loop {
            let (Some(heavy), Some(light)) = (Self::most_loaded(&load, &owners), Self::least_loaded(&load))
            else {
                break;
            };
            if load[&heavy] <= load[&light] + 1 {
                break;
            }

            let Some(slot) = slots
                .iter()
                .rev()
                .find(|slot| owners.get(*slot) == Some(&heavy))
                .cloned()
            else {
                break;
            };

            tracing::debug!(
                "Rebalancing {}[{}] from {} to {}",
                slot.0,
                slot.1,
                heavy,
                light
            );
            owners.insert(slot, light.clone());
            *load.entry(heavy).or_insert(1) -= 1;
            *load.entry(light).or_insert(0) += 1;
        }

        Ok(owners
            .into_iter()
            .map(|((operator, partition), worker)| Placement::new(&operator, partition, worker))
            .collect())
    }
}
