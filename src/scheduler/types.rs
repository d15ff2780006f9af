use crate::membership::types::WorkerId;
use crate::protocol::GraphDescriptor;

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Partitions owned per worker.
pub type WorkerLoad = BTreeMap<WorkerId, usize>;

/// Ownership of one `(operator, partition)` pair.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Placement {
    pub operator: String,
    pub partition: u32,
    pub worker: WorkerId,
    /// Live previous owner that must ship the partition's state to `worker`.
    pub handoff_from: Option<WorkerId>,
}

impl Placement {
    pub fn new(operator: &str, partition: u32, worker: WorkerId) -> Self {
        Self {
            operator: operator.to_string(),
            partition,
            worker,
            handoff_from: None,
        }
    }
}

/// A complete placement of one graph, as disseminated to the workers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Assignment {
    pub graph: GraphDescriptor,
    /// Strictly increasing across all scheduling rounds of a coordinator.
    pub epoch: u64,
    /// Sorted by `(operator, partition)`.
    pub placements: Vec<Placement>,
    /// Workers that were live when this assignment was computed, sorted.
    pub live: Vec<WorkerId>,
}

impl Assignment {
    pub fn new(
        graph: GraphDescriptor,
        epoch: u64,
        mut placements: Vec<Placement>,
        mut live: Vec<WorkerId>,
    ) -> Self {
        placements.sort_by(|a, b| {
            (a.operator.as_str(), a.partition).cmp(&(b.operator.as_str(), b.partition))
        });
        live.sort();
        live.dedup();
        Self {
            graph,
            epoch,
            placements,
            live,
        }
    }

    pub fn graph_name(&self) -> &str {
        &self.graph.name
    }

    pub fn owner_of(&self, operator: &str, partition: u32) -> Option<&WorkerId> {
        self.placements
            .binary_search_by(|p| (p.operator.as_str(), p.partition).cmp(&(operator, partition)))
            .ok()
            .map(|index| &self.placements[index].worker)
    }

    pub fn partitions_of(&self, worker: &WorkerId) -> Vec<&Placement> {
        self.placements
            .iter()
            .filter(|p| &p.worker == worker)
            .collect()
    }

    /// Partition count per worker.
    pub fn load(&self) -> WorkerLoad {
        let mut load = WorkerLoad::new();
        for placement in &self.placements {
            *load.entry(placement.worker.clone()).or_insert(0) += 1;
        }
        load
    }

    /// True when every partition the graph declares has exactly one owner.
    pub fn is_complete(&self) -> bool {
        if self.placements.len() != self.graph.total_partitions() {
            return false;
        }
        self.graph.operators.iter().all(|op| {
            (0..op.partitions).all(|partition| self.owner_of(&op.name, partition).is_some())
        })
    }
}

/// Marks placements whose owner changed while the previous owner is still live.
pub fn with_handoffs(
    mut placements: Vec<Placement>,
    previous: Option<&Assignment>,
    live: &[WorkerId],
) -> Vec<Placement> {
    let Some(previous) = previous else {
        return placements;
    };

    for placement in &mut placements {
        placement.handoff_from = previous
            .owner_of(&placement.operator, placement.partition)
            .filter(|old| *old != &placement.worker && live.contains(old))
            .cloned();
    }
    placements
}
