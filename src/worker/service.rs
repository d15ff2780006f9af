use super::catalog::OperatorCatalog;
use super::handoff::HandoffInbox;
use super::partition::{HandoffSource, PartitionExecutor};
use crate::config::EngineConfig;
use crate::membership::types::WorkerId;
use crate::protocol::topics::{ASSIGNMENT_TOPIC, CONTROL_TOPIC, HANDOFF_TOPIC};
use crate::protocol::{ControlMessage, PartitionHandoff, decode, encode};
use crate::scheduler::{Assignment, Placement};
use crate::state::{Key, StateBackend, partition_for};
use crate::transport::{Subscription, Transport};

use dashmap::DashMap;
use serde_json::Value;
use std::collections::HashSet;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;

#[derive(Debug, Clone)]
pub struct WorkerSettings {
    pub heartbeat_interval: Duration,
    pub handoff_patience: Duration,
}

impl From<&EngineConfig> for WorkerSettings {
    fn from(config: &EngineConfig) -> Self {
        Self {
            heartbeat_interval: config.heartbeat_interval,
            handoff_patience: config.handoff_patience,
        }
    }
}

impl Default for WorkerSettings {
    fn default() -> Self {
        Self::from(&EngineConfig::default())
    }
}

struct OwnedPartition {
    graph: String,
    epoch: u64,
    stop: watch::Sender<bool>,
    /// Previous owner this partition still waits for, if any.
    source: watch::Sender<Option<HandoffSource>>,
    handle: JoinHandle<Arc<dyn StateBackend>>,
    backend: Arc<dyn StateBackend>,
}

/// A worker process: owns partitions and runs their executors.
pub struct Worker {
    pub id: WorkerId,
    catalog: Arc<OperatorCatalog>,
    transport: Arc<dyn Transport>,
    settings: WorkerSettings,
    /// Structure: `(operator, partition) -> running executor`.
    partitions: DashMap<(String, u32), OwnedPartition>,
    /// Structure: `operator -> partition count`, from every applied assignment.
    topology: Arc<DashMap<String, u32>>,
    /// Structure: `graph -> newest applied epoch`.
    applied: DashMap<String, u64>,
    inbox: Arc<HandoffInbox>,
    background: Mutex<Vec<JoinHandle<()>>>,
    applying: tokio::sync::Mutex<()>,
}

impl Worker {
    pub fn new(
        catalog: Arc<OperatorCatalog>,
        transport: Arc<dyn Transport>,
        settings: WorkerSettings,
    ) -> Arc<Self> {
        Arc::new(Self {
            id: WorkerId::new(),
            catalog,
            transport,
            settings,
            partitions: DashMap::new(),
            topology: Arc::new(DashMap::new()),
            applied: DashMap::new(),
            inbox: Arc::new(HandoffInbox::new()),
            background: Mutex::new(Vec::new()),
            applying: tokio::sync::Mutex::new(()),
        })
    }

    /// Subscribes to assignments and handoffs, registers with the coordinator
    /// and starts heartbeating.
    pub async fn start(self: &Arc<Self>) -> anyhow::Result<()> {
        let assignments = self
            .transport
            .subscribe(ASSIGNMENT_TOPIC, 0, &format!("assign-{}", self.id))
            .await?;
        let handoffs = self
            .transport
            .subscribe(HANDOFF_TOPIC, 0, &format!("handoff-{}", self.id))
            .await?;

        self.send_control(ControlMessage::Register {
            worker: self.id.clone(),
        })
        .await?;

        let mut background = Vec::new();

        let worker = self.clone();
        background.push(tokio::spawn(async move {
            worker.assignment_loop(assignments).await;
        }));

        let worker = self.clone();
        background.push(tokio::spawn(async move {
            worker.handoff_loop(handoffs).await;
        }));

        let worker = self.clone();
        background.push(tokio::spawn(async move {
            worker.heartbeat_loop().await;
        }));

        self.lock_background().extend(background);
        tracing::info!("Worker {} started", self.id);
        Ok(())
    }

    /// Stops background loops and every partition executor, then deregisters.
    ///
    /// Executors finish their in-flight record before the coordinator learns
    /// of the departure, so no successor consumes a record still being run here.
    pub async fn stop(&self) {
        for handle in self.lock_background().drain(..) {
            handle.abort();
        }

        let owned: Vec<(String, u32)> = self.owned_partitions();
        for key in owned {
            if let Some((_, partition)) = self.partitions.remove(&key) {
                let _ = partition.stop.send(true);
                let _ = partition.handle.await;
            }
        }

        if let Err(e) = self
            .send_control(ControlMessage::Deregister {
                worker: self.id.clone(),
            })
            .await
        {
            tracing::warn!("Worker {} could not deregister: {}", self.id, e);
        }

        tracing::info!("Worker {} stopped", self.id);
    }

    /// Brings the owned partition set in line with `assignment`.
    ///
    /// Assignments older than the newest applied one for the same graph are ignored.
    pub async fn apply_assignment(&self, assignment: Assignment) {
        let _guard = self.applying.lock().await;

        let graph = assignment.graph_name().to_string();
        if let Some(applied) = self.applied.get(&graph)
            && *applied >= assignment.epoch
        {
            tracing::debug!(
                "Worker {} ignoring stale assignment {} for '{}' (applied {})",
                self.id,
                assignment.epoch,
                graph,
                *applied
            );
            return;
        }
        self.applied.insert(graph.clone(), assignment.epoch);

        for operator in &assignment.graph.operators {
            self.topology
                .insert(operator.name.clone(), operator.partitions);
        }

        let mine: Vec<&Placement> = assignment.partitions_of(&self.id);
        let wanted: HashSet<(String, u32)> = mine
            .iter()
            .map(|p| (p.operator.clone(), p.partition))
            .collect();

        // Release what moved away.
        let lost: Vec<(String, u32)> = self
            .partitions
            .iter()
            .filter(|entry| entry.value().graph == graph && !wanted.contains(entry.key()))
            .map(|entry| entry.key().clone())
            .collect();
        for key in lost {
            let new_owner = assignment.owner_of(&key.0, key.1).cloned();
            self.release(&key, new_owner, &graph, assignment.epoch).await;
        }

        // Acquire what moved here.
        for placement in mine {
            let key = (placement.operator.clone(), placement.partition);
            if let Some(mut owned) = self.partitions.get_mut(&key) {
                owned.epoch = assignment.epoch;
                owned.source.send_if_modified(|pending| {
                    let gone = pending
                        .as_ref()
                        .is_some_and(|source| !assignment.live.contains(&source.from));
                    if gone {
                        *pending = None;
                    }
                    gone
                });
                continue;
            }
            self.acquire(placement, &assignment);
        }

        tracing::info!(
            "Worker {} applied epoch {} of '{}': owns {} partitions",
            self.id,
            assignment.epoch,
            graph,
            self.partitions.len()
        );
    }

    fn acquire(&self, placement: &Placement, assignment: &Assignment) {
        let Some(descriptor) = assignment.graph.operator(&placement.operator) else {
            tracing::error!(
                "Assignment {} places unknown operator {}",
                assignment.epoch,
                placement.operator
            );
            return;
        };

        let missing = self.catalog.missing_functions(descriptor);
        if !missing.is_empty() {
            tracing::error!(
                "Worker {} lacks {:?} of operator {}; those calls will fail with routing errors",
                self.id,
                missing,
                descriptor.name
            );
        }

        let backend = assignment.graph.backend.create();
        let (stop, stop_rx) = watch::channel(false);

        let executor = PartitionExecutor {
            worker: self.id.clone(),
            operator: placement.operator.clone(),
            partition: placement.partition,
            partitions: descriptor.partitions,
            backend: backend.clone(),
            catalog: self.catalog.clone(),
            topology: self.topology.clone(),
            transport: self.transport.clone(),
            inbox: self.inbox.clone(),
        };

        let handoff = placement.handoff_from.clone().map(|from| HandoffSource {
            from,
            epoch: assignment.epoch,
            patience: self.settings.handoff_patience,
        });
        let (source, source_rx) = watch::channel(handoff);

        let handle = tokio::spawn(executor.run(source_rx, stop_rx));

        self.partitions.insert(
            (placement.operator.clone(), placement.partition),
            OwnedPartition {
                graph: assignment.graph_name().to_string(),
                epoch: assignment.epoch,
                stop,
                source,
                handle,
                backend,
            },
        );
    }

    /// Stops the executor after its in-flight record and ships its state to `new_owner`.
    async fn release(
        &self,
        key: &(String, u32),
        new_owner: Option<WorkerId>,
        graph: &str,
        epoch: u64,
    ) {
        let Some((_, owned)) = self.partitions.remove(key) else {
            return;
        };

        tracing::debug!(
            "Worker {} releasing {}[{}] (held since epoch {})",
            self.id,
            key.0,
            key.1,
            owned.epoch
        );
        let _ = owned.stop.send(true);
        let backend = match owned.handle.await {
            Ok(backend) => backend,
            Err(e) => {
                tracing::warn!("Executor of {}[{}] ended abnormally: {}", key.0, key.1, e);
                owned.backend
            }
        };

        let Some(to) = new_owner else {
            return;
        };

        let entries = match backend.snapshot() {
            Ok(entries) => entries,
            Err(e) => {
                tracing::error!("Cannot snapshot {}[{}] for handoff: {}", key.0, key.1, e);
                return;
            }
        };

        let handoff = PartitionHandoff {
            graph: graph.to_string(),
            epoch,
            operator: key.0.clone(),
            partition: key.1,
            from: self.id.clone(),
            to: to.clone(),
            entries,
        };

        let published = match encode(&handoff) {
            Ok(bytes) => self
                .transport
                .publish(HANDOFF_TOPIC, 0, bytes)
                .await
                .map_err(|e| e.to_string()),
            Err(e) => Err(e.to_string()),
        };

        match published {
            Ok(_) => tracing::info!(
                "Worker {} handed {}[{}] to {} ({} entries)",
                self.id,
                key.0,
                key.1,
                to,
                handoff.entries.len()
            ),
            Err(e) => tracing::error!("Handoff of {}[{}] to {} failed: {}", key.0, key.1, to, e),
        }
    }

    async fn assignment_loop(self: Arc<Self>, mut assignments: Subscription) {
        while let Some(record) = assignments.next().await {
            match decode::<Assignment>(&record.payload) {
                Ok(assignment) => self.apply_assignment(assignment).await,
                Err(e) => tracing::warn!("Worker {} got an undecodable assignment: {}", self.id, e),
            }
        }
        tracing::debug!("Worker {} assignment loop ended", self.id);
    }

    async fn handoff_loop(self: Arc<Self>, mut handoffs: Subscription) {
        while let Some(record) = handoffs.next().await {
            match decode::<PartitionHandoff>(&record.payload) {
                Ok(handoff) if handoff.to == self.id => self.inbox.deliver(handoff),
                Ok(_) => {}
                Err(e) => tracing::warn!("Worker {} got an undecodable handoff: {}", self.id, e),
            }
        }
    }

    async fn heartbeat_loop(self: Arc<Self>) {
        let mut interval = tokio::time::interval(self.settings.heartbeat_interval);

        loop {
            interval.tick().await;
            if let Err(e) = self
                .send_control(ControlMessage::Heartbeat {
                    worker: self.id.clone(),
                })
                .await
            {
                tracing::warn!("Worker {} heartbeat failed: {}", self.id, e);
            }
        }
    }

    async fn send_control(&self, message: ControlMessage) -> anyhow::Result<()> {
        let bytes = encode(&message)?;
        self.transport.publish(CONTROL_TOPIC, 0, bytes).await?;
        Ok(())
    }

    /// Owned `(operator, partition)` pairs, sorted.
    pub fn owned_partitions(&self) -> Vec<(String, u32)> {
        let mut owned: Vec<(String, u32)> = self
            .partitions
            .iter()
            .map(|entry| entry.key().clone())
            .collect();
        owned.sort();
        owned
    }

    /// Reads committed state directly from the owning backend.
    ///
    /// Returns `None` when this worker does not own the key's partition.
    pub fn state_of(&self, operator: &str, key: impl Into<Key>) -> Option<Value> {
        let key = key.into();
        let partitions = *self.topology.get(operator)?;
        let partition = partition_for(&key, partitions);

        let owned = self.partitions.get(&(operator.to_string(), partition))?;
        owned.backend.get(&key).ok().flatten()
    }

    pub fn epoch_of(&self, graph: &str) -> Option<u64> {
        self.applied.get(graph).map(|epoch| *epoch)
    }

    fn lock_background(&self) -> std::sync::MutexGuard<'_, Vec<JoinHandle<()>>> {
        self.background
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}
