use super::protocol::GraphStatusResponse;
use super::types::{GraphRecord, GraphState};
use crate::error::SubmissionError;
use crate::membership::service::MembershipService;
use crate::protocol::topics::{CONTROL_TOPIC, COORDINATOR_GROUP};
use crate::protocol::{ControlMessage, GraphDescriptor, decode};
use crate::scheduler::{Scheduler, WorkerLoad};
use crate::transport::{Subscription, Transport};

use dashmap::DashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use tokio::task::JoinHandle;

/// Authoritative owner of submitted topologies and their placement.
pub struct Coordinator {
    graphs: DashMap<String, GraphRecord>,
    pub membership: Arc<MembershipService>,
    scheduler: Arc<dyn Scheduler>,
    transport: Arc<dyn Transport>,
    epoch: AtomicU64,
    /// Serialises scheduling rounds across submissions and rebalances.
    scheduling: tokio::sync::Mutex<()>,
    background: Mutex<Vec<JoinHandle<()>>>,
}

impl Coordinator {
    pub fn new(
        membership: Arc<MembershipService>,
        scheduler: Arc<dyn Scheduler>,
        transport: Arc<dyn Transport>,
    ) -> Arc<Self> {
        Arc::new(Self {
            graphs: DashMap::new(),
            membership,
            scheduler,
            transport,
            epoch: AtomicU64::new(0),
            scheduling: tokio::sync::Mutex::new(()),
            background: Mutex::new(Vec::new()),
        })
    }

    /// Starts the control, failure-detection and rebalance loops.
    pub async fn start(self: &Arc<Self>) -> anyhow::Result<()> {
        let control = self
            .transport
            .subscribe(CONTROL_TOPIC, 0, COORDINATOR_GROUP)
            .await?;

        let mut background = Vec::new();

        let coordinator = self.clone();
        background.push(tokio::spawn(async move {
            coordinator.control_loop(control).await;
        }));

        let membership = self.membership.clone();
        background.push(tokio::spawn(async move {
            membership.failure_detection_loop().await;
        }));

        let coordinator = self.clone();
        background.push(tokio::spawn(async move {
            coordinator.rebalance_loop().await;
        }));

        self.lock_background().extend(background);
        tracing::info!(
            "Coordinator started with the {} scheduler",
            self.scheduler.name()
        );
        Ok(())
    }

    pub fn stop(&self) {
        for handle in self.lock_background().drain(..) {
            handle.abort();
        }
        tracing::info!("Coordinator stopped");
    }

    /// Stores `descriptor` and places it on the live workers.
    ///
    /// Returns the epoch of the disseminated assignment.
    ///
    /// # Errors
    /// * `Invalid` for a malformed descriptor.
    /// * `Conflict` if a graph with this name is already placed.
    /// * `OperatorInUse` if another graph already declares one of its operators.
    /// * `NoWorkers` if no worker is live; the graph stays `Submitted` and
    ///   can be submitted again later.
    pub async fn submit_graph(&self, descriptor: GraphDescriptor) -> Result<u64, SubmissionError> {
        descriptor.validate()?;
        let name = descriptor.name.clone();

        let _round = self.scheduling.lock().await;

        if let Some(existing) = self.graphs.get(&name)
            && existing.state != GraphState::Submitted
        {
            tracing::warn!("Rejected resubmission of active graph '{}'", name);
            return Err(SubmissionError::Conflict(name));
        }

        // Topics, routing and worker state are keyed by operator name alone.
        for entry in self.graphs.iter().filter(|entry| entry.key() != &name) {
            if let Some(operator) = descriptor
                .operators
                .iter()
                .find(|op| entry.value().descriptor.operator(&op.name).is_some())
            {
                tracing::warn!(
                    "Rejected graph '{}': operator '{}' belongs to graph '{}'",
                    name,
                    operator.name,
                    entry.key()
                );
                return Err(SubmissionError::OperatorInUse {
                    operator: operator.name.clone(),
                    graph: entry.key().clone(),
                });
            }
        }

        tracing::info!(
            "Graph '{}' submitted: {} operators, {} partitions",
            name,
            descriptor.operators.len(),
            descriptor.total_partitions()
        );
        self.graphs.insert(name.clone(), GraphRecord::new(descriptor));

        self.place(&name).await
    }

    /// One scheduling round for `name`. Callers hold the scheduling lock.
    async fn place(&self, name: &str) -> Result<u64, SubmissionError> {
        let (descriptor, previous) = {
            let Some(mut record) = self.graphs.get_mut(name) else {
                return Err(SubmissionError::UnknownGraph(name.to_string()));
            };
            record.state = GraphState::Assigning;
            (record.descriptor.clone(), record.assignment.clone())
        };

        let workers = self.membership.live_workers();
        let base_load = self.load_excluding(name);
        let epoch = self.epoch.fetch_add(1, Ordering::SeqCst) + 1;

        let result = self
            .scheduler
            .schedule(
                &workers,
                &descriptor,
                previous.as_ref(),
                &base_load,
                epoch,
                self.transport.as_ref(),
            )
            .await;

        let Some(mut record) = self.graphs.get_mut(name) else {
            return Err(SubmissionError::UnknownGraph(name.to_string()));
        };

        match result {
            Ok(assignment) => {
                record.state = GraphState::Active;
                record.assignment = Some(assignment);
                record.last_error = None;
                Ok(epoch)
            }
            Err(e) => {
                tracing::error!("Scheduling graph '{}' failed: {}", name, e);
                record.state = GraphState::Submitted;
                record.last_error = Some(e.to_string());
                Err(e.into())
            }
        }
    }

    /// Reschedules every graph that has been placed before.
    pub async fn rebalance(&self) {
        let _round = self.scheduling.lock().await;

        let placed: Vec<String> = self
            .graphs
            .iter()
            .filter(|entry| entry.value().assignment.is_some())
            .map(|entry| entry.key().clone())
            .collect();

        for name in placed {
            match self.place(&name).await {
                Ok(epoch) => tracing::info!("Rebalanced graph '{}' (epoch {})", name, epoch),
                Err(e) => tracing::warn!("Rebalancing graph '{}' failed: {}", name, e),
            }
        }
    }

    /// Partitions per worker across every placed graph except `name`.
    pub fn load_excluding(&self, name: &str) -> WorkerLoad {
        let mut load = WorkerLoad::new();
        for entry in self.graphs.iter().filter(|entry| entry.key() != name) {
            if let Some(assignment) = &entry.value().assignment {
                for (worker, count) in assignment.load() {
                    *load.entry(worker).or_insert(0) += count;
                }
            }
        }
        load
    }

    pub fn graph_status(&self, name: &str) -> Option<GraphStatusResponse> {
        self.graphs.get(name).map(|record| GraphStatusResponse {
            name: name.to_string(),
            state: record.state,
            assignment: record.assignment.clone(),
            last_error: record.last_error.clone(),
        })
    }

    pub fn graph_state(&self, name: &str) -> Option<GraphState> {
        self.graphs.get(name).map(|record| record.state)
    }

    pub fn graph_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.graphs.iter().map(|e| e.key().clone()).collect();
        names.sort();
        names
    }

    async fn control_loop(self: Arc<Self>, mut control: Subscription) {
        while let Some(record) = control.next().await {
            match decode::<ControlMessage>(&record.payload) {
                Ok(message) => self.membership.handle_control(message),
                Err(e) => tracing::warn!("Undecodable control message: {}", e),
            }

            if let Err(e) = self
                .transport
                .commit(CONTROL_TOPIC, 0, COORDINATOR_GROUP, record.offset + 1)
                .await
            {
                tracing::warn!("Failed to commit control offset: {}", e);
            }
        }
        tracing::debug!("Coordinator control loop ended");
    }

    async fn rebalance_loop(self: Arc<Self>) {
        let mut changes = self.membership.subscribe_changes();

        while changes.changed().await.is_ok() {
            let version = *changes.borrow_and_update();
            tracing::debug!("Membership changed (version {}), rebalancing", version);
            self.rebalance().await;
        }
    }

    fn lock_background(&self) -> std::sync::MutexGuard<'_, Vec<JoinHandle<()>>> {
        self.background
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}
