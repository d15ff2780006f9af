use crate::client::{AsyncClient, SyncClient};
use crate::config::{ClientConfig, EngineConfig};
use crate::coordinator::Coordinator;
use crate::error::ClientError;
use crate::membership::service::MembershipService;
use crate::membership::types::WorkerId;
use crate::transport::{InMemoryBroker, Transport};
use crate::worker::{OperatorCatalog, Worker, WorkerSettings};

use anyhow::Context;
use dashmap::DashMap;
use std::sync::Arc;
use std::time::Duration;

/// A coordinator and its workers in one process, sharing an in-memory broker.
pub struct LocalCluster {
    config: EngineConfig,
    broker: Arc<InMemoryBroker>,
    coordinator: Arc<Coordinator>,
    catalog: Arc<OperatorCatalog>,
    workers: DashMap<WorkerId, Arc<Worker>>,
}

impl LocalCluster {
    /// Starts the coordinator, then `config.workers` workers that can execute
    /// every operator of `catalog`. Returns once all workers are live.
    pub async fn start(config: EngineConfig, catalog: Arc<OperatorCatalog>) -> anyhow::Result<Self> {
        let broker = InMemoryBroker::new();
        let membership = MembershipService::from_config(&config);
        let coordinator = Coordinator::new(membership, config.scheduler.build(), broker.clone());
        coordinator
            .start()
            .await
            .context("Failed to start coordinator")?;

        let cluster = Self {
            config,
            broker,
            coordinator,
            catalog,
            workers: DashMap::new(),
        };

        for _ in 0..cluster.config.workers {
            cluster.add_worker().await?;
        }
        cluster
            .wait_for_workers(cluster.config.workers, Duration::from_secs(5))
            .await?;

        tracing::info!(
            "Local cluster up with {} workers ({:?} operators)",
            cluster.config.workers,
            cluster.catalog.names()
        );
        Ok(cluster)
    }

    pub async fn add_worker(&self) -> anyhow::Result<WorkerId> {
        let worker = Worker::new(
            self.catalog.clone(),
            self.broker.clone(),
            WorkerSettings::from(&self.config),
        );
        worker.start().await.context("Failed to start worker")?;

        let id = worker.id.clone();
        self.workers.insert(id.clone(), worker);
        Ok(id)
    }

    /// Gracefully stops one worker. Its partitions move to the others on the
    /// next rebalance and restart from their committed offsets.
    pub async fn stop_worker(&self, id: &WorkerId) -> bool {
        let Some((_, worker)) = self.workers.remove(id) else {
            return false;
        };
        worker.stop().await;
        true
    }

    /// Polls membership until at least `count` workers are live.
    pub async fn wait_for_workers(&self, count: usize, timeout: Duration) -> anyhow::Result<()> {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            let live = self.coordinator.membership.live_workers().len();
            if live >= count {
                return Ok(());
            }
            if tokio::time::Instant::now() >= deadline {
                anyhow::bail!("Only {} of {} workers registered within {:?}", live, count, timeout);
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    }

    pub fn coordinator(&self) -> &Arc<Coordinator> {
        &self.coordinator
    }

    pub fn transport(&self) -> Arc<dyn Transport> {
        self.broker.clone()
    }

    pub fn worker(&self, id: &WorkerId) -> Option<Arc<Worker>> {
        self.workers.get(id).map(|entry| entry.value().clone())
    }

    pub fn worker_ids(&self) -> Vec<WorkerId> {
        let mut ids: Vec<WorkerId> = self.workers.iter().map(|entry| entry.key().clone()).collect();
        ids.sort();
        ids
    }

    /// An async client submitting graphs straight to this cluster's coordinator.
    pub async fn async_client(&self, config: ClientConfig) -> Result<AsyncClient, ClientError> {
        AsyncClient::open(self.broker.clone(), self.coordinator.clone(), config).await
    }

    /// A blocking client. Must be called outside of any async context.
    pub fn sync_client(&self, config: ClientConfig) -> Result<SyncClient, ClientError> {
        SyncClient::open(self.broker.clone(), self.coordinator.clone(), config)
    }

    pub async fn shutdown(&self) {
        let ids = self.worker_ids();
        for id in ids {
            self.stop_worker(&id).await;
        }
        self.coordinator.stop();
        self.broker.shutdown();
        tracing::info!("Local cluster stopped");
    }
}
