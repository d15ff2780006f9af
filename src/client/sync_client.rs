use super::future::BlockingFuture;
use super::session::Session;
use super::submitter::{GraphSubmitter, HttpSubmitter};
use crate::config::ClientConfig;
use crate::error::ClientError;
use crate::graph::{DataflowGraph, Operator};
use crate::protocol::RequestId;
use crate::state::Key;
use crate::transport::Transport;

use serde_json::Value;
use std::sync::Arc;
use tokio::runtime::Runtime;

/// Blocking client for thread-per-workflow load generators.
///
/// Owns a private runtime that drives the reply subscription and the producer,
/// so it must be created and used outside of any async context. Many threads
/// may share one `SyncClient`; each `get()` blocks only its caller.
pub struct SyncClient {
    session: Session,
    runtime: Runtime,
}

impl SyncClient {
    pub fn open(
        transport: Arc<dyn Transport>,
        submitter: Arc<dyn GraphSubmitter>,
        config: ClientConfig,
    ) -> Result<Self, ClientError> {
        let runtime = tokio::runtime::Builder::new_multi_thread()
            .worker_threads(2)
            .thread_name("stateflow-client")
            .enable_all()
            .build()?;

        let session = runtime.block_on(Session::open(transport, submitter, config))?;
        Ok(Self { session, runtime })
    }

    pub fn connect(transport: Arc<dyn Transport>, config: ClientConfig) -> Result<Self, ClientError> {
        let submitter = Arc::new(HttpSubmitter::new(
            &config.coordinator_url,
            config.submit_timeout,
            config.submit_attempts,
        ));
        Self::open(transport, submitter, config)
    }

    pub fn submit_dataflow(&self, graph: &DataflowGraph) -> Result<u64, ClientError> {
        self.runtime.block_on(self.session.submit_dataflow(graph))
    }

    pub fn send_event(
        &self,
        operator: &Operator,
        key: impl Into<Key>,
        function: &str,
        params: Vec<Value>,
    ) -> Result<BlockingFuture, ClientError> {
        self.runtime
            .block_on(self.session.send_event(operator, key, function, params))
            .map(|future| future.into_blocking())
    }

    pub fn send_event_by_name(
        &self,
        operator: &str,
        key: impl Into<Key>,
        function: &str,
        params: Vec<Value>,
    ) -> Result<BlockingFuture, ClientError> {
        self.runtime
            .block_on(
                self.session
                    .send_event_by_name(operator, key, function, params),
            )
            .map(|future| future.into_blocking())
    }

    pub fn send_batch_insert(
        &self,
        operator: &Operator,
        partition: u32,
        function: &str,
        entries: Vec<(Key, Value)>,
    ) -> Result<RequestId, ClientError> {
        self.runtime.block_on(
            self.session
                .send_batch_insert(operator, partition, function, entries),
        )
    }

    pub fn flush(&self) -> Result<(), ClientError> {
        self.runtime.block_on(self.session.flush())
    }

    pub fn close(&self) {
        self.runtime.block_on(self.session.close())
    }

    pub fn is_closed(&self) -> bool {
        self.session.is_closed()
    }

    pub fn outstanding(&self) -> Vec<RequestId> {
        self.session.outstanding()
    }

    pub fn delivery_timestamps(&self) -> Vec<(RequestId, u64)> {
        self.session.delivery_timestamps()
    }

    /// Returns and forgets the recorded delivery times, for load generators
    /// that collect them periodically.
    pub fn take_delivery_timestamps(&self) -> Vec<(RequestId, u64)> {
        self.session.take_delivery_timestamps()
    }

    pub fn reply_topic(&self) -> &str {
        self.session.reply_topic()
    }
}

impl Drop for SyncClient {
    fn drop(&mut self) {
        self.session.shutdown_now();
    }
}
