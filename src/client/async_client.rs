use super::future::ResponseFuture;
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

/// Client whose `get()` suspends the calling task, so one task can keep many
/// requests in flight.
///
/// ```ignore
/// let client = AsyncClient::open(transport, submitter, ClientConfig::default()).await?;
/// client.submit_dataflow(&graph).await?;
/// let reply = client.send_event(&ycsb, 42, "read", vec![]).await?.get().await?;
/// client.close().await;
/// ```
pub struct AsyncClient {
    session: Session,
}

impl AsyncClient {
    pub async fn open(
        transport: Arc<dyn Transport>,
        submitter: Arc<dyn GraphSubmitter>,
        config: ClientConfig,
    ) -> Result<Self, ClientError> {
        let session = Session::open(transport, submitter, config).await?;
        Ok(Self { session })
    }

    /// Opens a client that submits graphs over the coordinator's HTTP API.
    pub async fn connect(
        transport: Arc<dyn Transport>,
        config: ClientConfig,
    ) -> Result<Self, ClientError> {
        let submitter = Arc::new(HttpSubmitter::new(
            &config.coordinator_url,
            config.submit_timeout,
            config.submit_attempts,
        ));
        Self::open(transport, submitter, config).await
    }

    pub async fn submit_dataflow(&self, graph: &DataflowGraph) -> Result<u64, ClientError> {
        self.session.submit_dataflow(graph).await
    }

    pub async fn send_event(
        &self,
        operator: &Operator,
        key: impl Into<Key>,
        function: &str,
        params: Vec<Value>,
    ) -> Result<ResponseFuture, ClientError> {
        self.session.send_event(operator, key, function, params).await
    }

    pub async fn send_event_by_name(
        &self,
        operator: &str,
        key: impl Into<Key>,
        function: &str,
        params: Vec<Value>,
    ) -> Result<ResponseFuture, ClientError> {
        self.session
            .send_event_by_name(operator, key, function, params)
            .await
    }

    pub async fn send_batch_insert(
        &self,
        operator: &Operator,
        partition: u32,
        function: &str,
        entries: Vec<(Key, Value)>,
    ) -> Result<RequestId, ClientError> {
        self.session
            .send_batch_insert(operator, partition, function, entries)
            .await
    }

    pub async fn flush(&self) -> Result<(), ClientError> {
        self.session.flush().await
    }

    pub async fn close(&self) {
        self.session.close().await
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

    pub fn delivered_at(&self, request_id: &RequestId) -> Option<u64> {
        self.session.delivered_at(request_id)
    }

    pub fn reply_topic(&self) -> &str {
        self.session.reply_topic()
    }
}

impl Drop for AsyncClient {
    fn drop(&mut self) {
        self.session.shutdown_now();
    }
}
