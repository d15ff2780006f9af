//! Client Session
//!
//! Shared engine of both client flavors: owns the reply subscription, the
//! correlation table and the buffered producer.

use super::correlation::CorrelationTable;
use super::future::{AbortReason, ResponseFuture};
use super::producer::Producer;
use super::submitter::GraphSubmitter;
use crate::config::ClientConfig;
use crate::error::{ClientError, SubmissionError};
use crate::graph::{DataflowGraph, Operator};
use crate::protocol::topics::{operator_topic, reply_topic};
use crate::protocol::{
    BatchInsertEvent, EngineMessage, InvocationEvent, InvocationResponse, RequestId, decode,
    encode,
};
use crate::state::{Key, partition_for};
use crate::transport::{Subscription, Transport};

use dashmap::DashMap;
use serde_json::Value;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use tokio::task::JoinHandle;

pub struct Session {
    transport: Arc<dyn Transport>,
    submitter: Arc<dyn GraphSubmitter>,
    config: ClientConfig,
    reply_topic: String,
    table: Arc<CorrelationTable>,
    producer: Producer,
    /// Partition counts of the operators of every graph this session submitted.
    topology: DashMap<String, u32>,
    receive_loop: Mutex<Option<JoinHandle<()>>>,
    closed: AtomicBool,
}

impl Session {
    /// Subscribes to a fresh reply topic and starts the receive loop.
    ///
    /// Must run inside a tokio runtime.
    pub async fn open(
        transport: Arc<dyn Transport>,
        submitter: Arc<dyn GraphSubmitter>,
        config: ClientConfig,
    ) -> Result<Self, ClientError> {
        let reply_topic = reply_topic();
        let subscription = transport
            .subscribe(&reply_topic, 0, &reply_topic)
            .await?;

        let table = Arc::new(CorrelationTable::with_retention(config.retention));
        let receive_loop = tokio::spawn(Self::receive_loop(subscription, table.clone()));
        let producer = Producer::spawn(
            transport.clone(),
            config.producer_capacity,
            config.retention,
        );

        tracing::debug!("Client session opened on {}", reply_topic);

        Ok(Self {
            transport,
            submitter,
            config,
            reply_topic,
            table,
            producer,
            topology: DashMap::new(),
            receive_loop: Mutex::new(Some(receive_loop)),
            closed: AtomicBool::new(false),
        })
    }

    /// The only writer of completion cells.
    async fn receive_loop(mut subscription: Subscription, table: Arc<CorrelationTable>) {
        while let Some(record) = subscription.next().await {
            let response: InvocationResponse = match decode(&record.payload) {
                Ok(response) => response,
                Err(e) => {
                    tracing::warn!(
                        "Skipping undecodable reply at {}/{}@{}: {}",
                        record.topic,
                        record.partition,
                        record.offset,
                        e
                    );
                    continue;
                }
            };

            tracing::trace!("Reply for {} at offset {}", response.request_id, record.offset);

            if table.deliver(response.into()).is_err() {
                // The table is poisoned and has already aborted every pending request.
                break;
            }
        }

        let aborted = table.abort_pending(AbortReason::ReceiveLoopStopped);
        if aborted > 0 {
            tracing::warn!(
                "Reply subscription {} ended with {} requests pending",
                subscription.topic(),
                aborted
            );
        }
    }

    /// Seals the graph and submits its descriptor to the coordinator.
    ///
    /// Returns the epoch of the first assignment. A rejected graph is
    /// released again so it can be fixed or resubmitted; the exception is
    /// `NoWorkers`, where the coordinator keeps the graph and retries.
    pub async fn submit_dataflow(&self, graph: &DataflowGraph) -> Result<u64, ClientError> {
        self.ensure_open()?;

        let descriptor = graph.seal()?;
        match self.submitter.submit(descriptor.clone()).await {
            Ok(epoch) => {
                self.remember(&descriptor.operators);
                tracing::info!("Submitted graph '{}' (epoch {})", graph.name(), epoch);
                Ok(epoch)
            }
            Err(SubmissionError::NoWorkers(name)) => {
                self.remember(&descriptor.operators);
                Err(SubmissionError::NoWorkers(name).into())
            }
            Err(e) => {
                graph.release();
                Err(e.into())
            }
        }
    }

    fn remember(&self, operators: &[crate::protocol::OperatorDescriptor]) {
        for op in operators {
            self.topology.insert(op.name.clone(), op.partitions);
        }
    }

    /// Sends a keyed invocation and returns its completion handle immediately.
    pub async fn send_event(
        &self,
        operator: &Operator,
        key: impl Into<Key>,
        function: &str,
        params: Vec<Value>,
    ) -> Result<ResponseFuture, ClientError> {
        self.send_event_by_name(operator.name(), key, function, params)
            .await
    }

    pub async fn send_event_by_name(
        &self,
        operator: &str,
        key: impl Into<Key>,
        function: &str,
        params: Vec<Value>,
    ) -> Result<ResponseFuture, ClientError> {
        self.ensure_open()?;

        let partitions = self.partitions_of(operator)?;
        let key = key.into();
        let partition = partition_for(&key, partitions);

        let request_id = RequestId::new();
        let event = EngineMessage::Invoke(InvocationEvent {
            request_id,
            operator: operator.to_string(),
            key,
            function: function.to_string(),
            params,
            reply_to: Some(self.reply_topic.clone()),
            in_timestamp: None,
            hop: 0,
        });
        let payload = encode(&event)?;

        let cell = self.table.register(request_id)?;
        if let Err(e) = self
            .producer
            .publish(
                operator_topic(operator),
                partition,
                payload,
                request_id,
                Some(cell.clone()),
            )
            .await
        {
            self.table
                .abandon(&request_id, AbortReason::Undelivered(e.to_string()));
            return Err(e);
        }

        Ok(ResponseFuture::new(cell, self.config.request_timeout))
    }

    /// Bulk load addressed at one partition. No response is produced.
    pub async fn send_batch_insert(
        &self,
        operator: &Operator,
        partition: u32,
        function: &str,
        entries: Vec<(Key, Value)>,
    ) -> Result<RequestId, ClientError> {
        self.ensure_open()?;

        let partitions = self.partitions_of(operator.name())?;
        if partition >= partitions {
            return Err(ClientError::InvalidPartition {
                operator: operator.name().to_string(),
                partition,
                partitions,
            });
        }

        let request_id = RequestId::new();
        let event = EngineMessage::BatchInsert(BatchInsertEvent {
            request_id,
            operator: operator.name().to_string(),
            partition,
            function: function.to_string(),
            entries,
        });
        let payload = encode(&event)?;

        self.producer
            .publish(
                operator_topic(operator.name()),
                partition,
                payload,
                request_id,
                None,
            )
            .await?;

        Ok(request_id)
    }

    /// Resolves once every event sent so far has been handed to the transport.
    pub async fn flush(&self) -> Result<(), ClientError> {
        self.ensure_open()?;
        self.producer.flush().await
    }

    /// Drains outbound events, stops the receive loop and aborts pending
    /// requests with `Closed`. Idempotent.
    pub async fn close(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }

        self.producer.close().await;
        self.stop_receive_loop();
        tracing::debug!("Client session on {} closed", self.reply_topic);
    }

    /// Synchronous teardown for drop paths: nothing buffered is drained.
    pub fn shutdown_now(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }

        self.producer.abort();
        self.stop_receive_loop();
    }

    fn stop_receive_loop(&self) {
        if let Some(handle) = self
            .receive_loop
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .take()
        {
            handle.abort();
        }
        let aborted = self.table.abort_pending(AbortReason::Closed);
        if aborted > 0 {
            tracing::debug!("Aborted {} pending requests on close", aborted);
        }
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    pub fn reply_topic(&self) -> &str {
        &self.reply_topic
    }

    /// Requests still waiting for a reply.
    pub fn outstanding(&self) -> Vec<RequestId> {
        self.table.outstanding()
    }

    /// Broker append time of every event this session delivered.
    pub fn delivery_timestamps(&self) -> Vec<(RequestId, u64)> {
        self.producer.delivery_timestamps()
    }

    pub fn take_delivery_timestamps(&self) -> Vec<(RequestId, u64)> {
        self.producer.take_delivery_timestamps()
    }

    pub fn delivered_at(&self, request_id: &RequestId) -> Option<u64> {
        self.producer.delivered_at(request_id)
    }

    pub fn transport(&self) -> &Arc<dyn Transport> {
        &self.transport
    }

    fn partitions_of(&self, operator: &str) -> Result<u32, ClientError> {
        self.topology
            .get(operator)
            .map(|entry| *entry)
            .ok_or_else(|| ClientError::UnknownOperator(operator.to_string()))
    }

    fn ensure_open(&self) -> Result<(), ClientError> {
        if self.is_closed() {
            return Err(ClientError::Closed);
        }
        self.table.check()
    }
}
