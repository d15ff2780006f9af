use super::future::{AbortReason, CompletionCell};
use crate::error::{ClientError, TransportError};
use crate::protocol::RequestId;
use crate::transport::Transport;

use dashmap::DashMap;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;

enum Command {
    Publish {
        topic: String,
        partition: u32,
        payload: Vec<u8>,
        request_id: RequestId,
        /// Absent for fire-and-forget messages such as batch inserts.
        cell: Option<Arc<CompletionCell>>,
    },
    Flush(oneshot::Sender<()>),
}

/// Broker append times of delivered requests, newest `retention` only.
#[derive(Debug)]
pub struct DeliveryLog {
    times: DashMap<RequestId, u64>,
    /// Insertion order, oldest first.
    order: Mutex<VecDeque<RequestId>>,
    retention: usize,
}

impl DeliveryLog {
    pub fn new(retention: usize) -> Self {
        Self {
            times: DashMap::new(),
            order: Mutex::new(VecDeque::new()),
            retention: retention.max(1),
        }
    }

    pub fn record(&self, request_id: RequestId, timestamp_ms: u64) {
        let expired: Vec<RequestId> = {
            let mut order = self.order.lock().unwrap_or_else(|p| p.into_inner());
            order.push_back(request_id);
            let excess = order.len().saturating_sub(self.retention);
            order.drain(..excess).collect()
        };
        self.times.insert(request_id, timestamp_ms);
        for id in expired {
            self.times.remove(&id);
        }
    }

    pub fn get(&self, request_id: &RequestId) -> Option<u64> {
        self.times.get(request_id).map(|entry| *entry)
    }

    /// Oldest first.
    pub fn snapshot(&self) -> Vec<(RequestId, u64)> {
        let order = self.order.lock().unwrap_or_else(|p| p.into_inner());
        order
            .iter()
            .filter_map(|id| self.times.get(id).map(|time| (*id, *time)))
            .collect()
    }

    /// Returns every recorded time, oldest first, and forgets them.
    pub fn drain(&self) -> Vec<(RequestId, u64)> {
        let mut order = self.order.lock().unwrap_or_else(|p| p.into_inner());
        order
            .drain(..)
            .filter_map(|id| self.times.remove(&id))
            .collect()
    }

    pub fn len(&self) -> usize {
        self.times.len()
    }

    pub fn is_empty(&self) -> bool {
        self.times.is_empty()
    }
}

/// Buffered, ordered publisher of one session.
///
/// `publish` only waits for buffer space; a background task performs the
/// actual sends in submission order. A failed send aborts the request's cell
/// so its caller sees `Undelivered` instead of a timeout.
pub struct Producer {
    sender: Mutex<Option<mpsc::Sender<Command>>>,
    task: Mutex<Option<JoinHandle<()>>>,
    delivered: Arc<DeliveryLog>,
}

impl Producer {
    pub fn spawn(transport: Arc<dyn Transport>, capacity: usize, retention: usize) -> Self {
        let (sender, receiver) = mpsc::channel(capacity.max(1));
        let delivered = Arc::new(DeliveryLog::new(retention));
        let task = tokio::spawn(Self::run(transport, receiver, delivered.clone()));

        Self {
            sender: Mutex::new(Some(sender)),
            task: Mutex::new(Some(task)),
            delivered,
        }
    }

    async fn run(
        transport: Arc<dyn Transport>,
        mut receiver: mpsc::Receiver<Command>,
        delivered: Arc<DeliveryLog>,
    ) {
        while let Some(command) = receiver.recv().await {
            match command {
                Command::Publish {
                    topic,
                    partition,
                    payload,
                    request_id,
                    cell,
                } => match transport.publish(&topic, partition, payload).await {
                    Ok(metadata) => {
                        delivered.record(request_id, metadata.timestamp_ms);
                    }
                    Err(e) => {
                        tracing::error!(
                            "Failed to publish request {} to {}/{}: {}",
                            request_id,
                            topic,
                            partition,
                            e
                        );
                        if let Some(cell) = cell {
                            cell.abort(AbortReason::Undelivered(e.to_string()));
                        }
                    }
                },
                Command::Flush(done) => {
                    let _ = done.send(());
                }
            }
        }
        tracing::debug!("Producer drained");
    }

    pub async fn publish(
        &self,
        topic: String,
        partition: u32,
        payload: Vec<u8>,
        request_id: RequestId,
        cell: Option<Arc<CompletionCell>>,
    ) -> Result<(), ClientError> {
        let sender = self.sender()?;
        sender
            .send(Command::Publish {
                topic,
                partition,
                payload,
                request_id,
                cell,
            })
            .await
            .map_err(|_| ClientError::Transport(TransportError::ProducerStopped))
    }

    /// Resolves once everything published before the call has been sent.
    pub async fn flush(&self) -> Result<(), ClientError> {
        let sender = self.sender()?;
        let (done, wait) = oneshot::channel();
        sender
            .send(Command::Flush(done))
            .await
            .map_err(|_| ClientError::Transport(TransportError::ProducerStopped))?;
        wait.await
            .map_err(|_| ClientError::Transport(TransportError::ProducerStopped))
    }

    /// Stops accepting messages and waits for the buffer to drain.
    pub async fn close(&self) {
        let sender = self.sender.lock().unwrap_or_else(|p| p.into_inner()).take();
        drop(sender);

        let task = self.task.lock().unwrap_or_else(|p| p.into_inner()).take();
        if let Some(task) = task
            && let Err(e) = task.await
        {
            tracing::warn!("Producer task ended abnormally: {}", e);
        }
    }

    /// Stops the background task without draining the buffer.
    pub fn abort(&self) {
        self.sender.lock().unwrap_or_else(|p| p.into_inner()).take();
        if let Some(task) = self.task.lock().unwrap_or_else(|p| p.into_inner()).take() {
            task.abort();
        }
    }

    /// Broker append time of a delivered request, if known.
    pub fn delivered_at(&self, request_id: &RequestId) -> Option<u64> {
        self.delivered.get(request_id)
    }

    /// Broker append times of the retained delivered requests, oldest first.
    pub fn delivery_timestamps(&self) -> Vec<(RequestId, u64)> {
        self.delivered.snapshot()
    }

    /// Like `delivery_timestamps`, but forgets what it returns.
    pub fn take_delivery_timestamps(&self) -> Vec<(RequestId, u64)> {
        self.delivered.drain()
    }

    fn sender(&self) -> Result<mpsc::Sender<Command>, ClientError> {
        self.sender
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .clone()
            .ok_or(ClientError::Closed)
    }
}
