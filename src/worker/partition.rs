//! Partition Executor
//!
//! One executor runs per owned `(operator, partition)`. It consumes the
//! partition's topic strictly in offset order and runs one invocation at a
//! time, which is what serialises all invocations of a key.
//!
//! ## Invocation Steps
//! 1. Resolve the handler; unknown operators and functions become routing errors.
//! 2. Run the handler on its own task so a panic is contained to the request.
//! 3. On `Ok`, commit staged writes, then dispatch staged remote calls.
//! 4. Publish the response unless a chained call took over the reply.
//! 5. Commit the record offset for the worker group.

use super::catalog::OperatorCatalog;
use super::context::{InvocationContext, StagedEffects};
use super::handoff::HandoffInbox;
use crate::membership::types::WorkerId;
use crate::protocol::topics::{WORKER_GROUP, operator_topic};
use crate::protocol::{
    BatchInsertEvent, EngineMessage, InvocationEvent, InvocationResponse, RequestId,
    ResponsePayload, decode, encode, entries_to_value, now_ms,
};
use crate::state::{StateBackend, partition_for};
use crate::transport::{Record, Transport};

use dashmap::DashMap;
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;

/// Where a partition's initial state comes from.
///
/// The worker clears it (sends `None`) once the previous owner is no longer
/// live, which lets the executor start empty.
#[derive(Debug, Clone)]
pub struct HandoffSource {
    pub from: WorkerId,
    pub epoch: u64,
    /// Interval between "still waiting" reports.
    pub patience: Duration,
}

pub struct PartitionExecutor {
    pub worker: WorkerId,
    pub operator: String,
    pub partition: u32,
    pub partitions: u32,
    pub backend: Arc<dyn StateBackend>,
    pub catalog: Arc<OperatorCatalog>,
    /// Partition counts of every operator this worker knows, for routing chained calls.
    pub topology: Arc<DashMap<String, u32>>,
    pub transport: Arc<dyn Transport>,
    pub inbox: Arc<HandoffInbox>,
}

/// Result of running one handler.
enum Outcome {
    Completed(Value, StagedEffects),
    Failed(ResponsePayload),
}

impl PartitionExecutor {
    /// Runs until `stop` flips or the subscription ends, then hands back the backend.
    ///
    /// Nothing is consumed while `source` names a previous owner: that owner
    /// may still be finishing the record at the committed offset.
    pub async fn run(
        self,
        mut source: watch::Receiver<Option<HandoffSource>>,
        mut stop: watch::Receiver<bool>,
    ) -> Arc<dyn StateBackend> {
        if !self.await_handoff(&mut source, &mut stop).await {
            return self.backend;
        }

        let topic = operator_topic(&self.operator);
        let mut subscription = match self
            .transport
            .subscribe(&topic, self.partition, WORKER_GROUP)
            .await
        {
            Ok(subscription) => subscription,
            Err(e) => {
                tracing::error!("Failed to subscribe to {}[{}]: {}", topic, self.partition, e);
                return self.backend;
            }
        };

        tracing::info!(
            "Worker {} now serving {}[{}]",
            self.worker,
            self.operator,
            self.partition
        );

        loop {
            tokio::select! {
                biased;
                _ = stop.changed() => break,
                record = subscription.next() => match record {
                    Some(record) => self.process(record).await,
                    None => break,
                },
            }
        }

        tracing::info!(
            "Worker {} released {}[{}]",
            self.worker,
            self.operator,
            self.partition
        );
        self.backend
    }

    /// Returns `false` when stopped before the partition could be served.
    async fn await_handoff(
        &self,
        source: &mut watch::Receiver<Option<HandoffSource>>,
        stop: &mut watch::Receiver<bool>,
    ) -> bool {
        let mut waited_for: Option<HandoffSource> = None;

        loop {
            let Some(current) = source.borrow_and_update().clone() else {
                if let Some(gone) = waited_for {
                    tracing::warn!(
                        "{} left before handing over {}[{}], starting empty",
                        gone.from,
                        self.operator,
                        self.partition
                    );
                    self.inbox.settle(&self.operator, self.partition, gone.epoch);
                }
                return true;
            };

            tokio::select! {
                _ = stop.changed() => return false,
                changed = source.changed() => {
                    if changed.is_err() {
                        return false;
                    }
                }
                entries = self.inbox.wait(&self.operator, self.partition, current.epoch, current.patience) => match entries {
                    Some(entries) => {
                        tracing::info!(
                            "{}[{}] restored {} entries from {}",
                            self.operator,
                            self.partition,
                            entries.len(),
                            current.from
                        );
                        if let Err(e) = self.backend.batch_insert(entries) {
                            tracing::error!(
                                "Failed to restore {}[{}]: {}",
                                self.operator,
                                self.partition,
                                e
                            );
                        }
                        self.inbox.settle(&self.operator, self.partition, current.epoch);
                        return true;
                    }
                    None => tracing::warn!(
                        "Still waiting for {} to hand over {}[{}] (epoch {})",
                        current.from,
                        self.operator,
                        self.partition,
                        current.epoch
                    ),
                },
            }

            waited_for = Some(current);
        }
    }

    async fn process(&self, record: Record) {
        let next_offset = record.offset + 1;

        match decode::<EngineMessage>(&record.payload) {
            Ok(EngineMessage::Invoke(event)) => self.invoke(event, record.timestamp_ms).await,
            Ok(EngineMessage::BatchInsert(event)) => self.batch_insert(event).await,
            Err(e) => tracing::error!(
                "Dropping undecodable record {}[{}]@{}: {}",
                record.topic,
                record.partition,
                record.offset,
                e
            ),
        }

        if let Err(e) = self
            .transport
            .commit(&record.topic, record.partition, WORKER_GROUP, next_offset)
            .await
        {
            tracing::warn!(
                "Failed to commit {}[{}]@{}: {}",
                record.topic,
                record.partition,
                next_offset,
                e
            );
        }
    }

    async fn invoke(&self, event: InvocationEvent, record_timestamp: u64) {
        let in_timestamp = event.in_timestamp.unwrap_or(record_timestamp);

        tracing::trace!(
            "{} {}.{}({}) hop {}",
            event.request_id,
            event.operator,
            event.function,
            event.key,
            event.hop
        );

        let target = partition_for(&event.key, self.partitions);
        let payload = if event.operator != self.operator || target != self.partition {
            ResponsePayload::RoutingError(format!(
                "{}:{} belongs to {}[{}], delivered to {}[{}]",
                event.operator, event.key, event.operator, target, self.operator, self.partition
            ))
        } else {
            let ctx = InvocationContext::keyed(
                &self.operator,
                event.key.clone(),
                self.partition,
                self.partitions,
                event.request_id,
                self.backend.clone(),
            );

            match self.execute(&event.function, ctx, event.params.clone()).await {
                Outcome::Failed(payload) => payload,
                Outcome::Completed(value, effects) => {
                    match self.apply(effects, &event, in_timestamp).await {
                        Ok(true) => return,
                        Ok(false) => ResponsePayload::Value(value),
                        Err(payload) => payload,
                    }
                }
            }
        };

        if let ResponsePayload::DomainError(reason) | ResponsePayload::RoutingError(reason) =
            &payload
        {
            tracing::debug!("Request {} failed: {}", event.request_id, reason);
        }

        self.respond(event.reply_to.as_deref(), event.request_id, in_timestamp, payload)
            .await;
    }

    async fn batch_insert(&self, event: BatchInsertEvent) {
        if event.operator != self.operator || event.partition != self.partition {
            tracing::error!(
                "Batch insert for {}[{}] delivered to {}[{}]",
                event.operator,
                event.partition,
                self.operator,
                self.partition
            );
            return;
        }

        let count = event.entries.len();
        let ctx = InvocationContext::partition_scoped(
            &self.operator,
            self.partition,
            self.partitions,
            event.request_id,
            self.backend.clone(),
        );
        let params = vec![entries_to_value(&event.entries)];

        match self.execute(&event.function, ctx, params).await {
            Outcome::Completed(_, effects) => {
                if !effects.remote_calls.is_empty() {
                    tracing::warn!(
                        "Batch insert {} issued remote calls; they are ignored",
                        event.request_id
                    );
                }
                match self.commit_writes(effects) {
                    Ok(()) => tracing::debug!(
                        "Loaded {} entries into {}[{}]",
                        count,
                        self.operator,
                        self.partition
                    ),
                    Err(payload) => {
                        tracing::error!("Batch insert {} failed: {:?}", event.request_id, payload)
                    }
                }
            }
            Outcome::Failed(payload) => {
                tracing::error!("Batch insert {} failed: {:?}", event.request_id, payload)
            }
        }
    }

    /// Resolves and runs a handler on its own task.
    async fn execute(&self, function: &str, ctx: InvocationContext, params: Vec<Value>) -> Outcome {
        let Some(operator) = self.catalog.get(&self.operator) else {
            return Outcome::Failed(ResponsePayload::RoutingError(format!(
                "unknown operator '{}'",
                self.operator
            )));
        };
        let Some(handler) = operator.handler(function) else {
            return Outcome::Failed(ResponsePayload::RoutingError(format!(
                "unknown function '{}' on operator '{}'",
                function, self.operator
            )));
        };

        let result = tokio::spawn(handler(ctx.clone(), params)).await;
        let effects = ctx.take_effects();

        match result {
            Ok(Ok(value)) => match effects.fault {
                Some(fault) => Outcome::Failed(ResponsePayload::BackendFailure(fault.to_string())),
                None => Outcome::Completed(value, effects),
            },
            Ok(Err(e)) => match effects.fault {
                Some(fault) => Outcome::Failed(ResponsePayload::BackendFailure(fault.to_string())),
                None => Outcome::Failed(ResponsePayload::DomainError(format!("{:#}", e))),
            },
            Err(join_error) => Outcome::Failed(ResponsePayload::DomainError(format!(
                "handler {}.{} panicked: {}",
                self.operator, function, join_error
            ))),
        }
    }

    fn commit_writes(&self, effects: StagedEffects) -> Result<(), ResponsePayload> {
        if effects.writes.is_empty() {
            return Ok(());
        }
        self.backend
            .batch_insert(effects.writes.into_iter().collect())
            .map_err(|e| ResponsePayload::BackendFailure(e.to_string()))
    }

    /// Commits writes and dispatches remote calls.
    ///
    /// Returns `Ok(true)` when a chained call carries the reply onwards.
    async fn apply(
        &self,
        mut effects: StagedEffects,
        event: &InvocationEvent,
        in_timestamp: u64,
    ) -> Result<bool, ResponsePayload> {
        let calls = std::mem::take(&mut effects.remote_calls);
        self.commit_writes(effects)?;

        let Some(last) = calls.len().checked_sub(1) else {
            return Ok(false);
        };

        for (index, call) in calls.into_iter().enumerate() {
            let carries_reply = index == last;

            let Some(partitions) = self.topology.get(&call.operator).map(|p| *p) else {
                let reason = format!("remote call to unknown operator '{}'", call.operator);
                tracing::error!("Request {}: {}", event.request_id, reason);
                if carries_reply {
                    return Err(ResponsePayload::RoutingError(reason));
                }
                continue;
            };

            let partition = partition_for(&call.key, partitions);
            let link = InvocationEvent {
                request_id: event.request_id,
                operator: call.operator,
                key: call.key,
                function: call.function,
                params: call.params,
                reply_to: if carries_reply { event.reply_to.clone() } else { None },
                in_timestamp: Some(in_timestamp),
                hop: event.hop + 1,
            };

            let topic = operator_topic(&link.operator);
            let published = match encode(&EngineMessage::Invoke(link)) {
                Ok(payload) => self
                    .transport
                    .publish(&topic, partition, payload)
                    .await
                    .map_err(|e| e.to_string()),
                Err(e) => Err(e.to_string()),
            };

            if let Err(reason) = published {
                tracing::error!(
                    "Request {}: failed to dispatch chained call to {}[{}]: {}",
                    event.request_id,
                    topic,
                    partition,
                    reason
                );
                if carries_reply {
                    return Err(ResponsePayload::BackendFailure(reason));
                }
            }
        }

        Ok(true)
    }

    async fn respond(
        &self,
        reply_to: Option<&str>,
        request_id: RequestId,
        in_timestamp: u64,
        payload: ResponsePayload,
    ) {
        let Some(reply_to) = reply_to else {
            return;
        };

        let response = InvocationResponse {
            request_id,
            in_timestamp,
            out_timestamp: now_ms().max(in_timestamp),
            payload,
        };

        let bytes = match encode(&response) {
            Ok(bytes) => bytes,
            Err(e) => {
                tracing::error!("Failed to encode response {}: {}", request_id, e);
                return;
            }
        };

        if let Err(e) = self.transport.publish(reply_to, 0, bytes).await {
            tracing::warn!("Failed to publish response {} to {}: {}", request_id, reply_to, e);
        }
    }
}
