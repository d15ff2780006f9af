//! Client Module Tests
//!
//! ## Test Scopes
//! - **Completion Cells**: single assignment, timeouts, late replies.
//! - **Correlation Table**: routing replies by id, the duplicate-completion guard,
//!   bounded tombstones.
//! - **Delivery Log**: bounded delivery timestamps.
//! - **Session**: event routing, reply matching, closing, batch loads.
//! - **Submission**: graph sealing and release around coordinator rejections.

#[cfg(test)]
mod tests {
    use crate::client::correlation::CorrelationTable;
    use crate::client::future::{AbortReason, CompletionCell};
    use crate::client::producer::DeliveryLog;
    use crate::client::submitter::{GraphSubmitter, HttpSubmitter};
    use crate::client::{AsyncClient, EngineResponse};
    use crate::config::ClientConfig;
    use crate::error::{ClientError, SubmissionError};
    use crate::graph::{DataflowGraph, Operator};
    use crate::protocol::topics::operator_topic;
    use crate::protocol::{
        EngineMessage, GraphDescriptor, InvocationResponse, RequestId, ResponsePayload, decode,
        encode,
    };
    use crate::state::{Key, partition_for};
    use crate::transport::{InMemoryBroker, Transport};

    use async_trait::async_trait;
    use serde_json::{Value, json};
    use std::sync::Arc;
    use std::time::Duration;

    struct FixedSubmitter(Result<u64, SubmissionError>);

    #[async_trait]
    impl GraphSubmitter for FixedSubmitter {
        async fn submit(&self, _graph: GraphDescriptor) -> Result<u64, SubmissionError> {
            self.0.clone()
        }
    }

    fn response(request_id: RequestId, value: Value) -> EngineResponse {
        EngineResponse {
            request_id,
            in_timestamp: 10,
            out_timestamp: 25,
            payload: ResponsePayload::Value(value),
        }
    }

    fn graph(partitions: u32) -> (DataflowGraph, Operator) {
        let op = Operator::with_partitions("ycsb", partitions).unwrap();
        op.register("read", |ctx, _params| async move {
            Ok(ctx.get()?.unwrap_or(Value::Null))
        })
        .unwrap();

        let mut graph = DataflowGraph::new("client-test");
        graph.add_operator(op.clone()).unwrap();
        (graph, op)
    }

    async fn open_client(
        broker: &Arc<InMemoryBroker>,
        submitted: Result<u64, SubmissionError>,
        timeout: Duration,
    ) -> AsyncClient {
        AsyncClient::open(
            broker.clone(),
            Arc::new(FixedSubmitter(submitted)),
            ClientConfig::with_timeout(timeout),
        )
        .await
        .unwrap()
    }

    /// Plays the worker: answers the request found at `offset` of the topic.
    async fn reply_to_request(broker: &Arc<InMemoryBroker>, partition: u32, value: Value) {
        let mut sub = broker
            .subscribe(&operator_topic("ycsb"), partition, "test.fake-worker")
            .await
            .unwrap();
        let record = sub.next().await.unwrap();
        broker
            .commit(&operator_topic("ycsb"), partition, "test.fake-worker", record.offset + 1)
            .await
            .unwrap();

        let EngineMessage::Invoke(event) = decode(&record.payload).unwrap() else {
            panic!("expected an invocation");
        };
        let reply = InvocationResponse {
            request_id: event.request_id,
            in_timestamp: record.timestamp_ms,
            out_timestamp: record.timestamp_ms + 1,
            payload: ResponsePayload::Value(value),
        };
        broker
            .publish(event.reply_to.as_deref().unwrap(), 0, encode(&reply).unwrap())
            .await
            .unwrap();
    }

    // ============================================================
    // COMPLETION CELL TESTS
    // ============================================================

    #[test]
    fn test_cell_completes_exactly_once() {
        let id = RequestId::new();
        let cell = CompletionCell::new(id);

        cell.complete(response(id, json!(1))).unwrap();
        let second = cell.complete(response(id, json!(2)));

        assert!(matches!(second, Err(ClientError::AlreadyCompleted { .. })));
        let first = cell.wait_blocking(Duration::from_millis(10)).unwrap();
        assert_eq!(first.value(), Some(&json!(1)));
        assert_eq!(first.engine_latency_ms(), 15);
    }

    #[test]
    fn test_blocking_wait_times_out_and_drops_late_reply() {
        let id = RequestId::new();
        let cell = CompletionCell::new(id);

        let err = cell.wait_blocking(Duration::from_millis(20)).unwrap_err();
        assert!(matches!(err, ClientError::TimedOut { request_id, .. } if request_id == id));

        // The engine may still answer; that reply is tolerated and ignored.
        cell.complete(response(id, json!("late"))).unwrap();
        assert!(!cell.is_completed());
    }

    #[test]
    fn test_blocking_wait_wakes_on_completion_from_other_thread() {
        let id = RequestId::new();
        let cell = CompletionCell::new(id);

        let writer = cell.clone();
        let handle = std::thread::spawn(move || {
            std::thread::sleep(Duration::from_millis(20));
            writer.complete(response(id, json!("ok"))).unwrap();
        });

        let result = cell.wait_blocking(Duration::from_secs(5)).unwrap();
        handle.join().unwrap();
        assert_eq!(result.value(), Some(&json!("ok")));
    }

    #[tokio::test]
    async fn test_many_async_readers_observe_one_completion() {
        let id = RequestId::new();
        let cell = CompletionCell::new(id);

        let mut readers = Vec::new();
        for _ in 0..8 {
            let cell = cell.clone();
            readers.push(tokio::spawn(async move {
                cell.wait_async(Duration::from_secs(5)).await
            }));
        }

        tokio::time::sleep(Duration::from_millis(10)).await;
        cell.complete(response(id, json!(7))).unwrap();

        for reader in readers {
            let result = reader.await.unwrap().unwrap();
            assert_eq!(result.value(), Some(&json!(7)));
        }
    }

    #[tokio::test]
    async fn test_abort_reports_reason() {
        let id = RequestId::new();
        let cell = CompletionCell::new(id);

        assert!(cell.abort(AbortReason::Closed));
        assert!(!cell.abort(AbortReason::ReceiveLoopStopped));

        let err = cell.wait_async(Duration::from_secs(1)).await.unwrap_err();
        assert!(matches!(err, ClientError::Closed));
    }

    // ============================================================
    // CORRELATION TABLE TESTS
    // ============================================================

    #[test]
    fn test_reply_for_unknown_request_is_dropped() {
        let table = CorrelationTable::new();

        table.deliver(response(RequestId::new(), json!(1))).unwrap();

        assert!(!table.is_poisoned());
        assert!(table.is_empty());
    }

    #[test]
    fn test_duplicate_reply_poisons_table() {
        let table = CorrelationTable::new();
        let done = RequestId::new();
        let waiting = RequestId::new();
        table.register(done).unwrap();
        let waiting_cell = table.register(waiting).unwrap();

        table.deliver(response(done, json!(1))).unwrap();
        let err = table.deliver(response(done, json!(1))).unwrap_err();

        assert!(matches!(err, ClientError::ProtocolViolation(_)));
        assert!(table.is_poisoned());
        assert!(matches!(
            table.register(RequestId::new()),
            Err(ClientError::ProtocolViolation(_))
        ));
        // Other pending requests fail instead of waiting for their timeout.
        assert!(matches!(
            waiting_cell.wait_blocking(Duration::from_secs(1)),
            Err(ClientError::ProtocolViolation(_))
        ));
    }

    #[test]
    fn test_late_reply_after_timeout_is_tolerated() {
        let table = CorrelationTable::new();
        let id = RequestId::new();
        let cell = table.register(id).unwrap();

        assert!(cell.wait_blocking(Duration::from_millis(5)).is_err());
        table.deliver(response(id, json!(1))).unwrap();
        table.deliver(response(id, json!(1))).unwrap();

        assert!(!table.is_poisoned());
        assert!(table.outstanding().is_empty());
    }

    #[test]
    fn test_reusing_request_id_is_rejected() {
        let table = CorrelationTable::new();
        let id = RequestId::new();
        table.register(id).unwrap();

        assert!(matches!(
            table.register(id),
            Err(ClientError::ProtocolViolation(_))
        ));
    }

    #[test]
    fn test_tombstones_are_bounded_by_retention() {
        let table = CorrelationTable::with_retention(2);
        let ids: Vec<RequestId> = (0..3).map(|_| RequestId::new()).collect();
        for id in &ids {
            table.register(*id).unwrap();
            table.deliver(response(*id, json!(1))).unwrap();
        }

        assert_eq!(table.len(), 2);

        // The oldest id is forgotten: its duplicate counts as an unknown reply.
        table.deliver(response(ids[0], json!(1))).unwrap();
        assert!(!table.is_poisoned());

        // Recent ids are still guarded.
        assert!(table.deliver(response(ids[2], json!(1))).is_err());
        assert!(table.is_poisoned());
    }

    #[test]
    fn test_sweep_releases_timed_out_cells() {
        let table = CorrelationTable::with_retention(10);
        let id = RequestId::new();
        let cell = table.register(id).unwrap();
        assert!(cell.wait_blocking(Duration::from_millis(5)).is_err());

        assert_eq!(table.sweep(), 1);
        assert_eq!(Arc::strong_count(&cell), 1);
        assert_eq!(table.sweep(), 0);

        table.deliver(response(id, json!(1))).unwrap();
        assert!(!table.is_poisoned());
    }

    // ============================================================
    // DELIVERY LOG TESTS
    // ============================================================

    #[test]
    fn test_delivery_log_keeps_newest_entries() {
        let log = DeliveryLog::new(2);
        let ids: Vec<RequestId> = (0..3).map(|_| RequestId::new()).collect();
        for (i, id) in ids.iter().enumerate() {
            log.record(*id, 100 + i as u64);
        }

        assert_eq!(log.len(), 2);
        assert_eq!(log.get(&ids[0]), None);
        assert_eq!(log.snapshot(), vec![(ids[1], 101), (ids[2], 102)]);

        assert_eq!(log.drain(), vec![(ids[1], 101), (ids[2], 102)]);
        assert!(log.is_empty());
        assert!(log.snapshot().is_empty());
    }

    // ============================================================
    // SESSION TESTS
    // ============================================================

    #[tokio::test]
    async fn test_event_routed_by_key_and_reply_matched() {
        let broker = InMemoryBroker::new();
        let client = open_client(&broker, Ok(1), Duration::from_secs(5)).await;
        let (graph, ycsb) = graph(4);
        client.submit_dataflow(&graph).await.unwrap();

        let future = client.send_event(&ycsb, 6, "read", vec![]).await.unwrap();
        let partition = partition_for(&Key::Int(6), 4);
        assert_eq!(partition, 2);

        reply_to_request(&broker, partition, json!("value-6")).await;
        let reply = future.get().await.unwrap();

        assert_eq!(reply.request_id, future.request_id());
        assert_eq!(reply.value(), Some(&json!("value-6")));
        assert!(client.outstanding().is_empty());

        client.flush().await.unwrap();
        assert!(client.delivered_at(&future.request_id()).is_some());
        client.close().await;
    }

    #[tokio::test]
    async fn test_get_times_out_without_reply() {
        let broker = InMemoryBroker::new();
        let client = open_client(&broker, Ok(1), Duration::from_millis(50)).await;
        let (graph, ycsb) = graph(2);
        client.submit_dataflow(&graph).await.unwrap();

        let future = client.send_event(&ycsb, 1, "read", vec![]).await.unwrap();
        let err = future.get().await.unwrap_err();

        assert!(matches!(err, ClientError::TimedOut { .. }));
        client.close().await;
    }

    #[tokio::test]
    async fn test_send_to_unsubmitted_operator_fails() {
        let broker = InMemoryBroker::new();
        let client = open_client(&broker, Ok(1), Duration::from_secs(1)).await;
        let (_graph, ycsb) = graph(2);

        let err = client.send_event(&ycsb, 1, "read", vec![]).await.unwrap_err();
        assert!(matches!(err, ClientError::UnknownOperator(name) if name == "ycsb"));

        client.close().await;
    }

    #[tokio::test]
    async fn test_close_aborts_pending_and_rejects_new_events() {
        let broker = InMemoryBroker::new();
        let client = open_client(&broker, Ok(1), Duration::from_secs(30)).await;
        let (graph, ycsb) = graph(2);
        client.submit_dataflow(&graph).await.unwrap();

        let future = client.send_event(&ycsb, 1, "read", vec![]).await.unwrap();
        client.close().await;
        client.close().await;

        assert!(matches!(future.get().await, Err(ClientError::Closed)));
        assert!(matches!(
            client.send_event(&ycsb, 1, "read", vec![]).await,
            Err(ClientError::Closed)
        ));
    }

    #[tokio::test]
    async fn test_batch_insert_checks_partition_range() {
        let broker = InMemoryBroker::new();
        let client = open_client(&broker, Ok(1), Duration::from_secs(1)).await;
        let (graph, ycsb) = graph(2);
        client.submit_dataflow(&graph).await.unwrap();

        let entries = vec![(Key::Int(0), json!(1)), (Key::Int(2), json!(1))];
        client
            .send_batch_insert(&ycsb, 0, "insert_batch", entries.clone())
            .await
            .unwrap();
        let err = client
            .send_batch_insert(&ycsb, 2, "insert_batch", entries)
            .await
            .unwrap_err();
        client.flush().await.unwrap();

        assert!(matches!(err, ClientError::InvalidPartition { partition: 2, .. }));
        assert_eq!(broker.end_offset(&operator_topic("ycsb"), 0), 1);
        client.close().await;
    }

    // ============================================================
    // SUBMISSION TESTS
    // ============================================================

    #[tokio::test]
    async fn test_rejected_submission_releases_operators() {
        let broker = InMemoryBroker::new();
        let client = open_client(
            &broker,
            Err(SubmissionError::Conflict("client-test".to_string())),
            Duration::from_secs(1),
        )
        .await;
        let (graph, ycsb) = graph(2);

        let err = client.submit_dataflow(&graph).await.unwrap_err();

        assert!(matches!(err, ClientError::Submission(SubmissionError::Conflict(_))));
        assert!(!ycsb.is_sealed());
        ycsb.set_partition_count(3).unwrap();
        client.close().await;
    }

    #[tokio::test]
    async fn test_no_workers_keeps_graph_sealed() {
        let broker = InMemoryBroker::new();
        let client = open_client(
            &broker,
            Err(SubmissionError::NoWorkers("client-test".to_string())),
            Duration::from_secs(1),
        )
        .await;
        let (graph, ycsb) = graph(2);

        let err = client.submit_dataflow(&graph).await.unwrap_err();

        assert!(matches!(err, ClientError::Submission(SubmissionError::NoWorkers(_))));
        assert!(ycsb.is_sealed());
        client.close().await;
    }

    #[tokio::test]
    async fn test_http_submitter_reports_unreachable_coordinator() {
        let submitter = HttpSubmitter::new("http://127.0.0.1:1", Duration::from_millis(200), 1);
        let (graph, _ycsb) = graph(2);

        let err = submitter.submit(graph.descriptor()).await.unwrap_err();

        assert!(matches!(err, SubmissionError::Unreachable(_)));
    }
}
