//! Worker Module Tests
//!
//! ## Test Scopes
//! - **Context**: staged reads and writes, partition confinement of batch loads.
//! - **Execution**: replies, domain and routing errors, panics, chaining.
//! - **Ownership**: stale assignments, partition handoff between workers and
//!   moves while a record is still in flight.

#[cfg(test)]
mod tests {
    use crate::graph::{DataflowGraph, Operator};
    use crate::membership::types::WorkerId;
    use crate::protocol::topics::operator_topic;
    use crate::protocol::{
        EngineMessage, InvocationEvent, InvocationResponse, PartitionHandoff, RequestId,
        ResponsePayload, decode, encode,
    };
    use crate::scheduler::{Assignment, Placement, publish_assignment};
    use crate::state::{InMemoryBackend, Key, StateBackend};
    use crate::transport::{InMemoryBroker, Subscription, Transport};
    use crate::worker::handoff::HandoffInbox;
    use crate::worker::{InvocationContext, OperatorCatalog, Worker, WorkerSettings};

    use anyhow::bail;
    use serde_json::{Value, json};
    use std::sync::Arc;
    use std::time::Duration;

    const REPLIES: &str = "test.replies";

    fn counter_operator() -> Operator {
        let op = Operator::with_partitions("counter", 2).unwrap();

        op.register("incr", |ctx, _params| async move {
            let current = ctx.get()?.and_then(|v| v.as_i64()).unwrap_or(0);
            ctx.put(json!(current + 1))?;
            Ok(json!(current + 1))
        })
        .unwrap();

        op.register("slow", |ctx, _params| async move {
            tokio::time::sleep(Duration::from_millis(400)).await;
            let current = ctx.get()?.and_then(|v| v.as_i64()).unwrap_or(0);
            ctx.put(json!(current + 1))?;
            Ok(json!(current + 1))
        })
        .unwrap();

        op.register("fail", |ctx, _params| async move {
            ctx.put(json!("should not stick"))?;
            bail!("entity does not exist")
        })
        .unwrap();

        op.register("explode", |_ctx, _params| async move {
            if true {
                panic!("handler bug");
            }
            Ok(Value::Null)
        })
        .unwrap();

        // Writes locally, then increments the key named in the first parameter.
        op.register("chain", |ctx, params| async move {
            ctx.put(json!("chained"))?;
            let target = params.first().and_then(Key::from_value).unwrap_or(Key::Int(1));
            ctx.call_remote_async("counter", "incr", target, vec![]);
            Ok(json!("ignored"))
        })
        .unwrap();

        op
    }

    fn graph_of(op: &Operator) -> crate::protocol::GraphDescriptor {
        let mut graph = DataflowGraph::new("g");
        graph.add_operator(op.clone()).unwrap();
        graph.descriptor()
    }

    fn settings() -> WorkerSettings {
        WorkerSettings {
            heartbeat_interval: Duration::from_millis(50),
            handoff_patience: Duration::from_millis(100),
        }
    }

    fn all_to(worker: &WorkerId, op: &Operator, epoch: u64) -> Assignment {
        let placements = (0..op.partitions())
            .map(|p| Placement::new(op.name(), p, worker.clone()))
            .collect();
        Assignment::new(graph_of(op), epoch, placements, vec![worker.clone()])
    }

    async fn invoke(broker: &InMemoryBroker, key: i64, partition: u32, function: &str) -> RequestId {
        let request_id = RequestId::new();
        let event = InvocationEvent {
            request_id,
            operator: "counter".to_string(),
            key: Key::Int(key),
            function: function.to_string(),
            params: vec![],
            reply_to: Some(REPLIES.to_string()),
            in_timestamp: None,
            hop: 0,
        };
        broker
            .publish(
                &operator_topic("counter"),
                partition,
                encode(&EngineMessage::Invoke(event)).unwrap(),
            )
            .await
            .unwrap();
        request_id
    }

    async fn next_response(replies: &mut Subscription) -> InvocationResponse {
        let record = tokio::time::timeout(Duration::from_secs(5), replies.next())
            .await
            .expect("response within timeout")
            .expect("reply topic open");
        decode(&record.payload).unwrap()
    }

    async fn wait_until<F: Fn() -> bool>(condition: F) {
        let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
        while !condition() {
            assert!(tokio::time::Instant::now() < deadline, "condition not reached");
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    }

    async fn single_worker() -> (Arc<InMemoryBroker>, Arc<Worker>, Subscription) {
        let broker = InMemoryBroker::new();
        let op = counter_operator();
        let worker = Worker::new(OperatorCatalog::from_operators([op.clone()]), broker.clone(), settings());
        worker.apply_assignment(all_to(&worker.id, &op, 1)).await;
        let replies = broker.subscribe(REPLIES, 0, "test").await.unwrap();
        (broker, worker, replies)
    }

    // ============================================================
    // CONTEXT TESTS
    // ============================================================

    #[test]
    fn test_get_on_absent_key_is_none() {
        let backend: Arc<dyn StateBackend> = Arc::new(InMemoryBackend::new());
        let ctx = InvocationContext::keyed("counter", Key::Int(0), 0, 2, RequestId::new(), backend);

        assert_eq!(ctx.get().unwrap(), None);
    }

    #[test]
    fn test_read_your_write_before_commit() {
        let backend: Arc<dyn StateBackend> = Arc::new(InMemoryBackend::new());
        let ctx = InvocationContext::keyed(
            "counter",
            Key::Int(0),
            0,
            2,
            RequestId::new(),
            backend.clone(),
        );

        ctx.put(json!(42)).unwrap();

        assert_eq!(ctx.get().unwrap(), Some(json!(42)));
        assert!(backend.is_empty(), "Writes stay staged until the handler returns");

        let effects = ctx.take_effects();
        assert_eq!(effects.writes.get(&Key::Int(0)), Some(&json!(42)));
    }

    #[test]
    fn test_batch_insert_confined_to_partition() {
        let backend: Arc<dyn StateBackend> = Arc::new(InMemoryBackend::new());
        let ctx = InvocationContext::partition_scoped("counter", 0, 2, RequestId::new(), backend);

        assert!(ctx.key().is_err());
        assert!(ctx.batch_insert(vec![(Key::Int(1), json!(1))]).is_err());

        ctx.batch_insert(vec![(Key::Int(0), json!(0)), (Key::Int(2), json!(2))])
            .unwrap();
        assert_eq!(ctx.take_effects().writes.len(), 2);
    }

    #[test]
    fn test_remote_calls_are_staged_in_order() {
        let backend: Arc<dyn StateBackend> = Arc::new(InMemoryBackend::new());
        let ctx = InvocationContext::keyed("a", Key::Int(0), 0, 1, RequestId::new(), backend);

        ctx.call_remote_async("b", "f", 1, vec![json!(1)]);
        ctx.call_remote_async("c", "g", "k", vec![]);

        let calls = ctx.take_effects().remote_calls;
        assert_eq!(calls.len(), 2);
        assert_eq!(calls[0].operator, "b");
        assert_eq!(calls[1].key, Key::Str("k".to_string()));
    }

    #[test]
    fn test_catalog_reports_functions_it_lacks() {
        let op = counter_operator();
        let catalog = OperatorCatalog::from_operators([op.clone()]);
        let mut descriptor = op.descriptor();
        assert!(catalog.missing_functions(&descriptor).is_empty());

        descriptor.functions.push("refund".to_string());
        assert_eq!(catalog.missing_functions(&descriptor), vec!["refund"]);

        descriptor.name = "orders".to_string();
        assert_eq!(
            catalog.missing_functions(&descriptor).len(),
            descriptor.functions.len()
        );
    }

    // ============================================================
    // EXECUTION TESTS
    // ============================================================

    #[tokio::test]
    async fn test_invocations_apply_in_order() {
        let (broker, worker, mut replies) = single_worker().await;

        let first = invoke(&broker, 4, 0, "incr").await;
        let second = invoke(&broker, 4, 0, "incr").await;

        let r1 = next_response(&mut replies).await;
        let r2 = next_response(&mut replies).await;
        assert_eq!(r1.request_id, first);
        assert_eq!(r1.payload, ResponsePayload::Value(json!(1)));
        assert_eq!(r2.request_id, second);
        assert_eq!(r2.payload, ResponsePayload::Value(json!(2)));
        assert!(r2.out_timestamp >= r2.in_timestamp);

        assert_eq!(worker.state_of("counter", 4), Some(json!(2)));
    }

    #[tokio::test]
    async fn test_domain_error_discards_writes() {
        let (broker, worker, mut replies) = single_worker().await;

        invoke(&broker, 2, 0, "fail").await;

        let response = next_response(&mut replies).await;
        assert_eq!(
            response.payload,
            ResponsePayload::DomainError("entity does not exist".to_string())
        );
        assert_eq!(worker.state_of("counter", 2), None);
    }

    #[tokio::test]
    async fn test_unknown_function_is_routing_error() {
        let (broker, _worker, mut replies) = single_worker().await;

        invoke(&broker, 0, 0, "missing").await;

        let response = next_response(&mut replies).await;
        assert!(matches!(response.payload, ResponsePayload::RoutingError(_)));
    }

    #[tokio::test]
    async fn test_misrouted_key_is_routing_error() {
        let (broker, worker, mut replies) = single_worker().await;

        // Key 1 belongs to partition 1 of 2.
        invoke(&broker, 1, 0, "incr").await;

        let response = next_response(&mut replies).await;
        assert!(matches!(response.payload, ResponsePayload::RoutingError(_)));
        assert_eq!(worker.state_of("counter", 1), None);
    }

    #[tokio::test]
    async fn test_panicking_handler_does_not_stop_partition() {
        let (broker, _worker, mut replies) = single_worker().await;

        invoke(&broker, 0, 0, "explode").await;
        invoke(&broker, 0, 0, "incr").await;

        let crashed = next_response(&mut replies).await;
        assert!(matches!(crashed.payload, ResponsePayload::DomainError(_)));
        let next = next_response(&mut replies).await;
        assert_eq!(next.payload, ResponsePayload::Value(json!(1)));
    }

    #[tokio::test]
    async fn test_chained_call_replies_with_original_timestamp() {
        let (broker, worker, mut replies) = single_worker().await;

        let request_id = invoke(&broker, 0, 0, "chain").await;

        let response = next_response(&mut replies).await;
        assert_eq!(response.request_id, request_id);
        assert_eq!(response.payload, ResponsePayload::Value(json!(1)));

        // The only reply comes from the terminal link.
        assert!(
            tokio::time::timeout(Duration::from_millis(200), replies.next())
                .await
                .is_err()
        );

        assert_eq!(broker.end_offset(&operator_topic("counter"), 0), 1);
        assert_eq!(worker.state_of("counter", 0), Some(json!("chained")));
        assert_eq!(worker.state_of("counter", 1), Some(json!(1)));
    }

    // ============================================================
    // OWNERSHIP TESTS
    // ============================================================

    #[tokio::test]
    async fn test_stale_assignment_is_ignored() {
        let broker = InMemoryBroker::new();
        let op = counter_operator();
        let worker = Worker::new(OperatorCatalog::from_operators([op.clone()]), broker.clone(), settings());

        worker.apply_assignment(all_to(&worker.id, &op, 5)).await;
        let other = WorkerId("someone-else".to_string());
        worker.apply_assignment(all_to(&other, &op, 3)).await;

        assert_eq!(worker.owned_partitions().len(), 2);
        assert_eq!(worker.epoch_of("g"), Some(5));
    }

    #[tokio::test]
    async fn test_moved_partition_keeps_its_state() {
        let broker = InMemoryBroker::new();
        let op = counter_operator();
        let catalog = OperatorCatalog::from_operators([op.clone()]);
        let a = Worker::new(catalog.clone(), broker.clone(), settings());
        let b = Worker::new(catalog, broker.clone(), settings());
        a.start().await.unwrap();
        b.start().await.unwrap();
        let mut replies = broker.subscribe(REPLIES, 0, "test").await.unwrap();

        let first = all_to(&a.id, &op, 1);
        publish_assignment(&first, broker.as_ref()).await.unwrap();
        wait_until(|| a.owned_partitions().len() == 2).await;

        invoke(&broker, 3, 1, "incr").await;
        invoke(&broker, 3, 1, "incr").await;
        next_response(&mut replies).await;
        next_response(&mut replies).await;

        let mut moved = Placement::new("counter", 1, b.id.clone());
        moved.handoff_from = Some(a.id.clone());
        let second = Assignment::new(
            graph_of(&op),
            2,
            vec![Placement::new("counter", 0, a.id.clone()), moved],
            vec![a.id.clone(), b.id.clone()],
        );
        publish_assignment(&second, broker.as_ref()).await.unwrap();
        wait_until(|| b.owned_partitions().len() == 1 && a.owned_partitions().len() == 1).await;

        // The new owner continues from the transferred state.
        invoke(&broker, 3, 1, "incr").await;
        let response = next_response(&mut replies).await;
        assert_eq!(response.payload, ResponsePayload::Value(json!(3)));
        assert_eq!(b.state_of("counter", 3), Some(json!(3)));
        assert_eq!(a.state_of("counter", 3), None);

        a.stop().await;
        b.stop().await;
    }

    #[tokio::test]
    async fn test_in_flight_record_finishes_before_partition_moves() {
        let broker = InMemoryBroker::new();
        let op = counter_operator();
        let catalog = OperatorCatalog::from_operators([op.clone()]);
        let a = Worker::new(catalog.clone(), broker.clone(), settings());
        let b = Worker::new(catalog, broker.clone(), settings());
        a.start().await.unwrap();
        b.start().await.unwrap();
        let mut replies = broker.subscribe(REPLIES, 0, "test").await.unwrap();

        publish_assignment(&all_to(&a.id, &op, 1), broker.as_ref()).await.unwrap();
        wait_until(|| a.owned_partitions().len() == 2).await;
        invoke(&broker, 3, 1, "incr").await;
        next_response(&mut replies).await;

        // Outlasts the handoff patience several times over.
        let slow = invoke(&broker, 3, 1, "slow").await;
        tokio::time::sleep(Duration::from_millis(50)).await;

        let mut moved = Placement::new("counter", 1, b.id.clone());
        moved.handoff_from = Some(a.id.clone());
        let second = Assignment::new(
            graph_of(&op),
            2,
            vec![Placement::new("counter", 0, a.id.clone()), moved],
            vec![a.id.clone(), b.id.clone()],
        );
        publish_assignment(&second, broker.as_ref()).await.unwrap();

        let response = next_response(&mut replies).await;
        assert_eq!(response.request_id, slow);
        assert_eq!(response.payload, ResponsePayload::Value(json!(2)));

        wait_until(|| b.owned_partitions().len() == 1 && a.owned_partitions().len() == 1).await;
        invoke(&broker, 3, 1, "incr").await;
        let response = next_response(&mut replies).await;
        assert_eq!(response.payload, ResponsePayload::Value(json!(3)));

        // The slow record ran exactly once.
        assert!(
            tokio::time::timeout(Duration::from_millis(300), replies.next())
                .await
                .is_err()
        );
        assert_eq!(b.state_of("counter", 3), Some(json!(3)));

        a.stop().await;
        b.stop().await;
    }

    #[tokio::test]
    async fn test_partition_starts_empty_once_previous_owner_is_gone() {
        let broker = InMemoryBroker::new();
        let op = counter_operator();
        let worker = Worker::new(OperatorCatalog::from_operators([op.clone()]), broker.clone(), settings());
        let ghost = WorkerId("ghost".to_string());
        let mut replies = broker.subscribe(REPLIES, 0, "test").await.unwrap();

        let mut moved = Placement::new("counter", 1, worker.id.clone());
        moved.handoff_from = Some(ghost.clone());
        let kept = Placement::new("counter", 0, worker.id.clone());
        worker
            .apply_assignment(Assignment::new(
                graph_of(&op),
                1,
                vec![kept.clone(), moved.clone()],
                vec![ghost.clone(), worker.id.clone()],
            ))
            .await;

        invoke(&broker, 3, 1, "incr").await;
        assert!(
            tokio::time::timeout(Duration::from_millis(300), replies.next())
                .await
                .is_err(),
            "Nothing is consumed while the previous owner may still hand over"
        );

        moved.handoff_from = None;
        worker
            .apply_assignment(Assignment::new(
                graph_of(&op),
                2,
                vec![kept, moved],
                vec![worker.id.clone()],
            ))
            .await;

        let response = next_response(&mut replies).await;
        assert_eq!(response.payload, ResponsePayload::Value(json!(1)));
    }

    #[test]
    fn test_inbox_drops_handoffs_for_settled_epochs() {
        let inbox = HandoffInbox::new();
        let handoff = |epoch| PartitionHandoff {
            graph: "g".to_string(),
            epoch,
            operator: "counter".to_string(),
            partition: 1,
            from: WorkerId("a".to_string()),
            to: WorkerId("b".to_string()),
            entries: vec![(Key::Int(1), json!(1))],
        };

        inbox.deliver(handoff(2));
        inbox.settle("counter", 1, 4);
        assert_eq!(inbox.pending(), 0);

        inbox.deliver(handoff(3));
        assert_eq!(inbox.pending(), 0);

        inbox.deliver(handoff(5));
        assert_eq!(inbox.pending(), 1);
    }
}
