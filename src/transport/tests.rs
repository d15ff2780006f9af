//! Transport Module Tests
//!
//! ## Test Scopes
//! - **Ordering**: Records of one topic-partition arrive in publish order.
//! - **Replay**: Late subscribers see retained records from their committed offset.
//! - **Shutdown**: Closing the broker ends subscriptions and rejects publishes.

#[cfg(test)]
mod tests {
    use crate::error::TransportError;
    use crate::transport::{InMemoryBroker, Transport};

    #[tokio::test]
    async fn test_publish_assigns_sequential_offsets() {
        let broker = InMemoryBroker::new();

        let first = broker.publish("t", 0, b"a".to_vec()).await.unwrap();
        let second = broker.publish("t", 0, b"b".to_vec()).await.unwrap();
        let other = broker.publish("t", 1, b"c".to_vec()).await.unwrap();

        assert_eq!(first.offset, 0);
        assert_eq!(second.offset, 1);
        assert_eq!(other.offset, 0, "Offsets are per partition");
        assert!(second.timestamp_ms >= first.timestamp_ms);
        assert_eq!(broker.end_offset("t", 0), 2);
    }

    #[tokio::test]
    async fn test_subscriber_sees_records_in_order() {
        let broker = InMemoryBroker::new();
        let mut sub = broker.subscribe("t", 0, "g").await.unwrap();

        for i in 0..100u8 {
            broker.publish("t", 0, vec![i]).await.unwrap();
        }

        for i in 0..100u8 {
            let record = sub.next().await.unwrap();
            assert_eq!(record.payload, vec![i]);
            assert_eq!(record.offset, i as u64);
        }
    }

    #[tokio::test]
    async fn test_late_subscriber_replays_retained_log() {
        let broker = InMemoryBroker::new();
        broker.publish("t", 0, b"early".to_vec()).await.unwrap();

        let mut sub = broker.subscribe("t", 0, "g").await.unwrap();
        broker.publish("t", 0, b"late".to_vec()).await.unwrap();

        assert_eq!(sub.next().await.unwrap().payload, b"early".to_vec());
        assert_eq!(sub.next().await.unwrap().payload, b"late".to_vec());
    }

    #[tokio::test]
    async fn test_group_resumes_from_committed_offset() {
        let broker = InMemoryBroker::new();
        for i in 0..5u8 {
            broker.publish("t", 0, vec![i]).await.unwrap();
        }

        broker.commit("t", 0, "g", 3).await.unwrap();
        // Commits never move backwards.
        broker.commit("t", 0, "g", 1).await.unwrap();
        assert_eq!(broker.committed_offset("g", "t", 0), Some(3));

        let mut sub = broker.subscribe("t", 0, "g").await.unwrap();
        assert_eq!(sub.next().await.unwrap().offset, 3);

        // A different group starts from the beginning.
        let mut fresh = broker.subscribe("t", 0, "other").await.unwrap();
        assert_eq!(fresh.next().await.unwrap().offset, 0);
    }

    #[tokio::test]
    async fn test_shutdown_ends_subscriptions() {
        let broker = InMemoryBroker::new();
        let mut sub = broker.subscribe("t", 0, "g").await.unwrap();

        broker.shutdown();

        assert!(sub.next().await.is_none());
        assert_eq!(
            broker.publish("t", 0, vec![1]).await.unwrap_err(),
            TransportError::Closed
        );
    }

    #[tokio::test]
    async fn test_dropped_subscriber_does_not_block_publish() {
        let broker = InMemoryBroker::new();
        let sub = broker.subscribe("t", 0, "g").await.unwrap();
        drop(sub);

        assert!(broker.publish("t", 0, vec![1]).await.is_ok());
    }
}
