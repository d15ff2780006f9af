use tokio::sync::mpsc;

/// One record as stored by the broker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Record {
    pub topic: String,
    pub partition: u32,
    pub offset: u64,
    /// Broker append time in milliseconds since the epoch.
    pub timestamp_ms: u64,
    pub payload: Vec<u8>,
}

/// Where and when a published record landed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordMetadata {
    pub topic: String,
    pub partition: u32,
    pub offset: u64,
    pub timestamp_ms: u64,
}

/// An ordered stream of records from one topic-partition.
pub struct Subscription {
    topic: String,
    partition: u32,
    receiver: mpsc::UnboundedReceiver<Record>,
}

impl Subscription {
    pub fn new(topic: &str, partition: u32, receiver: mpsc::UnboundedReceiver<Record>) -> Self {
        Self {
            topic: topic.to_string(),
            partition,
            receiver,
        }
    }

    /// Next record, or `None` once the broker has closed the subscription.
    ///
    /// Cancel-safe: dropping the future never loses a record.
    pub async fn next(&mut self) -> Option<Record> {
        self.receiver.recv().await
    }

    pub fn topic(&self) -> &str {
        &self.topic
    }

    pub fn partition(&self) -> u32 {
        self.partition
    }
}
