//! Seam between the client state machines and the broker connection.
//!
//! Everything that talks to a broker (connection management, the group
//! coordination protocol, fetch and produce requests, compression, TLS) lives
//! behind these traits. The consumer and producer only drive state: which
//! partitions are owned, which offsets are consumed and committed, which
//! sends are still waiting for an outcome.
//!
//! Implementations must be cheap to share; clients hold them in an `Arc`.

use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;

use crate::error::{Error, Result};
use crate::offset::{
    ConsumerGroupId, Offset, PartitionId, Timestamp, TopicPartition, TopicPartitionKey,
};
use crate::offset_tracker::CommitEntry;
use crate::rebalance::RebalanceEvent;
use crate::record::ProducerRecord;

/// A raw record as fetched from a partition.
#[derive(Clone, Debug, PartialEq)]
pub struct FetchedMessage {
    pub topic: String,
    pub partition: PartitionId,
    pub offset: Offset,
    pub timestamp: Timestamp,
    pub key: Bytes,
    pub value: Bytes,
}

impl FetchedMessage {
    pub fn topic_partition(&self) -> TopicPartitionKey {
        TopicPartitionKey {
            topic: self.topic.clone(),
            partition: self.partition,
        }
    }
}

/// Something that happened since the last poll, in the order it happened.
#[derive(Clone, Debug, PartialEq)]
pub enum TransportEvent {
    Rebalance(RebalanceEvent),
    Message(FetchedMessage),
}

/// Low and high watermark of a partition.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Watermarks {
    /// Earliest offset still in the log.
    pub low: Offset,
    /// Offset the next produced record will get.
    pub high: Offset,
}

impl Watermarks {
    pub fn contains(&self, offset: Offset) -> bool {
        self.low <= offset && offset <= self.high
    }
}

/// Connection used by a [`KafkaConsumer`](crate::prelude::KafkaConsumer).
#[async_trait]
pub trait ConsumerTransport: Send + Sync + 'static {
    /// Join `group` with a subscription to `topics`.
    async fn subscribe(&self, group: &ConsumerGroupId, topics: &[String]) -> Result<()>;

    /// Wait up to `timeout` for rebalance events and fetched records.
    async fn poll(&self, timeout: Duration) -> Result<Vec<TransportEvent>>;

    /// Replace the set of partitions being fetched. Positions are always
    /// [`OffsetPosition::Explicit`](crate::prelude::OffsetPosition::Explicit).
    async fn assign(&self, partitions: &[TopicPartition]) -> Result<()>;

    /// Make `offset` the next record fetched from `partition`.
    async fn seek(&self, partition: &TopicPartitionKey, offset: Offset) -> Result<()>;

    async fn watermarks(&self, partition: &TopicPartitionKey) -> Result<Watermarks>;

    /// Offset committed to the broker for `group`, if any.
    async fn committed(
        &self,
        group: &ConsumerGroupId,
        partition: &TopicPartitionKey,
    ) -> Result<Option<Offset>>;

    /// Commit offsets to the broker for `group`.
    async fn commit(&self, group: &ConsumerGroupId, offsets: &[CommitEntry]) -> Result<()>;

    /// Leave the group and release the connection.
    async fn close(&self) -> Result<()>;
}

/// What the broker said about one produced record.
#[derive(Clone, Debug, PartialEq)]
pub enum ProduceOutcome {
    Accepted { partition: PartitionId, offset: i64 },
    /// The broker rejected this record.
    Rejected(Error),
    /// The record never got as far as the broker (e.g. a full queue) and the
    /// error cannot be tied to it.
    NotAccepted(Error),
}

/// Connection used by a [`Producer`](crate::prelude::Producer).
#[async_trait]
pub trait ProducerTransport: Send + Sync + 'static {
    async fn produce(&self, record: &ProducerRecord) -> ProduceOutcome;
}
