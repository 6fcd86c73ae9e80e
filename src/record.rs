//! Consumed and produced record envelopes.

use std::future::Future;

use bytes::Bytes;

use crate::offset::{Offset, PartitionId, Timestamp, TopicPartitionKey};

/// Header attached to a produced record.
#[derive(Clone, Debug, PartialEq)]
pub struct Header {
    pub key: String,
    pub value: Bytes,
}

impl Header {
    pub fn new(key: impl Into<String>, value: impl Into<Bytes>) -> Self {
        Self {
            key: key.into(),
            value: value.into(),
        }
    }
}

/// A record fetched from a partition.
///
/// Records are never mutated. The `map_*`, `try_map_*` and `traverse_*`
/// transforms build a new record that keeps the topic, partition, offset and
/// timestamp of the original and only replaces the key and/or value.
///
/// ### Example
/// ```ignore
/// let record = consumer.poll(timeout).await?.remove(0);
/// let record = record
///     .map_key(|key| String::from_utf8_lossy(&key).into_owned())
///     .try_map_value(|value| serde_json::from_slice::<Event>(&value))?;
/// ```
#[derive(Clone, Debug, PartialEq)]
pub struct ConsumerRecord<K, V> {
    topic: String,
    partition: PartitionId,
    offset: Offset,
    timestamp: Timestamp,
    key: K,
    value: V,
}

impl<K, V> ConsumerRecord<K, V> {
    pub fn new(
        topic: impl Into<String>,
        partition: PartitionId,
        offset: Offset,
        timestamp: Timestamp,
        key: K,
        value: V,
    ) -> Self {
        Self {
            topic: topic.into(),
            partition,
            offset,
            timestamp,
            key,
            value,
        }
    }

    pub fn topic(&self) -> &str {
        &self.topic
    }

    pub fn partition(&self) -> PartitionId {
        self.partition
    }

    pub fn offset(&self) -> Offset {
        self.offset
    }

    pub fn timestamp(&self) -> Timestamp {
        self.timestamp
    }

    pub fn key(&self) -> &K {
        &self.key
    }

    pub fn value(&self) -> &V {
        &self.value
    }

    pub fn topic_partition(&self) -> TopicPartitionKey {
        TopicPartitionKey {
            topic: self.topic.clone(),
            partition: self.partition,
        }
    }

    pub fn into_key_value(self) -> (K, V) {
        (self.key, self.value)
    }

    fn with_payload<K2, V2>(
        topic: String,
        partition: PartitionId,
        offset: Offset,
        timestamp: Timestamp,
        key: K2,
        value: V2,
    ) -> ConsumerRecord<K2, V2> {
        ConsumerRecord {
            topic,
            partition,
            offset,
            timestamp,
            key,
            value,
        }
    }

    pub fn map_key<K2>(self, f: impl FnOnce(K) -> K2) -> ConsumerRecord<K2, V> {
        Self::with_payload(
            self.topic,
            self.partition,
            self.offset,
            self.timestamp,
            f(self.key),
            self.value,
        )
    }

    pub fn map_value<V2>(self, f: impl FnOnce(V) -> V2) -> ConsumerRecord<K, V2> {
        Self::with_payload(
            self.topic,
            self.partition,
            self.offset,
            self.timestamp,
            self.key,
            f(self.value),
        )
    }

    pub fn map_both<K2, V2>(
        self,
        f: impl FnOnce(K) -> K2,
        g: impl FnOnce(V) -> V2,
    ) -> ConsumerRecord<K2, V2> {
        Self::with_payload(
            self.topic,
            self.partition,
            self.offset,
            self.timestamp,
            f(self.key),
            g(self.value),
        )
    }

    pub fn try_map_key<K2, E>(
        self,
        f: impl FnOnce(K) -> Result<K2, E>,
    ) -> Result<ConsumerRecord<K2, V>, E> {
        let key = f(self.key)?;
        Ok(Self::with_payload(
            self.topic,
            self.partition,
            self.offset,
            self.timestamp,
            key,
            self.value,
        ))
    }

    pub fn try_map_value<V2, E>(
        self,
        f: impl FnOnce(V) -> Result<V2, E>,
    ) -> Result<ConsumerRecord<K, V2>, E> {
        let value = f(self.value)?;
        Ok(Self::with_payload(
            self.topic,
            self.partition,
            self.offset,
            self.timestamp,
            self.key,
            value,
        ))
    }

    /// Key is transformed first; if it fails the value transform never runs.
    pub fn try_map_both<K2, V2, E>(
        self,
        f: impl FnOnce(K) -> Result<K2, E>,
        g: impl FnOnce(V) -> Result<V2, E>,
    ) -> Result<ConsumerRecord<K2, V2>, E> {
        let key = f(self.key)?;
        let value = g(self.value)?;
        Ok(Self::with_payload(
            self.topic,
            self.partition,
            self.offset,
            self.timestamp,
            key,
            value,
        ))
    }

    /// Asynchronous version of [`try_map_key`](Self::try_map_key).
    pub async fn traverse_key<K2, E, Fut>(
        self,
        f: impl FnOnce(K) -> Fut,
    ) -> Result<ConsumerRecord<K2, V>, E>
    where
        Fut: Future<Output = Result<K2, E>>,
    {
        let key = f(self.key).await?;
        Ok(Self::with_payload(
            self.topic,
            self.partition,
            self.offset,
            self.timestamp,
            key,
            self.value,
        ))
    }

    /// Asynchronous version of [`try_map_value`](Self::try_map_value).
    pub async fn traverse_value<V2, E, Fut>(
        self,
        f: impl FnOnce(V) -> Fut,
    ) -> Result<ConsumerRecord<K, V2>, E>
    where
        Fut: Future<Output = Result<V2, E>>,
    {
        let value = f(self.value).await?;
        Ok(Self::with_payload(
            self.topic,
            self.partition,
            self.offset,
            self.timestamp,
            self.key,
            value,
        ))
    }

    /// Both effects run concurrently; the first failure wins.
    pub async fn traverse_both<K2, V2, E, FutK, FutV>(
        self,
        f: impl FnOnce(K) -> FutK,
        g: impl FnOnce(V) -> FutV,
    ) -> Result<ConsumerRecord<K2, V2>, E>
    where
        FutK: Future<Output = Result<K2, E>>,
        FutV: Future<Output = Result<V2, E>>,
    {
        let (key, value) = futures::future::try_join(f(self.key), g(self.value)).await?;
        Ok(Self::with_payload(
            self.topic,
            self.partition,
            self.offset,
            self.timestamp,
            key,
            value,
        ))
    }
}

/// Partition a produced record is sent to.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum TargetPartition {
    Partition(PartitionId),
    /// Let the partitioner pick.
    Unassigned,
}

/// A record to be sent by a [`Producer`](crate::prelude::Producer).
#[derive(Clone, Debug, PartialEq)]
pub struct ProducerRecord {
    pub topic: String,
    pub partition: TargetPartition,
    pub key: Option<Bytes>,
    pub value: Option<Bytes>,
    pub headers: Vec<Header>,
}

impl ProducerRecord {
    /// Start a record for `topic` with no partition, key, value or headers.
    pub fn to(topic: impl Into<String>) -> Self {
        Self {
            topic: topic.into(),
            partition: TargetPartition::Unassigned,
            key: None,
            value: None,
            headers: vec![],
        }
    }

    pub fn partition(mut self, partition: PartitionId) -> Self {
        self.partition = TargetPartition::Partition(partition);
        self
    }

    pub fn key(mut self, key: impl Into<Bytes>) -> Self {
        self.key = Some(key.into());
        self
    }

    pub fn value(mut self, value: impl Into<Bytes>) -> Self {
        self.value = Some(value.into());
        self
    }

    pub fn header(mut self, header: Header) -> Self {
        self.headers.push(header);
        self
    }
}
