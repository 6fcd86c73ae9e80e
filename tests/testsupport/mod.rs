//! In-memory transports for driving the clients without a broker.

#![allow(dead_code)]

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use franz::prelude::{
    CommitEntry, ConsumerGroupId, ConsumerTransport, Error, FetchedMessage, KafkaCode, Offset,
    PartitionId, ProduceOutcome, ProducerRecord, ProducerTransport, RebalanceEvent,
    TargetPartition, Timestamp, TopicPartition, TopicPartitionKey, TransportEvent, Watermarks,
};
use parking_lot::Mutex;

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_max_level(tracing::Level::DEBUG)
        .with_test_writer()
        .try_init();
}

pub fn tp(topic: &str, partition: i32) -> TopicPartitionKey {
    TopicPartitionKey::new(topic, partition).unwrap()
}

pub fn offset(value: i64) -> Offset {
    Offset::new(value).unwrap()
}

pub fn message(topic: &str, partition: i32, at: i64, value: &'static str) -> TransportEvent {
    TransportEvent::Message(FetchedMessage {
        topic: topic.to_owned(),
        partition: PartitionId::new(partition).unwrap(),
        offset: offset(at),
        timestamp: Timestamp::CreateTime(1_700_000_000_000 + at),
        key: Bytes::from(format!("key-{at}")),
        value: Bytes::from_static(value.as_bytes()),
    })
}

pub fn rebalance(event: RebalanceEvent) -> TransportEvent {
    TransportEvent::Rebalance(event)
}

#[derive(Default)]
struct ConsumerState {
    polls: VecDeque<Vec<TransportEvent>>,
    watermarks: HashMap<TopicPartitionKey, Watermarks>,
    committed: HashMap<(ConsumerGroupId, TopicPartitionKey), Offset>,
    commits: Vec<Vec<CommitEntry>>,
    fail_commits: bool,
    subscription: Vec<String>,
    assigned: Vec<TopicPartition>,
    seeks: Vec<(TopicPartitionKey, Offset)>,
    closed: bool,
}

/// Scripted consumer transport. Clones share state, so a test can keep a
/// handle after giving one to the consumer.
#[derive(Clone, Default)]
pub struct MockConsumerTransport {
    state: Arc<Mutex<ConsumerState>>,
}

impl MockConsumerTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Events returned by the next unscripted poll.
    pub fn push_poll(&self, events: Vec<TransportEvent>) {
        self.state.lock().polls.push_back(events);
    }

    pub fn set_watermarks(&self, partition: TopicPartitionKey, low: i64, high: i64) {
        self.state.lock().watermarks.insert(
            partition,
            Watermarks {
                low: offset(low),
                high: offset(high),
            },
        );
    }

    pub fn set_committed(&self, group: &str, partition: TopicPartitionKey, at: i64) {
        self.state.lock().committed.insert(
            (ConsumerGroupId::new(group).unwrap(), partition),
            offset(at),
        );
    }

    pub fn committed_offset(&self, group: &str, partition: &TopicPartitionKey) -> Option<Offset> {
        self.state
            .lock()
            .committed
            .get(&(ConsumerGroupId::new(group).unwrap(), partition.clone()))
            .copied()
    }

    pub fn fail_commits(&self, fail: bool) {
        self.state.lock().fail_commits = fail;
    }

    /// Every successful commit request, in order.
    pub fn commits(&self) -> Vec<Vec<CommitEntry>> {
        self.state.lock().commits.clone()
    }

    pub fn subscription(&self) -> Vec<String> {
        self.state.lock().subscription.clone()
    }

    /// Partitions of the last assign call.
    pub fn assigned(&self) -> Vec<TopicPartition> {
        self.state.lock().assigned.clone()
    }

    pub fn seeks(&self) -> Vec<(TopicPartitionKey, Offset)> {
        self.state.lock().seeks.clone()
    }

    pub fn is_closed(&self) -> bool {
        self.state.lock().closed
    }
}

#[async_trait]
impl ConsumerTransport for MockConsumerTransport {
    async fn subscribe(&self, _group: &ConsumerGroupId, topics: &[String]) -> Result<(), Error> {
        self.state.lock().subscription = topics.to_vec();
        Ok(())
    }

    async fn poll(&self, _timeout: Duration) -> Result<Vec<TransportEvent>, Error> {
        let events = self.state.lock().polls.pop_front();
        match events {
            Some(events) => Ok(events),
            None => {
                tokio::task::yield_now().await;
                Ok(vec![])
            }
        }
    }

    async fn assign(&self, partitions: &[TopicPartition]) -> Result<(), Error> {
        self.state.lock().assigned = partitions.to_vec();
        Ok(())
    }

    async fn seek(&self, partition: &TopicPartitionKey, offset: Offset) -> Result<(), Error> {
        self.state.lock().seeks.push((partition.clone(), offset));
        Ok(())
    }

    async fn watermarks(&self, partition: &TopicPartitionKey) -> Result<Watermarks, Error> {
        self.state
            .lock()
            .watermarks
            .get(partition)
            .copied()
            .ok_or(Error::KafkaError(KafkaCode::UnknownTopicOrPartition))
    }

    async fn committed(
        &self,
        group: &ConsumerGroupId,
        partition: &TopicPartitionKey,
    ) -> Result<Option<Offset>, Error> {
        Ok(self
            .state
            .lock()
            .committed
            .get(&(group.clone(), partition.clone()))
            .copied())
    }

    async fn commit(&self, group: &ConsumerGroupId, offsets: &[CommitEntry]) -> Result<(), Error> {
        let mut state = self.state.lock();
        if state.fail_commits {
            return Err(Error::KafkaError(KafkaCode::GroupCoordinatorNotAvailable));
        }
        for entry in offsets {
            state
                .committed
                .insert((group.clone(), entry.partition.clone()), entry.offset);
        }
        state.commits.push(offsets.to_vec());
        Ok(())
    }

    async fn close(&self) -> Result<(), Error> {
        self.state.lock().closed = true;
        Ok(())
    }
}

struct ProducerState {
    next_offsets: HashMap<(String, PartitionId), i64>,
    start_offset: i64,
    /// Partition picked for records without one.
    default_partition: PartitionId,
    rejected_topics: Vec<String>,
    delay: Option<Duration>,
    produced: Vec<ProducerRecord>,
}

/// Producer transport that accepts everything unless told otherwise.
#[derive(Clone)]
pub struct MockProducerTransport {
    state: Arc<Mutex<ProducerState>>,
}

impl Default for MockProducerTransport {
    fn default() -> Self {
        Self::new()
    }
}

impl MockProducerTransport {
    pub fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(ProducerState {
                next_offsets: HashMap::new(),
                start_offset: 0,
                default_partition: PartitionId::new(0).unwrap(),
                rejected_topics: vec![],
                delay: None,
                produced: vec![],
            })),
        }
    }

    pub fn start_offset(self, start_offset: i64) -> Self {
        self.state.lock().start_offset = start_offset;
        self
    }

    pub fn default_partition(self, partition: i32) -> Self {
        self.state.lock().default_partition = PartitionId::new(partition).unwrap();
        self
    }

    pub fn reject_topic(self, topic: &str) -> Self {
        self.state.lock().rejected_topics.push(topic.to_owned());
        self
    }

    /// Time every produce call takes.
    pub fn delay(self, delay: Duration) -> Self {
        self.state.lock().delay = Some(delay);
        self
    }

    pub fn produced(&self) -> Vec<ProducerRecord> {
        self.state.lock().produced.clone()
    }
}

#[async_trait]
impl ProducerTransport for MockProducerTransport {
    async fn produce(&self, record: &ProducerRecord) -> ProduceOutcome {
        let delay = self.state.lock().delay;
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        let mut state = self.state.lock();
        if state.rejected_topics.contains(&record.topic) {
            return ProduceOutcome::Rejected(Error::DeliveryFailure(
                KafkaCode::MessageSizeTooLarge,
            ));
        }

        let partition = match record.partition {
            TargetPartition::Partition(partition) => partition,
            TargetPartition::Unassigned => state.default_partition,
        };
        let start_offset = state.start_offset;
        let next = state
            .next_offsets
            .entry((record.topic.clone(), partition))
            .or_insert(start_offset);
        let offset = *next;
        *next += 1;
        state.produced.push(record.clone());

        ProduceOutcome::Accepted { partition, offset }
    }
}
