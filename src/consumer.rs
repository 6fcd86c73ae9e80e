//! Client that consumes records from a cluster as a consumer group member.

use std::collections::BTreeSet;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Duration;

use bytes::Bytes;
use futures::FutureExt;
use parking_lot::Mutex;
use tokio::sync::oneshot;
use tokio::task::JoinSet;
use tokio::time::Instant;
use tokio_stream::{Stream, StreamExt};
use tracing::instrument;

use crate::{
    config::{ConsumerConfig, OffsetReset},
    error::{Error, Result},
    offset::{Offset, OffsetPosition, TopicPartition, TopicPartitionKey},
    offset_store::{open_store, OffsetStore},
    offset_tracker::{CommitEntry, CommitMode, OffsetTracker, PartitionOffsets},
    rebalance::{AssignmentTracker, RebalanceEvent, RebalanceState, Transition},
    record::ConsumerRecord,
    transport::{ConsumerTransport, FetchedMessage, TransportEvent},
};

/// Application hooks called by a [`KafkaConsumer`].
///
/// Both methods run on the task driving the consumer, except for
/// `commit_callback` of an async commit which runs on the commit task.
pub trait ConsumerContext: Send + Sync + 'static {
    /// Called from [`poll`](KafkaConsumer::poll) after a rebalance event was
    /// applied.
    fn rebalance(&self, _event: &RebalanceEvent, _transition: &Transition) {}

    /// Called when a commit of at least one offset completes.
    fn commit_callback(&self, _result: &Result<Vec<CommitEntry>>) {}
}

#[derive(Clone, Copy, Debug, Default)]
pub struct DefaultConsumerContext;

impl ConsumerContext for DefaultConsumerContext {}

/// Resolves once an async commit completes.
///
/// Dropping it does not cancel the commit.
#[derive(Debug)]
pub struct PendingCommit {
    receiver: oneshot::Receiver<Result<Vec<CommitEntry>>>,
}

impl Future for PendingCommit {
    type Output = Result<Vec<CommitEntry>>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        Pin::new(&mut self.receiver).poll(cx).map(|result| {
            result.unwrap_or_else(|_| {
                Err(Error::CommitFailure(Box::new(Error::Transport(
                    "commit task was cancelled".to_owned(),
                ))))
            })
        })
    }
}

/// Kafka/Redpanda consumer group member.
///
/// The consumer drives three pieces of state from the events its transport
/// delivers: the set of partitions it owns ([`AssignmentTracker`]), the
/// consumed and committed offset of each owned partition ([`OffsetTracker`])
/// and the [`OffsetStore`] offsets are committed to.
///
/// Everything happens inside [`poll`](Self::poll): rebalance events are
/// applied in the order they arrive, records of owned partitions are handed
/// out and auto commits run when due. Before partitions are revoked their
/// consumed offsets are committed so the next owner picks up where this one
/// stopped.
///
/// To create one, start with a [`ConsumerBuilder`](crate::prelude::ConsumerBuilder).
///
/// ### Example
/// ```ignore
/// let mut consumer = franz::prelude::ConsumerBuilder::new(transport, "my-group")?
///     .offset_reset(OffsetReset::Earliest)
///     .build();
///
/// consumer.subscribe(["my-topic"]).await?;
///
/// loop {
///     for record in consumer.poll(Duration::from_millis(100)).await? {
///         println!("{} {:?}", record.offset(), record.value());
///     }
///     consumer.commit().await?;
/// }
/// ```
pub struct KafkaConsumer<T: ConsumerTransport, C: ConsumerContext = DefaultConsumerContext> {
    transport: Arc<T>,
    config: ConsumerConfig,
    context: Arc<C>,
    store: Arc<dyn OffsetStore>,
    assignment: AssignmentTracker,
    offsets: Arc<Mutex<OffsetTracker>>,
    subscription: Vec<String>,
    /// Owned partitions whose start offset could not be resolved yet.
    unresolved: BTreeSet<TopicPartitionKey>,
    /// Fetch positions changed since the transport last accepted them.
    reassign: bool,
    /// Rebalance error held back so records polled with it are not lost.
    deferred: Option<Error>,
    /// Async commits that have not been reaped yet.
    commits: JoinSet<()>,
    last_auto_commit: Instant,
}

impl<T: ConsumerTransport, C: ConsumerContext> KafkaConsumer<T, C> {
    pub(crate) fn new(transport: Arc<T>, config: ConsumerConfig, context: C) -> Self {
        let store = open_store(&config.offset_store, config.group_id.clone(), transport.clone());
        Self {
            transport,
            config,
            context: Arc::new(context),
            store,
            assignment: AssignmentTracker::new(),
            offsets: Arc::new(Mutex::new(OffsetTracker::new())),
            subscription: vec![],
            unresolved: BTreeSet::new(),
            reassign: false,
            deferred: None,
            commits: JoinSet::new(),
            last_auto_commit: Instant::now(),
        }
    }

    pub fn config(&self) -> &ConsumerConfig {
        &self.config
    }

    pub fn context(&self) -> &C {
        &self.context
    }

    pub fn subscription(&self) -> &[String] {
        &self.subscription
    }

    /// Partitions currently owned.
    pub fn assignment(&self) -> &BTreeSet<TopicPartitionKey> {
        self.assignment.assignment()
    }

    pub fn state(&self) -> RebalanceState {
        self.assignment.state()
    }

    /// Offset of the next record that will be read from `partition`.
    pub fn position(&self, partition: &TopicPartitionKey) -> Option<Offset> {
        self.offsets
            .lock()
            .get(partition)
            .map(|offsets| offsets.position().unwrap_or(Offset::ZERO))
    }

    /// Consumed and committed offsets of `partition`.
    pub fn offsets(&self, partition: &TopicPartitionKey) -> Option<PartitionOffsets> {
        self.offsets.lock().get(partition).copied()
    }

    /// Join the group with a subscription to `topics`. Partitions arrive
    /// later as rebalance events through [`poll`](Self::poll).
    #[instrument(skip(self, topics), fields(group = %self.config.group_id))]
    pub async fn subscribe<I, S>(&mut self, topics: I) -> Result<()>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let topics: Vec<String> = topics.into_iter().map(Into::into).collect();
        self.transport.subscribe(&self.config.group_id, &topics).await?;
        tracing::info!("Subscribed to {:?}", topics);
        self.subscription = topics;
        Ok(())
    }

    /// Wait up to `timeout` for records.
    ///
    /// Rebalance events delivered by the transport are applied first come
    /// first served, and [`ConsumerContext::rebalance`] is called for each.
    /// Records of partitions this consumer does not own are dropped, as are
    /// records whose offset goes backwards.
    ///
    /// A failed rebalance event does not stop the batch. When the batch also
    /// carried records they are returned and the error is returned by the
    /// next call. Partitions whose start offset could not be resolved are
    /// retried on every poll until it succeeds.
    #[instrument(skip(self), fields(group = %self.config.group_id))]
    pub async fn poll(&mut self, timeout: Duration) -> Result<Vec<ConsumerRecord<Bytes, Bytes>>> {
        self.reap_commits();
        if let Some(err) = self.deferred.take() {
            return Err(err);
        }
        self.resume_assignment().await?;

        let events = self.transport.poll(timeout).await?;
        let mut records = vec![];
        let mut failed = None;
        for event in events {
            match event {
                TransportEvent::Rebalance(event) => {
                    if let Err(err) = self.handle_rebalance(event).await {
                        tracing::error!("Error applying rebalance {:?}", err);
                        if failed.is_none() {
                            failed = Some(err);
                        }
                    }
                }
                TransportEvent::Message(message) => {
                    if let Some(record) = self.accept(message) {
                        records.push(record);
                    }
                }
            }
        }
        if !records.is_empty() {
            tracing::debug!("Read {} records", records.len());
        }

        self.maybe_auto_commit().await;
        if let Err(err) = self.store.flush(false).await {
            tracing::error!("Error flushing offset store {:?}", err);
        }

        match failed {
            Some(err) if records.is_empty() => Err(err),
            Some(err) => {
                self.deferred = Some(err);
                Ok(records)
            }
            None => Ok(records),
        }
    }

    fn accept(&mut self, message: FetchedMessage) -> Option<ConsumerRecord<Bytes, Bytes>> {
        let partition = message.topic_partition();
        if !self.assignment.is_assigned(&partition) {
            tracing::trace!("Dropping record {} of unowned {}", message.offset, partition);
            return None;
        }
        if self.unresolved.contains(&partition) {
            tracing::trace!("Dropping record {} of unpositioned {}", message.offset, partition);
            return None;
        }
        if let Err(err) = self.offsets.lock().record_consumed(&partition, message.offset) {
            tracing::error!("Skipping record: {}", err);
            return None;
        }

        Some(ConsumerRecord::new(
            message.topic,
            message.partition,
            message.offset,
            message.timestamp,
            message.key,
            message.value,
        ))
    }

    async fn handle_rebalance(&mut self, event: RebalanceEvent) -> Result<()> {
        if let RebalanceEvent::BeforeRevoke(partitions) = &event {
            self.commit_revoked(partitions).await;
        }

        let transition = self.assignment.apply(&event);
        let result = match &event {
            RebalanceEvent::Assign(_) | RebalanceEvent::Revoke(_) => {
                {
                    let mut offsets = self.offsets.lock();
                    for partition in transition.removed.iter() {
                        offsets.untrack(partition);
                        self.unresolved.remove(partition);
                    }
                }
                self.unresolved.extend(transition.added.iter().cloned());
                self.reassign = true;
                self.resume_assignment().await
            }
            RebalanceEvent::BeforeAssign(_) | RebalanceEvent::BeforeRevoke(_) => Ok(()),
        };

        self.context.rebalance(&event, &transition);
        result
    }

    /// Resolve start offsets of newly owned partitions and hand the fetch
    /// positions to the transport. A partition is only tracked once its
    /// start offset is known.
    async fn resume_assignment(&mut self) -> Result<()> {
        if !self.reassign && self.unresolved.is_empty() {
            return Ok(());
        }

        let pending: Vec<TopicPartitionKey> = self.unresolved.iter().cloned().collect();
        for partition in pending {
            let (committed, start) = self.start_offset(&partition).await?;
            tracing::info!("Starting {} at {}", partition, start);
            self.offsets.lock().track(partition.clone(), committed, start);
            self.unresolved.remove(&partition);
            self.reassign = true;
        }

        if self.reassign {
            self.transport.assign(&self.fetch_positions()).await?;
            self.reassign = false;
        }
        Ok(())
    }

    /// Commit what was consumed from partitions about to be revoked.
    async fn commit_revoked(&mut self, partitions: &[TopicPartitionKey]) {
        self.drain_commits().await;

        let entries = self
            .offsets
            .lock()
            .pending_commits_for(|partition| partitions.contains(partition));
        if entries.is_empty() {
            return;
        }

        let result = commit_entries(&self.store, &self.offsets, entries).await;
        if let Err(err) = &result {
            tracing::warn!("Commit before revoke failed {:?}", err);
        }
        self.context.commit_callback(&result);
    }

    /// Group's committed offset and the offset to start fetching from.
    async fn start_offset(
        &self,
        partition: &TopicPartitionKey,
    ) -> Result<(Option<Offset>, Offset)> {
        let committed = self.store.load(partition).await?;
        let start = match committed {
            Some(committed) => committed,
            None => self.reset_offset(partition).await?,
        };
        Ok((committed, start))
    }

    async fn reset_offset(&self, partition: &TopicPartitionKey) -> Result<Offset> {
        let watermarks = self.transport.watermarks(partition).await?;
        let offset = match self.config.offset_reset {
            OffsetReset::Earliest => watermarks.low,
            OffsetReset::Latest => watermarks.high,
        };
        tracing::debug!(
            "No stored offset for {}, resetting to {:?} {}",
            partition,
            self.config.offset_reset,
            offset
        );
        Ok(offset)
    }

    fn fetch_positions(&self) -> Vec<TopicPartition> {
        let offsets = self.offsets.lock();
        offsets
            .partitions()
            .map(|(partition, offsets)| {
                partition.at(OffsetPosition::Explicit(
                    offsets.position().unwrap_or(Offset::ZERO),
                ))
            })
            .collect()
    }

    /// Commit consumed offsets using the configured [`CommitMode`].
    ///
    /// In async mode this only starts the commit; errors are reported to
    /// [`ConsumerContext::commit_callback`].
    pub async fn commit(&mut self) -> Result<()> {
        match self.config.commit_mode {
            CommitMode::Sync => self.commit_sync().await.map(|_| ()),
            CommitMode::Async => {
                // Completion is observed through the context.
                let _pending = self.commit_async();
                Ok(())
            }
        }
    }

    /// Commit consumed offsets and wait for the store to acknowledge.
    ///
    /// Returns what was committed. On failure nothing is marked committed
    /// and the offsets are retried by the next commit.
    #[instrument(skip(self), fields(group = %self.config.group_id))]
    pub async fn commit_sync(&mut self) -> Result<Vec<CommitEntry>> {
        let entries = self.offsets.lock().pending_commits();
        if entries.is_empty() {
            return Ok(entries);
        }

        let result = commit_entries(&self.store, &self.offsets, entries).await;
        self.context.commit_callback(&result);
        result
    }

    /// Start committing consumed offsets in the background.
    pub fn commit_async(&mut self) -> PendingCommit {
        let (sender, receiver) = oneshot::channel();
        let entries = self.offsets.lock().pending_commits();
        if entries.is_empty() {
            let _ = sender.send(Ok(entries));
            return PendingCommit { receiver };
        }

        let store = self.store.clone();
        let offsets = self.offsets.clone();
        let context = self.context.clone();
        self.commits.spawn(async move {
            let result = commit_entries(&store, &offsets, entries).await;
            context.commit_callback(&result);
            let _ = sender.send(result);
        });

        PendingCommit { receiver }
    }

    async fn maybe_auto_commit(&mut self) {
        if !self.config.enable_auto_commit
            || self.last_auto_commit.elapsed() < self.config.auto_commit_interval
        {
            return;
        }

        self.last_auto_commit = Instant::now();
        tracing::trace!("Auto commit is due");
        if let Err(err) = self.commit().await {
            tracing::warn!("Auto commit failed {:?}", err);
        }
    }

    fn reap_commits(&mut self) {
        while let Some(Some(result)) = self.commits.join_next().now_or_never() {
            if let Err(err) = result {
                tracing::error!("Error in commit task {:?}", err);
            }
        }
    }

    async fn drain_commits(&mut self) {
        while let Some(result) = self.commits.join_next().await {
            if let Err(err) = result {
                tracing::error!("Error in commit task {:?}", err);
            }
        }
    }

    /// Move the read position of an owned partition.
    ///
    /// Not allowed during a rebalance. [`OffsetPosition::Stored`] falls back
    /// to the reset policy when the group has no stored offset. An explicit
    /// offset must lie within the partition's watermarks. Returns the offset
    /// the next record will be read from.
    #[instrument(skip(self), fields(group = %self.config.group_id))]
    pub async fn seek(
        &mut self,
        partition: &TopicPartitionKey,
        position: OffsetPosition,
    ) -> Result<Offset> {
        if !self.assignment.can_seek(partition) || self.unresolved.contains(partition) {
            return Err(Error::PartitionNotAssigned(partition.clone()));
        }

        let offset = match position {
            OffsetPosition::Beginning => self.transport.watermarks(partition).await?.low,
            OffsetPosition::End => self.transport.watermarks(partition).await?.high,
            OffsetPosition::Stored => match self.store.load(partition).await? {
                Some(offset) => offset,
                None => self.reset_offset(partition).await?,
            },
            OffsetPosition::Explicit(offset) => {
                let watermarks = self.transport.watermarks(partition).await?;
                if !watermarks.contains(offset) {
                    return Err(Error::SeekOutOfRange {
                        partition: partition.clone(),
                        position,
                    });
                }
                offset
            }
            OffsetPosition::Invalid => {
                return Err(Error::SeekOutOfRange {
                    partition: partition.clone(),
                    position,
                })
            }
        };

        // An older commit landing after the seek would hide the new position.
        self.drain_commits().await;
        self.transport.seek(partition, offset).await?;
        self.offsets.lock().seek(partition, offset)?;
        tracing::info!("Seeked {} to {}", partition, offset);

        Ok(offset)
    }

    /// Leave the group.
    ///
    /// Makes a final commit, bounded by `timeout`, flushes the offset store
    /// and releases every partition.
    #[instrument(skip(self), fields(group = %self.config.group_id))]
    pub async fn close(mut self, timeout: Duration) -> Result<()> {
        let final_commit = async {
            self.drain_commits().await;
            self.commit_sync().await
        };
        match tokio::time::timeout(timeout, final_commit).await {
            Ok(Ok(entries)) => tracing::debug!("Final commit of {} offsets", entries.len()),
            Ok(Err(err)) => tracing::warn!("Final commit failed {:?}", err),
            Err(_) => tracing::warn!("Final commit timed out after {:?}", timeout),
        }
        self.commits.abort_all();

        if let Err(err) = self.store.flush(true).await {
            tracing::error!("Error flushing offset store {:?}", err);
        }

        let released = self.assignment.release();
        self.offsets.lock().clear();
        self.unresolved.clear();
        tracing::info!("Consumer closed, released {} partitions", released.len());

        self.transport.close().await
    }

    /// Convert consumer into an asynchronous iterator of polled batches.
    #[must_use = "stream does nothing by itself"]
    pub fn into_stream(
        mut self,
        timeout: Duration,
    ) -> impl Stream<Item = Result<Vec<ConsumerRecord<Bytes, Bytes>>>> {
        async_stream::stream! {
            loop {
                yield self.poll(timeout).await;
            }
        }
    }

    /// Break the polled batches into individual records. Poll errors are
    /// logged and skipped.
    #[must_use = "stream does nothing by itself"]
    pub fn into_flat_stream(
        self,
        timeout: Duration,
    ) -> impl Stream<Item = ConsumerRecord<Bytes, Bytes>> {
        futures::StreamExt::flat_map(
            self.into_stream(timeout).filter_map(|batch| match batch {
                Ok(batch) => Some(batch),
                Err(err) => {
                    tracing::error!("Error polling {:?}", err);
                    None
                }
            }),
            futures::stream::iter,
        )
    }
}

async fn commit_entries(
    store: &Arc<dyn OffsetStore>,
    offsets: &Mutex<OffsetTracker>,
    entries: Vec<CommitEntry>,
) -> Result<Vec<CommitEntry>> {
    match store.store(&entries).await {
        Ok(()) => {
            offsets.lock().mark_committed(&entries);
            tracing::info!("Committed {} offsets", entries.len());
            Ok(entries)
        }
        Err(err) => {
            tracing::warn!("Commit of {} offsets failed {:?}", entries.len(), err);
            Err(Error::CommitFailure(Box::new(err)))
        }
    }
}
