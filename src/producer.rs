//! Client that sends records to a cluster.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::{
    sync::mpsc::{error::TrySendError, Receiver, Sender},
    task::{JoinHandle, JoinSet},
};
use tokio_stream::{Stream, StreamExt};
use tracing::instrument;

use crate::{
    delivery::{DeliveryFuture, DeliveryReport, DeliveryTracker},
    error::{Error, Result},
    record::{ProducerRecord, TargetPartition},
    transport::{ProduceOutcome, ProducerTransport},
};

/// A record waiting in the producer queue.
pub(crate) struct Queued {
    pub id: u64,
    pub record: ProducerRecord,
}

/// Kafka/Redpanda Producer.
///
/// This struct is a handle to a background worker that does the actual
/// producing. [`send`](Self::send) never blocks: it registers the record with
/// the delivery tracker, puts it in a bounded queue and returns a
/// [`DeliveryFuture`]. The worker drains the queue in batches; a batch is
/// flushed when it reaches the maximum size or when the linger time runs out.
/// These two parameters, found in the
/// [`ProducerBuilder`](crate::prelude::ProducerBuilder), trade latency for
/// throughput.
///
/// The handle is cheap to clone and can be shared by many sending tasks.
/// Reports for records sent to the same partition from the same task resolve
/// in send order.
///
/// ### Example
/// ```ignore
/// let producer = franz::prelude::ProducerBuilder::new(transport)
///     .linger_ms(1)
///     .max_batch_size(2)
///     .build()
///     .await;
///
/// let record = franz::prelude::ProducerRecord::to("my-topic")
///     .key("Tester")
///     .value("Value");
///
/// match producer.send(record).await {
///     DeliveryReport::Success { offset, .. } => println!("stored at {offset}"),
///     report => println!("not delivered: {report:?}"),
/// }
///
/// producer.close(Duration::from_secs(5)).await;
/// ```
#[derive(Clone)]
pub struct Producer {
    inner: Arc<ProducerInner>,
}

struct ProducerInner {
    client_id: String,
    /// Taken on close so no new records enter the queue.
    sender: Mutex<Option<Sender<Queued>>>,
    tracker: Arc<DeliveryTracker>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl Drop for ProducerInner {
    fn drop(&mut self) {
        if let Some(worker) = self.worker.lock().take() {
            worker.abort();
        }
        let failed = self.tracker.fail_all(Error::ProducerClosed);
        if failed > 0 {
            tracing::warn!("Producer dropped with {} pending sends", failed);
        }
    }
}

impl Producer {
    pub(crate) fn new(
        client_id: String,
        sender: Sender<Queued>,
        tracker: Arc<DeliveryTracker>,
        worker: JoinHandle<()>,
    ) -> Self {
        Self {
            inner: Arc::new(ProducerInner {
                client_id,
                sender: Mutex::new(Some(sender)),
                tracker,
                worker: Mutex::new(Some(worker)),
            }),
        }
    }

    /// Queue a record for delivery.
    ///
    /// A full queue resolves the future right away with
    /// [`DeliveryReport::NoMessageError`]; a closed producer with
    /// [`DeliveryReport::Failure`].
    pub fn send(&self, record: ProducerRecord) -> DeliveryFuture {
        let sender = self.inner.sender.lock().clone();
        let Some(sender) = sender else {
            return DeliveryFuture::ready(DeliveryReport::Failure {
                record,
                error: Error::ProducerClosed,
            });
        };

        let tracker = &self.inner.tracker;
        let (id, future) = tracker.register(record.clone());
        match sender.try_send(Queued { id, record }) {
            Ok(()) => {}
            Err(TrySendError::Full(_)) => {
                tracing::warn!("Producer {} queue is full", self.inner.client_id);
                tracker.resolve(id, ProduceOutcome::NotAccepted(Error::QueueFull));
            }
            Err(TrySendError::Closed(_)) => {
                tracing::warn!("Producer {} has hung up channel", self.inner.client_id);
                tracker.fail(id, Error::ProducerClosed);
            }
        }
        future
    }

    /// Sends that have not resolved yet.
    pub fn in_flight(&self) -> usize {
        self.inner.tracker.in_flight()
    }

    /// Wait up to `timeout` for every pending send to resolve.
    pub async fn flush(&self, timeout: Duration) -> Result<()> {
        if self.inner.tracker.wait_idle(timeout).await {
            Ok(())
        } else {
            Err(Error::FlushTimeout(timeout))
        }
    }

    /// Stop accepting records and wait up to `timeout` for pending sends.
    ///
    /// Sends still pending after the timeout are resolved as
    /// [`DeliveryReport::Failure`] with [`Error::ProducerClosed`]. Returns how
    /// many sends were failed that way. A zero timeout never waits.
    #[instrument(skip(self), fields(client_id = %self.inner.client_id))]
    pub async fn close(&self, timeout: Duration) -> usize {
        // Dropping the last sender lets the worker drain the queue and stop.
        drop(self.inner.sender.lock().take());

        let tracker = &self.inner.tracker;
        if tracker.wait_idle(timeout).await {
            let worker = self.inner.worker.lock().take();
            if let Some(worker) = worker {
                if let Err(err) = worker.await {
                    tracing::error!("Producer worker failed {:?}", err);
                }
            }
            tracing::info!("Producer closed");
            return 0;
        }

        let worker = self.inner.worker.lock().take();
        if let Some(worker) = worker {
            worker.abort();
        }
        let failed = tracker.fail_all(Error::ProducerClosed);
        tracing::warn!("Producer closed with {} undelivered records", failed);
        failed
    }
}

pub(crate) fn into_produce_stream(mut receiver: Receiver<Queued>) -> impl Stream<Item = Queued> {
    async_stream::stream! {
        while let Some(queued) = receiver.recv().await {
            yield queued;
        }
    }
}

/// Background worker: flush batches until the queue closes.
pub(crate) async fn producer<T: ProducerTransport>(
    stream: impl Stream<Item = Vec<Queued>> + Send + 'static,
    transport: Arc<T>,
    tracker: Arc<DeliveryTracker>,
) {
    tokio::pin!(stream);
    while let Some(batch) = stream.next().await {
        flush_batch(&transport, &tracker, batch).await;
    }
    tracing::debug!("Producer queue closed");
}

/// Produce one batch.
///
/// Records are grouped by topic and target partition. Groups are produced
/// concurrently, records within a group one after another so their reports
/// resolve in queue order.
#[instrument(level = "debug", skip_all, fields(records = batch.len()))]
pub(crate) async fn flush_batch<T: ProducerTransport>(
    transport: &Arc<T>,
    tracker: &Arc<DeliveryTracker>,
    batch: Vec<Queued>,
) {
    let mut groups: HashMap<(String, TargetPartition), Vec<Queued>> = HashMap::new();
    for queued in batch {
        groups
            .entry((queued.record.topic.clone(), queued.record.partition))
            .or_default()
            .push(queued);
    }

    let mut set = JoinSet::new();
    for ((topic, partition), records) in groups.into_iter() {
        let transport = transport.clone();
        let tracker = tracker.clone();
        set.spawn(async move {
            tracing::trace!("Producing {} records to {} {:?}", records.len(), topic, partition);
            for Queued { id, record } in records {
                let outcome = transport.produce(&record).await;
                tracker.resolve(id, outcome);
            }
        });
    }

    while let Some(res) = set.join_next().await {
        if let Err(err) = res {
            tracing::error!("Error in producer agent {:?}", err);
        }
    }
}
