use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc::channel;
use tokio_stream::StreamExt;

use crate::config::{ClientConfig, ProducerConfig};
use crate::delivery::DeliveryTracker;
use crate::error::Result;
use crate::producer::{into_produce_stream, producer, Producer};
use crate::transport::ProducerTransport;

/// Configure a [`Producer`].
///
/// ### Example
/// ```ignore
/// let producer = franz::prelude::ProducerBuilder::new(transport)
///     .linger_ms(1)
///     .max_batch_size(2)
///     .queue_max_messages(10_000)
///     .build()
///     .await;
/// ```
#[derive(Clone)]
pub struct ProducerBuilder<T: ProducerTransport> {
    transport: Arc<T>,
    config: ProducerConfig,
}

impl<T: ProducerTransport> ProducerBuilder<T> {
    /// Start a producer builder. To complete, use the [`build`](Self::build) method.
    pub fn new(transport: T) -> Self {
        Self::with_shared_transport(Arc::new(transport))
    }

    pub fn with_shared_transport(transport: Arc<T>) -> Self {
        Self {
            transport,
            config: ProducerConfig::default(),
        }
    }

    /// Start from a librdkafka style property map.
    pub fn from_config(transport: T, config: &ClientConfig) -> Result<Self> {
        Ok(Self {
            transport: Arc::new(transport),
            config: config.producer_config()?,
        })
    }

    /// The max number of messages that will sit in queue to be produced.
    ///
    /// When the queue size surpasses this number, the queue will be flushed and
    /// all records produced. Unless the [`linger_ms`](Self::linger_ms) has passed, then the
    /// queue will be flushed regardless of its size.
    ///
    /// Increasing this number will increase latency, but also increase throughput.
    pub fn max_batch_size(mut self, max_batch_size: usize) -> Self {
        self.config.max_batch_size = max_batch_size.max(1);
        self
    }

    /// The maximum time a message will sit in the queue to be produced.
    ///
    /// Each batch will wait a maximum of this time, and then be flushed.
    /// If the batch fills up with [`max_batch_size`](Self::max_batch_size) then it will be flushed
    /// before this time runs out.
    ///
    /// Decreasing this number will lower latency, but also lower throughput.
    pub fn linger_ms(mut self, linger_ms: u64) -> Self {
        self.config.linger = Duration::from_millis(linger_ms);
        self
    }

    /// Capacity of the local send queue. Sends beyond it resolve with
    /// [`DeliveryReport::NoMessageError`](crate::prelude::DeliveryReport::NoMessageError).
    pub fn queue_max_messages(mut self, queue_max_messages: usize) -> Self {
        self.config.queue_max_messages = queue_max_messages.max(1);
        self
    }

    pub fn client_id(mut self, client_id: String) -> Self {
        self.config.client_id = client_id;
        self
    }

    /// Spawn the background worker. Must be called inside a tokio runtime.
    pub async fn build(self) -> Producer {
        let (sender, receiver) = channel(self.config.queue_max_messages);
        let tracker = Arc::new(DeliveryTracker::new());

        let produce_stream = into_produce_stream(receiver)
            .chunks_timeout(self.config.max_batch_size, self.config.linger);

        let worker = tokio::spawn(producer(produce_stream, self.transport, tracker.clone()));
        tracing::info!("Producer {} started", self.config.client_id);

        Producer::new(self.config.client_id, sender, tracker, worker)
    }
}
