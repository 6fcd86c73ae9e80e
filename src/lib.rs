//! # Franz
//! Consumer group membership and offset management for Kafka clients.
//!
//! This crate owns the state a Kafka client keeps on top of its broker
//! connection: which partitions a group member owns, which offsets it has
//! consumed and committed, and which produced records are still waiting for
//! a delivery report. The connection itself (wire protocol, broker
//! discovery, compression, TLS) plugs in through the
//! [`ConsumerTransport`](prelude::ConsumerTransport) and
//! [`ProducerTransport`](prelude::ProducerTransport) traits.
//!
//! ## Table of contents
//! - [Getting started](#getting-started)
//!     - [Producer](#producer)
//!     - [Consumer](#consumer)
//!     - [Configuration](#configuration)
//! - [Records](#records)
//!
//! ## Getting started
//! Include the following snippet in your `Cargo.toml` dependencies:
//! ```toml
//! franz = "0.1"
//! ```
//!
//! ### Producer
//! A [`Producer`](prelude::Producer) hands records to a background worker
//! and returns a future of their [`DeliveryReport`](prelude::DeliveryReport).
//! To instantiate one, start with a [`ProducerBuilder`](prelude::ProducerBuilder).
//!
//! It is buffered, with both a timeout and volume threshold that clears the
//! buffer when reached. This is how latency and throughput can be tweaked to
//! achieve the desired rates.
//! ```ignore
//! let producer = franz::prelude::ProducerBuilder::new(transport)
//!     .linger_ms(1)
//!     .max_batch_size(2)
//!     .build()
//!     .await;
//!
//! let record = franz::prelude::ProducerRecord::to("my-topic")
//!     .key(bytes::Bytes::from_static(b"Tester"))
//!     .value(bytes::Bytes::from_static(b"Value"));
//!
//! let report = producer.send(record).await;
//! producer.close(std::time::Duration::from_secs(5)).await;
//! ```
//!
//! ### Consumer
//! A [`KafkaConsumer`](prelude::KafkaConsumer) is one member of a consumer
//! group. Rebalance events, fetched records and commits all flow through
//! [`poll`](prelude::KafkaConsumer::poll). To instantiate one, start with a
//! [`ConsumerBuilder`](prelude::ConsumerBuilder).
//! ```ignore
//! let mut consumer = franz::prelude::ConsumerBuilder::new(transport, "The Data Boyz")?
//!     .offset_reset(franz::prelude::OffsetReset::Earliest)
//!     .enable_auto_commit(true)
//!     .build();
//! consumer.subscribe(["my-topic"]).await?;
//!
//! let stream = consumer.into_flat_stream(std::time::Duration::from_millis(100));
//! // have to pin streams before iterating
//! tokio::pin!(stream);
//!
//! // Stream will do nothing unless consumed.
//! while let Some(record) = stream.next().await {
//!     println!("{:?}", record);
//! }
//! ```
//!
//! ### Configuration
//! Both builders can start from a librdkafka style [`ClientConfig`](prelude::ClientConfig).
//! ```ignore
//! let config: franz::prelude::ClientConfig = [
//!     ("group.id", "billing"),
//!     ("offset.store.method", "file"),
//!     ("offset.store.path", "/var/lib/billing"),
//!     ("offset.store.sync.interval.ms", "1000"),
//! ]
//! .into_iter()
//! .collect();
//!
//! let consumer = franz::prelude::ConsumerBuilder::from_config(transport, &config)?.build();
//! ```
//!
//! ## Records
//! [`ConsumerRecord`](prelude::ConsumerRecord) is generic over its key and
//! value, so decoding is a transform that keeps topic, partition, offset and
//! timestamp intact.
//! ```ignore
//! let record = record
//!     .try_map_key(|key| String::from_utf8(key.to_vec()))?
//!     .map_value(|value| value.len());
//! ```

mod config;
mod consumer;
mod consumer_builder;
mod delivery;
mod error;
mod offset;
mod offset_store;
mod offset_tracker;
mod producer;
mod producer_builder;
mod rebalance;
mod record;
mod transport;

const DEFAULT_CLIENT_ID: &str = "franz";

pub mod prelude {
    //! Main export of various structures and methods
    //!
    //! We break the library into three main sections:
    //! - [Consuming](#consuming)
    //! - [Producing](#producing)
    //! - [Model](#model)
    //!
    //! # Consuming
    //!
    //! The [`KafkaConsumer`] applies [`RebalanceEvent`]s to an
    //! [`AssignmentTracker`], records consumed offsets in an
    //! [`OffsetTracker`] and commits them to an [`OffsetStore`], either the
    //! broker ([`BrokerOffsetStore`]) or local files ([`FileOffsetStore`]).
    //! Applications hook into rebalances and commit completions with a
    //! [`ConsumerContext`].
    //!
    //! # Producing
    //!
    //! The [`Producer`] is represented as a background worker containing a
    //! queue of records to be sent upon meeting either of two conditions:
    //! - The maximum number of records is filled
    //! - The linger time has ran out
    //!
    //! Each send resolves exactly once to a [`DeliveryReport`] through the
    //! [`DeliveryTracker`].
    //!
    //! # Model
    //!
    //! [`Offset`], [`PartitionId`] and [`OffsetPosition`] never carry
    //! negative sentinels as plain integers; [`OffsetPosition::from_raw`] and
    //! [`OffsetPosition::to_raw`] convert at the native boundary.
    pub use crate::config::{ClientConfig, ConsumerConfig, OffsetReset, ProducerConfig};
    pub use crate::consumer::{
        ConsumerContext, DefaultConsumerContext, KafkaConsumer, PendingCommit,
    };
    pub use crate::consumer_builder::ConsumerBuilder;
    pub use crate::delivery::{DeliveryFuture, DeliveryReport, DeliveryTracker};
    pub use crate::error::{Error, KafkaCode, Result};
    pub use crate::offset::{
        ConsumerGroupId, Offset, OffsetPosition, PartitionId, Timestamp, TopicPartition,
        TopicPartitionKey,
    };
    pub use crate::offset_store::{
        open_store, BrokerOffsetStore, FileOffsetStore, OffsetStore, OffsetStoreMethod,
        SyncPolicy,
    };
    pub use crate::offset_tracker::{CommitEntry, CommitMode, OffsetTracker, PartitionOffsets};
    pub use crate::producer::Producer;
    pub use crate::producer_builder::ProducerBuilder;
    pub use crate::rebalance::{AssignmentTracker, RebalanceEvent, RebalanceState, Transition};
    pub use crate::record::{ConsumerRecord, Header, ProducerRecord, TargetPartition};
    pub use crate::transport::{
        ConsumerTransport, FetchedMessage, ProduceOutcome, ProducerTransport, TransportEvent,
        Watermarks,
    };
}
