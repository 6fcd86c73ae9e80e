//! Error types shared by the consumer, producer and model layers.

use std::io::ErrorKind;

use num_derive::FromPrimitive;
use num_traits::FromPrimitive;

use crate::offset::{OffsetPosition, TopicPartitionKey};

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Clone, Debug, PartialEq, thiserror::Error)]
pub enum Error {
    /// A rebalance event arrived out of order. The state machine still
    /// applied it; this is a diagnostic.
    #[error("rebalance protocol violation: {event} received while {state}")]
    ProtocolViolation {
        event: &'static str,
        state: &'static str,
    },

    /// The offset store rejected a commit. Tracked offsets are unchanged.
    #[error("offset commit failed: {0}")]
    CommitFailure(Box<Error>),

    #[error("cannot seek {partition} to {position:?}")]
    SeekOutOfRange {
        partition: TopicPartitionKey,
        position: OffsetPosition,
    },

    /// Broker rejected a specific record.
    #[error("delivery failed: {0:?}")]
    DeliveryFailure(KafkaCode),

    /// Connection level failure reported by the transport.
    #[error("transport error: {0}")]
    Transport(String),

    #[error("invalid partition id {0}")]
    InvalidPartition(i32),

    #[error("invalid offset {0}")]
    InvalidOffset(i64),

    #[error("consumer group id must not be empty")]
    InvalidGroupId,

    #[error("offset {offset} for {partition} is behind last consumed offset {last_consumed}")]
    NonMonotonicOffset {
        partition: TopicPartitionKey,
        offset: i64,
        last_consumed: i64,
    },

    #[error("{0} is not assigned to this consumer")]
    PartitionNotAssigned(TopicPartitionKey),

    #[error("local producer queue is full")]
    QueueFull,

    #[error("producer is closed")]
    ProducerClosed,

    /// Pending sends did not resolve within a local deadline.
    #[error("sends still pending after {0:?}")]
    FlushTimeout(std::time::Duration),

    #[error("invalid value {value:?} for config {key}")]
    InvalidConfig { key: String, value: String },

    #[error("missing required config {0}")]
    MissingConfig(&'static str),

    #[error("io error: {0:?}")]
    IoError(ErrorKind),

    #[error("corrupt offset file {0}")]
    CorruptOffsetFile(String),

    #[error("kafka error: {0:?}")]
    KafkaError(KafkaCode),
}

impl Error {
    /// Connection level errors owned by the transport rather than this crate.
    pub fn is_transport(&self) -> bool {
        matches!(self, Error::Transport(_))
    }
}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        Error::IoError(err.kind())
    }
}

/// Various errors reported by a remote Kafka server.
/// See also [Kafka Errors](http://kafka.apache.org/protocol.html)
#[derive(Debug, Copy, Clone, PartialEq, Eq, FromPrimitive)]
pub enum KafkaCode {
    /// An unexpected server error
    Unknown = -1,
    None = 0,
    /// The requested offset is outside the range of offsets
    /// maintained by the server for the given topic/partition
    OffsetOutOfRange = 1,
    /// This indicates that a message contents does not match its CRC
    CorruptMessage = 2,
    /// This request is for a topic or partition that does not exist
    /// on this broker.
    UnknownTopicOrPartition = 3,
    /// The message has a negative size
    InvalidMessageSize = 4,
    /// This error is thrown if we are in the middle of a leadership
    /// election and there is currently no leader for this partition
    /// and hence it is unavailable for writes.
    LeaderNotAvailable = 5,
    /// This error is thrown if the client attempts to send messages
    /// to a replica that is not the leader for some partition. It
    /// indicates that the clients metadata is out of date.
    NotLeaderForPartition = 6,
    /// This error is thrown if the request exceeds the user-specified
    /// time limit in the request.
    RequestTimedOut = 7,
    BrokerNotAvailable = 8,
    ReplicaNotAvailable = 9,
    /// The server has a configurable maximum message size to avoid
    /// unbounded memory allocation. This error is thrown if the
    /// client attempt to produce a message larger than this maximum.
    MessageSizeTooLarge = 10,
    StaleControllerEpoch = 11,
    /// If you specify a string larger than configured maximum for
    /// offset metadata
    OffsetMetadataTooLarge = 12,
    NetworkException = 13,
    /// The broker returns this error code for an offset fetch request
    /// if it is still loading offsets (after a leader change for that
    /// offsets topic partition), or in response to group membership
    /// requests (such as heartbeats) when group metadata is being
    /// loaded by the coordinator.
    GroupLoadInProgress = 14,
    /// The broker returns this error code for group coordinator
    /// requests, offset commits, and most group management requests
    /// if the offsets topic has not yet been created, or if the group
    /// coordinator is not active.
    GroupCoordinatorNotAvailable = 15,
    /// The broker returns this error code if it receives an offset
    /// fetch or commit request for a group that it is not a
    /// coordinator for.
    NotCoordinatorForGroup = 16,
    InvalidTopic = 17,
    RecordListTooLarge = 18,
    NotEnoughReplicas = 19,
    NotEnoughReplicasAfterAppend = 20,
    InvalidRequiredAcks = 21,
    /// Returned from group membership requests (such as heartbeats) when
    /// the generation id provided in the request is not the current
    /// generation.
    IllegalGeneration = 22,
    InconsistentGroupProtocol = 23,
    InvalidGroupId = 24,
    /// Returned from group requests (offset commits/fetches, heartbeats,
    /// etc) when the memberId is not in the current generation.
    UnknownMemberId = 25,
    InvalidSessionTimeout = 26,
    /// Returned in heartbeat requests when the coordinator has begun
    /// rebalancing the group. This indicates to the client that it
    /// should rejoin the group.
    RebalanceInProgress = 27,
    InvalidCommitOffsetSize = 28,
    TopicAuthorizationFailed = 29,
    GroupAuthorizationFailed = 30,
    ClusterAuthorizationFailed = 31,
    InvalidTimestamp = 32,
    UnsupportedSaslMechanism = 33,
    IllegalSaslState = 34,
    UnsupportedVersion = 35,
    TopicAlreadyExists = 36,
    InvalidPartitions = 37,
    InvalidReplicationFactor = 38,
    InvalidReplicaAssignment = 39,
    InvalidConfig = 40,
    NotController = 41,
    InvalidRequest = 42,
    UnsupportedForMessageFormat = 43,
    PolicyViolation = 44,
    OutOfOrderSequenceNumber = 45,
    DuplicateSequenceNumber = 46,
    InvalidProducerEpoch = 47,
}

impl From<i16> for KafkaCode {
    fn from(code: i16) -> Self {
        FromPrimitive::from_i16(code).unwrap_or(KafkaCode::Unknown)
    }
}
