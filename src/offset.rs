//! Topic-partition coordinates and offset positions.
//!
//! Offsets handed around this crate are always real log positions. The
//! special "positions" a consumer can ask for (beginning, end, the group's
//! stored offset) are variants of [`OffsetPosition`] rather than negative
//! integers, so a real offset and a sentinel can never be confused.

use std::fmt;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

// librdkafka's numeric sentinels, used only at the native boundary.
const RAW_OFFSET_BEGINNING: i64 = -2;
const RAW_OFFSET_END: i64 = -1;
const RAW_OFFSET_STORED: i64 = -1000;
const RAW_OFFSET_INVALID: i64 = -1001;

/// A log position within one partition. Never negative.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct Offset(i64);

impl Offset {
    pub const ZERO: Offset = Offset(0);

    pub fn new(value: i64) -> Result<Self> {
        if value < 0 {
            return Err(Error::InvalidOffset(value));
        }
        Ok(Offset(value))
    }

    pub fn value(self) -> i64 {
        self.0
    }

    /// The offset after this one; the value committed for a consumed record.
    /// `None` for the last representable offset.
    pub fn next(self) -> Option<Offset> {
        self.0.checked_add(1).map(Offset)
    }

    /// The offset before this one, if any.
    pub fn prev(self) -> Option<Offset> {
        if self.0 == 0 {
            None
        } else {
            Some(Offset(self.0 - 1))
        }
    }
}

impl fmt::Display for Offset {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl TryFrom<i64> for Offset {
    type Error = Error;

    fn try_from(value: i64) -> Result<Self> {
        Offset::new(value)
    }
}

/// Partition index within a topic. Never negative.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct PartitionId(i32);

impl PartitionId {
    pub fn new(id: i32) -> Result<Self> {
        if id < 0 {
            return Err(Error::InvalidPartition(id));
        }
        Ok(PartitionId(id))
    }

    pub fn id(self) -> i32 {
        self.0
    }
}

impl fmt::Display for PartitionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl TryFrom<i32> for PartitionId {
    type Error = Error;

    fn try_from(id: i32) -> Result<Self> {
        PartitionId::new(id)
    }
}

/// Where a consumer should read from in a partition.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum OffsetPosition {
    /// The earliest offset still in the log.
    Beginning,
    /// The offset the next produced record will get.
    End,
    /// The offset committed for the consumer group.
    Stored,
    Explicit(Offset),
    Invalid,
}

impl OffsetPosition {
    pub fn explicit(offset: i64) -> Result<Self> {
        Ok(OffsetPosition::Explicit(Offset::new(offset)?))
    }

    /// Decode a position from the numeric sentinels used by librdkafka.
    ///
    /// Unknown negative values decode to [`OffsetPosition::Invalid`].
    pub fn from_raw(raw: i64) -> Self {
        match raw {
            RAW_OFFSET_BEGINNING => OffsetPosition::Beginning,
            RAW_OFFSET_END => OffsetPosition::End,
            RAW_OFFSET_STORED => OffsetPosition::Stored,
            raw if raw >= 0 => OffsetPosition::Explicit(Offset(raw)),
            _ => OffsetPosition::Invalid,
        }
    }

    pub fn to_raw(self) -> i64 {
        match self {
            OffsetPosition::Beginning => RAW_OFFSET_BEGINNING,
            OffsetPosition::End => RAW_OFFSET_END,
            OffsetPosition::Stored => RAW_OFFSET_STORED,
            OffsetPosition::Explicit(offset) => offset.value(),
            OffsetPosition::Invalid => RAW_OFFSET_INVALID,
        }
    }
}

/// A (topic, partition) pair, used for assignment sets and offset maps.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct TopicPartitionKey {
    pub topic: String,
    pub partition: PartitionId,
}

impl TopicPartitionKey {
    pub fn new(topic: impl Into<String>, partition: i32) -> Result<Self> {
        Ok(Self {
            topic: topic.into(),
            partition: PartitionId::new(partition)?,
        })
    }

    /// Attach a read position to this pair.
    pub fn at(&self, position: OffsetPosition) -> TopicPartition {
        TopicPartition {
            topic: self.topic.clone(),
            partition: self.partition,
            position,
        }
    }
}

impl fmt::Display for TopicPartitionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}[{}]", self.topic, self.partition)
    }
}

/// A topic partition together with a read position.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct TopicPartition {
    pub topic: String,
    pub partition: PartitionId,
    pub position: OffsetPosition,
}

impl TopicPartition {
    pub fn new(topic: impl Into<String>, partition: i32, position: OffsetPosition) -> Result<Self> {
        Ok(Self {
            topic: topic.into(),
            partition: PartitionId::new(partition)?,
            position,
        })
    }

    pub fn key(&self) -> TopicPartitionKey {
        TopicPartitionKey {
            topic: self.topic.clone(),
            partition: self.partition,
        }
    }
}

/// Record timestamp as reported by the broker.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum Timestamp {
    CreateTime(i64),
    LogAppendTime(i64),
    NotAvailable,
}

impl Timestamp {
    pub fn millis(self) -> Option<i64> {
        match self {
            Timestamp::CreateTime(ms) | Timestamp::LogAppendTime(ms) => Some(ms),
            Timestamp::NotAvailable => None,
        }
    }
}

/// Identifier of a consumer group.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct ConsumerGroupId(String);

impl ConsumerGroupId {
    pub fn new(id: impl Into<String>) -> Result<Self> {
        let id = id.into();
        if id.is_empty() {
            return Err(Error::InvalidGroupId);
        }
        Ok(Self(id))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ConsumerGroupId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn it_rejects_negative_partitions() {
        assert_eq!(PartitionId::new(-1), Err(Error::InvalidPartition(-1)));
        assert!(TopicPartitionKey::new("t", -3).is_err());
        assert_eq!(PartitionId::new(3).unwrap().id(), 3);
    }

    #[test]
    fn it_rejects_negative_explicit_positions() {
        assert_eq!(OffsetPosition::explicit(-2), Err(Error::InvalidOffset(-2)));
        assert_eq!(
            OffsetPosition::explicit(7),
            Ok(OffsetPosition::Explicit(Offset::new(7).unwrap()))
        );
    }

    #[test]
    fn it_maps_native_sentinels() {
        assert_eq!(OffsetPosition::from_raw(-2), OffsetPosition::Beginning);
        assert_eq!(OffsetPosition::from_raw(-1), OffsetPosition::End);
        assert_eq!(OffsetPosition::from_raw(-1000), OffsetPosition::Stored);
        assert_eq!(OffsetPosition::from_raw(-55), OffsetPosition::Invalid);
        assert_eq!(OffsetPosition::from_raw(12).to_raw(), 12);
        assert_eq!(OffsetPosition::Invalid.to_raw(), -1001);
    }

    #[test]
    fn it_steps_offsets() {
        let offset = Offset::new(41).unwrap();
        assert_eq!(offset.next().map(Offset::value), Some(42));
        assert_eq!(Offset::new(i64::MAX).unwrap().next(), None);
        assert_eq!(offset.prev().map(Offset::value), Some(40));
        assert_eq!(Offset::ZERO.prev(), None);
    }

    #[test]
    fn it_rejects_empty_group_ids() {
        assert_eq!(ConsumerGroupId::new(""), Err(Error::InvalidGroupId));
        assert_eq!(ConsumerGroupId::new("readers").unwrap().as_str(), "readers");
    }
}
