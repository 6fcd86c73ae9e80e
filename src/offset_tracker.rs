//! Per-partition consumed/committed offset bookkeeping.
//!
//! The tracker only knows about partitions the consumer owns. It is fed by
//! the rebalance state machine (`track`/`untrack`), by record delivery
//! (`record_consumed`) and by commit acknowledgements (`mark_committed`), and
//! it decides what needs committing (`pending_commits`).
//!
//! Committed offsets follow the Kafka convention: the value committed for a
//! partition is the offset of the *next* record to read, i.e. the last
//! consumed offset plus one.

use std::collections::BTreeMap;

use crate::error::{Error, Result};
use crate::offset::{Offset, TopicPartitionKey};

/// How a commit call waits for the offset store.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum CommitMode {
    /// Wait for the store to acknowledge.
    #[default]
    Sync,
    /// Return immediately; completion is reported later.
    Async,
}

/// Offset to persist for one partition.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CommitEntry {
    pub partition: TopicPartitionKey,
    /// Next offset to read.
    pub offset: Offset,
}

/// Offsets of a single owned partition. `None` means no valid offset yet.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct PartitionOffsets {
    pub last_consumed: Option<Offset>,
    /// Last consumed offset covered by an acknowledged commit.
    pub last_committed: Option<Offset>,
}

impl PartitionOffsets {
    /// Next offset the consumer will read, if known.
    pub fn position(&self) -> Option<Offset> {
        self.last_consumed.and_then(Offset::next)
    }

    fn needs_commit(&self) -> bool {
        // Option ordering puts None below any Some.
        self.last_consumed.is_some() && self.last_consumed > self.last_committed
    }
}

#[derive(Clone, Debug, Default)]
pub struct OffsetTracker {
    partitions: BTreeMap<TopicPartitionKey, PartitionOffsets>,
}

impl OffsetTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start tracking a newly owned partition.
    ///
    /// `committed` is the group's stored position (next offset to read) and
    /// `start` the position fetching begins from.
    pub fn track(&mut self, partition: TopicPartitionKey, committed: Option<Offset>, start: Offset) {
        let offsets = PartitionOffsets {
            last_consumed: start.prev(),
            last_committed: committed.and_then(Offset::prev),
        };
        tracing::debug!("Tracking {} from {:?}", partition, offsets);
        self.partitions.insert(partition, offsets);
    }

    pub fn untrack(&mut self, partition: &TopicPartitionKey) -> Option<PartitionOffsets> {
        self.partitions.remove(partition)
    }

    pub fn is_tracked(&self, partition: &TopicPartitionKey) -> bool {
        self.partitions.contains_key(partition)
    }

    pub fn get(&self, partition: &TopicPartitionKey) -> Option<&PartitionOffsets> {
        self.partitions.get(partition)
    }

    pub fn partitions(&self) -> impl Iterator<Item = (&TopicPartitionKey, &PartitionOffsets)> {
        self.partitions.iter()
    }

    /// Record that `offset` was handed to the application.
    ///
    /// Offsets must not go backwards; rewinding is only possible through
    /// [`seek`](Self::seek). The last representable offset is refused since
    /// there is no position after it to commit.
    pub fn record_consumed(&mut self, partition: &TopicPartitionKey, offset: Offset) -> Result<()> {
        if offset.next().is_none() {
            return Err(Error::InvalidOffset(offset.value()));
        }
        let offsets = self
            .partitions
            .get_mut(partition)
            .ok_or_else(|| Error::PartitionNotAssigned(partition.clone()))?;

        match offsets.last_consumed {
            Some(last_consumed) if offset < last_consumed => Err(Error::NonMonotonicOffset {
                partition: partition.clone(),
                offset: offset.value(),
                last_consumed: last_consumed.value(),
            }),
            _ => {
                offsets.last_consumed = Some(offset);
                Ok(())
            }
        }
    }

    /// Move the read position so that `offset` is the next record consumed.
    ///
    /// The previous commit no longer describes the position, so the next
    /// commit persists the sought offset even when it is lower.
    pub fn seek(&mut self, partition: &TopicPartitionKey, offset: Offset) -> Result<()> {
        let offsets = self
            .partitions
            .get_mut(partition)
            .ok_or_else(|| Error::PartitionNotAssigned(partition.clone()))?;

        tracing::debug!(
            "Seeking {} from {:?} to {}",
            partition,
            offsets.position(),
            offset
        );
        offsets.last_consumed = offset.prev();
        offsets.last_committed = None;
        Ok(())
    }

    /// Offsets consumed but not yet committed, for every owned partition.
    pub fn pending_commits(&self) -> Vec<CommitEntry> {
        self.pending_commits_for(|_| true)
    }

    /// Like [`pending_commits`](Self::pending_commits), limited to `filter`.
    pub fn pending_commits_for(
        &self,
        filter: impl Fn(&TopicPartitionKey) -> bool,
    ) -> Vec<CommitEntry> {
        self.partitions
            .iter()
            .filter(|(partition, offsets)| offsets.needs_commit() && filter(partition))
            .filter_map(|(partition, offsets)| {
                offsets.position().map(|offset| CommitEntry {
                    partition: partition.clone(),
                    offset,
                })
            })
            .collect()
    }

    /// Apply an acknowledged commit.
    ///
    /// Partitions revoked while the commit was in flight are skipped.
    /// Acknowledgements never move `last_committed` backwards, so async
    /// commits completing out of order are harmless.
    pub fn mark_committed(&mut self, entries: &[CommitEntry]) {
        for entry in entries {
            let Some(offsets) = self.partitions.get_mut(&entry.partition) else {
                tracing::warn!(
                    "Commit of {} for {} completed after it was revoked",
                    entry.offset,
                    entry.partition
                );
                continue;
            };
            let committed = entry.offset.prev();
            if committed > offsets.last_committed {
                offsets.last_committed = committed;
            }
        }
    }

    pub fn clear(&mut self) {
        self.partitions.clear();
    }
}
