//! Producer side correlation of sent records to their outcome.
//!
//! Every send registers the record with the [`DeliveryTracker`] and gets a
//! [`DeliveryFuture`] back. The producer worker resolves the entry once the
//! transport reports an outcome; closing the producer resolves whatever is
//! left as failures. An entry can only be removed once, so each future sees
//! exactly one [`DeliveryReport`].

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicU64, Ordering};
use std::task::{Context, Poll};
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::{oneshot, watch};

use crate::error::Error;
use crate::offset::{Offset, PartitionId};
use crate::record::ProducerRecord;
use crate::transport::ProduceOutcome;

/// Outcome of one send.
#[derive(Clone, Debug, PartialEq)]
pub enum DeliveryReport {
    /// The broker stored the record at `offset` in `partition`.
    Success {
        record: ProducerRecord,
        partition: PartitionId,
        offset: Offset,
    },
    /// Delivery of this record failed. The record is handed back for retry
    /// or logging.
    Failure { record: ProducerRecord, error: Error },
    /// An error that cannot be tied to a specific record. It does not prove
    /// the record was not sent.
    NoMessageError(Error),
}

impl DeliveryReport {
    pub fn is_success(&self) -> bool {
        matches!(self, DeliveryReport::Success { .. })
    }

    /// Assigned offset on success.
    pub fn offset(&self) -> Option<Offset> {
        match self {
            DeliveryReport::Success { offset, .. } => Some(*offset),
            _ => None,
        }
    }

    fn from_outcome(record: ProducerRecord, outcome: ProduceOutcome) -> Self {
        match outcome {
            ProduceOutcome::Accepted { partition, offset } => match Offset::new(offset) {
                Ok(offset) => DeliveryReport::Success {
                    record,
                    partition,
                    offset,
                },
                Err(error) => DeliveryReport::Failure { record, error },
            },
            ProduceOutcome::Rejected(error) => DeliveryReport::Failure { record, error },
            ProduceOutcome::NotAccepted(error) => DeliveryReport::NoMessageError(error),
        }
    }
}

/// Resolves to the [`DeliveryReport`] of one send.
#[must_use = "delivery reports are only observable by awaiting the future"]
#[derive(Debug)]
pub struct DeliveryFuture {
    receiver: oneshot::Receiver<DeliveryReport>,
}

impl DeliveryFuture {
    /// A future that is already resolved.
    pub(crate) fn ready(report: DeliveryReport) -> Self {
        let (sender, receiver) = oneshot::channel();
        let _ = sender.send(report);
        Self { receiver }
    }
}

impl Future for DeliveryFuture {
    type Output = DeliveryReport;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        Pin::new(&mut self.receiver)
            .poll(cx)
            .map(|report| report.unwrap_or(DeliveryReport::NoMessageError(Error::ProducerClosed)))
    }
}

struct Pending {
    record: ProducerRecord,
    sender: oneshot::Sender<DeliveryReport>,
}

/// Table of sends still waiting for an outcome.
pub struct DeliveryTracker {
    next_id: AtomicU64,
    pending: Mutex<HashMap<u64, Pending>>,
    in_flight: watch::Sender<usize>,
}

impl Default for DeliveryTracker {
    fn default() -> Self {
        Self::new()
    }
}

impl DeliveryTracker {
    pub fn new() -> Self {
        let (in_flight, _) = watch::channel(0);
        Self {
            next_id: AtomicU64::new(0),
            pending: Mutex::new(HashMap::new()),
            in_flight,
        }
    }

    /// Register a send; the id is used to resolve it later.
    pub fn register(&self, record: ProducerRecord) -> (u64, DeliveryFuture) {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (sender, receiver) = oneshot::channel();

        let mut pending = self.pending.lock();
        pending.insert(id, Pending { record, sender });
        self.in_flight.send_replace(pending.len());

        (id, DeliveryFuture { receiver })
    }

    /// Resolve send `id` from a transport outcome.
    ///
    /// Returns false if it was already resolved, e.g. failed by a close.
    pub fn resolve(&self, id: u64, outcome: ProduceOutcome) -> bool {
        match self.take(id) {
            Some(Pending { record, sender }) => {
                let report = DeliveryReport::from_outcome(record, outcome);
                if !report.is_success() {
                    tracing::debug!("Delivery {} did not succeed: {:?}", id, report);
                }
                // The caller may have dropped the future; nothing to do then.
                let _ = sender.send(report);
                true
            }
            None => {
                tracing::debug!("Delivery {} was already resolved", id);
                false
            }
        }
    }

    /// Fail a registered send without a transport outcome.
    pub fn fail(&self, id: u64, error: Error) -> bool {
        match self.take(id) {
            Some(Pending { record, sender }) => {
                let _ = sender.send(DeliveryReport::Failure { record, error });
                true
            }
            None => false,
        }
    }

    /// Fail every pending send. Returns how many were failed.
    pub fn fail_all(&self, error: Error) -> usize {
        let drained: Vec<Pending> = {
            let mut pending = self.pending.lock();
            let drained = pending.drain().map(|(_, p)| p).collect();
            self.in_flight.send_replace(0);
            drained
        };

        let count = drained.len();
        for Pending { record, sender } in drained {
            let _ = sender.send(DeliveryReport::Failure {
                record,
                error: error.clone(),
            });
        }
        count
    }

    pub fn in_flight(&self) -> usize {
        *self.in_flight.borrow()
    }

    /// Wait until no sends are pending or `timeout` passes. Returns whether
    /// everything resolved.
    pub async fn wait_idle(&self, timeout: Duration) -> bool {
        let mut receiver = self.in_flight.subscribe();
        if *receiver.borrow_and_update() == 0 {
            return true;
        }
        if timeout.is_zero() {
            return false;
        }
        tokio::time::timeout(timeout, receiver.wait_for(|count| *count == 0))
            .await
            .map(|result| result.is_ok())
            .unwrap_or(false)
    }

    fn take(&self, id: u64) -> Option<Pending> {
        let mut pending = self.pending.lock();
        let entry = pending.remove(&id);
        self.in_flight.send_replace(pending.len());
        entry
    }
}

#[cfg(test)]
mod test {
    use bytes::Bytes;

    use super::*;
    use crate::error::KafkaCode;

    fn record() -> ProducerRecord {
        ProducerRecord::to("audit").value(Bytes::from_static(b"login"))
    }

    #[tokio::test]
    async fn it_reports_success_with_the_assigned_offset() {
        let tracker = DeliveryTracker::new();
        let (id, future) = tracker.register(record());
        assert_eq!(tracker.in_flight(), 1);

        tracker.resolve(
            id,
            ProduceOutcome::Accepted {
                partition: PartitionId::new(3).unwrap(),
                offset: 100,
            },
        );

        assert_eq!(
            future.await,
            DeliveryReport::Success {
                record: record(),
                partition: PartitionId::new(3).unwrap(),
                offset: Offset::new(100).unwrap()
            }
        );
        assert_eq!(tracker.in_flight(), 0);
    }

    #[tokio::test]
    async fn it_never_reports_success_with_a_sentinel_offset() {
        let tracker = DeliveryTracker::new();
        let (id, future) = tracker.register(record());
        tracker.resolve(
            id,
            ProduceOutcome::Accepted {
                partition: PartitionId::new(0).unwrap(),
                offset: -1,
            },
        );

        assert_eq!(
            future.await,
            DeliveryReport::Failure {
                record: record(),
                error: Error::InvalidOffset(-1)
            }
        );
    }

    #[tokio::test]
    async fn it_separates_uncorrelated_errors() {
        let tracker = DeliveryTracker::new();
        let (rejected, rejected_future) = tracker.register(record());
        let (queued, queued_future) = tracker.register(record());

        tracker.resolve(
            rejected,
            ProduceOutcome::Rejected(Error::DeliveryFailure(KafkaCode::MessageSizeTooLarge)),
        );
        tracker.resolve(queued, ProduceOutcome::NotAccepted(Error::QueueFull));

        assert!(matches!(
            rejected_future.await,
            DeliveryReport::Failure { .. }
        ));
        assert_eq!(
            queued_future.await,
            DeliveryReport::NoMessageError(Error::QueueFull)
        );
    }

    #[tokio::test]
    async fn it_resolves_each_send_once() {
        let tracker = DeliveryTracker::new();
        let (id, future) = tracker.register(record());

        assert_eq!(tracker.fail_all(Error::ProducerClosed), 1);
        assert!(!tracker.resolve(
            id,
            ProduceOutcome::Accepted {
                partition: PartitionId::new(0).unwrap(),
                offset: 5
            }
        ));
        assert!(matches!(
            future.await,
            DeliveryReport::Failure {
                error: Error::ProducerClosed,
                ..
            }
        ));
    }

    #[tokio::test]
    async fn it_waits_for_pending_sends() {
        let tracker = std::sync::Arc::new(DeliveryTracker::new());
        assert!(tracker.wait_idle(Duration::ZERO).await);

        let (id, _future) = tracker.register(record());
        assert!(!tracker.wait_idle(Duration::ZERO).await);
        assert!(!tracker.wait_idle(Duration::from_millis(10)).await);

        let resolver = tracker.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            resolver.fail(id, Error::ProducerClosed);
        });
        assert!(tracker.wait_idle(Duration::from_secs(5)).await);
    }
}
