//! Partition ownership of a consumer group member.
//!
//! The group coordination layer tells a member about membership changes with
//! four events. `BeforeAssign` and `BeforeRevoke` are notifications that give
//! the consumer a chance to act (e.g. commit offsets) before anything
//! changes; the assigned set itself only changes on `Assign` and `Revoke`.
//!
//! ```text
//!  Unassigned ──before-assign──▶ Assigning ──assign──▶ Assigned(P)
//!       ▲                            ▲                    │
//!       │                            └──before-assign─────┤
//!       │                                                 │ before-revoke
//!       └──────────revoke (nothing left)──── Revoking ◀───┘
//! ```
//!
//! Events that arrive out of order are applied anyway, since the
//! coordination layer is the source of truth for membership, and reported as
//! [`Error::ProtocolViolation`] on the returned [`Transition`].

use std::collections::BTreeSet;

use crate::error::Error;
use crate::offset::TopicPartitionKey;

/// Membership notification delivered by the group coordination layer.
#[derive(Clone, Debug, PartialEq)]
pub enum RebalanceEvent {
    BeforeAssign(Vec<TopicPartitionKey>),
    Assign(Vec<TopicPartitionKey>),
    BeforeRevoke(Vec<TopicPartitionKey>),
    Revoke(Vec<TopicPartitionKey>),
}

impl RebalanceEvent {
    pub fn name(&self) -> &'static str {
        match self {
            RebalanceEvent::BeforeAssign(_) => "before-assign",
            RebalanceEvent::Assign(_) => "assign",
            RebalanceEvent::BeforeRevoke(_) => "before-revoke",
            RebalanceEvent::Revoke(_) => "revoke",
        }
    }

    pub fn partitions(&self) -> &[TopicPartitionKey] {
        match self {
            RebalanceEvent::BeforeAssign(p)
            | RebalanceEvent::Assign(p)
            | RebalanceEvent::BeforeRevoke(p)
            | RebalanceEvent::Revoke(p) => p,
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub enum RebalanceState {
    Unassigned,
    Assigning,
    Assigned(BTreeSet<TopicPartitionKey>),
    Revoking,
}

#[derive(Clone, Debug, PartialEq)]
enum Phase {
    Idle,
    Assigning(BTreeSet<TopicPartitionKey>),
    Revoking(BTreeSet<TopicPartitionKey>),
}

/// Result of applying one [`RebalanceEvent`].
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Transition {
    /// Partitions that became owned.
    pub added: Vec<TopicPartitionKey>,
    /// Partitions that are no longer owned.
    pub removed: Vec<TopicPartitionKey>,
    /// Set when the event arrived out of order.
    pub violation: Option<Error>,
}

/// Tracks which partitions a group member owns.
#[derive(Clone, Debug)]
pub struct AssignmentTracker {
    assigned: BTreeSet<TopicPartitionKey>,
    phase: Phase,
}

impl Default for AssignmentTracker {
    fn default() -> Self {
        Self::new()
    }
}

impl AssignmentTracker {
    pub fn new() -> Self {
        Self {
            assigned: BTreeSet::new(),
            phase: Phase::Idle,
        }
    }

    pub fn state(&self) -> RebalanceState {
        match &self.phase {
            Phase::Assigning(_) => RebalanceState::Assigning,
            Phase::Revoking(_) => RebalanceState::Revoking,
            Phase::Idle if self.assigned.is_empty() => RebalanceState::Unassigned,
            Phase::Idle => RebalanceState::Assigned(self.assigned.clone()),
        }
    }

    /// Currently owned partitions. During `Assigning`/`Revoking` this is
    /// still the set from before the rebalance started.
    pub fn assignment(&self) -> &BTreeSet<TopicPartitionKey> {
        &self.assigned
    }

    pub fn is_assigned(&self, partition: &TopicPartitionKey) -> bool {
        self.assigned.contains(partition)
    }

    /// Seeking is only allowed on an owned partition outside a rebalance.
    pub fn can_seek(&self, partition: &TopicPartitionKey) -> bool {
        self.phase == Phase::Idle && self.assigned.contains(partition)
    }

    /// Partitions announced by the pending `BeforeRevoke`, if any.
    pub fn revoking(&self) -> Option<&BTreeSet<TopicPartitionKey>> {
        match &self.phase {
            Phase::Revoking(partitions) => Some(partitions),
            _ => None,
        }
    }

    pub fn apply(&mut self, event: &RebalanceEvent) -> Transition {
        let partitions: BTreeSet<TopicPartitionKey> = event.partitions().iter().cloned().collect();
        let mut transition = Transition::default();

        match event {
            RebalanceEvent::BeforeAssign(_) => {
                if self.phase != Phase::Idle {
                    transition.violation = Some(self.violation(event.name()));
                }
                self.phase = Phase::Assigning(partitions);
            }
            RebalanceEvent::Assign(_) => {
                match &self.phase {
                    Phase::Assigning(proposed) if *proposed != partitions => {
                        tracing::debug!(
                            "Assignment {:?} differs from proposed {:?}",
                            partitions,
                            proposed
                        );
                    }
                    Phase::Assigning(_) => {}
                    _ => transition.violation = Some(self.violation(event.name())),
                }
                transition.removed = self.assigned.difference(&partitions).cloned().collect();
                transition.added = partitions.difference(&self.assigned).cloned().collect();
                self.assigned = partitions;
                self.phase = Phase::Idle;
            }
            RebalanceEvent::BeforeRevoke(_) => {
                if self.phase != Phase::Idle {
                    transition.violation = Some(self.violation(event.name()));
                } else if !partitions.is_subset(&self.assigned) {
                    transition.violation = Some(Error::ProtocolViolation {
                        event: event.name(),
                        state: "not owning every revoked partition",
                    });
                }
                self.phase = Phase::Revoking(partitions);
            }
            RebalanceEvent::Revoke(_) => {
                match &self.phase {
                    Phase::Revoking(announced) if *announced != partitions => {
                        tracing::debug!(
                            "Revocation {:?} differs from announced {:?}",
                            partitions,
                            announced
                        );
                    }
                    Phase::Revoking(_) => {}
                    _ => transition.violation = Some(self.violation(event.name())),
                }
                transition.removed = self.assigned.intersection(&partitions).cloned().collect();
                self.assigned.retain(|partition| !partitions.contains(partition));
                self.phase = Phase::Idle;
            }
        }

        if let Some(violation) = &transition.violation {
            tracing::warn!("{}; applying anyway", violation);
        }
        tracing::info!(
            "Rebalance {} {:?} -> {:?}",
            event.name(),
            event.partitions(),
            self.state()
        );

        transition
    }

    /// Drop every partition, e.g. when the consumer closes.
    pub fn release(&mut self) -> Vec<TopicPartitionKey> {
        self.phase = Phase::Idle;
        std::mem::take(&mut self.assigned).into_iter().collect()
    }

    fn violation(&self, event: &'static str) -> Error {
        let state = match self.state() {
            RebalanceState::Unassigned => "unassigned",
            RebalanceState::Assigning => "assigning",
            RebalanceState::Assigned(_) => "assigned",
            RebalanceState::Revoking => "revoking",
        };
        Error::ProtocolViolation { event, state }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn tp(partition: i32) -> TopicPartitionKey {
        TopicPartitionKey::new("orders", partition).unwrap()
    }

    #[test]
    fn it_follows_a_full_rebalance() {
        let mut tracker = AssignmentTracker::new();
        assert_eq!(tracker.state(), RebalanceState::Unassigned);

        let t = tracker.apply(&RebalanceEvent::BeforeAssign(vec![tp(0), tp(1)]));
        assert_eq!(tracker.state(), RebalanceState::Assigning);
        assert!(t.added.is_empty() && t.violation.is_none());

        let t = tracker.apply(&RebalanceEvent::Assign(vec![tp(0), tp(1)]));
        assert_eq!(t.added, vec![tp(0), tp(1)]);
        assert!(t.violation.is_none());

        let t = tracker.apply(&RebalanceEvent::BeforeRevoke(vec![tp(0)]));
        assert_eq!(tracker.state(), RebalanceState::Revoking);
        assert!(tracker.is_assigned(&tp(0)));
        assert!(t.removed.is_empty());

        let t = tracker.apply(&RebalanceEvent::Revoke(vec![tp(0)]));
        assert_eq!(t.removed, vec![tp(0)]);
        assert_eq!(
            tracker.state(),
            RebalanceState::Assigned(BTreeSet::from([tp(1)]))
        );
    }

    #[test]
    fn it_applies_assign_without_before_assign() {
        let mut tracker = AssignmentTracker::new();
        let t = tracker.apply(&RebalanceEvent::Assign(vec![tp(0)]));

        assert!(matches!(
            t.violation,
            Some(Error::ProtocolViolation {
                event: "assign",
                state: "unassigned"
            })
        ));
        assert_eq!(
            tracker.state(),
            RebalanceState::Assigned(BTreeSet::from([tp(0)]))
        );
    }

    #[test]
    fn it_drops_partitions_missing_from_a_new_assignment() {
        let mut tracker = AssignmentTracker::new();
        tracker.apply(&RebalanceEvent::BeforeAssign(vec![tp(0), tp(1)]));
        tracker.apply(&RebalanceEvent::Assign(vec![tp(0), tp(1)]));

        tracker.apply(&RebalanceEvent::BeforeAssign(vec![tp(1), tp(2)]));
        assert_eq!(tracker.assignment().len(), 2);
        let t = tracker.apply(&RebalanceEvent::Assign(vec![tp(1), tp(2)]));

        assert_eq!(t.removed, vec![tp(0)]);
        assert_eq!(t.added, vec![tp(2)]);
        assert!(!tracker.is_assigned(&tp(0)));
    }

    #[test]
    fn it_ends_unassigned_after_revoking_everything() {
        let mut tracker = AssignmentTracker::new();
        tracker.apply(&RebalanceEvent::BeforeAssign(vec![tp(3)]));
        tracker.apply(&RebalanceEvent::Assign(vec![tp(3)]));
        tracker.apply(&RebalanceEvent::BeforeRevoke(vec![tp(3)]));
        tracker.apply(&RebalanceEvent::Revoke(vec![tp(3)]));

        assert_eq!(tracker.state(), RebalanceState::Unassigned);
    }

    #[test]
    fn it_flags_revoking_unowned_partitions() {
        let mut tracker = AssignmentTracker::new();
        tracker.apply(&RebalanceEvent::BeforeAssign(vec![tp(0)]));
        tracker.apply(&RebalanceEvent::Assign(vec![tp(0)]));

        let t = tracker.apply(&RebalanceEvent::BeforeRevoke(vec![tp(0), tp(9)]));
        assert!(t.violation.is_some());

        let t = tracker.apply(&RebalanceEvent::Revoke(vec![tp(0), tp(9)]));
        assert!(t.violation.is_none());
        assert_eq!(t.removed, vec![tp(0)]);
        assert_eq!(tracker.state(), RebalanceState::Unassigned);
    }

    #[test]
    fn it_applies_revoke_without_before_revoke() {
        let mut tracker = AssignmentTracker::new();
        tracker.apply(&RebalanceEvent::BeforeAssign(vec![tp(0), tp(1)]));
        tracker.apply(&RebalanceEvent::Assign(vec![tp(0), tp(1)]));

        let t = tracker.apply(&RebalanceEvent::Revoke(vec![tp(1)]));
        assert!(matches!(
            t.violation,
            Some(Error::ProtocolViolation { event: "revoke", .. })
        ));
        assert_eq!(
            tracker.state(),
            RebalanceState::Assigned(BTreeSet::from([tp(0)]))
        );
    }

    #[test]
    fn it_only_allows_seeks_outside_a_rebalance() {
        let mut tracker = AssignmentTracker::new();
        tracker.apply(&RebalanceEvent::BeforeAssign(vec![tp(0)]));
        assert!(!tracker.can_seek(&tp(0)));
        tracker.apply(&RebalanceEvent::Assign(vec![tp(0)]));
        assert!(tracker.can_seek(&tp(0)));
        assert!(!tracker.can_seek(&tp(1)));
        tracker.apply(&RebalanceEvent::BeforeRevoke(vec![tp(0)]));
        assert!(!tracker.can_seek(&tp(0)));
    }
}
