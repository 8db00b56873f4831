//! # Summary
//!
//! This module implements the all-clear quiescence barrier: a point of
//! agreement the test harness uses to confirm that every replica has
//! learned exactly the same set of decisions. See spec §4.6.
//!
//! Replaces `original_source/replica.cpp`'s sentinel-map re-arm
//! (`{-1: Proposal("","","")}`) with an explicit state machine.

use std::collections::HashMap as Map;

/// A replica's local barrier state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Barrier<C> {
    /// No all-clear in progress; new chats propose immediately.
    Idle,
    /// An all-clear is in progress; `reference` is the primary's decision
    /// snapshot at the moment it was broadcast. New chats are buffered
    /// rather than proposed while in this state.
    Set(Map<usize, C>),
    /// This replica's decisions matched `reference` at some comparison.
    Done,
}

impl<C> Default for Barrier<C> {
    fn default() -> Self {
        Barrier::Idle
    }
}

impl<C: PartialEq> Barrier<C> {
    /// Begins a new all-clear round against the given reference snapshot.
    pub fn set(reference: Map<usize, C>) -> Self {
        Barrier::Set(reference)
    }

    /// True iff a round is in progress (chats should be buffered, not proposed).
    pub fn is_set(&self) -> bool {
        matches!(self, Barrier::Set(_))
    }

    /// True iff this replica has confirmed agreement for the current round.
    pub fn is_done(&self) -> bool {
        matches!(self, Barrier::Done)
    }

    /// Re-compares the in-progress round's reference set against the
    /// replica's current decisions. Transitions to `Done` if they match
    /// (equal key sets, equal value per key); otherwise stays `Set` so a
    /// later decision can trigger another comparison.
    pub fn recheck(&mut self, decisions: &Map<usize, C>) {
        if let Barrier::Set(reference) = self {
            if reference.len() == decisions.len()
                && reference.iter().all(|(slot, command)| decisions.get(slot) == Some(command))
            {
                *self = Barrier::Done;
            }
        }
    }

    /// Clears `Done` back to `Idle` so the next `ALLCLEAR` starts fresh.
    pub fn reset(&mut self) {
        *self = Barrier::Idle;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn matching_reference_completes_immediately() {
        let mut decisions = Map::default();
        decisions.insert(0, "hello".to_string());
        let mut barrier = Barrier::set(decisions.clone());
        barrier.recheck(&decisions);
        assert!(barrier.is_done());
    }

    #[test]
    fn missing_decision_stays_set_until_it_arrives() {
        let mut reference = Map::default();
        reference.insert(0, "hello".to_string());
        reference.insert(1, "world".to_string());
        let mut barrier = Barrier::set(reference.clone());

        let mut partial = Map::default();
        partial.insert(0, "hello".to_string());
        barrier.recheck(&partial);
        assert!(barrier.is_set());
        assert!(!barrier.is_done());

        partial.insert(1, "world".to_string());
        barrier.recheck(&partial);
        assert!(barrier.is_done());
    }

    #[test]
    fn idle_recheck_is_a_no_op() {
        let mut barrier: Barrier<String> = Barrier::Idle;
        barrier.recheck(&Map::default());
        assert_eq!(barrier, Barrier::Idle);
    }

    #[test]
    fn reset_returns_to_idle() {
        let mut decisions = Map::default();
        decisions.insert(0, "hello".to_string());
        let mut barrier = Barrier::set(decisions.clone());
        barrier.recheck(&decisions);
        assert!(barrier.is_done());
        barrier.reset();
        assert_eq!(barrier, Barrier::Idle);
    }
}
