//! Sequence id tracking
//!
//! The core correctness mechanism against stale results: every asynchronous
//! result (transcript, agent fragment, synthesized chunk) carries a sequence
//! id and is dropped before the output sink unless that id is still live.
//! A barge-in resets the live set, so packets from the interrupted turn can
//! keep arriving from in-flight tasks and are silently discarded.

use parking_lot::Mutex;
use std::collections::HashSet;

use voxflow_core::RESERVED_SEQUENCE_ID;

#[derive(Debug)]
struct Inner {
    next_id: i64,
    live: HashSet<i64>,
    turn_id: u64,
}

/// Issues monotonically increasing sequence ids and tracks which are live.
///
/// Shared read-only with reader tasks; `next()` and `reset()` are called only
/// by the orchestrator task.
#[derive(Debug)]
pub struct SequenceTracker {
    inner: Mutex<Inner>,
}

impl SequenceTracker {
    pub fn new() -> Self {
        let mut live = HashSet::new();
        live.insert(RESERVED_SEQUENCE_ID);
        Self {
            inner: Mutex::new(Inner {
                next_id: 0,
                live,
                turn_id: 0,
            }),
        }
    }

    /// Mint the next sequence id and record it as live
    pub fn next(&self) -> i64 {
        let mut inner = self.inner.lock();
        inner.next_id += 1;
        let id = inner.next_id;
        inner.live.insert(id);
        id
    }

    /// Whether packets carrying this id may still reach the sink
    pub fn is_live(&self, id: i64) -> bool {
        self.inner.lock().live.contains(&id)
    }

    /// Current turn counter
    pub fn turn_id(&self) -> u64 {
        self.inner.lock().turn_id
    }

    /// Clear the live set back to the sentinel and advance the turn counter.
    ///
    /// Idempotent: when the live set is already `{-1}` there is nothing to
    /// invalidate and the turn counter is left alone, so a double reset
    /// equals a single one while real interruptions always advance the turn.
    pub fn reset(&self) {
        let mut inner = self.inner.lock();
        if inner.live.len() == 1 && inner.live.contains(&RESERVED_SEQUENCE_ID) {
            return;
        }
        inner.live.clear();
        inner.live.insert(RESERVED_SEQUENCE_ID);
        inner.turn_id += 1;
    }

    /// Live ids, for diagnostics
    pub fn live_ids(&self) -> Vec<i64> {
        let mut ids: Vec<i64> = self.inner.lock().live.iter().copied().collect();
        ids.sort_unstable();
        ids
    }
}

impl Default for SequenceTracker {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ids_are_strictly_increasing() {
        let tracker = SequenceTracker::new();
        let a = tracker.next();
        let b = tracker.next();
        let c = tracker.next();
        assert!(a < b && b < c);
    }

    #[test]
    fn test_reset_clears_live_set_to_sentinel() {
        let tracker = SequenceTracker::new();
        let id = tracker.next();
        assert!(tracker.is_live(id));

        tracker.reset();
        assert!(!tracker.is_live(id));
        assert_eq!(tracker.live_ids(), vec![RESERVED_SEQUENCE_ID]);
        assert!(tracker.is_live(RESERVED_SEQUENCE_ID));
    }

    #[test]
    fn test_reset_is_idempotent() {
        let tracker = SequenceTracker::new();
        tracker.next();

        tracker.reset();
        let turn_after_one = tracker.turn_id();
        let live_after_one = tracker.live_ids();

        tracker.reset();
        assert_eq!(tracker.turn_id(), turn_after_one);
        assert_eq!(tracker.live_ids(), live_after_one);
    }

    #[test]
    fn test_turn_id_strictly_increases_across_interruptions() {
        let tracker = SequenceTracker::new();
        assert_eq!(tracker.turn_id(), 0);

        tracker.next();
        tracker.reset();
        assert_eq!(tracker.turn_id(), 1);

        tracker.next();
        tracker.reset();
        assert_eq!(tracker.turn_id(), 2);
    }

    #[test]
    fn test_ids_keep_increasing_after_reset() {
        let tracker = SequenceTracker::new();
        let before = tracker.next();
        tracker.reset();
        let after = tracker.next();
        assert!(after > before);
    }
}
