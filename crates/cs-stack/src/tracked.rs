//! Property-tracking wrapper around [`SplitCountStack`].
//!
//! Records pushed/popped sets and a linearized history so the checkers
//! in `cs-core` can verify a run. The tracker lock is held across each
//! stack operation, which makes the recorded history exactly the
//! linearization order. That serializes callers: use the bare stack for
//! throughput and contention testing, and this wrapper for checking
//! element invariants.

use std::collections::HashSet;
use std::sync::{Mutex, MutexGuard, PoisonError};

use cs_core::invariants::stack::{StackHistory, StackProperties};

#[cfg(feature = "ledger")]
use crate::ledger::LedgerSnapshot;
use crate::split_stack::SplitCountStack;

/// A [`SplitCountStack<u64>`] that records what happened to it.
pub struct TrackedStack {
    stack: SplitCountStack<u64>,
    tracker: Mutex<StackTracker>,
}

#[derive(Default)]
struct StackTracker {
    pushed: HashSet<u64>,
    popped: HashSet<u64>,
    history: StackHistory,
    step: u64,
}

impl TrackedStack {
    /// Create a new empty tracked stack.
    #[must_use]
    pub fn new() -> Self {
        Self {
            stack: SplitCountStack::new(),
            tracker: Mutex::new(StackTracker::default()),
        }
    }

    fn tracker(&self) -> MutexGuard<'_, StackTracker> {
        self.tracker.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Push on behalf of `thread_id`.
    pub fn push_as(&self, thread_id: u64, value: u64) {
        let mut tracker = self.tracker();
        self.stack.push(value);
        tracker.pushed.insert(value);
        tracker.step += 1;
        let step = tracker.step;
        tracker.history.record_push(thread_id, value, step);
    }

    /// Pop on behalf of `thread_id`.
    pub fn pop_as(&self, thread_id: u64) -> Option<u64> {
        let mut tracker = self.tracker();
        let result = self.stack.pop();
        if let Some(value) = result {
            tracker.popped.insert(value);
        }
        tracker.step += 1;
        let step = tracker.step;
        tracker.history.record_pop(thread_id, result, step);
        result
    }

    pub fn push(&self, value: u64) {
        self.push_as(0, value);
    }

    pub fn pop(&self) -> Option<u64> {
        self.pop_as(0)
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.stack.is_empty()
    }

    /// Current contents, top to bottom.
    #[must_use]
    pub fn get_contents(&self) -> Vec<u64> {
        let _tracker = self.tracker();
        // SAFETY: the stack is private to this wrapper and every pop goes
        // through the tracker lock we are holding.
        unsafe { self.stack.collect_unsynchronized() }
    }

    /// Reclamation counters of the wrapped stack.
    ///
    /// The stack itself is never handed out: a pop that bypassed the
    /// tracker lock could free a node `get_contents` is walking.
    #[cfg(feature = "ledger")]
    #[must_use]
    pub fn ledger(&self) -> LedgerSnapshot {
        self.stack.ledger()
    }
}

impl Default for TrackedStack {
    fn default() -> Self {
        Self::new()
    }
}

impl StackProperties for TrackedStack {
    fn pushed_elements(&self) -> HashSet<u64> {
        self.tracker().pushed.clone()
    }

    fn popped_elements(&self) -> HashSet<u64> {
        self.tracker().popped.clone()
    }

    fn current_contents(&self) -> Vec<u64> {
        self.get_contents()
    }

    fn history(&self) -> StackHistory {
        self.tracker().history.clone()
    }
}

#[cfg(feature = "ledger")]
impl cs_core::invariants::reclamation::ReclamationProperties for TrackedStack {
    fn nodes_allocated(&self) -> u64 {
        self.ledger().nodes_allocated
    }

    fn nodes_freed(&self) -> u64 {
        self.ledger().nodes_freed
    }

    fn claims_taken(&self) -> u64 {
        self.ledger().claims_taken
    }

    fn claims_released(&self) -> u64 {
        self.ledger().claims_released
    }

    fn live_nodes(&self) -> u64 {
        self.get_contents().len() as u64
    }
}

#[cfg(all(test, not(loom)))]
mod tests {
    use super::*;
    use cs_core::invariants::stack::StackPropertyChecker;
    use cs_core::PropertyChecker;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn test_invariants_basic() {
        let stack = TrackedStack::new();

        stack.push(1);
        stack.push(2);
        stack.push(3);
        assert_eq!(stack.get_contents(), vec![3, 2, 1]);
        assert_eq!(stack.pop(), Some(3));

        let checker = StackPropertyChecker::new(&stack);
        assert!(checker.all_hold(), "{}", checker.report());
    }

    #[test]
    fn test_history_records_empty_pop() {
        let stack = TrackedStack::new();
        assert_eq!(stack.pop(), None);

        let history = stack.history();
        assert_eq!(history.len(), 1);
        assert_eq!(
            history.operations[0].op_type,
            cs_core::invariants::stack::StackOpType::PopEmpty
        );
    }

    #[test]
    fn test_concurrent_history_is_linearizable() {
        let stack = Arc::new(TrackedStack::new());

        let handles: Vec<_> = (0..4_u64)
            .map(|t| {
                let stack = Arc::clone(&stack);
                thread::spawn(move || {
                    for j in 0..50 {
                        stack.push_as(t, t * 100 + j + 1);
                        if j % 3 == 0 {
                            stack.pop_as(t);
                        }
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }

        let checker = StackPropertyChecker::new(&*stack);
        assert!(checker.all_hold(), "{}", checker.report());
    }

    #[test]
    fn test_get_contents_during_concurrent_pops() {
        let stack = Arc::new(TrackedStack::new());

        let worker = {
            let stack = Arc::clone(&stack);
            thread::spawn(move || {
                for round in 0..200_u64 {
                    for i in 0..64 {
                        stack.push_as(1, round * 64 + i + 1);
                    }
                    while stack.pop_as(1).is_some() {}
                }
            })
        };

        for _ in 0..2_000 {
            let contents = stack.get_contents();
            assert!(contents.len() <= 64);
            // Pushed in increasing order, so top to bottom is decreasing.
            assert!(contents.windows(2).all(|w| w[0] > w[1]), "{contents:?}");
        }
        worker.join().unwrap();

        assert!(stack.get_contents().is_empty());
        let checker = StackPropertyChecker::new(&*stack);
        assert!(checker.all_hold(), "{}", checker.report());
    }

    #[cfg(feature = "ledger")]
    #[test]
    fn test_ledger_closes_after_drain() {
        let stack = TrackedStack::new();
        for v in 1..=10 {
            stack.push(v);
        }
        while stack.pop().is_some() {}

        let snapshot = stack.ledger();
        assert_eq!(snapshot.nodes_allocated, 10);
        assert_eq!(snapshot.unfreed_nodes(), 0);
        assert_eq!(snapshot.outstanding_claims(), 0);
    }

    #[cfg(feature = "ledger")]
    #[test]
    fn test_reclamation_properties_hold() {
        use cs_core::invariants::reclamation::ReclamationPropertyChecker;

        let stack = TrackedStack::new();
        for v in 1..=20 {
            stack.push(v);
        }
        for _ in 0..15 {
            stack.pop();
        }

        let checker = ReclamationPropertyChecker::new(&stack);
        assert!(checker.all_hold(), "{}", checker.report());
    }
}
