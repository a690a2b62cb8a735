//! Reclamation invariants for reference-counted node stacks.
//!
//! | Property | Description |
//! |----------|-------------|
//! | FreedAtMostOnce | Never more frees than allocations |
//! | NoLeakAtQuiescence | Every unreachable node has been freed |
//! | ClaimsBalanced | Claims taken minus claims released equals one per live node |
//!
//! The last two only hold while no operation is in flight. Checking
//! them during a concurrent run reports transient imbalance, so call
//! the checker after joining all workers.
//!
//! A node's claims are: one owning claim installed by push, plus one
//! transient claim per pop attempt that observed it. A winning pop
//! releases two, a losing pop releases one. Once a node is unreachable
//! its claims must net to zero.

use crate::counterexample::{Counterexample, MemoryIssue};
use crate::property::{PropertyChecker, PropertyResult};

/// Counters a reclaiming stack exposes for verification.
pub trait ReclamationProperties {
    /// Nodes allocated by successful pushes.
    fn nodes_allocated(&self) -> u64;

    /// Nodes returned to the allocator.
    fn nodes_freed(&self) -> u64;

    /// Claims taken: owning claims at push plus transient claims at pop.
    fn claims_taken(&self) -> u64;

    /// Claims released by winning and losing pops.
    fn claims_released(&self) -> u64;

    /// Nodes currently reachable from the head.
    fn live_nodes(&self) -> u64;
}

/// Property checker for reclamation accounting.
pub struct ReclamationPropertyChecker<'a, T: ReclamationProperties> {
    stack: &'a T,
    dst_seed: Option<u64>,
}

impl<'a, T: ReclamationProperties> ReclamationPropertyChecker<'a, T> {
    #[must_use]
    pub fn new(stack: &'a T) -> Self {
        Self {
            stack,
            dst_seed: None,
        }
    }

    /// Set DST seed for counterexample reproduction.
    #[must_use]
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.dst_seed = Some(seed);
        self
    }

    fn counterexample(&self, issue: MemoryIssue) -> Counterexample {
        let mut ce = match self.dst_seed {
            Some(seed) => Counterexample::with_seed(seed),
            None => Counterexample::new(),
        };
        ce.add_memory_issue(issue);
        ce
    }

    fn check_freed_at_most_once(&self) -> PropertyResult {
        let allocated = self.stack.nodes_allocated();
        let freed = self.stack.nodes_freed();

        if freed > allocated {
            let issue = MemoryIssue::DoubleFree { allocated, freed };
            return PropertyResult::fail(
                "FreedAtMostOnce",
                issue.to_string(),
                Some(self.counterexample(issue)),
            );
        }

        PropertyResult::pass("FreedAtMostOnce")
    }

    fn check_no_leak_at_quiescence(&self) -> PropertyResult {
        let allocated = self.stack.nodes_allocated();
        let freed = self.stack.nodes_freed();
        let live = self.stack.live_nodes();

        if allocated.saturating_sub(freed) != live {
            let issue = MemoryIssue::NodeLeak {
                allocated,
                freed,
                live,
            };
            return PropertyResult::fail(
                "NoLeakAtQuiescence",
                issue.to_string(),
                Some(self.counterexample(issue)),
            );
        }

        PropertyResult::pass("NoLeakAtQuiescence")
    }

    fn check_claims_balanced(&self) -> PropertyResult {
        let taken = self.stack.claims_taken();
        let released = self.stack.claims_released();
        let live = self.stack.live_nodes();

        if released > taken || taken - released != live {
            let issue = MemoryIssue::UnbalancedClaims {
                taken,
                released,
                live,
            };
            return PropertyResult::fail(
                "ClaimsBalanced",
                issue.to_string(),
                Some(self.counterexample(issue)),
            );
        }

        PropertyResult::pass("ClaimsBalanced")
    }
}

impl<T: ReclamationProperties> PropertyChecker for ReclamationPropertyChecker<'_, T> {
    fn check_all(&self) -> Vec<PropertyResult> {
        vec![
            self.check_freed_at_most_once(),
            self.check_no_leak_at_quiescence(),
            self.check_claims_balanced(),
        ]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Default)]
    struct Counters {
        allocated: u64,
        freed: u64,
        taken: u64,
        released: u64,
        live: u64,
    }

    impl ReclamationProperties for Counters {
        fn nodes_allocated(&self) -> u64 {
            self.allocated
        }
        fn nodes_freed(&self) -> u64 {
            self.freed
        }
        fn claims_taken(&self) -> u64 {
            self.taken
        }
        fn claims_released(&self) -> u64 {
            self.released
        }
        fn live_nodes(&self) -> u64 {
            self.live
        }
    }

    #[test]
    fn test_balanced_ledger_passes() {
        // 3 pushes, 2 winning pops, 1 losing attempt on the second node.
        let c = Counters {
            allocated: 3,
            freed: 2,
            taken: 3 + 2 + 1,
            released: 2 * 2 + 1,
            live: 1,
        };
        let checker = ReclamationPropertyChecker::new(&c);
        assert!(checker.all_hold(), "{}", checker.report());
    }

    #[test]
    fn test_double_free_detected() {
        let c = Counters {
            allocated: 2,
            freed: 3,
            ..Counters::default()
        };
        let checker = ReclamationPropertyChecker::new(&c);
        let violations = checker.violations();
        assert!(violations.iter().any(|r| r.name == "FreedAtMostOnce"));
    }

    #[test]
    fn test_leak_detected() {
        let c = Counters {
            allocated: 4,
            freed: 2,
            taken: 4 + 2,
            released: 4,
            live: 1,
        };
        let checker = ReclamationPropertyChecker::new(&c).with_seed(99);
        let violations = checker.violations();
        let leak = violations
            .iter()
            .find(|r| r.name == "NoLeakAtQuiescence")
            .unwrap();
        let ce = leak.counterexample.as_ref().unwrap();
        assert_eq!(ce.dst_seed, Some(99));
        assert!(matches!(
            ce.memory_issues[0],
            MemoryIssue::NodeLeak { allocated: 4, .. }
        ));
    }

    #[test]
    fn test_unbalanced_claims_detected() {
        let c = Counters {
            allocated: 1,
            freed: 1,
            taken: 3,
            released: 2,
            live: 0,
        };
        let checker = ReclamationPropertyChecker::new(&c);
        let violations = checker.violations();
        assert_eq!(violations.len(), 1);
        assert_eq!(violations[0].name, "ClaimsBalanced");
    }
}
