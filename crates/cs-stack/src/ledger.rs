//! Claim and free statistics for the split-count protocol.
//!
//! With the `ledger` feature every claim, release, allocation and free
//! is counted in relaxed atomics. The counters are observations only:
//! nothing in the protocol reads them. Without the feature the ledger is
//! a zero-sized type whose methods compile away.

#[cfg(feature = "ledger")]
use std::sync::atomic::{AtomicU64, Ordering};

/// Point-in-time copy of the ledger counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LedgerSnapshot {
    pub nodes_allocated: u64,
    pub nodes_freed: u64,
    pub claims_taken: u64,
    pub claims_released: u64,
}

impl LedgerSnapshot {
    /// Claims still outstanding. At quiescence this is one per live node.
    #[must_use]
    pub fn outstanding_claims(&self) -> i128 {
        i128::from(self.claims_taken) - i128::from(self.claims_released)
    }

    /// Nodes allocated and not yet freed.
    #[must_use]
    pub fn unfreed_nodes(&self) -> i128 {
        i128::from(self.nodes_allocated) - i128::from(self.nodes_freed)
    }
}

#[cfg(feature = "ledger")]
#[derive(Debug, Default)]
pub(crate) struct ReclaimLedger {
    nodes_allocated: AtomicU64,
    nodes_freed: AtomicU64,
    claims_taken: AtomicU64,
    claims_released: AtomicU64,
}

#[cfg(feature = "ledger")]
impl ReclaimLedger {
    /// A node was published; it carries its owning claim.
    pub(crate) fn node_allocated(&self) {
        self.nodes_allocated.fetch_add(1, Ordering::Relaxed);
        self.claims_taken.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn node_freed(&self) {
        self.nodes_freed.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn claim_taken(&self) {
        self.claims_taken.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn claims_released(&self, count: u64) {
        self.claims_released.fetch_add(count, Ordering::Relaxed);
    }

    pub(crate) fn snapshot(&self) -> LedgerSnapshot {
        LedgerSnapshot {
            nodes_allocated: self.nodes_allocated.load(Ordering::Relaxed),
            nodes_freed: self.nodes_freed.load(Ordering::Relaxed),
            claims_taken: self.claims_taken.load(Ordering::Relaxed),
            claims_released: self.claims_released.load(Ordering::Relaxed),
        }
    }
}

#[cfg(not(feature = "ledger"))]
#[derive(Debug, Default)]
pub(crate) struct ReclaimLedger;

#[cfg(not(feature = "ledger"))]
impl ReclaimLedger {
    #[inline(always)]
    pub(crate) fn node_allocated(&self) {}

    #[inline(always)]
    pub(crate) fn node_freed(&self) {}

    #[inline(always)]
    pub(crate) fn claim_taken(&self) {}

    #[inline(always)]
    pub(crate) fn claims_released(&self, _count: u64) {}
}
