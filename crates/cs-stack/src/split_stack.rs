//! Lock-free stack with split-counter node reclamation.
//!
//! Every node is protected by two counters:
//!
//! - an **external count**, carried next to the node's address in the
//!   composite head word, incremented by every pop that wants to look at
//!   the node;
//! - an **internal count**, stored in the node, where pops that did not
//!   get to decide the node's fate record their release.
//!
//! A node is freed by whichever thread brings the sum of outstanding
//! claims to zero. No locks, no epochs, no hazard pointers.
//!
//! # Invariants
//!
//! | Property | Enforced by |
//! |----------|-------------|
//! | Head pointer is null or a live node | claims are taken before any dereference |
//! | Node freed exactly once | single thread observes the zero crossing of `internal_count` |
//! | Value extracted exactly once | only the winner of the unlink CAS reads `value` |
//! | No partial publication | `next` is written before the `Release` head CAS |
//!
//! # Memory ordering
//!
//! The push CAS is `Release` and the claim CAS is `Acquire`, so a popper
//! that holds a claim sees the node's fields. Internal-count updates are
//! `AcqRel`: the winner's value extraction happens-before a free done by
//! a losing thread, and every losing thread's read of `next` happens-before
//! a free done by the winner.

use std::alloc::{self, Layout};
use std::fmt;
use std::mem::ManuallyDrop;
use std::ptr;

use crate::counted::{AtomicCountedPtr, CountedPtr, EXTERNAL_COUNT_MAX};
use crate::error::PushError;
#[cfg(feature = "ledger")]
use crate::ledger::LedgerSnapshot;
use crate::ledger::ReclaimLedger;
use crate::sync::{spin_loop, AtomicI64, Ordering};

/// Heap cell holding one element plus reclamation bookkeeping.
struct Node<T> {
    /// Moved out exactly once, by the pop that unlinks the node.
    value: ManuallyDrop<T>,
    /// Releases recorded by threads that did not free the node.
    internal_count: AtomicI64,
    /// Head snapshot at push time. Written only before publication.
    next: CountedPtr<Node<T>>,
}

/// Which side of the unlink race reclaimed a node.
#[derive(Debug, Clone, Copy)]
enum Reclaimer {
    Winner,
    Loser,
}

/// A lock-free LIFO stack whose nodes are reclaimed by split reference
/// counting.
///
/// `push` and `pop` may be called concurrently from any number of
/// threads. Dropping the stack drains and drops the remaining elements.
pub struct SplitCountStack<T> {
    head: AtomicCountedPtr<Node<T>>,
    ledger: ReclaimLedger,
}

/// Amount a winning pop adds to the node's internal count.
///
/// Subtracts the head's owning claim and the winner's own claim. Every
/// other claim folded into `external_count` belongs to a pop that lost
/// and subtracts one on its own.
#[inline]
pub(crate) fn winner_release(external_count: u64) -> i64 {
    debug_assert!(external_count >= 2, "winner holds a claim on top of the owning one");
    external_count as i64 - 2
}

impl<T> SplitCountStack<T> {
    /// Create a new empty stack.
    #[must_use]
    pub fn new() -> Self {
        Self {
            head: AtomicCountedPtr::null(),
            ledger: ReclaimLedger::default(),
        }
    }

    /// Whether the composite head word is a native lock-free atomic.
    #[must_use]
    pub const fn is_lock_free() -> bool {
        AtomicCountedPtr::<Node<T>>::is_lock_free()
    }

    /// Push a value onto the stack.
    ///
    /// # Panics
    ///
    /// Aborts through [`std::alloc::handle_alloc_error`] if the node
    /// cannot be allocated, and panics if the node address does not fit
    /// the composite head word. Use [`try_push`](Self::try_push) to get
    /// these back as errors.
    pub fn push(&self, value: T) {
        match self.try_push(value) {
            Ok(()) => {}
            Err(PushError::AllocationFailed(_)) => {
                alloc::handle_alloc_error(Layout::new::<Node<T>>())
            }
            Err(PushError::AddressOutOfRange { addr, .. }) => panic!(
                "node address {addr:#x} does not fit the composite head word on this target"
            ),
        }
    }

    /// Push a value onto the stack, reporting allocation problems.
    ///
    /// On error the head slot is untouched and the value is returned
    /// inside the error.
    pub fn try_push(&self, value: T) -> Result<(), PushError<T>> {
        let new_node = self.allocate(value)?;
        let node = new_node.as_ptr();

        let mut next = self.head.load(Ordering::Relaxed);
        loop {
            // SAFETY: `node` is not published yet; this thread owns it.
            unsafe { (*node).next = next };

            match self
                .head
                .compare_exchange_weak(next, new_node, Ordering::Release, Ordering::Relaxed)
            {
                Ok(()) => return Ok(()),
                Err(observed) => {
                    next = observed;
                    spin_loop();
                }
            }
        }
    }

    /// Pop the most recently pushed value, or `None` if the stack is empty.
    ///
    /// # Progress
    ///
    /// Lock-free except in one case. When [`EXTERNAL_COUNT_MAX`] pops hold
    /// claims on the same head node at once, the count field is saturated
    /// and further pops spin without claiming until one of those claimants
    /// unlinks the node or releases. Such a pop can be held up by others,
    /// which strict lock-freedom would not allow. On 64-bit targets this
    /// takes 65 535 simultaneous pops on one node.
    pub fn pop(&self) -> Option<T> {
        let mut old_head = self.head.load(Ordering::Relaxed);

        loop {
            old_head = self.claim_head(old_head)?;
            let node = old_head.as_ptr();

            // SAFETY: our claim keeps `node` allocated, and `next` is
            // immutable once the node is published.
            let next = unsafe { (*node).next };

            match self
                .head
                .compare_exchange(old_head, next, Ordering::Relaxed, Ordering::Relaxed)
            {
                Ok(()) => {
                    // SAFETY: winning the unlink makes this thread the only
                    // one that ever reads `value`.
                    let value =
                        unsafe { ManuallyDrop::into_inner(ptr::read(ptr::addr_of!((*node).value))) };

                    let release = winner_release(old_head.external_count());
                    self.ledger.claims_released(2);

                    // SAFETY: still claimed until this update lands.
                    let prev = unsafe { (*node).internal_count.fetch_add(release, Ordering::AcqRel) };
                    if prev == -release {
                        // SAFETY: every other claim was released before ours.
                        unsafe { self.free_node(node, Reclaimer::Winner) };
                    }
                    return Some(value);
                }
                Err(observed) => {
                    self.ledger.claims_released(1);

                    // SAFETY: still claimed until this update lands.
                    let prev = unsafe { (*node).internal_count.fetch_sub(1, Ordering::AcqRel) };
                    if prev == 1 {
                        // SAFETY: the winner already folded its release in and
                        // ours was the last outstanding claim.
                        unsafe { self.free_node(node, Reclaimer::Loser) };
                    }
                    old_head = observed;
                    spin_loop();
                }
            }
        }
    }

    /// Check if the stack is empty.
    ///
    /// A snapshot: under concurrent use the answer may be stale by the
    /// time it is returned.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.head.load(Ordering::Acquire).is_null()
    }

    /// Claim and free counters accumulated since construction.
    #[cfg(feature = "ledger")]
    #[must_use]
    pub fn ledger(&self) -> LedgerSnapshot {
        self.ledger.snapshot()
    }

    /// Clone the contents, top to bottom, without claiming nodes.
    ///
    /// # Safety
    ///
    /// No `pop` may run concurrently with this call. Concurrent pushes
    /// are harmless: they only prepend.
    pub(crate) unsafe fn collect_unsynchronized(&self) -> Vec<T>
    where
        T: Clone,
    {
        let mut contents = Vec::new();
        let mut current = self.head.load(Ordering::Acquire).as_ptr();
        while !current.is_null() {
            // SAFETY: without concurrent pops every reachable node is live.
            let node = unsafe { &*current };
            contents.push(T::clone(&node.value));
            current = node.next.as_ptr();
        }
        contents
    }

    /// Register a protective claim on the current head node.
    ///
    /// Returns the composite with the incremented count, or `None` when
    /// the stack is empty. No claim is taken on a null head.
    fn claim_head(&self, mut current: CountedPtr<Node<T>>) -> Option<CountedPtr<Node<T>>> {
        loop {
            if current.is_null() {
                return None;
            }

            let count = current.external_count();
            if count == EXTERNAL_COUNT_MAX {
                // Count field saturated; wait for claimants to drain.
                spin_loop();
                current = self.head.load(Ordering::Relaxed);
                continue;
            }

            let claimed = current.with_external_count(count + 1);
            match self
                .head
                .compare_exchange(current, claimed, Ordering::Acquire, Ordering::Relaxed)
            {
                Ok(()) => {
                    self.ledger.claim_taken();
                    return Some(claimed);
                }
                Err(observed) => {
                    current = observed;
                    spin_loop();
                }
            }
        }
    }

    /// Allocate and initialize an unpublished node carrying one claim.
    fn allocate(&self, value: T) -> Result<CountedPtr<Node<T>>, PushError<T>> {
        let layout = Layout::new::<Node<T>>();
        // SAFETY: `Node<T>` is never zero-sized; it holds the internal count.
        let raw = unsafe { alloc::alloc(layout) }.cast::<Node<T>>();
        if raw.is_null() {
            return Err(PushError::AllocationFailed(value));
        }

        let Some(counted) = CountedPtr::new(raw, 1) else {
            let addr = raw.addr();
            // SAFETY: allocated above with `layout` and never initialized.
            unsafe { alloc::dealloc(raw.cast(), layout) };
            return Err(PushError::AddressOutOfRange { value, addr });
        };

        // SAFETY: `raw` is valid for writes of `Node<T>` and unaliased.
        unsafe {
            raw.write(Node {
                value: ManuallyDrop::new(value),
                internal_count: AtomicI64::new(0),
                next: CountedPtr::NULL,
            });
        }
        self.ledger.node_allocated();
        Ok(counted)
    }

    /// Return a node to the allocator. Its value must already be moved out.
    ///
    /// # Safety
    ///
    /// The caller observed the zero crossing of the node's claims, so no
    /// other thread can reach it.
    unsafe fn free_node(&self, node: *mut Node<T>, by: Reclaimer) {
        tracing::trace!(node = ?node, by = ?by, "reclaiming node");
        // SAFETY: `value` is `ManuallyDrop`, so only the bookkeeping fields
        // are dropped here; the caller guarantees exclusivity.
        unsafe {
            ptr::drop_in_place(node);
            alloc::dealloc(node.cast(), Layout::new::<Node<T>>());
        }
        self.ledger.node_freed();
    }
}

impl<T> Default for SplitCountStack<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> Drop for SplitCountStack<T> {
    fn drop(&mut self) {
        // `&mut self`: no operation can be in flight.
        while self.pop().is_some() {}
    }
}

impl<T> fmt::Debug for SplitCountStack<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SplitCountStack")
            .field("head", &self.head)
            .finish_non_exhaustive()
    }
}

// SAFETY: elements are moved in by `push` and out by `pop`, never shared
// by reference, so moving them between threads only needs `T: Send`.
unsafe impl<T: Send> Send for SplitCountStack<T> {}
unsafe impl<T: Send> Sync for SplitCountStack<T> {}
