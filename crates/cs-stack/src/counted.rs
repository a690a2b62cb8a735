//! Composite `(external_count, pointer)` references.
//!
//! The head slot must be updated with a single compare-and-swap that
//! covers both the node identity and its external count. Both halves are
//! packed into one `u64` so the slot is a plain `AtomicU64`, which is
//! natively lock-free on every target this crate compiles for.
//!
//! | Target | Pointer bits | Count bits | Max simultaneous claims |
//! |--------|--------------|------------|-------------------------|
//! | 64-bit | 48 (low) | 16 (high) | 65 535 |
//! | 32-bit | 32 (low) | 32 (high) | 4 294 967 295 |
//!
//! On 64-bit targets user-space addresses fit in 48 bits on x86-64 and
//! AArch64 with 4-level page tables. Addresses that do not fit are
//! rejected by [`CountedPtr::new`] rather than truncated.

use std::fmt;
use std::marker::PhantomData;
use std::ptr;

use static_assertions::assert_eq_size;

use crate::sync::{AtomicU64, Ordering};

#[cfg(not(target_has_atomic = "64"))]
compile_error!("the head slot packs (count, pointer) into a u64 and needs native 64-bit atomics");

#[cfg(target_pointer_width = "64")]
const ADDR_BITS: u32 = 48;
#[cfg(target_pointer_width = "32")]
const ADDR_BITS: u32 = 32;
#[cfg(not(any(target_pointer_width = "32", target_pointer_width = "64")))]
compile_error!("unsupported pointer width");

const ADDR_MASK: u64 = (1 << ADDR_BITS) - 1;

/// Largest external count a composite reference can carry.
pub const EXTERNAL_COUNT_MAX: u64 = u64::MAX >> ADDR_BITS;

/// A node address bundled with its external claim count.
///
/// This is a value: copies are independent snapshots. Only the copy
/// living in an [`AtomicCountedPtr`] is shared.
pub struct CountedPtr<N> {
    bits: u64,
    _marker: PhantomData<*mut N>,
}

assert_eq_size!(CountedPtr<u8>, u64);

impl<N> CountedPtr<N> {
    /// The empty composite: null pointer, zero claims.
    pub const NULL: Self = Self::from_bits(0);

    /// Pack `ptr` and `external_count`.
    ///
    /// Returns `None` if the address needs more than the pointer field
    /// or the count exceeds [`EXTERNAL_COUNT_MAX`].
    #[must_use]
    pub fn new(ptr: *mut N, external_count: u64) -> Option<Self> {
        let addr = ptr.expose_provenance() as u64;
        if addr & !ADDR_MASK != 0 || external_count > EXTERNAL_COUNT_MAX {
            return None;
        }
        Some(Self::from_bits((external_count << ADDR_BITS) | addr))
    }

    #[must_use]
    pub const fn from_bits(bits: u64) -> Self {
        Self {
            bits,
            _marker: PhantomData,
        }
    }

    #[must_use]
    pub const fn into_bits(self) -> u64 {
        self.bits
    }

    /// The node this composite identifies (possibly null).
    #[must_use]
    pub fn as_ptr(self) -> *mut N {
        ptr::with_exposed_provenance_mut((self.bits & ADDR_MASK) as usize)
    }

    #[must_use]
    pub const fn is_null(self) -> bool {
        self.bits & ADDR_MASK == 0
    }

    #[must_use]
    pub const fn external_count(self) -> u64 {
        self.bits >> ADDR_BITS
    }

    /// Same pointer, different count.
    #[must_use]
    pub fn with_external_count(self, external_count: u64) -> Self {
        debug_assert!(
            external_count <= EXTERNAL_COUNT_MAX,
            "external count {} overflows the count field",
            external_count
        );
        Self::from_bits((external_count << ADDR_BITS) | (self.bits & ADDR_MASK))
    }
}

impl<N> Clone for CountedPtr<N> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<N> Copy for CountedPtr<N> {}

impl<N> PartialEq for CountedPtr<N> {
    fn eq(&self, other: &Self) -> bool {
        self.bits == other.bits
    }
}

impl<N> Eq for CountedPtr<N> {}

impl<N> fmt::Debug for CountedPtr<N> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CountedPtr")
            .field("external_count", &self.external_count())
            .field("ptr", &self.as_ptr())
            .finish()
    }
}

/// An atomically updated [`CountedPtr`].
pub struct AtomicCountedPtr<N> {
    inner: AtomicU64,
    _marker: PhantomData<*mut N>,
}

impl<N> AtomicCountedPtr<N> {
    #[must_use]
    pub fn null() -> Self {
        Self {
            inner: AtomicU64::new(CountedPtr::<N>::NULL.into_bits()),
            _marker: PhantomData,
        }
    }

    /// Whether the slot is backed by a native lock-free atomic word.
    ///
    /// The `compile_error!` above rejects targets where this would be
    /// false, so this is `true` wherever the crate builds.
    #[must_use]
    pub const fn is_lock_free() -> bool {
        cfg!(target_has_atomic = "64")
    }

    #[must_use]
    pub fn load(&self, order: Ordering) -> CountedPtr<N> {
        CountedPtr::from_bits(self.inner.load(order))
    }

    /// Strong CAS. On failure returns the value actually observed.
    pub fn compare_exchange(
        &self,
        current: CountedPtr<N>,
        new: CountedPtr<N>,
        success: Ordering,
        failure: Ordering,
    ) -> Result<(), CountedPtr<N>> {
        self.inner
            .compare_exchange(current.into_bits(), new.into_bits(), success, failure)
            .map(|_| ())
            .map_err(CountedPtr::from_bits)
    }

    /// Weak CAS, may fail spuriously. On failure returns the value observed.
    pub fn compare_exchange_weak(
        &self,
        current: CountedPtr<N>,
        new: CountedPtr<N>,
        success: Ordering,
        failure: Ordering,
    ) -> Result<(), CountedPtr<N>> {
        self.inner
            .compare_exchange_weak(current.into_bits(), new.into_bits(), success, failure)
            .map(|_| ())
            .map_err(CountedPtr::from_bits)
    }
}

impl<N> fmt::Debug for AtomicCountedPtr<N> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("AtomicCountedPtr")
            .field(&self.load(Ordering::Relaxed))
            .finish()
    }
}

#[cfg(all(test, not(loom)))]
mod tests {
    use super::*;

    #[test]
    fn test_null_composite() {
        let null = CountedPtr::<u64>::NULL;
        assert!(null.is_null());
        assert!(null.as_ptr().is_null());
        assert_eq!(null.external_count(), 0);
    }

    #[test]
    fn test_pack_preserves_both_halves() {
        let node = Box::into_raw(Box::new(7_u64));
        let counted = CountedPtr::new(node, 1).expect("heap address fits");

        assert_eq!(counted.as_ptr(), node);
        assert_eq!(counted.external_count(), 1);
        assert!(!counted.is_null());

        let bumped = counted.with_external_count(EXTERNAL_COUNT_MAX);
        assert_eq!(bumped.as_ptr(), node);
        assert_eq!(bumped.external_count(), EXTERNAL_COUNT_MAX);
        assert_ne!(bumped, counted);

        drop(unsafe { Box::from_raw(node) });
    }

    #[test]
    fn test_count_over_max_rejected() {
        let node = Box::into_raw(Box::new(0_u8));
        assert!(CountedPtr::new(node, EXTERNAL_COUNT_MAX + 1).is_none());
        drop(unsafe { Box::from_raw(node) });
    }

    #[cfg(target_pointer_width = "64")]
    #[test]
    fn test_wide_address_rejected() {
        let wide = ptr::without_provenance_mut::<u8>(1 << 50);
        assert!(CountedPtr::new(wide, 1).is_none());
    }

    #[test]
    fn test_atomic_cas_reports_observed_value() {
        let node = Box::into_raw(Box::new(3_u32));
        let slot = AtomicCountedPtr::<u32>::null();
        let installed = CountedPtr::new(node, 1).unwrap();

        assert_eq!(
            slot.compare_exchange(CountedPtr::NULL, installed, Ordering::AcqRel, Ordering::Relaxed),
            Ok(())
        );

        let stale = CountedPtr::NULL;
        let observed = slot
            .compare_exchange(stale, CountedPtr::NULL, Ordering::AcqRel, Ordering::Relaxed)
            .unwrap_err();
        assert_eq!(observed, installed);
        assert_eq!(slot.load(Ordering::Relaxed).external_count(), 1);
        assert!(AtomicCountedPtr::<u32>::is_lock_free());

        drop(unsafe { Box::from_raw(node) });
    }
}
