//! Kani proof harnesses for the composite head word and the split-count
//! release arithmetic.
//!
//! # Running the proofs
//!
//! ```bash
//! cargo kani -p cs-stack
//! cargo kani -p cs-stack --harness proof_claims_close_to_zero
//! ```
//!
//! Kani does not execute threads. The concurrent interleavings are
//! covered by the loom models in `split_stack`; these harnesses verify
//! the sequential pieces those models rely on.

#[cfg(kani)]
mod proofs {
    use crate::counted::{CountedPtr, EXTERNAL_COUNT_MAX};
    use crate::split_stack::{winner_release, SplitCountStack};

    /// Packing never disturbs the other half of the word.
    #[kani::proof]
    fn proof_count_update_preserves_pointer() {
        let addr: usize = kani::any();
        kani::assume(addr != 0 && addr % 8 == 0);
        let count: u64 = kani::any();
        let bumped: u64 = kani::any();
        kani::assume(count <= EXTERNAL_COUNT_MAX && bumped <= EXTERNAL_COUNT_MAX);

        let ptr = std::ptr::without_provenance_mut::<u64>(addr);
        if let Some(counted) = CountedPtr::new(ptr, count) {
            let updated = counted.with_external_count(bumped);
            kani::assert(updated.as_ptr() == ptr, "count update moved the pointer");
            kani::assert(updated.external_count() == bumped, "count lost");
            kani::assert(!updated.is_null(), "non-null pointer became null");
        }
    }

    /// For any number of losing claimants, the winner's release plus one
    /// decrement per loser brings the internal count to zero, and exactly
    /// one of those updates observes the crossing, in any order.
    #[kani::proof]
    #[kani::unwind(6)]
    fn proof_claims_close_to_zero() {
        let losers: u64 = kani::any();
        kani::assume(losers <= 4);
        // Position at which the winner's release lands among the losers.
        let winner_at: u64 = kani::any();
        kani::assume(winner_at <= losers);

        let external = 1 + 1 + losers;
        let release = winner_release(external);

        let mut internal: i64 = 0;
        let mut frees = 0_u32;
        for i in 0..=losers {
            if i == winner_at {
                let prev = internal;
                internal += release;
                if prev == -release {
                    frees += 1;
                }
            }
            if i < losers {
                let prev = internal;
                internal -= 1;
                if prev == 1 {
                    frees += 1;
                }
            }
        }

        kani::assert(internal == 0, "claims did not net to zero");
        kani::assert(frees == 1, "node must be freed exactly once");
    }

    /// When we push v1 then v2, popping returns v2 first.
    #[kani::proof]
    #[kani::unwind(4)]
    fn proof_lifo_order() {
        let stack = SplitCountStack::new();

        let v1: u64 = kani::any();
        let v2: u64 = kani::any();

        stack.push(v1);
        stack.push(v2);

        kani::assert(stack.pop() == Some(v2), "second pushed must pop first");
        kani::assert(stack.pop() == Some(v1), "first pushed must pop second");
        kani::assert(stack.pop().is_none(), "stack must be empty");
    }

    /// Pop on an empty stack returns None.
    #[kani::proof]
    fn proof_empty_pop_returns_none() {
        let stack: SplitCountStack<u64> = SplitCountStack::new();
        kani::assert(stack.pop().is_none(), "pop on empty stack must return None");
        kani::assert(stack.is_empty(), "empty pop must leave the stack empty");
    }

    /// Never pop more than was pushed, for any sequence of up to 5 ops.
    #[kani::proof]
    #[kani::unwind(8)]
    fn proof_pop_count_bounded() {
        let stack = SplitCountStack::new();

        let mut pushed_count: u64 = 0;
        let mut popped_count: u64 = 0;

        for _ in 0..5u8 {
            let is_push: bool = kani::any();

            if is_push {
                pushed_count += 1;
                stack.push(pushed_count);
            } else if stack.pop().is_some() {
                popped_count += 1;
            }
        }

        kani::assert(
            popped_count <= pushed_count,
            "cannot pop more elements than pushed",
        );
    }
}
