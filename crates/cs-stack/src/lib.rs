//! # cs-stack
//!
//! Lock-free LIFO stacks that never free a node another thread may still
//! be reading.
//!
//! - `split_stack`: [`SplitCountStack`], reclamation by split reference
//!   counting. An external count travels with the node address in one
//!   atomic head word; an internal count inside the node collects the
//!   releases of threads that lost the race to unlink it.
//! - `delegated`: [`DelegatedStack`], a Treiber stack that hands
//!   reclamation to `crossbeam-epoch`. Kept as the contrast design.
//! - `tracked`: [`TrackedStack`], records history for the property
//!   checkers in `cs-core`.
//! - `counted`: the packed `(external_count, pointer)` composite.
//! - `kani_proofs`: bounded proofs (under `#[cfg(kani)]`).
//!
//! # Testing
//!
//! ```bash
//! cargo test -p cs-stack --features ledger
//! RUSTFLAGS="--cfg loom" cargo test -p cs-stack --release
//! ```
//!
//! # Platform precondition
//!
//! The head word is a `u64`. Targets without native 64-bit atomics are
//! rejected at compile time. On 64-bit targets node addresses must fit
//! in 48 bits; `try_push` reports a violation instead of truncating.

pub mod counted;
#[cfg(not(loom))]
pub mod delegated;
pub mod error;
pub mod kani_proofs;
pub mod ledger;
pub mod split_stack;
mod sync;
pub mod tracked;

pub use counted::{AtomicCountedPtr, CountedPtr, EXTERNAL_COUNT_MAX};
#[cfg(not(loom))]
pub use delegated::DelegatedStack;
pub use error::PushError;
pub use ledger::LedgerSnapshot;
pub use split_stack::SplitCountStack;
pub use tracked::TrackedStack;
