//! Atomics used by the split-count protocol.
//!
//! Under `--cfg loom` these resolve to loom's instrumented versions so
//! the model checker can explore every interleaving of the head slot and
//! the per-node internal counts.

#[cfg(loom)]
pub(crate) use loom::hint::spin_loop;
#[cfg(not(loom))]
pub(crate) use std::hint::spin_loop;

#[cfg(loom)]
pub(crate) use loom::sync::atomic::{AtomicI64, AtomicU64, Ordering};
#[cfg(not(loom))]
pub(crate) use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};
