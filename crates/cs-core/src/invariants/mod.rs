//! Invariant traits for the split-count stack.
//!
//! Each module defines the properties an implementation must satisfy
//! and a checker that verifies them against exposed state.
//!
//! - `stack`: element invariants (NoLostElements, NoDuplicates, LIFO_Order)
//! - `reclamation`: memory invariants (FreedAtMostOnce, NoLeakAtQuiescence,
//!   ClaimsBalanced)

pub mod reclamation;
pub mod stack;

pub use reclamation::{ReclamationProperties, ReclamationPropertyChecker};
pub use stack::{StackHistory, StackOpType, StackOperation, StackProperties, StackPropertyChecker};
