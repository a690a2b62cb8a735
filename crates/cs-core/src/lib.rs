//! # cs-core
//!
//! Core types and invariants for the split-count stack workspace.
//!
//! This crate provides:
//! - `PropertyResult` and `PropertyChecker` for verifying invariants
//! - `Counterexample` for rendering failure paths
//! - Invariant traits for each concern (`StackProperties`,
//!   `ReclamationProperties`) together with their checkers
//!
//! Implementations expose their observable state through the traits;
//! checkers never reach into implementation internals.

pub mod counterexample;
pub mod invariants;
pub mod property;

pub use counterexample::{Counterexample, MemoryIssue, StateSnapshot, ThreadAction};
pub use property::{PropertyChecker, PropertyResult};
