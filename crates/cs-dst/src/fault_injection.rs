//! Fault injection for the stack, at operation boundaries.
//!
//! Faults are never injected inside the CAS sequences of push or pop.
//! The stack code stays untouched; the runner decides before and after
//! each call whether the "thread" fails to start, stalls, or disappears
//! without looking at the result.
//!
//! | Concern                     | Tool  | Level                |
//! |-----------------------------|-------|----------------------|
//! | CAS races, reclamation      | loom  | Instruction          |
//! | Allocation refused          | DST   | Before push          |
//! | Caller dies after the call  | DST   | After push / pop     |
//! | Slow thread                 | DST   | Between operations   |
//!
//! Alongside the stack the runner keeps a sequential model. Every pop
//! is compared against it, so LIFO order is checked step by step and
//! not just at the end.

use std::collections::HashSet;

use cs_stack::TrackedStack;

use crate::env::DstEnv;
use crate::fault::{FaultConfig, FaultStats};
use crate::random::DeterministicRng;

/// Where a fault is injected.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FaultPoint {
    BeforeOperation,
    AfterOperation,
}

/// Types of faults that can be injected.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FaultType {
    /// Node allocation refused: the push never starts.
    AllocationFailure,
    /// The caller vanishes. Before the call nothing happens; after it the
    /// operation took effect but its result is dropped.
    ThreadCrash,
    /// The caller stalls before continuing.
    Delay,
}

/// Minimal surface the runner drives. Implementations carry no DST logic.
pub trait DstTestableStack: Send + Sync {
    fn new() -> Self;
    fn push(&self, value: u64);
    fn pop(&self) -> Option<u64>;
    fn is_empty(&self) -> bool;
    /// Contents top to bottom. Only called while no other operation runs.
    fn get_contents(&self) -> Vec<u64>;
}

impl DstTestableStack for TrackedStack {
    fn new() -> Self {
        TrackedStack::new()
    }

    fn push(&self, value: u64) {
        TrackedStack::push(self, value);
    }

    fn pop(&self) -> Option<u64> {
        TrackedStack::pop(self)
    }

    fn is_empty(&self) -> bool {
        TrackedStack::is_empty(self)
    }

    fn get_contents(&self) -> Vec<u64> {
        TrackedStack::get_contents(self)
    }
}

/// DST operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DstOp {
    Push(u64),
    Pop,
}

/// Drives a stack through operations with boundary faults.
pub struct DstRunner<S> {
    stack: S,
    env: DstEnv,
    model: Vec<u64>,
    pushed: HashSet<u64>,
    popped: HashSet<u64>,
    operations_count: u64,
    faults_injected: u64,
    abandoned_operations: u64,
    first_violation: Option<String>,
}

impl<S: DstTestableStack> DstRunner<S> {
    #[must_use]
    pub fn new(seed: u64) -> Self {
        Self::with_fault_config(seed, FaultConfig::default())
    }

    #[must_use]
    pub fn with_fault_config(seed: u64, config: FaultConfig) -> Self {
        Self {
            stack: S::new(),
            env: DstEnv::with_fault_config(seed, config),
            model: Vec::new(),
            pushed: HashSet::new(),
            popped: HashSet::new(),
            operations_count: 0,
            faults_injected: 0,
            abandoned_operations: 0,
            first_violation: None,
        }
    }

    #[must_use]
    pub fn seed(&self) -> u64 {
        self.env.seed()
    }

    /// The stack under test, for post-run property checks.
    #[must_use]
    pub fn stack(&self) -> &S {
        &self.stack
    }

    /// Push with fault injection at boundaries.
    pub fn push(&mut self, value: u64) -> Result<(), FaultType> {
        match self.maybe_inject_fault(FaultPoint::BeforeOperation) {
            Some(fault @ (FaultType::AllocationFailure | FaultType::ThreadCrash)) => {
                if fault == FaultType::ThreadCrash {
                    self.abandoned_operations += 1;
                }
                return Err(fault);
            }
            Some(FaultType::Delay) | None => {}
        }

        self.stack.push(value);
        self.operations_count += 1;
        self.pushed.insert(value);
        self.model.push(value);

        if let Some(FaultType::ThreadCrash) = self.maybe_inject_fault(FaultPoint::AfterOperation) {
            // The push landed; only the caller is gone.
            self.abandoned_operations += 1;
            return Err(FaultType::ThreadCrash);
        }
        Ok(())
    }

    /// Pop with fault injection at boundaries.
    pub fn pop(&mut self) -> Result<Option<u64>, FaultType> {
        if let Some(FaultType::ThreadCrash) = self.maybe_inject_fault(FaultPoint::BeforeOperation) {
            self.abandoned_operations += 1;
            return Err(FaultType::ThreadCrash);
        }

        let result = self.stack.pop();
        self.operations_count += 1;

        let expected = self.model.pop();
        if result != expected {
            self.record_violation(format!(
                "LIFO_Order: pop returned {result:?}, model expected {expected:?}"
            ));
        }
        if let Some(value) = result {
            if !self.popped.insert(value) {
                self.record_violation(format!("PoppedOnce: {value} popped twice"));
            }
        }

        if let Some(FaultType::ThreadCrash) = self.maybe_inject_fault(FaultPoint::AfterOperation) {
            // The value left the stack; the caller dropped it.
            self.abandoned_operations += 1;
            return Err(FaultType::ThreadCrash);
        }
        Ok(result)
    }

    fn maybe_inject_fault(&mut self, point: FaultPoint) -> Option<FaultType> {
        if !self.env.fault().should_fail() {
            return None;
        }
        let fault = match (point, self.env.rng().gen_range(0..3_u8)) {
            (FaultPoint::BeforeOperation, 0) => FaultType::AllocationFailure,
            (_, 0 | 1) => FaultType::ThreadCrash,
            _ => FaultType::Delay,
        };
        if fault == FaultType::Delay {
            self.env.maybe_delay();
        }
        self.faults_injected += 1;
        tracing::trace!(?point, ?fault, "injected fault");
        Some(fault)
    }

    fn record_violation(&mut self, message: String) {
        tracing::error!(seed = self.seed(), %message, "DST violation");
        self.first_violation.get_or_insert(message);
    }

    /// Every pushed element is in the stack or was popped.
    #[must_use]
    pub fn check_no_lost_elements(&self) -> bool {
        let contents: HashSet<u64> = self.stack.get_contents().into_iter().collect();
        self.pushed
            .iter()
            .all(|elem| contents.contains(elem) || self.popped.contains(elem))
    }

    /// No element appears twice in the stack.
    #[must_use]
    pub fn check_no_duplicates(&self) -> bool {
        let contents = self.stack.get_contents();
        let unique: HashSet<_> = contents.iter().collect();
        contents.len() == unique.len()
    }

    /// Remaining contents equal the model, top to bottom.
    #[must_use]
    pub fn check_matches_model(&self) -> bool {
        let mut expected = self.model.clone();
        expected.reverse();
        self.stack.get_contents() == expected
    }

    #[must_use]
    pub fn stats(&self) -> DstStats {
        DstStats {
            seed: self.seed(),
            operations_count: self.operations_count,
            faults_injected: self.faults_injected,
            abandoned_operations: self.abandoned_operations,
            injector: self.env.stats(),
        }
    }
}

/// Statistics from DST run.
#[derive(Debug, Clone)]
pub struct DstStats {
    pub seed: u64,
    pub operations_count: u64,
    pub faults_injected: u64,
    pub abandoned_operations: u64,
    pub injector: FaultStats,
}

impl DstStats {
    #[must_use]
    pub fn format(&self) -> String {
        format!(
            "DST_SEED={} ops={} faults={} abandoned={} delays={}",
            self.seed,
            self.operations_count,
            self.faults_injected,
            self.abandoned_operations,
            self.injector.delays_count
        )
    }
}

/// Generate `count` operations; pushes carry unique, non-zero values.
pub fn generate_ops(rng: &mut DeterministicRng, count: usize, push_probability: f64) -> Vec<DstOp> {
    let mut next_value = 0_u64;
    (0..count)
        .map(|_| {
            if rng.gen_bool(push_probability) {
                next_value += 1;
                DstOp::Push(next_value)
            } else {
                DstOp::Pop
            }
        })
        .collect()
}

/// Run a DST scenario.
///
/// Faults are part of the test and are collected, not treated as
/// failures. Invariants are checked as the run goes and at the end.
pub fn run_dst_scenario<S: DstTestableStack>(seed: u64, operations: Vec<DstOp>) -> DstResult<S> {
    run_dst_scenario_with(seed, FaultConfig::default(), operations)
}

pub fn run_dst_scenario_with<S: DstTestableStack>(
    seed: u64,
    config: FaultConfig,
    operations: Vec<DstOp>,
) -> DstResult<S> {
    let mut runner: DstRunner<S> = DstRunner::with_fault_config(seed, config);
    let mut fault_errors = Vec::new();

    for op in operations {
        let result = match op {
            DstOp::Push(v) => runner.push(v),
            DstOp::Pop => runner.pop().map(|_| ()),
        };
        if let Err(fault) = result {
            fault_errors.push(fault);
        }
    }

    let no_lost_elements = runner.check_no_lost_elements();
    let no_duplicates = runner.check_no_duplicates();
    let matches_model = runner.check_matches_model();
    let stats = runner.stats();
    let passed =
        no_lost_elements && no_duplicates && matches_model && runner.first_violation.is_none();

    if passed {
        tracing::info!(stats = %stats.format(), "DST scenario passed");
    } else {
        tracing::error!(stats = %stats.format(), "DST scenario failed");
    }

    DstResult {
        passed,
        no_lost_elements,
        no_duplicates,
        matches_model,
        first_violation: runner.first_violation.take(),
        stats,
        fault_errors,
        stack: runner.stack,
    }
}

/// Outcome of [`run_dst_scenario`]. Owns the stack for further checks.
#[derive(Debug)]
pub struct DstResult<S> {
    pub passed: bool,
    pub no_lost_elements: bool,
    pub no_duplicates: bool,
    pub matches_model: bool,
    pub first_violation: Option<String>,
    pub stats: DstStats,
    pub fault_errors: Vec<FaultType>,
    pub stack: S,
}

impl<S> DstResult<S> {
    #[must_use]
    pub fn format(&self) -> String {
        let status = if self.passed { "PASS" } else { "FAIL" };
        let mut result = format!("[{status}] {}", self.stats.format());

        if !self.no_lost_elements {
            result.push_str("\n  VIOLATION: NoLostElements");
        }
        if !self.no_duplicates {
            result.push_str("\n  VIOLATION: NoDuplicates");
        }
        if !self.matches_model {
            result.push_str("\n  VIOLATION: contents differ from model");
        }
        if let Some(ref violation) = self.first_violation {
            result.push_str(&format!("\n  VIOLATION: {violation}"));
        }
        result
    }
}
