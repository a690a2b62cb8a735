//! Real-thread stress harness.
//!
//! Runs randomized push/pop mixes on OS threads against a shared stack
//! and then verifies, over the whole run:
//! - no loss: popped plus remaining equals pushed, as multisets
//! - no duplication: every value surfaces at most once
//! - reclamation: with a ledger, claims and frees balance after draining
//!
//! Order is not checked here. Under real contention there is no single
//! observer to compare against; LIFO is covered by the model in
//! `fault_injection` and by the loom models.
//!
//! Each thread draws its operations from an RNG forked off the run seed,
//! so the operation mix is reproducible. The interleaving is not: that is
//! what the OS scheduler contributes.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Barrier, Mutex, PoisonError};
use std::thread;
use std::time::{Duration, Instant};

use cs_stack::{DelegatedStack, LedgerSnapshot, SplitCountStack};

use crate::error::HarnessError;
use crate::fault::{FaultConfig, FaultInjector};
use crate::random::DeterministicRng;

/// Upper bound on worker threads for one run.
pub const MAX_THREADS: usize = 64;

/// Configuration for a stress run.
#[derive(Debug, Clone)]
pub struct HarnessConfig {
    /// Number of worker threads
    pub threads_count: usize,
    /// Number of operations per thread
    pub operations_per_thread: u64,
    /// Probability that an operation is a push
    pub push_probability: f64,
    /// Delays injected between operations
    pub fault_config: FaultConfig,
    /// Pop everything left after the workers finish and verify the ledger
    pub drain_at_end: bool,
}

impl Default for HarnessConfig {
    fn default() -> Self {
        Self {
            threads_count: 4,
            operations_per_thread: 2_000,
            push_probability: 0.5,
            fault_config: FaultConfig::default(),
            drain_at_end: true,
        }
    }
}

impl HarnessConfig {
    /// Configuration for stress testing.
    #[must_use]
    pub fn stress() -> Self {
        Self {
            threads_count: 8,
            operations_per_thread: 20_000,
            push_probability: 0.5,
            fault_config: FaultConfig::aggressive(),
            drain_at_end: true,
        }
    }

    /// Configuration for quick testing.
    #[must_use]
    pub fn quick() -> Self {
        Self {
            threads_count: 2,
            operations_per_thread: 200,
            push_probability: 0.5,
            fault_config: FaultConfig::none(),
            drain_at_end: true,
        }
    }

    fn validate(&self) -> Result<(), HarnessError> {
        if self.threads_count == 0 {
            return Err(HarnessError::NoThreads);
        }
        if self.threads_count > MAX_THREADS {
            return Err(HarnessError::TooManyThreads(self.threads_count));
        }
        if !(0.0..=1.0).contains(&self.push_probability) {
            return Err(HarnessError::InvalidPushProbability(self.push_probability));
        }
        Ok(())
    }
}

/// What the harness needs from a stack. Values are `u64`.
pub trait StressTestableStack: Send + Sync {
    fn push(&self, value: u64);
    fn pop(&self) -> Option<u64>;

    /// Reclamation counters, if the implementation keeps them.
    fn ledger(&self) -> Option<LedgerSnapshot> {
        None
    }
}

impl StressTestableStack for SplitCountStack<u64> {
    fn push(&self, value: u64) {
        SplitCountStack::push(self, value);
    }

    fn pop(&self) -> Option<u64> {
        SplitCountStack::pop(self)
    }

    fn ledger(&self) -> Option<LedgerSnapshot> {
        Some(SplitCountStack::ledger(self))
    }
}

impl StressTestableStack for DelegatedStack<u64> {
    fn push(&self, value: u64) {
        DelegatedStack::push(self, value);
    }

    fn pop(&self) -> Option<u64> {
        DelegatedStack::pop(self)
    }
}

/// Result of running the harness.
#[derive(Debug, Clone)]
pub struct HarnessResult {
    /// Seed used for reproduction
    pub seed: u64,
    pub pushes_count: u64,
    pub pops_count: u64,
    pub empty_pops_count: u64,
    /// Values popped by the final drain. Always 0 when `drain_at_end` is
    /// off, since nothing is counted then.
    pub remaining_count: u64,
    pub delays_count: u64,
    pub elapsed: Duration,
    pub ledger: Option<LedgerSnapshot>,
    /// Whether all invariants held
    pub all_invariants_held: bool,
    /// First violation (if any)
    pub first_violation: Option<String>,
}

impl HarnessResult {
    /// Format for display.
    #[must_use]
    pub fn format(&self) -> String {
        let status = if self.all_invariants_held {
            "PASS"
        } else {
            "FAIL"
        };

        let mut result = format!(
            "[{}] DST_SEED={} pushes={} pops={} empty_pops={} remaining={} delays={} elapsed={:?}",
            status,
            self.seed,
            self.pushes_count,
            self.pops_count,
            self.empty_pops_count,
            self.remaining_count,
            self.delays_count,
            self.elapsed
        );

        if let Some(ref ledger) = self.ledger {
            result.push_str(&format!(
                " allocated={} freed={} claims={}/{}",
                ledger.nodes_allocated,
                ledger.nodes_freed,
                ledger.claims_taken,
                ledger.claims_released
            ));
        }
        if let Some(ref violation) = self.first_violation {
            result.push_str(&format!("\n  Violation: {violation}"));
        }

        result
    }
}

#[derive(Default)]
struct WorkerLog {
    pushed: Vec<u64>,
    popped: Vec<u64>,
    empty_pops: u64,
    delays: u64,
}

/// Runs one configured workload against a stack.
pub struct StressHarness {
    seed: u64,
    config: HarnessConfig,
    violation: Mutex<Option<String>>,
    stopped: AtomicBool,
}

impl StressHarness {
    /// Create a new harness with the given seed and config.
    pub fn new(seed: u64, config: HarnessConfig) -> Result<Self, HarnessError> {
        config.validate()?;
        Ok(Self {
            seed,
            config,
            violation: Mutex::new(None),
            stopped: AtomicBool::new(false),
        })
    }

    /// Get the seed for reproduction.
    #[must_use]
    pub fn seed(&self) -> u64 {
        self.seed
    }

    #[must_use]
    pub fn config(&self) -> &HarnessConfig {
        &self.config
    }

    /// Check if the harness has been stopped due to a violation.
    pub fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::Acquire)
    }

    /// Stop the harness with a violation message. The first one wins.
    pub fn stop_with_violation(&self, message: String) {
        let mut guard = self.violation.lock().unwrap_or_else(PoisonError::into_inner);
        if guard.is_none() {
            tracing::error!(seed = self.seed, %message, "stress violation");
            *guard = Some(message);
        }
        self.stopped.store(true, Ordering::Release);
    }

    /// Run the workload against `stack`, which must start empty.
    pub fn run<S: StressTestableStack + 'static>(&self, stack: Arc<S>) -> HarnessResult {
        let start = Instant::now();
        let threads_count = self.config.threads_count;
        let barrier = Arc::new(Barrier::new(threads_count));

        let mut seeder = DeterministicRng::new(self.seed);
        let handles: Vec<_> = (0..threads_count)
            .map(|tid| {
                let stack = Arc::clone(&stack);
                let barrier = Arc::clone(&barrier);
                let mut rng = seeder.fork();
                let faults = FaultInjector::new(seeder.fork(), self.config.fault_config.clone());
                let ops = self.config.operations_per_thread;
                let push_probability = self.config.push_probability;

                thread::spawn(move || {
                    let mut faults = faults;
                    let mut log = WorkerLog::default();
                    let mut seq = 0_u64;
                    barrier.wait();
                    for _ in 0..ops {
                        if rng.gen_bool(push_probability) {
                            seq += 1;
                            // Unique per run: thread id high, sequence low.
                            let value = ((tid as u64) << 32) | seq;
                            stack.push(value);
                            log.pushed.push(value);
                        } else {
                            match stack.pop() {
                                Some(value) => log.popped.push(value),
                                None => log.empty_pops += 1,
                            }
                        }
                        if faults.maybe_delay() {
                            log.delays += 1;
                        }
                    }
                    log
                })
            })
            .collect();

        let mut logs = Vec::with_capacity(threads_count);
        for (tid, handle) in handles.into_iter().enumerate() {
            match handle.join() {
                Ok(log) => logs.push(log),
                Err(_) => self.stop_with_violation(format!("worker {tid} panicked")),
            }
        }

        let mut remaining = Vec::new();
        if self.config.drain_at_end {
            while let Some(value) = stack.pop() {
                remaining.push(value);
            }
        }

        if !self.is_stopped() {
            self.verify(&logs, &remaining);
        }

        let ledger = stack.ledger();
        if let (Some(snapshot), true) = (ledger, self.config.drain_at_end) {
            if snapshot.outstanding_claims() != 0 || snapshot.unfreed_nodes() != 0 {
                self.stop_with_violation(format!(
                    "ClaimsBalanced: after draining, {} claims outstanding and {} nodes unfreed",
                    snapshot.outstanding_claims(),
                    snapshot.unfreed_nodes()
                ));
            }
        }

        let result = HarnessResult {
            seed: self.seed,
            pushes_count: logs.iter().map(|l| l.pushed.len() as u64).sum(),
            pops_count: logs.iter().map(|l| l.popped.len() as u64).sum(),
            empty_pops_count: logs.iter().map(|l| l.empty_pops).sum(),
            remaining_count: remaining.len() as u64,
            delays_count: logs.iter().map(|l| l.delays).sum(),
            elapsed: start.elapsed(),
            ledger,
            all_invariants_held: !self.is_stopped(),
            first_violation: self
                .violation
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .clone(),
        };
        tracing::info!(result = %result.format(), "stress run finished");
        result
    }

    fn verify(&self, logs: &[WorkerLog], remaining: &[u64]) {
        // value -> times pushed minus times it surfaced
        let mut balance: HashMap<u64, i64> = HashMap::new();
        for log in logs {
            for &value in &log.pushed {
                *balance.entry(value).or_default() += 1;
            }
        }
        for &value in logs.iter().flat_map(|l| l.popped.iter()).chain(remaining) {
            match balance.get_mut(&value) {
                Some(count) => *count -= 1,
                None => {
                    self.stop_with_violation(format!(
                        "PoppedWerePushed: {value:#x} surfaced but was never pushed"
                    ));
                    return;
                }
            }
        }

        for (value, count) in balance {
            if count > 0 && self.config.drain_at_end {
                self.stop_with_violation(format!("NoLostElements: {value:#x} never surfaced"));
                return;
            }
            if count < 0 {
                self.stop_with_violation(format!(
                    "NoDuplicates: {value:#x} surfaced {} extra time(s)",
                    -count
                ));
                return;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Hands out a value it never received.
    struct PhantomValueStack(SplitCountStack<u64>);

    impl StressTestableStack for PhantomValueStack {
        fn push(&self, value: u64) {
            self.0.push(value);
        }

        fn pop(&self) -> Option<u64> {
            self.0.pop().map(|v| v ^ (1 << 63))
        }
    }

    #[test]
    fn test_invalid_config_rejected() {
        let zero = HarnessConfig {
            threads_count: 0,
            ..HarnessConfig::quick()
        };
        assert_eq!(StressHarness::new(1, zero).err(), Some(HarnessError::NoThreads));

        let many = HarnessConfig {
            threads_count: MAX_THREADS + 1,
            ..HarnessConfig::quick()
        };
        assert_eq!(
            StressHarness::new(1, many).err(),
            Some(HarnessError::TooManyThreads(MAX_THREADS + 1))
        );

        let odd = HarnessConfig {
            push_probability: 1.5,
            ..HarnessConfig::quick()
        };
        assert!(StressHarness::new(1, odd).is_err());
    }

    #[test]
    fn test_quick_run_split_stack() {
        let harness = StressHarness::new(12345, HarnessConfig::quick()).unwrap();
        let result = harness.run(Arc::new(SplitCountStack::new()));

        assert!(result.all_invariants_held, "{}", result.format());
        assert_eq!(
            result.pushes_count,
            result.pops_count + result.remaining_count
        );
        let ledger = result.ledger.expect("split stack keeps a ledger");
        assert_eq!(ledger.nodes_allocated, result.pushes_count);
        assert_eq!(ledger.nodes_freed, result.pushes_count);
    }

    #[test]
    fn test_quick_run_delegated_stack() {
        let harness = StressHarness::new(54321, HarnessConfig::quick()).unwrap();
        let result = harness.run(Arc::new(DelegatedStack::new()));

        assert!(result.all_invariants_held, "{}", result.format());
        assert!(result.ledger.is_none());
    }

    #[test]
    fn test_detects_foreign_value() {
        let config = HarnessConfig {
            threads_count: 1,
            push_probability: 1.0,
            ..HarnessConfig::quick()
        };
        let harness = StressHarness::new(3, config).unwrap();
        let result = harness.run(Arc::new(PhantomValueStack(SplitCountStack::new())));

        assert!(!result.all_invariants_held);
        let violation = result.first_violation.unwrap();
        assert!(violation.contains("PoppedWerePushed"), "{violation}");
    }

    #[test]
    fn test_no_drain_reports_no_remaining() {
        let config = HarnessConfig {
            push_probability: 1.0,
            drain_at_end: false,
            ..HarnessConfig::quick()
        };
        let stack = Arc::new(SplitCountStack::<u64>::new());
        let harness = StressHarness::new(11, config).unwrap();
        let result = harness.run(Arc::clone(&stack));

        assert!(result.all_invariants_held, "{}", result.format());
        assert_eq!(result.remaining_count, 0);
        assert_eq!(result.pushes_count, 400);
        // The values were left in place, not lost.
        let mut left = 0;
        while stack.pop().is_some() {
            left += 1;
        }
        assert_eq!(left, 400);
    }

    #[test]
    fn test_format_mentions_seed() {
        let harness = StressHarness::new(777, HarnessConfig::quick()).unwrap();
        let result = harness.run(Arc::new(SplitCountStack::new()));
        assert!(result.format().starts_with("[PASS] DST_SEED=777"));
    }
}
