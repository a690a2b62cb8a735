//! Seeded fault decisions.

use std::time::Duration;

use crate::random::DeterministicRng;

/// How often faults and delays fire.
#[derive(Debug, Clone, PartialEq)]
pub struct FaultConfig {
    /// Probability that `should_fail` returns `true`.
    pub failure_probability: f64,
    /// Probability that `maybe_delay` stalls the caller.
    pub delay_probability: f64,
    /// Upper bound for one injected delay.
    pub max_delay: Duration,
}

impl Default for FaultConfig {
    fn default() -> Self {
        Self {
            failure_probability: 0.05,
            delay_probability: 0.05,
            max_delay: Duration::from_micros(50),
        }
    }
}

impl FaultConfig {
    /// No faults, no delays.
    #[must_use]
    pub fn none() -> Self {
        Self {
            failure_probability: 0.0,
            delay_probability: 0.0,
            max_delay: Duration::ZERO,
        }
    }

    #[must_use]
    pub fn aggressive() -> Self {
        Self {
            failure_probability: 0.2,
            delay_probability: 0.2,
            max_delay: Duration::from_micros(200),
        }
    }
}

/// Counters for what the injector actually did.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FaultStats {
    pub faults_count: u64,
    pub delays_count: u64,
}

/// Decides, from its own RNG stream, when to fail or stall.
#[derive(Debug, Clone)]
pub struct FaultInjector {
    rng: DeterministicRng,
    config: FaultConfig,
    stats: FaultStats,
}

impl FaultInjector {
    #[must_use]
    pub fn new(rng: DeterministicRng, config: FaultConfig) -> Self {
        Self {
            rng,
            config,
            stats: FaultStats::default(),
        }
    }

    #[must_use]
    pub fn config(&self) -> &FaultConfig {
        &self.config
    }

    pub fn should_fail(&mut self) -> bool {
        if self.config.failure_probability <= 0.0 {
            return false;
        }
        let fail = self.rng.gen_bool(self.config.failure_probability);
        if fail {
            self.stats.faults_count += 1;
        }
        fail
    }

    /// Sleep for a random duration, sometimes. Returns whether it did.
    pub fn maybe_delay(&mut self) -> bool {
        if self.config.delay_probability <= 0.0 || self.config.max_delay.is_zero() {
            return false;
        }
        if !self.rng.gen_bool(self.config.delay_probability) {
            return false;
        }
        let max = u64::try_from(self.config.max_delay.as_nanos()).unwrap_or(u64::MAX);
        let nanos = self.rng.gen_range(1..=max);
        std::thread::sleep(Duration::from_nanos(nanos));
        self.stats.delays_count += 1;
        true
    }

    #[must_use]
    pub fn stats(&self) -> FaultStats {
        self.stats
    }
}
