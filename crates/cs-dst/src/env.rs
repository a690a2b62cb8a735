//! Per-run simulation environment: the seed, the RNG, and the fault
//! injector derived from it.

use crate::fault::{FaultConfig, FaultInjector, FaultStats};
use crate::random::DeterministicRng;

#[derive(Debug)]
pub struct DstEnv {
    seed: u64,
    rng: DeterministicRng,
    fault: FaultInjector,
}

impl DstEnv {
    /// Environment with the default fault profile.
    #[must_use]
    pub fn new(seed: u64) -> Self {
        Self::with_fault_config(seed, FaultConfig::default())
    }

    #[must_use]
    pub fn with_fault_config(seed: u64, config: FaultConfig) -> Self {
        // Faults use their own stream so adding a fault check does not
        // shift the operation sequence.
        Self {
            seed,
            rng: DeterministicRng::new(seed),
            fault: FaultInjector::new(DeterministicRng::new(seed.wrapping_add(1)), config),
        }
    }

    #[must_use]
    pub fn seed(&self) -> u64 {
        self.seed
    }

    pub fn rng(&mut self) -> &mut DeterministicRng {
        &mut self.rng
    }

    pub fn fault(&mut self) -> &mut FaultInjector {
        &mut self.fault
    }

    pub fn maybe_delay(&mut self) -> bool {
        self.fault.maybe_delay()
    }

    #[must_use]
    pub fn stats(&self) -> FaultStats {
        self.fault.stats()
    }

    /// `DST_SEED=<seed>`, ready to paste into a shell.
    #[must_use]
    pub fn format_seed(&self) -> String {
        format!("DST_SEED={}", self.seed)
    }
}
