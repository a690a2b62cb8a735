//! Deterministic random number generation.
//!
//! Every random decision in a DST run flows through one of these, so a
//! seed fully determines the run.

use rand::distributions::uniform::{SampleRange, SampleUniform};
use rand::distributions::{Distribution, Standard};
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};

/// Seeded RNG. Same seed, same sequence.
#[derive(Debug, Clone)]
pub struct DeterministicRng {
    inner: StdRng,
    seed: u64,
}

impl DeterministicRng {
    #[must_use]
    pub fn new(seed: u64) -> Self {
        Self {
            inner: StdRng::seed_from_u64(seed),
            seed,
        }
    }

    /// The seed this generator started from.
    #[must_use]
    pub fn seed(&self) -> u64 {
        self.seed
    }

    /// Derive an independent generator, e.g. one per worker thread.
    #[must_use]
    pub fn fork(&mut self) -> Self {
        Self::new(self.inner.gen())
    }

    pub fn gen<T>(&mut self) -> T
    where
        Standard: Distribution<T>,
    {
        self.inner.gen()
    }

    pub fn gen_range<T, R>(&mut self, range: R) -> T
    where
        T: SampleUniform,
        R: SampleRange<T>,
    {
        self.inner.gen_range(range)
    }

    /// `true` with probability `p`, clamped to `[0, 1]`.
    pub fn gen_bool(&mut self, p: f64) -> bool {
        self.inner.gen_bool(p.clamp(0.0, 1.0))
    }

    pub fn shuffle<T>(&mut self, items: &mut [T]) {
        items.shuffle(&mut self.inner);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_same_seed_same_sequence() {
        let mut a = DeterministicRng::new(42);
        let mut b = DeterministicRng::new(42);

        for _ in 0..100 {
            assert_eq!(a.gen::<u64>(), b.gen::<u64>());
        }
    }

    #[test]
    fn test_fork_is_deterministic() {
        let mut a = DeterministicRng::new(7);
        let mut b = DeterministicRng::new(7);

        let mut fa = a.fork();
        let mut fb = b.fork();
        assert_eq!(fa.gen_range(0..1000_u32), fb.gen_range(0..1000_u32));
    }

    #[test]
    fn test_gen_bool_extremes() {
        let mut rng = DeterministicRng::new(1);
        assert!(!rng.gen_bool(0.0));
        assert!(rng.gen_bool(1.0));
        assert!(rng.gen_bool(2.5));
    }

    #[test]
    fn test_shuffle_keeps_elements() {
        let mut rng = DeterministicRng::new(3);
        let mut items: Vec<u32> = (0..20).collect();
        rng.shuffle(&mut items);
        items.sort_unstable();
        assert_eq!(items, (0..20).collect::<Vec<_>>());
    }
}
