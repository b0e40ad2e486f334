//! Mock heart rate simulator
//!
//! Bounded random walk used in place of a real device.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

/// Baseline is seeded uniformly from this range on activation
pub const BASELINE_RANGE: std::ops::RangeInclusive<u16> = 65..=84;
/// Per-tick change
pub const MAX_STEP: i32 = 3;
pub const MIN_SIMULATED_BPM: u16 = 50;
pub const MAX_SIMULATED_BPM: u16 = 180;

pub struct MockSimulator {
    rng: StdRng,
    current: u16,
}

impl MockSimulator {
    pub fn new() -> Self {
        Self::with_rng(StdRng::from_entropy())
    }

    /// Deterministic simulator for tests
    pub fn with_seed(seed: u64) -> Self {
        Self::with_rng(StdRng::seed_from_u64(seed))
    }

    fn with_rng(mut rng: StdRng) -> Self {
        let current = rng.gen_range(BASELINE_RANGE);
        Self { rng, current }
    }

    /// Pick a fresh baseline.
    pub fn reseed(&mut self) {
        self.current = self.rng.gen_range(BASELINE_RANGE);
    }

    pub fn current(&self) -> u16 {
        self.current
    }

    /// Advance one tick and return the new value.
    pub fn step(&mut self) -> u16 {
        let delta = self.rng.gen_range(-MAX_STEP..=MAX_STEP);
        let next = (i32::from(self.current) + delta)
            .clamp(i32::from(MIN_SIMULATED_BPM), i32::from(MAX_SIMULATED_BPM));
        self.current = next as u16;
        self.current
    }
}

impl Default for MockSimulator {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_baseline_in_range() {
        for seed in 0..200 {
            let sim = MockSimulator::with_seed(seed);
            assert!(BASELINE_RANGE.contains(&sim.current()));
        }
    }

    #[test]
    fn test_random_walk_stays_bounded() {
        let mut sim = MockSimulator::with_seed(7);
        let mut previous = sim.current();
        for _ in 0..10_000 {
            let value = sim.step();
            assert!((MIN_SIMULATED_BPM..=MAX_SIMULATED_BPM).contains(&value));
            assert!((i32::from(value) - i32::from(previous)).abs() <= MAX_STEP);
            previous = value;
        }
    }

    #[test]
    fn test_reseed_returns_to_baseline_range() {
        let mut sim = MockSimulator::with_seed(42);
        for _ in 0..500 {
            sim.step();
        }
        sim.reseed();
        assert!(BASELINE_RANGE.contains(&sim.current()));
    }
}
