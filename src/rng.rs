//! Random number generation for boosting.
//!
//! Boosting needs randomness for two things: breaking ties between
//! equal-gain splits, and choosing split points on the random-splits path.
//! Neither requires cryptographic quality, so we use a fast deterministic
//! generator seeded either by the caller (reproducible runs) or from the
//! operating system.

use rand::{Rng, RngCore, SeedableRng};
use rand_xoshiro::Xoshiro256PlusPlus;

use crate::error::{BoostError, Result};

/// Deterministic random number generator used throughout boosting.
#[derive(Debug, Clone)]
pub struct BoostRng {
    inner: Xoshiro256PlusPlus,
}

impl BoostRng {
    /// Create a generator from a fixed seed. Identical seeds produce
    /// identical boosting runs.
    pub fn new(seed: u64) -> Self {
        Self { inner: Xoshiro256PlusPlus::seed_from_u64(seed) }
    }

    /// Create a generator seeded from the operating system.
    ///
    /// Split-point randomness does not need to be unpredictable, only
    /// independent of the data, so a single OS word is enough seed
    /// material.
    pub fn from_entropy() -> Result<Self> {
        let mut seed_bytes = [0u8; 8];
        rand::rngs::OsRng
            .try_fill_bytes(&mut seed_bytes)
            .map_err(|e| BoostError::UnexpectedInternal(format!("entropy source failed: {e}")))?;
        Ok(Self::new(u64::from_le_bytes(seed_bytes)))
    }

    /// Uniform index in `0..bound`. `bound` must be non-zero.
    #[inline]
    pub fn index_below(&mut self, bound: usize) -> usize {
        debug_assert!(0 < bound);
        self.inner.gen_range(0..bound)
    }

    /// Fair coin flip, used to break exact gain ties.
    #[inline]
    pub fn coin(&mut self) -> bool {
        self.inner.gen()
    }

    /// Sample `count` distinct values from `0..bound`, returned sorted.
    ///
    /// Partial Fisher-Yates: only the first `count` positions are
    /// shuffled.
    pub fn sample_distinct_sorted(&mut self, bound: usize, count: usize) -> Vec<usize> {
        debug_assert!(count <= bound);
        let mut pool: Vec<usize> = (0..bound).collect();
        for i in 0..count {
            let j = i + self.index_below(bound - i);
            pool.swap(i, j);
        }
        pool.truncate(count);
        pool.sort_unstable();
        pool
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_seeded_runs_are_reproducible() {
        let mut a = BoostRng::new(42);
        let mut b = BoostRng::new(42);
        for _ in 0..100 {
            assert_eq!(a.index_below(1000), b.index_below(1000));
        }
    }

    #[test]
    fn test_sample_distinct_sorted() {
        let mut rng = BoostRng::new(7);
        for _ in 0..50 {
            let sample = rng.sample_distinct_sorted(10, 4);
            assert_eq!(sample.len(), 4);
            assert!(sample.windows(2).all(|w| w[0] < w[1]));
            assert!(sample.iter().all(|&v| v < 10));
        }
    }

    #[test]
    fn test_sample_all() {
        let mut rng = BoostRng::new(1);
        let sample = rng.sample_distinct_sorted(5, 5);
        assert_eq!(sample, vec![0, 1, 2, 3, 4]);
    }
}
