//! Tiny deterministic RNG for victim selection.
//!
//! XorShift64 with Lemire bounded sampling. Workers pick steal victims from
//! a handful of peers; nothing here needs statistical quality beyond "not
//! correlated across workers", which [`XorShift64::fork`] takes care of.
//!
//! Intentionally not `Copy`: copying would duplicate the stream and make two
//! workers pick identical victims.

#[derive(Clone, Debug)]
pub struct XorShift64 {
    state: u64,
}

impl XorShift64 {
    /// Seed 0 is remapped to avoid the all-zero lockup state.
    #[inline]
    pub fn new(seed: u64) -> Self {
        let seed = if seed == 0 { 0x9E3779B97F4A7C15 } else { seed };
        Self { state: seed }
    }

    /// Marsaglia shift triple (13, 7, 17), full period.
    #[inline]
    pub fn next_u64(&mut self) -> u64 {
        let mut x = self.state;
        x ^= x << 13;
        x ^= x >> 7;
        x ^= x << 17;
        self.state = x;
        x
    }

    /// Uniform value in `[0, upper)`. `upper` must be non-zero.
    #[inline]
    pub fn next_usize(&mut self, upper: usize) -> usize {
        debug_assert!(upper > 0, "upper bound must be > 0");

        if upper.is_power_of_two() {
            return (self.next_u64() as usize) & (upper - 1);
        }

        // Lemire: multiply-high with rejection of the biased low zone.
        let upper = upper as u64;
        let threshold = upper.wrapping_neg() % upper;
        loop {
            let m = (self.next_u64() as u128) * (upper as u128);
            if (m as u64) >= threshold {
                return (m >> 64) as usize;
            }
        }
    }

    /// Derive an independent stream (splitmix64-mixed seed).
    pub fn fork(&mut self) -> Self {
        Self::new(splitmix64(self.next_u64()))
    }
}

/// One victim-selection stream per worker, forked in worker order from the
/// pool seed.
pub(crate) fn worker_streams(seed: u64, workers: usize) -> Vec<XorShift64> {
    let mut root = XorShift64::new(seed);
    (0..workers).map(|_| root.fork()).collect()
}

#[inline]
fn splitmix64(mut x: u64) -> u64 {
    x = x.wrapping_add(0x9E3779B97F4A7C15);
    x = (x ^ (x >> 30)).wrapping_mul(0xBF58476D1CE4E5B9);
    x = (x ^ (x >> 27)).wrapping_mul(0x94D049BB133111EB);
    x ^ (x >> 31)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn deterministic_sequence() {
        let mut a = XorShift64::new(123);
        let mut b = XorShift64::new(123);
        for _ in 0..1000 {
            assert_eq!(a.next_u64(), b.next_u64());
        }
    }

    #[test]
    fn zero_seed_works() {
        let mut rng = XorShift64::new(0);
        let first = rng.next_u64();
        assert_ne!(first, 0);
        assert_ne!(first, rng.next_u64());
    }

    #[test]
    fn next_usize_in_bounds() {
        let mut rng = XorShift64::new(42);
        for upper in [1, 2, 3, 7, 8, 13, 16, 100] {
            for _ in 0..1000 {
                assert!(rng.next_usize(upper) < upper);
            }
        }
    }

    #[test]
    fn worker_streams_differ_and_repeat_per_seed() {
        let firsts: Vec<u64> = worker_streams(7, 16)
            .iter_mut()
            .map(|r| r.next_u64())
            .collect();
        for i in 0..firsts.len() {
            for j in (i + 1)..firsts.len() {
                assert_ne!(firsts[i], firsts[j]);
            }
        }

        let again: Vec<u64> = worker_streams(7, 16)
            .iter_mut()
            .map(|r| r.next_u64())
            .collect();
        assert_eq!(firsts, again);
    }

    #[test]
    fn fork_is_deterministic_and_distinct() {
        let mut m1 = XorShift64::new(42);
        let mut m2 = XorShift64::new(42);
        let mut f1 = m1.fork();
        let mut f2 = m2.fork();
        assert_eq!(f1.next_u64(), f2.next_u64());

        let mut g = m1.fork();
        assert_ne!(f1.next_u64(), g.next_u64());
    }
}
