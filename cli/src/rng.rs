//! Deterministic fleet sampling
//!
//! xorshift64* keeps demo runs reproducible: the same seed generates the
//! same synthetic pod fleet, so scoring output can be compared across
//! runs and across backends.

/// Deterministic random number generator using xorshift64*
#[derive(Debug, Clone)]
pub struct FleetRng {
    state: u64,
}

impl FleetRng {
    /// Create a new RNG with the given seed
    pub fn new(seed: u64) -> Self {
        // xorshift state must be nonzero
        let state = if seed == 0 { 0x9E37_79B9_7F4A_7C15 } else { seed };
        Self { state }
    }

    /// Generate the next random u64 value
    pub fn next(&mut self) -> u64 {
        let mut x = self.state;
        x ^= x >> 12;
        x ^= x << 25;
        x ^= x >> 27;
        self.state = x;
        x.wrapping_mul(0x2545_F491_4F6C_DD1D)
    }

    /// Random value in range `[min, max)`
    ///
    /// # Panics
    /// Panics if min >= max
    pub fn range(&mut self, min: i64, max: i64) -> i64 {
        assert!(min < max, "min must be less than max");
        let range_size = (max - min) as u64;
        min + (self.next() % range_size) as i64
    }

    /// KV-cache utilization sample in `(0, 100]`, two decimal places
    ///
    /// Strictly positive so the reference scoring function's logarithm
    /// is always defined.
    pub fn utilization(&mut self) -> f64 {
        self.range(1, 10_001) as f64 / 100.0
    }
}
