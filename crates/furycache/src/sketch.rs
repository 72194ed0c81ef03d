//! Count-Min sketch for approximate access counts
//!
//! `depth` rows of `width` counters. Each key maps to one counter per row;
//! the estimate is the smallest of them, so it only ever overestimates
//! (until `remove_all` subtracts from shared counters).

use ahash::RandomState;

/// Relative error used by the engine (fraction of total adds)
pub const EPSILON: f64 = 0.001;

/// Probability that an estimate stays within the error bound
pub const DELTA: f64 = 0.99;

/// Approximate frequency counter
pub struct CountMinSketch {
    width: usize,
    depth: usize,
    counters: Vec<u64>,
    hashers: Vec<RandomState>,
    total: u64,
}

impl CountMinSketch {
    /// Size the sketch for relative error `epsilon` with confidence `delta`
    ///
    /// width = ceil(e / epsilon), depth = ceil(ln(1 / (1 - delta)))
    pub fn with_error(epsilon: f64, delta: f64) -> Self {
        let width = (std::f64::consts::E / epsilon).ceil().max(1.0) as usize;
        let depth = (1.0 / (1.0 - delta)).ln().ceil().max(1.0) as usize;
        Self::with_dimensions(width, depth)
    }

    /// Create a sketch with explicit dimensions
    pub fn with_dimensions(width: usize, depth: usize) -> Self {
        let width = width.max(1);
        let depth = depth.max(1);

        // Fixed seeds keep estimates reproducible across runs
        let hashers = (0..depth as u64)
            .map(|row| {
                RandomState::with_seeds(
                    0x243f_6a88_85a3_08d3 ^ row,
                    0x1319_8a2e_0370_7344,
                    0xa409_3822_299f_31d0 ^ row.rotate_left(32),
                    0x082e_fa98_ec4e_6c89,
                )
            })
            .collect();

        Self {
            width,
            depth,
            counters: vec![0; width * depth],
            hashers,
            total: 0,
        }
    }

    fn cell(&self, row: usize, key: &str) -> usize {
        let h = self.hashers[row].hash_one(key);
        row * self.width + (h % self.width as u64) as usize
    }

    /// Count one occurrence of `key`
    pub fn add(&mut self, key: &str) {
        for row in 0..self.depth {
            let cell = self.cell(row, key);
            self.counters[cell] = self.counters[cell].saturating_add(1);
        }
        self.total += 1;
    }

    /// Estimated number of occurrences of `key`
    pub fn count(&self, key: &str) -> u64 {
        (0..self.depth)
            .map(|row| self.counters[self.cell(row, key)])
            .min()
            .unwrap_or(0)
    }

    /// Drive the estimate for `key` to zero, returning the previous estimate
    ///
    /// Subtracts the estimate from every row, which may also lower keys that
    /// share a counter. That imprecision is accepted.
    pub fn remove_all(&mut self, key: &str) -> u64 {
        let estimate = self.count(key);
        if estimate == 0 {
            return 0;
        }
        for row in 0..self.depth {
            let cell = self.cell(row, key);
            self.counters[cell] = self.counters[cell].saturating_sub(estimate);
        }
        self.total = self.total.saturating_sub(estimate);
        estimate
    }

    /// Number of adds not yet removed
    pub fn total(&self) -> u64 {
        self.total
    }

    /// Counters per row
    pub fn width(&self) -> usize {
        self.width
    }

    /// Number of rows
    pub fn depth(&self) -> usize {
        self.depth
    }

    /// Zero every counter
    pub fn clear(&mut self) {
        self.counters.iter_mut().for_each(|c| *c = 0);
        self.total = 0;
    }
}

impl Default for CountMinSketch {
    fn default() -> Self {
        Self::with_error(EPSILON, DELTA)
    }
}

impl std::fmt::Debug for CountMinSketch {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CountMinSketch")
            .field("width", &self.width)
            .field("depth", &self.depth)
            .field("total", &self.total)
            .finish()
    }
}
