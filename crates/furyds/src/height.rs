//! Random element heights for skip lists
//!
//! Every list owns its generator, so tests can pin the layout with a seed
//! instead of touching process-wide state.

use rand::rngs::SmallRng;
use rand::{Rng, SeedableRng};

/// Draws element heights from a geometric distribution with p = 1/2
#[derive(Debug, Clone)]
pub struct HeightGenerator {
    max_height: usize,
    rng: SmallRng,
}

impl HeightGenerator {
    /// Create a generator seeded from OS entropy
    pub fn new(max_height: usize) -> Self {
        Self {
            max_height,
            rng: SmallRng::from_entropy(),
        }
    }

    /// Create a generator with a fixed seed (reproducible layouts)
    pub fn with_seed(max_height: usize, seed: u64) -> Self {
        Self {
            max_height,
            rng: SmallRng::seed_from_u64(seed),
        }
    }

    /// Flip a fair coin, `true` is heads
    pub fn flip_coin(&mut self) -> bool {
        self.rng.gen::<bool>()
    }

    /// Height for a new element: 1 plus the number of heads before the
    /// first tail, never more than `max_height`
    pub fn height(&mut self) -> usize {
        let mut height = 1;
        while height < self.max_height && self.flip_coin() {
            height += 1;
        }
        height
    }

    /// Upper bound on returned heights
    pub fn max_height(&self) -> usize {
        self.max_height
    }
}
