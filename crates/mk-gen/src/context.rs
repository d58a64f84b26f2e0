use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

/// The single random stream a generation pipeline draws from. Every
/// generator takes it by `&mut` so that a seed fully determines the output.
#[derive(Debug, Clone)]
pub struct GenContext {
    seed: u64,
    rng: StdRng,
}

impl GenContext {
    #[must_use]
    pub fn from_seed(seed: u64) -> Self {
        Self {
            seed,
            rng: StdRng::seed_from_u64(seed),
        }
    }

    #[must_use]
    pub fn seed(&self) -> u64 {
        self.seed
    }

    pub fn rng(&mut self) -> &mut StdRng {
        &mut self.rng
    }

    /// Uniform index in `0..len`. `len` must be non-zero.
    pub fn gen_index(&mut self, len: usize) -> usize {
        debug_assert!(len > 0, "gen_index over an empty range");
        if len <= 1 {
            0
        } else {
            self.rng.gen_range(0..len)
        }
    }

    pub fn gen_bool(&mut self, probability: f64) -> bool {
        if probability <= 0.0 || probability.is_nan() {
            false
        } else if probability >= 1.0 {
            true
        } else {
            self.rng.gen_bool(probability)
        }
    }

    /// Draws an index with probability proportional to `weights[i]`.
    /// Returns `None` when no weight is positive.
    pub fn gen_weighted(&mut self, weights: &[f64]) -> Option<usize> {
        let total: f64 = weights.iter().filter(|w| **w > 0.0).sum();
        if !(total > 0.0 && total.is_finite()) {
            return None;
        }
        let mut point = self.rng.gen_range(0.0..total);
        let mut last_positive = None;
        for (index, weight) in weights.iter().enumerate() {
            if *weight <= 0.0 {
                continue;
            }
            if point < *weight {
                return Some(index);
            }
            point -= *weight;
            last_positive = Some(index);
        }
        last_positive
    }
}
