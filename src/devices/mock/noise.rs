//! Seeded noise source for the simulated devices

use rand::prelude::*;
use rand::rngs::SmallRng;
use rand_distr::{Distribution, StandardNormal, Uniform};

#[derive(Clone)]
pub struct NoiseGenerator {
    rng: SmallRng,
}

impl NoiseGenerator {
    /// Seed 0 draws from entropy; any other seed is reproducible
    pub fn new(seed: u64) -> Self {
        let rng = if seed == 0 {
            SmallRng::from_entropy()
        } else {
            SmallRng::seed_from_u64(seed)
        };
        Self { rng }
    }

    /// Zero-mean Gaussian sample
    pub fn gaussian(&mut self, stddev: f32) -> f32 {
        if stddev <= 0.0 {
            return 0.0;
        }
        let n: f32 = self.rng.sample(StandardNormal);
        n * stddev
    }

    /// Uniform sample in `[0, 1)`
    pub fn uniform(&mut self) -> f32 {
        Uniform::new(0.0f32, 1.0).sample(&mut self.rng)
    }

    pub fn chance(&mut self, probability: f32) -> bool {
        self.uniform() < probability
    }

    /// Step `value` by a Gaussian increment, reflecting at `±bound`
    pub fn walk(&mut self, value: f32, step: f32, bound: f32) -> f32 {
        let next = value + self.gaussian(step);
        let reflected = if next > bound {
            2.0 * bound - next
        } else if next < -bound {
            -2.0 * bound - next
        } else {
            next
        };
        reflected.clamp(-bound, bound)
    }

    /// Fill `buf` with random bytes
    pub fn fill(&mut self, buf: &mut [u8]) {
        self.rng.fill_bytes(buf);
    }
}
