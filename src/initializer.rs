use rand::{SeedableRng, FromEntropy};
use rand::Rng;
use rand::distributions::StandardNormal;
use rand_xorshift::XorShiftRng;
use crate::utils::stable_hash_seed;

/// Source of initial parameter values, threaded through `Layer::initialize`.
pub trait NetInitializer {

    /// A sample from the standard normal distribution.
    fn sample_normal(&mut self) -> f64;

    /// Gaussian noise divided by the averaged fan of a connection block. This is narrower
    /// than the usual `1/sqrt(fan_avg)` deviation, which keeps wide layers near zero.
    fn xavier(&mut self, fan_in: usize, fan_out: usize) -> f64 {
        let fan_avg = (fan_in + fan_out) as f64 / 2.0;
        self.sample_normal() / fan_avg.max(1.0)
    }
}

#[derive(Clone, Debug)]
pub struct RandomNetInitializer {
    rng: XorShiftRng,
}

#[allow(dead_code)]
impl RandomNetInitializer {

    pub fn new_from_entropy() -> Self {
        RandomNetInitializer {
            rng: XorShiftRng::from_entropy()
        }
    }

    pub fn new_with_seed(val: &str) -> Self {
        RandomNetInitializer {
            rng: XorShiftRng::from_seed(stable_hash_seed(val))
        }
    }

    pub fn new_with_u64(seed: u64) -> Self {
        RandomNetInitializer {
            rng: XorShiftRng::seed_from_u64(seed)
        }
    }

    /// The underlying generator, for callers that need more than normal samples
    /// (shuffling, toy data).
    pub fn rng_mut(&mut self) -> &mut XorShiftRng {
        &mut self.rng
    }

}

impl NetInitializer for RandomNetInitializer {
    fn sample_normal(&mut self) -> f64 {
        self.rng.sample(StandardNormal)
    }
}
