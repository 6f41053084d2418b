//! Bootstrapped differential medians.
//!
//! The reservoir recording of a repetition is an unstressed baseline. For
//! each draw, channel and reservoir events are resampled with replacement
//! and the difference of their medians is recorded.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use shapeout_core::statistics::median;

/// Number of bootstrap draws per channel/reservoir pair.
pub const BOOTSTRAP_SAMPLES: usize = 1000;

/// Medians of `draws` resamples (with replacement, same size) of `data`.
#[must_use]
pub fn bootstrap_medians<R: Rng>(data: &[f64], draws: usize, rng: &mut R) -> Vec<f64> {
    if data.is_empty() {
        return vec![f64::NAN; draws];
    }
    let mut sample = vec![0.0; data.len()];
    (0..draws)
        .map(|_| {
            for slot in &mut sample {
                *slot = data[rng.random_range(0..data.len())];
            }
            median(&sample)
        })
        .collect()
}

/// Differential medians `median(channel*) - median(reservoir*)` over
/// `draws` bootstrap resamples.
#[must_use]
pub fn differential_medians(channel: &[f64], reservoir: &[f64], draws: usize, seed: u64) -> Vec<f64> {
    let mut rng = StdRng::seed_from_u64(seed);
    let channel = bootstrap_medians(channel, draws, &mut rng);
    let reservoir = bootstrap_medians(reservoir, draws, &mut rng);
    channel
        .iter()
        .zip(&reservoir)
        .map(|(c, r)| c - r)
        .collect()
}
