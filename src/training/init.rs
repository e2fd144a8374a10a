//! Weight initialization.

use candle_core::{Device, Tensor};
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use rand_distr::{Distribution, Uniform};

use crate::error::{DirectionError, Result};

/// Negative slope giving the default initialization of a linear layer.
pub const DEFAULT_NEGATIVE_SLOPE: f64 = 2.236_067_977_499_79;

/// Seeded generator, or one seeded from OS entropy when `seed` is `None`.
#[must_use]
pub fn rng_from_seed(seed: Option<u64>) -> ChaCha8Rng {
    seed.map_or_else(ChaCha8Rng::from_entropy, ChaCha8Rng::seed_from_u64)
}

/// Bound of the Kaiming-uniform distribution for a leaky-ReLU gain.
#[must_use]
pub fn kaiming_bound(fan_in: usize, negative_slope: f64) -> f64 {
    let gain = (2.0 / (1.0 + negative_slope * negative_slope)).sqrt();
    #[allow(clippy::cast_precision_loss)]
    let fan_in = fan_in as f64;
    gain * (3.0 / fan_in).sqrt()
}

/// `(rows, cols)` f32 matrix drawn from `U(-bound, bound)` with
/// `bound = gain * sqrt(3 / fan_in)` and `gain = sqrt(2 / (1 + slope²))`.
///
/// # Errors
///
/// Returns [`DirectionError::InvalidConfig`] if `fan_in` is zero.
pub fn kaiming_uniform<R: Rng + ?Sized>(
    shape: (usize, usize),
    fan_in: usize,
    negative_slope: f64,
    rng: &mut R,
    device: &Device,
) -> Result<Tensor> {
    if fan_in == 0 {
        return Err(DirectionError::invalid_config("fan_in must be positive"));
    }
    let bound = kaiming_bound(fan_in, negative_slope);
    let dist = Uniform::new_inclusive(-bound, bound);

    #[allow(clippy::cast_possible_truncation)]
    let data: Vec<f32> = (0..shape.0 * shape.1)
        .map(|_| dist.sample(rng) as f32)
        .collect();
    Ok(Tensor::from_vec(data, shape, device)?)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_slope_is_sqrt_five() {
        assert!((DEFAULT_NEGATIVE_SLOPE - 5f64.sqrt()).abs() < 1e-12);
        // Linear-layer default: bound = 1 / sqrt(fan_in)
        assert!((kaiming_bound(16, DEFAULT_NEGATIVE_SLOPE) - 0.25).abs() < 1e-12);
    }

    #[test]
    fn test_values_within_bound() {
        let mut rng = rng_from_seed(Some(1));
        let w = kaiming_uniform((8, 100), 100, DEFAULT_NEGATIVE_SLOPE, &mut rng, &Device::Cpu)
            .unwrap();
        assert_eq!(w.dims(), &[8, 100]);

        let bound = kaiming_bound(100, DEFAULT_NEGATIVE_SLOPE) as f32;
        let values: Vec<f32> = w.flatten_all().unwrap().to_vec1().unwrap();
        assert!(values.iter().all(|v| v.abs() <= bound));
        assert!(values.iter().any(|v| *v != 0.0));
    }

    #[test]
    fn test_seed_reproducible() {
        let a = kaiming_uniform((3, 4), 4, 0.0, &mut rng_from_seed(Some(9)), &Device::Cpu)
            .unwrap()
            .flatten_all()
            .unwrap()
            .to_vec1::<f32>()
            .unwrap();
        let b = kaiming_uniform((3, 4), 4, 0.0, &mut rng_from_seed(Some(9)), &Device::Cpu)
            .unwrap()
            .flatten_all()
            .unwrap()
            .to_vec1::<f32>()
            .unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn test_zero_fan_in_rejected() {
        let mut rng = rng_from_seed(Some(0));
        assert!(kaiming_uniform((2, 2), 0, 0.0, &mut rng, &Device::Cpu).is_err());
    }
}
