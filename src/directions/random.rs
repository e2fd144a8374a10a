//! Filter-normalized random directions.

use candle_core::Tensor;
use rand::Rng;
use rand_distr::{Distribution, StandardNormal};

use super::{DirectionPair, Directions, ParameterSource};
use crate::error::{DirectionError, Result};
use crate::normalize::normalize_direction_using_params;
use crate::params::ParameterSet;
use crate::training::rng_from_seed;

/// Two independent Gaussian directions shaped like the optimized parameters.
///
/// # Example
///
/// ```
/// use candle_core::{Device, Tensor};
/// use landscape_directions::{Directions, ParameterSet, RandomDirections};
///
/// let params = ParameterSet::new(vec![
///     Tensor::ones((4, 3), candle_core::DType::F32, &Device::Cpu).unwrap(),
/// ])
/// .unwrap();
/// let (b1, b2) = RandomDirections::from_parameters(params)
///     .with_seed(1)
///     .calculate_directions()
///     .unwrap();
/// assert_eq!(b1.shapes(), b2.shapes());
/// ```
#[derive(Debug, Clone)]
pub struct RandomDirections {
    optimized: ParameterSet,
    seed: Option<u64>,
}

impl RandomDirections {
    /// Build from explicit parameters or a parameter source.
    ///
    /// Explicit parameters win when both are given.
    ///
    /// # Errors
    ///
    /// Returns [`DirectionError::MissingParameters`] if neither is supplied.
    pub fn new(
        optimized: Option<ParameterSet>,
        source: Option<&dyn ParameterSource>,
    ) -> Result<Self> {
        let optimized = match (optimized, source) {
            (Some(parameters), _) => parameters,
            (None, Some(source)) => source.parameter_set()?,
            (None, None) => return Err(DirectionError::MissingParameters),
        };
        Ok(Self::from_parameters(optimized))
    }

    /// Build from explicit parameters.
    #[must_use]
    pub const fn from_parameters(optimized: ParameterSet) -> Self {
        Self {
            optimized,
            seed: None,
        }
    }

    /// Make the draws reproducible.
    #[must_use]
    pub const fn with_seed(mut self, seed: u64) -> Self {
        self.seed = Some(seed);
        self
    }

    /// The parameters the directions are shaped after.
    #[must_use]
    pub const fn optimized(&self) -> &ParameterSet {
        &self.optimized
    }

    /// Draw both directions, filter-normalizing them if requested.
    ///
    /// # Errors
    ///
    /// Propagates tensor failures.
    pub fn calculate_directions_with(&self, apply_normalization: bool) -> Result<DirectionPair> {
        let _span = tracing::info_span!(
            "random_directions",
            tensors = self.optimized.len(),
            parameters = self.optimized.elem_count(),
            apply_normalization
        )
        .entered();

        let mut rng = rng_from_seed(self.seed);
        let b1 = create_random_direction(&self.optimized, apply_normalization, &mut rng)?;
        let b2 = create_random_direction(&self.optimized, apply_normalization, &mut rng)?;
        Ok((b1, b2))
    }
}

impl Directions for RandomDirections {
    type Output = DirectionPair;

    fn calculate_directions(&self) -> Result<DirectionPair> {
        self.calculate_directions_with(true)
    }
}

/// One standard Gaussian tensor per parameter tensor, with its shape, dtype and
/// device, optionally filter-normalized against `parameters`.
///
/// # Errors
///
/// Propagates tensor failures.
pub fn create_random_direction<R: Rng + ?Sized>(
    parameters: &ParameterSet,
    apply_normalization: bool,
    rng: &mut R,
) -> Result<ParameterSet> {
    let tensors = parameters
        .iter()
        .map(|p| -> Result<Tensor> {
            let data: Vec<f32> = (0..p.elem_count())
                .map(|_| StandardNormal.sample(&mut *rng))
                .collect();
            Ok(Tensor::from_vec(data, p.shape().clone(), p.device())?.to_dtype(p.dtype())?)
        })
        .collect::<Result<Vec<_>>>()?;

    let mut direction = ParameterSet::new(tensors)?;
    if apply_normalization {
        normalize_direction_using_params(&mut direction, parameters)?;
    }
    Ok(direction)
}
