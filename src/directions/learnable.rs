//! Learnable linear-chain directions.
//!
//! A chain of weight matrices compresses each centered snapshot to two
//! coordinates and expands it back; training minimizes the summed squared
//! reconstruction error. The raw chain weights are the result.

use candle_core::{DType, Device, Tensor, Var};

use super::Directions;
use crate::config::LearnableConfig;
use crate::error::{DirectionError, Result};
use crate::params::ParameterSet;
use crate::subspace::{as_rows, Activation, Subspace, BOTTLENECK_DIM};
use crate::training::{
    kaiming_uniform, rng_from_seed, LossReduction, ReconstructionTrainer, Trainable,
    TrainingReport, DEFAULT_NEGATIVE_SLOPE,
};
use crate::trajectory::Trajectory;

/// Chain of `(out × in)` weight matrices ending in a 2-wide bottleneck.
///
/// Projection computes `x ← act(x·Wᵢᵀ)` for every matrix but the last and
/// `x·W_lastᵀ` for the last. Reconstruction walks the matrices in reverse with
/// `x ← act(x·Wᵢ)`, leaving the activation off the final (outermost) product.
#[derive(Debug, Clone)]
pub struct LearnedChain {
    weights: Vec<Var>,
    activation: Activation,
}

impl LearnedChain {
    /// Wrap existing weights, checking that they chain down to the bottleneck.
    ///
    /// # Errors
    ///
    /// Returns [`DirectionError::InvalidConfig`] for an empty chain or a wrong
    /// bottleneck width, [`DirectionError::DimensionMismatch`] if neighbouring
    /// matrices disagree.
    pub fn new(weights: Vec<Var>, activation: Activation) -> Result<Self> {
        let last = weights
            .last()
            .ok_or_else(|| DirectionError::invalid_config("weight chain must not be empty"))?;
        let (out_dim, _) = last.dims2()?;
        if out_dim != BOTTLENECK_DIM {
            return Err(DirectionError::invalid_config(format!(
                "last weight must have {BOTTLENECK_DIM} rows, got {out_dim}"
            )));
        }
        for pair in weights.windows(2) {
            let (previous_out, _) = pair[0].dims2()?;
            let (_, next_in) = pair[1].dims2()?;
            if previous_out != next_in {
                return Err(DirectionError::DimensionMismatch {
                    expected: previous_out,
                    actual: next_in,
                });
            }
        }
        Ok(Self {
            weights,
            activation,
        })
    }

    /// Kaiming-uniform chain `F → basis[0] → … → 2`.
    ///
    /// # Errors
    ///
    /// Propagates validation and allocation failures.
    pub fn initialize<R: rand::Rng + ?Sized>(
        feature_dim: usize,
        basis: &[usize],
        activation: Activation,
        rng: &mut R,
        device: &Device,
    ) -> Result<Self> {
        let widths: Vec<usize> = std::iter::once(feature_dim)
            .chain(basis.iter().copied())
            .chain(std::iter::once(BOTTLENECK_DIM))
            .collect();
        let weights = widths
            .windows(2)
            .map(|pair| -> Result<Var> {
                let (fan_in, fan_out) = (pair[0], pair[1]);
                let w = kaiming_uniform(
                    (fan_out, fan_in),
                    fan_in,
                    DEFAULT_NEGATIVE_SLOPE,
                    &mut *rng,
                    device,
                )?;
                Ok(Var::from_tensor(&w)?)
            })
            .collect::<Result<Vec<_>>>()?;
        Self::new(weights, activation)
    }

    /// The chain weights, outermost first.
    #[must_use]
    pub fn weights(&self) -> Vec<Tensor> {
        self.weights.iter().map(|w| w.as_tensor().clone()).collect()
    }

    /// The activation between products.
    #[must_use]
    pub const fn activation(&self) -> Activation {
        self.activation
    }

    fn prepare(&self, t: &Tensor) -> Result<Tensor> {
        let first = self.weights[0].as_tensor();
        Ok(as_rows(t)?.to_device(first.device())?.to_dtype(first.dtype())?)
    }
}

impl Subspace for LearnedChain {
    fn input_dim(&self) -> usize {
        self.weights[0].dims()[1]
    }

    fn output_dim(&self) -> usize {
        BOTTLENECK_DIM
    }

    fn device(&self) -> &Device {
        self.weights[0].device()
    }

    fn project(&self, points: &Tensor) -> Result<Tensor> {
        let mut x = self.prepare(points)?;
        let (_, width) = x.dims2()?;
        if width != self.input_dim() {
            return Err(DirectionError::DimensionMismatch {
                expected: self.input_dim(),
                actual: width,
            });
        }
        let (last, hidden) = self
            .weights
            .split_last()
            .ok_or_else(|| DirectionError::invalid_config("weight chain must not be empty"))?;
        for w in hidden {
            x = self.activation.apply(&x.matmul(&w.as_tensor().t()?)?)?;
        }
        Ok(x.matmul(&last.as_tensor().t()?)?)
    }

    fn reconstruct(&self, coordinates: &Tensor) -> Result<Tensor> {
        let mut x = self.prepare(coordinates)?;
        let (_, width) = x.dims2()?;
        if width != BOTTLENECK_DIM {
            return Err(DirectionError::DimensionMismatch {
                expected: BOTTLENECK_DIM,
                actual: width,
            });
        }
        for w in self.weights[1..].iter().rev() {
            x = self.activation.apply(&x.matmul(w.as_tensor())?)?;
        }
        Ok(x.matmul(self.weights[0].as_tensor())?)
    }
}

impl Trainable for LearnedChain {
    fn vars(&self) -> Vec<Var> {
        self.weights.clone()
    }
}

/// Trains a [`LearnedChain`] on the trajectory centered at the optimized point.
#[derive(Debug, Clone)]
pub struct LearnableDirections {
    optimized: ParameterSet,
    trajectory: Trajectory,
    device: Device,
    config: LearnableConfig,
}

impl LearnableDirections {
    /// Create a builder training on `device`.
    ///
    /// # Errors
    ///
    /// Returns [`DirectionError::InvalidConfig`] for an invalid configuration
    /// and a length or shape mismatch if the trajectory does not match
    /// `optimized`; both are checked before any tensor is allocated.
    pub fn new(
        optimized: ParameterSet,
        trajectory: Trajectory,
        device: Device,
        config: LearnableConfig,
    ) -> Result<Self> {
        config.validate()?;
        trajectory.ensure_matches(&optimized)?;
        Ok(Self {
            optimized,
            trajectory,
            device,
            config,
        })
    }

    /// The configuration in use.
    #[must_use]
    pub const fn config(&self) -> &LearnableConfig {
        &self.config
    }

    /// Train the chain and report how training went.
    ///
    /// # Errors
    ///
    /// Propagates tensor and backward-pass failures.
    pub fn fit(&self) -> Result<(LearnedChain, TrainingReport)> {
        let features = self.optimized.elem_count();
        let _span = tracing::info_span!(
            "learnable_directions",
            snapshots = self.trajectory.len(),
            parameters = features,
            layers = self.config.number_of_layers
        )
        .entered();

        let origin = self.optimized.flatten()?;
        let rows = self
            .trajectory
            .flattened(Some(&origin), &self.device, DType::F32)?;
        let dataset = Tensor::stack(&rows, 0)?;

        let mut rng = rng_from_seed(self.config.seed);
        let chain = LearnedChain::initialize(
            features,
            &self.config.intermediate_basis_count,
            self.config.activation,
            &mut rng,
            &self.device,
        )?;

        let trainer =
            ReconstructionTrainer::new(self.config.trainer_settings(LossReduction::Sum));
        let report = trainer.train(&chain, &dataset)?;
        Ok((chain, report))
    }
}

impl Directions for LearnableDirections {
    type Output = LearnedChain;

    fn calculate_directions(&self) -> Result<LearnedChain> {
        Ok(self.fit()?.0)
    }
}
