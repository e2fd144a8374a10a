//! Learnable nonlinear subspace directions.

use candle_core::{DType, Device, Tensor, Var};

use super::Directions;
use crate::config::LearnableConfig;
use crate::error::Result;
use crate::params::ParameterSet;
use crate::subspace::{LinearSubspace, NonlinearSubspace, BOTTLENECK_DIM};
use crate::training::{
    kaiming_uniform, rng_from_seed, LossReduction, ReconstructionTrainer, TrainingReport,
    DEFAULT_NEGATIVE_SLOPE,
};
use crate::trajectory::Trajectory;

/// Trains a [`NonlinearSubspace`] whose outer layer is anchored at the
/// optimized parameters, minimizing the mean squared reconstruction error of
/// the raw snapshots.
#[derive(Debug, Clone)]
pub struct LearnableNonlinearDirections {
    optimized: ParameterSet,
    trajectory: Trajectory,
    device: Device,
    config: LearnableConfig,
}

impl LearnableNonlinearDirections {
    /// Create a builder training on `device`.
    ///
    /// Use [`LearnableConfig::nonlinear_default`] for the usual schedule.
    ///
    /// # Errors
    ///
    /// Returns [`DirectionError::InvalidConfig`](crate::DirectionError::InvalidConfig)
    /// for an invalid configuration and a length or shape mismatch if the
    /// trajectory does not match `optimized`.
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

    /// Train the subspace and report how training went.
    ///
    /// # Errors
    ///
    /// Propagates tensor and backward-pass failures.
    pub fn fit(&self) -> Result<(NonlinearSubspace, TrainingReport)> {
        let features = self.optimized.elem_count();
        let _span = tracing::info_span!(
            "nonlinear_directions",
            snapshots = self.trajectory.len(),
            parameters = features,
            layers = self.config.number_of_layers
        )
        .entered();

        let rows = self.trajectory.flattened(None, &self.device, DType::F32)?;
        let dataset = Tensor::stack(&rows, 0)?;
        let origin = self
            .optimized
            .flatten()?
            .to_device(&self.device)?
            .to_dtype(DType::F32)?;

        let widths: Vec<usize> = std::iter::once(features)
            .chain(self.config.intermediate_basis_count.iter().copied())
            .chain(std::iter::once(BOTTLENECK_DIM))
            .collect();
        let mut rng = rng_from_seed(self.config.seed);
        let layers = widths
            .windows(2)
            .enumerate()
            .map(|(index, pair)| -> Result<LinearSubspace> {
                let weight = kaiming_uniform(
                    (pair[0], pair[1]),
                    pair[0],
                    DEFAULT_NEGATIVE_SLOPE,
                    &mut rng,
                    &self.device,
                )?;
                let layer_origin = (index == 0).then_some(&origin);
                LinearSubspace::from_var(Var::from_tensor(&weight)?, layer_origin)
            })
            .collect::<Result<Vec<_>>>()?;
        let subspace = NonlinearSubspace::new(layers, self.config.activation)?;

        let trainer =
            ReconstructionTrainer::new(self.config.trainer_settings(LossReduction::Mean));
        let report = trainer.train(&subspace, &dataset)?;
        Ok((subspace, report))
    }
}

impl Directions for LearnableNonlinearDirections {
    type Output = NonlinearSubspace;

    fn calculate_directions(&self) -> Result<NonlinearSubspace> {
        Ok(self.fit()?.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::DirectionError;
    use crate::subspace::{Activation, Subspace};

    fn snapshot(values: &[f32]) -> ParameterSet {
        ParameterSet::new(vec![Tensor::new(values, &Device::Cpu).unwrap()]).unwrap()
    }

    fn curve() -> (ParameterSet, Trajectory) {
        let optimized = snapshot(&[1.0, 1.0, 1.0, 1.0, 1.0]);
        let points: Vec<ParameterSet> = (0..10)
            .map(|i| {
                let t = i as f32 * 0.2;
                snapshot(&[1.0 + t, 1.0 - t, 1.0 + 0.5 * t * t, 1.0, 1.0 + 0.1 * t])
            })
            .collect();
        (optimized, Trajectory::new(points).unwrap())
    }

    #[test]
    fn test_layer_shapes_and_origin() {
        let (optimized, trajectory) = curve();
        let config = LearnableConfig::nonlinear_default()
            .with_intermediate_basis_count(vec![4, 3])
            .with_training_epochs(1)
            .with_seed(0);
        let (subspace, _) = LearnableNonlinearDirections::new(optimized, trajectory, Device::Cpu, config)
            .unwrap()
            .fit()
            .unwrap();

        let shapes: Vec<Vec<usize>> = subspace
            .layers()
            .iter()
            .map(|l| l.weight().dims().to_vec())
            .collect();
        assert_eq!(shapes, vec![vec![5, 4], vec![4, 3], vec![3, 2]]);
        assert!(subspace.layers()[0].origin().is_some());
        assert!(subspace.layers()[1..].iter().all(|l| l.origin().is_none()));
    }

    #[test]
    fn test_training_improves_reconstruction() {
        let (optimized, trajectory) = curve();
        let config = LearnableConfig::nonlinear_default()
            .with_intermediate_basis_count(vec![8])
            .with_activation(Activation::Tanh)
            .with_training_epochs(300)
            .with_seed(4);
        let builder =
            LearnableNonlinearDirections::new(optimized, trajectory, Device::Cpu, config).unwrap();

        let (subspace, report) = builder.fit().unwrap();
        assert!(report.best_loss < report.initial_loss);
        assert_eq!(subspace.output_dim(), 2);
        assert_eq!(subspace.input_dim(), 5);
    }

    #[test]
    fn test_mismatched_trajectory_rejected() {
        let optimized = snapshot(&[0.0, 0.0]);
        let trajectory = Trajectory::new(vec![snapshot(&[1.0, 1.0, 1.0])]).unwrap();
        assert!(matches!(
            LearnableNonlinearDirections::new(
                optimized,
                trajectory,
                Device::Cpu,
                LearnableConfig::nonlinear_default()
            ),
            Err(DirectionError::ShapeMismatch { .. })
        ));
    }
}
