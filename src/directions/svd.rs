//! Leading right singular vectors of the centered trajectory.

use candle_core::{DType, Tensor};

use super::{DirectionPair, Directions};
use crate::config::SvdConfig;
use crate::error::Result;
use crate::linalg::randomized_svd;
use crate::params::ParameterSet;
use crate::trajectory::Trajectory;

/// Directions plus their singular values.
#[derive(Debug, Clone)]
pub struct SvdReport {
    /// First and second right singular vectors, shaped like the parameters.
    pub directions: DirectionPair,
    /// The two leading singular values.
    pub singular_values: [f64; 2],
}

/// Rank-2 randomized SVD of the snapshots' offsets from the optimized point.
///
/// Unlike PCA no mean is removed: the snapshots are only shifted by the
/// optimized parameters.
#[derive(Debug, Clone)]
pub struct SvdDirections {
    optimized: ParameterSet,
    trajectory: Trajectory,
    config: SvdConfig,
}

impl SvdDirections {
    /// Create a builder; the decomposition runs on the parameters' device.
    ///
    /// # Errors
    ///
    /// Fails if the trajectory's shape template differs from `optimized`.
    pub fn new(optimized: ParameterSet, trajectory: Trajectory) -> Result<Self> {
        trajectory.ensure_matches(&optimized)?;
        Ok(Self {
            optimized,
            trajectory,
            config: SvdConfig::default(),
        })
    }

    /// Override the sketch settings.
    #[must_use]
    pub fn with_config(mut self, config: SvdConfig) -> Self {
        self.config = config;
        self
    }

    /// Run the decomposition.
    ///
    /// # Errors
    ///
    /// Returns [`DirectionError::InsufficientSamples`](crate::DirectionError::InsufficientSamples)
    /// if the snapshot matrix has rank below two by shape.
    pub fn compute(&self) -> Result<SvdReport> {
        let device = self.optimized.device();
        let _span = tracing::info_span!(
            "svd_directions",
            snapshots = self.trajectory.len(),
            parameters = self.optimized.elem_count()
        )
        .entered();

        let origin = self.optimized.flatten()?;
        let rows = self.trajectory.flattened(Some(&origin), device, DType::F32)?;
        let matrix = Tensor::stack(&rows, 0)?;
        tracing::debug!(
            oversampling = self.config.oversampling,
            power_iterations = self.config.power_iterations,
            "randomized svd"
        );

        let svd = randomized_svd(
            &matrix,
            2,
            self.config.oversampling,
            self.config.power_iterations,
            self.config.seed,
        )?;

        let column = |index: usize| -> Result<ParameterSet> {
            let data: Vec<f64> = svd.right_vectors.column(index).iter().copied().collect();
            let len = data.len();
            let vector = Tensor::from_vec(data, len, device)?;
            ParameterSet::from_vector(&vector, &self.optimized)
        };
        let directions = (column(0)?, column(1)?);
        let singular_values = [svd.singular_values[0], svd.singular_values[1]];
        tracing::info!(
            first = singular_values[0],
            second = singular_values[1],
            "leading singular values"
        );

        Ok(SvdReport {
            directions,
            singular_values,
        })
    }
}

impl Directions for SvdDirections {
    type Output = DirectionPair;

    fn calculate_directions(&self) -> Result<DirectionPair> {
        Ok(self.compute()?.directions)
    }
}
