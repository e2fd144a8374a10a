//! Principal directions of a training trajectory.
//!
//! The covariance of the snapshots is formed in whichever of its two
//! equivalent shapes is smaller: the F×F feature covariance when there are at
//! least as many snapshots as parameters, otherwise the N×N Gram matrix of the
//! centered snapshots. Both share their non-zero eigenvalues, and a Gram
//! eigenvector `u` maps to the feature eigenvector `Σ u_i x_i`.

use candle_core::{DType, Device, Tensor};
use nalgebra::{DMatrix, DVector};
use serde::{Deserialize, Serialize};

use super::{DirectionPair, Directions};
use crate::config::EigenSolverConfig;
use crate::error::{DirectionError, Result};
use crate::linalg::{orthonormal_complement, tensor_to_dmatrix, top_eigenpairs, EigenSolver};
use crate::params::ParameterSet;
use crate::trajectory::Trajectory;

/// Number of principal directions extracted.
const COMPONENTS: usize = 2;

/// Eigenvalues below this fraction of the largest are treated as zero.
const RANK_TOLERANCE: f64 = 1e-10;

/// Which covariance shape was decomposed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CovarianceForm {
    /// F×F covariance of the parameters.
    Features,
    /// N×N Gram matrix of the snapshots.
    Samples,
}

/// Directions plus the spectrum they came from.
#[derive(Debug, Clone)]
pub struct PcaReport {
    /// First and second principal directions.
    pub directions: DirectionPair,
    /// The two leading covariance eigenvalues.
    pub eigenvalues: [f64; 2],
    /// Each eigenvalue as a fraction of the total variance.
    pub explained_variance_ratio: [f64; 2],
    /// Solver that produced the eigenpairs.
    pub solver: EigenSolver,
    /// Covariance shape that was decomposed.
    pub covariance_form: CovarianceForm,
}

/// PCA of the trajectory around the optimized parameters.
#[derive(Debug, Clone)]
pub struct PcaDirections {
    optimized: ParameterSet,
    trajectory: Trajectory,
    covariance_device: Device,
    solver: EigenSolverConfig,
}

impl PcaDirections {
    /// Create a builder computing the covariance on `covariance_device`.
    ///
    /// # Errors
    ///
    /// Fails if the trajectory's shape template differs from `optimized`.
    pub fn new(
        optimized: ParameterSet,
        trajectory: Trajectory,
        covariance_device: Device,
    ) -> Result<Self> {
        trajectory.ensure_matches(&optimized)?;
        Ok(Self {
            optimized,
            trajectory,
            covariance_device,
            solver: EigenSolverConfig::default(),
        })
    }

    /// Create a builder computing the covariance on the CPU.
    ///
    /// # Errors
    ///
    /// See [`PcaDirections::new`].
    pub fn with_defaults(optimized: ParameterSet, trajectory: Trajectory) -> Result<Self> {
        Self::new(optimized, trajectory, Device::Cpu)
    }

    /// Override the iterative eigen solver settings.
    #[must_use]
    pub fn with_solver_config(mut self, solver: EigenSolverConfig) -> Self {
        self.solver = solver;
        self
    }

    /// Run PCA and report the spectrum alongside the directions.
    ///
    /// # Errors
    ///
    /// Returns [`DirectionError::InsufficientSamples`] for fewer than two
    /// snapshots or parameters.
    pub fn compute(&self) -> Result<PcaReport> {
        let samples_count = self.trajectory.len();
        let features = self.optimized.elem_count();
        let _span = tracing::info_span!(
            "pca_directions",
            snapshots = samples_count,
            parameters = features
        )
        .entered();

        ensure_enough(samples_count, features)?;

        let origin = self.optimized.flatten()?;
        let samples =
            self.trajectory
                .flattened(Some(&origin), &self.covariance_device, DType::F64)?;
        let centered = center(samples)?;

        let form = if features <= samples_count {
            CovarianceForm::Features
        } else {
            CovarianceForm::Samples
        };
        tracing::debug!(?form, "building covariance");

        let matrix = match form {
            CovarianceForm::Features => feature_covariance(&centered)?,
            CovarianceForm::Samples => gram_covariance(&centered)?,
        };
        let (pairs, solver) = top_eigenpairs(&matrix, COMPONENTS, &self.solver)?;

        let eigenvalues = [pairs.values[0], pairs.values[1]];
        let total = matrix.trace();
        let explained_variance_ratio = if total > 0.0 {
            [eigenvalues[0] / total, eigenvalues[1] / total]
        } else {
            [0.0, 0.0]
        };
        tracing::info!(
            explained_variance = explained_variance_ratio[0],
            "1st principal component explains {:.2}% of variance",
            explained_variance_ratio[0] * 100.0
        );
        tracing::info!(
            explained_variance = explained_variance_ratio[1],
            "2nd principal component explains {:.2}% of variance",
            explained_variance_ratio[1] * 100.0
        );

        let (b1, b2) = match form {
            CovarianceForm::Features => (
                column_tensor(&pairs.vectors, 0, &self.covariance_device)?,
                column_tensor(&pairs.vectors, 1, &self.covariance_device)?,
            ),
            CovarianceForm::Samples => {
                let significant = |value: f64| value > eigenvalues[0].max(0.0) * RANK_TOLERANCE;
                let first = if significant(eigenvalues[0]) {
                    map_to_features(&centered, &pairs.vectors, 0)?
                } else {
                    first_axis(features, &self.covariance_device)?
                };
                let second = if significant(eigenvalues[1]) {
                    map_to_features(&centered, &pairs.vectors, 1)?
                } else {
                    tracing::debug!("trajectory is rank one; completing second direction");
                    complement(&first)?
                };
                (first, second)
            }
        };

        let directions = (
            ParameterSet::from_vector(&b1, &self.optimized)?,
            ParameterSet::from_vector(&b2, &self.optimized)?,
        );

        Ok(PcaReport {
            directions,
            eigenvalues,
            explained_variance_ratio,
            solver,
            covariance_form: form,
        })
    }
}

impl Directions for PcaDirections {
    type Output = DirectionPair;

    fn calculate_directions(&self) -> Result<DirectionPair> {
        Ok(self.compute()?.directions)
    }
}

/// Unbiased F×F covariance of 1-D samples, with per-feature mean removal.
///
/// # Errors
///
/// Returns [`DirectionError::InsufficientSamples`] for fewer than two samples
/// and a dimension mismatch if the samples differ in length.
pub fn calculate_covariance_matrix(samples: &[Tensor]) -> Result<DMatrix<f64>> {
    let first = samples.first().ok_or(DirectionError::InsufficientSamples {
        required: 2,
        actual: 0,
    })?;
    let width = first.elem_count();
    if samples.len() < 2 {
        return Err(DirectionError::InsufficientSamples {
            required: 2,
            actual: samples.len(),
        });
    }

    let rows = samples
        .iter()
        .map(|s| -> Result<Tensor> {
            let row = s.flatten_all()?.to_dtype(DType::F64)?;
            if row.elem_count() != width {
                return Err(DirectionError::DimensionMismatch {
                    expected: width,
                    actual: row.elem_count(),
                });
            }
            Ok(row)
        })
        .collect::<Result<Vec<_>>>()?;

    feature_covariance(&center(rows)?)
}

fn ensure_enough(samples: usize, features: usize) -> Result<()> {
    if samples < COMPONENTS {
        return Err(DirectionError::InsufficientSamples {
            required: COMPONENTS,
            actual: samples,
        });
    }
    if features < COMPONENTS {
        return Err(DirectionError::InsufficientSamples {
            required: COMPONENTS,
            actual: features,
        });
    }
    Ok(())
}

/// Subtract the per-feature mean from every sample.
fn center(samples: Vec<Tensor>) -> Result<Vec<Tensor>> {
    #[allow(clippy::cast_precision_loss)]
    let count = samples.len() as f64;
    let mut sum = samples[0].zeros_like()?;
    for sample in &samples {
        sum = (sum + sample)?;
    }
    let mean = (sum / count)?;
    samples
        .into_iter()
        .map(|s| -> Result<Tensor> { Ok((s - &mean)?) })
        .collect()
}

fn feature_covariance(centered: &[Tensor]) -> Result<DMatrix<f64>> {
    let width = centered[0].elem_count();
    let mut acc = Tensor::zeros((width, width), DType::F64, centered[0].device())?;
    for row in centered {
        let column = row.reshape((width, 1))?;
        acc = (acc + column.matmul(&column.t()?)?)?;
    }
    #[allow(clippy::cast_precision_loss)]
    let dof = (centered.len() - 1) as f64;
    Ok(tensor_to_dmatrix(&(acc / dof)?)?)
}

fn gram_covariance(centered: &[Tensor]) -> Result<DMatrix<f64>> {
    let n = centered.len();
    #[allow(clippy::cast_precision_loss)]
    let dof = (n - 1) as f64;
    let mut gram = DMatrix::zeros(n, n);
    for i in 0..n {
        for j in i..n {
            let dot = (&centered[i] * &centered[j])?
                .sum_all()?
                .to_scalar::<f64>()?
                / dof;
            gram[(i, j)] = dot;
            gram[(j, i)] = dot;
        }
    }
    Ok(gram)
}

fn column_tensor(vectors: &DMatrix<f64>, column: usize, device: &Device) -> Result<Tensor> {
    let data: Vec<f64> = vectors.column(column).iter().copied().collect();
    let len = data.len();
    Ok(Tensor::from_vec(data, len, device)?)
}

/// Unit vector `Σ u_i x_i` for Gram eigenvector column `column`.
fn map_to_features(centered: &[Tensor], vectors: &DMatrix<f64>, column: usize) -> Result<Tensor> {
    let mut acc = centered[0].zeros_like()?;
    for (row, &weight) in centered.iter().zip(vectors.column(column).iter()) {
        acc = (acc + (row * weight)?)?;
    }
    let norm = acc.sqr()?.sum_all()?.sqrt()?.to_scalar::<f64>()?;
    if norm == 0.0 {
        return Err(DirectionError::numerical(
            "principal direction vanished when mapped to parameter space",
        ));
    }
    Ok((acc / norm)?)
}

fn first_axis(features: usize, device: &Device) -> Result<Tensor> {
    let mut data = vec![0.0f64; features];
    data[0] = 1.0;
    Ok(Tensor::from_vec(data, features, device)?)
}

fn complement(first: &Tensor) -> Result<Tensor> {
    let values: Vec<f64> = first.to_vec1()?;
    let partner = orthonormal_complement(&DVector::from_vec(values));
    let len = partner.len();
    Ok(Tensor::from_vec(
        partner.iter().copied().collect::<Vec<f64>>(),
        len,
        first.device(),
    )?)
}
