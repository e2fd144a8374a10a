//! Dense linear algebra used by the PCA and SVD direction builders.
//!
//! Heavy products (anything touching the full parameter dimension) stay in candle
//! tensors so they run on the configured device. Small factorizations (QR, symmetric
//! eigen, thin SVD) happen in `nalgebra` on the host.

use candle_core::{DType, Device, Tensor};
use nalgebra::{DMatrix, DVector, SymmetricEigen};
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use rand_distr::{Distribution, StandardNormal};
use serde::{Deserialize, Serialize};

use crate::config::EigenSolverConfig;
use crate::error::{DirectionError, Result};

/// Which eigen solver produced a decomposition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EigenSolver {
    /// Full symmetric eigendecomposition.
    Dense,
    /// Block subspace iteration with Rayleigh-Ritz extraction of the top pairs.
    SubspaceIteration,
}

/// Eigenpairs sorted by descending eigenvalue; vectors are matrix columns.
#[derive(Debug, Clone)]
pub struct EigenPairs {
    /// Eigenvalues, largest first.
    pub values: Vec<f64>,
    /// Unit eigenvectors as columns, in the same order as `values`.
    pub vectors: DMatrix<f64>,
}

/// Compute the `k` leading eigenpairs of a symmetric positive semi-definite matrix.
///
/// Matrices larger than `3 * k` rows use the iterative solver; smaller ones are
/// decomposed densely.
///
/// If the iteration stalls (a small eigengap, typical of noisy trajectories),
/// the matrix is decomposed densely instead and the result reports
/// [`EigenSolver::Dense`].
///
/// # Errors
///
/// Returns [`DirectionError::InsufficientSamples`] if the matrix has fewer than
/// `k` rows.
pub fn top_eigenpairs(
    matrix: &DMatrix<f64>,
    k: usize,
    config: &EigenSolverConfig,
) -> Result<(EigenPairs, EigenSolver)> {
    if matrix.nrows() < k {
        return Err(DirectionError::InsufficientSamples {
            required: k,
            actual: matrix.nrows(),
        });
    }

    if matrix.nrows() > 3 * k {
        tracing::debug!(dim = matrix.nrows(), k, "using subspace iteration for eigenpairs");
        match subspace_iteration(matrix, k, config) {
            Ok(pairs) => return Ok((pairs, EigenSolver::SubspaceIteration)),
            Err(DirectionError::Numerical(reason)) => {
                tracing::warn!(%reason, "falling back to dense eigendecomposition");
            }
            Err(err) => return Err(err),
        }
        let mut pairs = dense_symmetric_eigen(matrix);
        pairs.values.truncate(k);
        pairs.vectors = pairs.vectors.columns(0, k).into_owned();
        Ok((pairs, EigenSolver::Dense))
    } else {
        tracing::debug!(dim = matrix.nrows(), "using dense symmetric eigendecomposition");
        Ok((dense_symmetric_eigen(matrix), EigenSolver::Dense))
    }
}

/// Full symmetric eigendecomposition, sorted by descending eigenvalue.
#[must_use]
pub fn dense_symmetric_eigen(matrix: &DMatrix<f64>) -> EigenPairs {
    let eigen = SymmetricEigen::new(matrix.clone());
    let values: Vec<f64> = eigen.eigenvalues.iter().copied().collect();
    let order = descending_order(&values);

    EigenPairs {
        values: order.iter().map(|&i| values[i]).collect(),
        vectors: select_columns(&eigen.eigenvectors, &order),
    }
}

/// Block subspace iteration for the `k` largest eigenpairs of a PSD matrix.
///
/// The block carries `2k` columns (capped at the matrix size) and is
/// re-orthonormalized every step. The iteration stops once the Ritz residuals
/// `‖A v − λ v‖` of the leading `k` pairs fall below the tolerance, or once the
/// leading Ritz values stop moving relative to the largest one.
///
/// # Errors
///
/// Returns a numerical error if neither criterion is met after `max_iterations`.
pub fn subspace_iteration(
    matrix: &DMatrix<f64>,
    k: usize,
    config: &EigenSolverConfig,
) -> Result<EigenPairs> {
    let n = matrix.nrows();
    let block = (2 * k).min(n);

    let mut rng = ChaCha8Rng::seed_from_u64(config.seed);
    let start: DMatrix<f64> = DMatrix::from_fn(n, block, |_, _| StandardNormal.sample(&mut rng));
    let mut q = start.qr().q();

    let scale = matrix.diagonal().iter().map(|v| v.abs()).fold(0.0, f64::max);
    if scale == 0.0 {
        return Ok(EigenPairs {
            values: vec![0.0; k],
            vectors: q.columns(0, k).into_owned(),
        });
    }
    // A small positive shift keeps the iterated block full rank for
    // rank-deficient matrices without changing the eigenvectors or their order.
    let shift = scale * 1e-8;
    let tolerance = config.tolerance * scale.max(1.0);

    let mut worst_residual = f64::INFINITY;
    let mut previous: Option<Vec<f64>> = None;
    for iteration in 0..config.max_iterations {
        let z = matrix * &q + &q * shift;
        q = z.qr().q();

        let projected = q.transpose() * matrix * &q;
        let small = dense_symmetric_eigen(&projected);
        let ritz_vectors = &q * &small.vectors;

        worst_residual = (0..k)
            .map(|i| {
                let v = ritz_vectors.column(i);
                (matrix * v - v * small.values[i]).norm()
            })
            .fold(0.0, f64::max);

        let values = &small.values[..k];
        let value_change = previous.as_ref().map_or(f64::INFINITY, |prev| {
            prev.iter()
                .zip(values)
                .map(|(a, b)| (a - b).abs())
                .fold(0.0, f64::max)
                / values[0].abs().max(f64::MIN_POSITIVE)
        });

        if worst_residual <= tolerance || value_change <= config.tolerance {
            tracing::debug!(
                iteration,
                residual = worst_residual,
                value_change,
                "subspace iteration converged"
            );
            return Ok(EigenPairs {
                values: small.values[..k].to_vec(),
                vectors: ritz_vectors.columns(0, k).into_owned(),
            });
        }
        previous = Some(values.to_vec());
        q = ritz_vectors;
    }

    Err(DirectionError::numerical(format!(
        "subspace iteration did not converge after {} iterations (residual {worst_residual:e})",
        config.max_iterations
    )))
}

/// Indices that sort `values` in descending order.
#[must_use]
pub fn descending_order(values: &[f64]) -> Vec<usize> {
    let mut order: Vec<usize> = (0..values.len()).collect();
    order.sort_by(|&a, &b| values[b].total_cmp(&values[a]));
    order
}

fn select_columns(matrix: &DMatrix<f64>, order: &[usize]) -> DMatrix<f64> {
    DMatrix::from_fn(matrix.nrows(), order.len(), |r, c| matrix[(r, order[c])])
}

/// A unit vector orthogonal to the unit vector `first`.
///
/// Used when a rank-deficient trajectory leaves the second direction undefined.
#[must_use]
pub fn orthonormal_complement(first: &DVector<f64>) -> DVector<f64> {
    let pivot = first
        .iter()
        .enumerate()
        .min_by(|a, b| a.1.abs().total_cmp(&b.1.abs()))
        .map_or(0, |(i, _)| i);

    let mut candidate: DVector<f64> = DVector::zeros(first.len());
    candidate[pivot] = 1.0;
    let overlap = candidate.dot(first);
    candidate -= first * overlap;
    let norm = candidate.norm();
    if norm > 0.0 {
        candidate /= norm;
    }
    candidate
}

/// Copy a 2-D tensor into an `f64` host matrix.
///
/// # Errors
///
/// Fails if the tensor is not 2-D.
pub fn tensor_to_dmatrix(t: &Tensor) -> Result<DMatrix<f64>> {
    let (rows, cols) = t.dims2()?;
    let data: Vec<f64> = t
        .to_dtype(DType::F64)?
        .flatten_all()?
        .to_vec1()?;
    Ok(DMatrix::from_row_slice(rows, cols, &data))
}

/// Copy a host matrix into a tensor on `device` with `dtype`.
///
/// # Errors
///
/// Propagates tensor creation failures.
pub fn dmatrix_to_tensor(m: &DMatrix<f64>, device: &Device, dtype: DType) -> Result<Tensor> {
    let row_major: Vec<f64> = m.transpose().iter().copied().collect();
    Ok(Tensor::from_vec(row_major, (m.nrows(), m.ncols()), device)?.to_dtype(dtype)?)
}

/// Orthonormal basis of the column space of a tall 2-D tensor (thin QR).
fn orthonormalize(t: &Tensor) -> Result<Tensor> {
    let q = tensor_to_dmatrix(t)?.qr().q();
    dmatrix_to_tensor(&q, t.device(), t.dtype())
}

/// Result of a truncated SVD: leading singular values and right singular vectors.
#[derive(Debug, Clone)]
pub struct TruncatedSvd {
    /// Singular values, largest first.
    pub singular_values: Vec<f64>,
    /// Right singular vectors as columns (features × rank).
    pub right_vectors: DMatrix<f64>,
}

/// Randomized rank-`rank` SVD of an N×F matrix (Halko, Martinsson, Tropp).
///
/// A Gaussian sketch with `rank + oversampling` columns (capped at `min(N, F)`)
/// captures the range of `a`; `power_iterations` re-orthonormalized power steps
/// sharpen it before the small projected matrix is decomposed exactly.
///
/// # Errors
///
/// Returns [`DirectionError::InsufficientSamples`] if `min(N, F) < rank`.
pub fn randomized_svd(
    a: &Tensor,
    rank: usize,
    oversampling: usize,
    power_iterations: usize,
    seed: u64,
) -> Result<TruncatedSvd> {
    let (rows, cols) = a.dims2()?;
    let sketch = (rank + oversampling).min(rows).min(cols);
    if sketch < rank {
        return Err(DirectionError::InsufficientSamples {
            required: rank,
            actual: rows.min(cols),
        });
    }

    let mut rng = ChaCha8Rng::seed_from_u64(seed);
    let omega: Vec<f64> = (0..cols * sketch)
        .map(|_| StandardNormal.sample(&mut rng))
        .collect();
    let omega = Tensor::from_vec(omega, (cols, sketch), a.device())?.to_dtype(a.dtype())?;

    let a_t = a.t()?.contiguous()?;
    let mut q = orthonormalize(&a.matmul(&omega)?)?;
    for _ in 0..power_iterations {
        let z = orthonormalize(&a_t.matmul(&q)?)?;
        q = orthonormalize(&a.matmul(&z)?)?;
    }

    // B = Qᵀ A is sketch × F; the left singular vectors of Bᵀ are the right
    // singular vectors of A.
    let b_t = a_t.matmul(&q)?;
    let svd = tensor_to_dmatrix(&b_t)?.svd(true, false);
    let u = svd
        .u
        .ok_or_else(|| DirectionError::numerical("SVD did not produce singular vectors"))?;
    let values: Vec<f64> = svd.singular_values.iter().copied().collect();
    let order: Vec<usize> = descending_order(&values).into_iter().take(rank).collect();

    Ok(TruncatedSvd {
        singular_values: order.iter().map(|&i| values[i]).collect(),
        right_vectors: select_columns(&u, &order),
    })
}
