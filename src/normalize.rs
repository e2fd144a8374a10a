//! Filter normalization.
//!
//! A raw Gaussian direction is rescaled so that every filter (output unit) has
//! the same norm as the corresponding filter of the trained weights. Biases and
//! other 1-D parameters are rescaled as a whole.

use candle_core::{DType, Tensor};

use crate::error::{DirectionError, Result};
use crate::params::ParameterSet;

/// Added to the direction norm before dividing.
pub const NORM_EPSILON: f64 = 1e-10;

/// Rescale `direction` so its per-filter norm matches `parameters`.
///
/// For tensors with more than one dimension the norm is taken over every
/// dimension except the first; 1-D tensors use a single scalar norm.
///
/// # Errors
///
/// Returns [`DirectionError::ShapeMismatch`] if the shapes differ.
pub fn normalize_direction(direction: &Tensor, parameters: &Tensor) -> Result<Tensor> {
    if direction.dims() != parameters.dims() {
        return Err(DirectionError::ShapeMismatch {
            expected: parameters.dims().to_vec(),
            actual: direction.dims().to_vec(),
        });
    }

    let dtype = direction.dtype();
    let direction_f = direction.to_dtype(DType::F64)?;
    let parameters_f = parameters
        .to_device(direction.device())?
        .to_dtype(DType::F64)?;

    let norm_dims: Vec<usize> = if parameters.rank() > 1 {
        (1..parameters.rank()).collect()
    } else {
        (0..parameters.rank()).collect()
    };

    let direction_norm = norm_keepdim(&direction_f, &norm_dims)?;
    let parameters_norm = norm_keepdim(&parameters_f, &norm_dims)?;

    let scale = parameters_norm.broadcast_div(&(direction_norm + NORM_EPSILON)?)?;
    Ok(direction_f.broadcast_mul(&scale)?.to_dtype(dtype)?)
}

fn norm_keepdim(t: &Tensor, dims: &[usize]) -> Result<Tensor> {
    if dims.is_empty() {
        // 0-d tensor: its norm is its absolute value
        return Ok(t.abs()?);
    }
    Ok(t.sqr()?.sum_keepdim(dims)?.sqrt()?)
}

/// Filter-normalize every tensor of `direction` against `parameters`.
///
/// # Errors
///
/// Returns [`DirectionError::LengthMismatch`] before touching any tensor if the
/// two sets have different lengths.
pub fn normalize_direction_using_params(
    direction: &mut ParameterSet,
    parameters: &ParameterSet,
) -> Result<()> {
    if direction.len() != parameters.len() {
        return Err(DirectionError::LengthMismatch {
            expected: parameters.len(),
            actual: direction.len(),
        });
    }

    for index in 0..direction.len() {
        let normalized = normalize_direction(
            &direction.tensors()[index],
            &parameters.tensors()[index],
        )?;
        direction.replace(index, normalized);
    }
    Ok(())
}
