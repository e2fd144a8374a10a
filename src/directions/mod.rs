//! Direction builders.
//!
//! Every builder is constructed from the optimized parameters (and, except for
//! [`RandomDirections`], a training [`Trajectory`](crate::Trajectory)) and
//! implements [`Directions`]. The random, PCA and SVD builders return a pair of
//! parameter-shaped directions; the learnable builders return a trained
//! [`Subspace`](crate::Subspace).

mod learnable;
mod nonlinear;
mod pca;
mod random;
mod svd;

pub use learnable::{LearnableDirections, LearnedChain};
pub use nonlinear::LearnableNonlinearDirections;
pub use pca::{calculate_covariance_matrix, CovarianceForm, PcaDirections, PcaReport};
pub use random::{create_random_direction, RandomDirections};
pub use svd::{SvdDirections, SvdReport};

use candle_core::Var;
use candle_nn::VarMap;

use crate::error::{DirectionError, Result};
use crate::params::ParameterSet;

/// Pair of directions spanning a 2-D slice of parameter space.
pub type DirectionPair = (ParameterSet, ParameterSet);

/// Common interface of all direction builders.
pub trait Directions {
    /// What the builder produces.
    type Output;

    /// Run the builder.
    ///
    /// # Errors
    ///
    /// Builder-specific; see each implementation.
    fn calculate_directions(&self) -> Result<Self::Output>;
}

/// Anything that can hand out its parameters as an ordered [`ParameterSet`].
pub trait ParameterSource {
    /// Current parameters.
    ///
    /// # Errors
    ///
    /// Fails if the source holds no parameters or cannot be read.
    fn parameter_set(&self) -> Result<ParameterSet>;
}

impl ParameterSource for ParameterSet {
    fn parameter_set(&self) -> Result<ParameterSet> {
        Ok(self.clone())
    }
}

/// Variables in name order, so the flat layout is stable across runs.
impl ParameterSource for VarMap {
    fn parameter_set(&self) -> Result<ParameterSet> {
        let data = self.data().lock().map_err(|_| DirectionError::LockPoisoned)?;
        let mut named: Vec<(&String, &Var)> = data.iter().collect();
        named.sort_by(|a, b| a.0.cmp(b.0));
        ParameterSet::new(named.into_iter().map(|(_, v)| v.as_tensor().clone()).collect())
    }
}

impl ParameterSource for [Var] {
    fn parameter_set(&self) -> Result<ParameterSet> {
        ParameterSet::new(self.iter().map(|v| v.as_tensor().clone()).collect())
    }
}
