//! Configuration types for the direction builders.
//!
//! - [`LearnableConfig`]: autoencoder shape and training schedule
//! - [`SvdConfig`]: randomized SVD sketch settings
//! - [`EigenSolverConfig`]: iterative eigen solver settings used by PCA

use serde::{Deserialize, Serialize};

use crate::error::{DirectionError, Result};
use crate::subspace::Activation;
use crate::training::{LossReduction, TrainerSettings};

/// Configuration for the learnable (autoencoder) direction builders.
///
/// # Example
///
/// ```
/// use landscape_directions::LearnableConfig;
///
/// let config = LearnableConfig::default()
///     .with_intermediate_basis_count(vec![16, 8])
///     .with_training_epochs(200)
///     .with_seed(7);
/// assert!(config.validate().is_ok());
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LearnableConfig {
    /// Number of weight matrices in the chain, including the bottleneck.
    pub number_of_layers: usize,

    /// Widths of the hidden layers, outermost first.
    pub intermediate_basis_count: Vec<usize>,

    /// Adam step size.
    pub learning_rate: f64,

    /// Maximum number of full-batch epochs.
    pub training_epochs: usize,

    /// Stop once this many epochs pass without a new best loss.
    pub early_stopping_epochs: usize,

    /// Nonlinearity between hidden layers.
    pub activation: Activation,

    /// L2 penalty added to every gradient.
    pub weight_decay: f64,

    /// Seed for weight initialization; `None` draws from OS entropy.
    pub seed: Option<u64>,
}

impl Default for LearnableConfig {
    fn default() -> Self {
        Self {
            number_of_layers: 3,
            intermediate_basis_count: vec![64, 32],
            learning_rate: 0.01,
            training_epochs: 1000,
            early_stopping_epochs: 250,
            activation: Activation::Relu,
            weight_decay: 0.02,
            seed: None,
        }
    }
}

impl LearnableConfig {
    /// Defaults for the nonlinear builder, which stops earlier.
    #[must_use]
    pub fn nonlinear_default() -> Self {
        Self {
            early_stopping_epochs: 100,
            ..Self::default()
        }
    }

    /// Set the hidden layer widths; the layer count follows from them.
    #[must_use]
    pub fn with_intermediate_basis_count(mut self, counts: Vec<usize>) -> Self {
        self.number_of_layers = counts.len() + 1;
        self.intermediate_basis_count = counts;
        self
    }

    /// Set the number of layers without touching the widths.
    #[must_use]
    pub const fn with_number_of_layers(mut self, layers: usize) -> Self {
        self.number_of_layers = layers;
        self
    }

    /// Set the learning rate.
    #[must_use]
    pub const fn with_learning_rate(mut self, learning_rate: f64) -> Self {
        self.learning_rate = learning_rate;
        self
    }

    /// Set the epoch budget.
    #[must_use]
    pub const fn with_training_epochs(mut self, epochs: usize) -> Self {
        self.training_epochs = epochs;
        self
    }

    /// Set the early stopping patience.
    #[must_use]
    pub const fn with_early_stopping_epochs(mut self, epochs: usize) -> Self {
        self.early_stopping_epochs = epochs;
        self
    }

    /// Set the activation.
    #[must_use]
    pub const fn with_activation(mut self, activation: Activation) -> Self {
        self.activation = activation;
        self
    }

    /// Set the weight decay.
    #[must_use]
    pub const fn with_weight_decay(mut self, weight_decay: f64) -> Self {
        self.weight_decay = weight_decay;
        self
    }

    /// Set the initialization seed.
    #[must_use]
    pub const fn with_seed(mut self, seed: u64) -> Self {
        self.seed = Some(seed);
        self
    }

    /// Training schedule with the given loss reduction.
    #[must_use]
    pub const fn trainer_settings(&self, reduction: LossReduction) -> TrainerSettings {
        TrainerSettings {
            learning_rate: self.learning_rate,
            weight_decay: self.weight_decay,
            training_epochs: self.training_epochs,
            early_stopping_epochs: self.early_stopping_epochs,
            reduction,
        }
    }

    /// Check the configuration before anything is allocated.
    ///
    /// # Errors
    ///
    /// Returns [`DirectionError::InvalidConfig`] describing the first problem found.
    pub fn validate(&self) -> Result<()> {
        if self.number_of_layers < 2 {
            return Err(DirectionError::invalid_config(format!(
                "number_of_layers must be at least 2, got {}",
                self.number_of_layers
            )));
        }
        if self.intermediate_basis_count.len() != self.number_of_layers - 1 {
            return Err(DirectionError::invalid_config(format!(
                "intermediate_basis_count must have {} entries, got {}",
                self.number_of_layers - 1,
                self.intermediate_basis_count.len()
            )));
        }
        if self.intermediate_basis_count.contains(&0) {
            return Err(DirectionError::invalid_config(
                "intermediate basis sizes must be positive",
            ));
        }
        if self.training_epochs == 0 {
            return Err(DirectionError::invalid_config(
                "training_epochs must be positive",
            ));
        }
        if !self.learning_rate.is_finite() || self.learning_rate < 0.0 {
            return Err(DirectionError::invalid_config(format!(
                "learning_rate must be finite and non-negative, got {}",
                self.learning_rate
            )));
        }
        if !self.weight_decay.is_finite() || self.weight_decay < 0.0 {
            return Err(DirectionError::invalid_config(format!(
                "weight_decay must be finite and non-negative, got {}",
                self.weight_decay
            )));
        }
        Ok(())
    }
}

/// Configuration for the randomized SVD builder.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SvdConfig {
    /// Extra sketch columns beyond the two requested components.
    pub oversampling: usize,

    /// Number of power iterations.
    pub power_iterations: usize,

    /// Seed for the Gaussian sketch.
    pub seed: u64,
}

impl Default for SvdConfig {
    fn default() -> Self {
        Self {
            oversampling: 4,
            power_iterations: 2,
            seed: 42,
        }
    }
}

impl SvdConfig {
    /// Set the oversampling.
    #[must_use]
    pub const fn with_oversampling(mut self, oversampling: usize) -> Self {
        self.oversampling = oversampling;
        self
    }

    /// Set the number of power iterations.
    #[must_use]
    pub const fn with_power_iterations(mut self, iterations: usize) -> Self {
        self.power_iterations = iterations;
        self
    }

    /// Set the sketch seed.
    #[must_use]
    pub const fn with_seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }
}

/// Settings for the iterative top-k eigen solver.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct EigenSolverConfig {
    /// Iteration cap.
    pub max_iterations: usize,

    /// Residual tolerance, relative to the largest diagonal entry.
    pub tolerance: f64,

    /// Seed for the starting block.
    pub seed: u64,
}

impl Default for EigenSolverConfig {
    fn default() -> Self {
        Self {
            max_iterations: 1000,
            tolerance: 1e-10,
            seed: 42,
        }
    }
}

impl EigenSolverConfig {
    /// Set the iteration cap.
    #[must_use]
    pub const fn with_max_iterations(mut self, max_iterations: usize) -> Self {
        self.max_iterations = max_iterations;
        self
    }

    /// Set the residual tolerance.
    #[must_use]
    pub const fn with_tolerance(mut self, tolerance: f64) -> Self {
        self.tolerance = tolerance;
        self
    }
}
