//! # landscape-directions
//!
//! Direction builders for loss-landscape visualization.
//!
//! A loss landscape is drawn by evaluating the loss on a 2-D slice of parameter
//! space through the trained weights. This crate computes the two directions
//! spanning that slice, or a learned nonlinear coordinate system:
//!
//! - [`RandomDirections`]: Gaussian directions, filter-normalized per output unit
//! - [`PcaDirections`]: leading principal components of the training trajectory
//! - [`SvdDirections`]: leading right singular vectors via randomized SVD
//! - [`LearnableDirections`]: linear-chain autoencoder trained on the trajectory
//! - [`LearnableNonlinearDirections`]: nonlinear [`Subspace`] autoencoder
//!
//! ## Quick Start
//!
//! ```
//! use candle_core::{Device, Tensor};
//! use landscape_directions::{Directions, ParameterSet, PcaDirections, Result, Trajectory};
//!
//! let device = Device::Cpu;
//! let snapshot = |scale: f64| -> Result<ParameterSet> {
//!     ParameterSet::new(vec![
//!         (Tensor::new(&[1.0f32, 2.0, -1.0, 0.5], &device)? * scale)?,
//!     ])
//! };
//! let optimized = snapshot(1.0)?;
//! let trajectory = Trajectory::new(vec![snapshot(0.0)?, snapshot(0.4)?, snapshot(0.9)?])?;
//!
//! let (b1, b2) = PcaDirections::with_defaults(optimized, trajectory)?.calculate_directions()?;
//! assert_eq!(b1.shapes(), b2.shapes());
//! # Ok::<(), landscape_directions::DirectionError>(())
//! ```
//!
//! ## Modules
//!
//! - [`config`]: Configuration types
//! - [`directions`]: The five builders and the [`Directions`] trait
//! - [`error`]: Error types and result alias
//! - [`linalg`]: Eigen solvers and randomized SVD
//! - [`normalize`]: Filter normalization
//! - [`params`]: Flattening parameter sets
//! - [`subspace`]: Linear and nonlinear coordinate systems
//! - [`training`]: Early stopping, Adam and the reconstruction trainer
//! - [`trajectory`]: Training snapshots

#![deny(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod config;
pub mod directions;
pub mod error;
pub mod linalg;
pub mod normalize;
pub mod params;
pub mod subspace;
pub mod training;
pub mod trajectory;

pub use config::{EigenSolverConfig, LearnableConfig, SvdConfig};
pub use directions::{
    DirectionPair, Directions, LearnableDirections, LearnableNonlinearDirections, LearnedChain,
    ParameterSource, PcaDirections, PcaReport, RandomDirections, SvdDirections, SvdReport,
};
pub use error::{DirectionError, Result};
pub use normalize::{normalize_direction, normalize_direction_using_params};
pub use params::{clone_parameters, parameters_to_vector, vector_to_parameters, ParameterSet};
pub use subspace::{Activation, LinearSubspace, NonlinearSubspace, Subspace};
pub use training::TrainingReport;
pub use trajectory::{Trajectory, TrajectoryPoint};
