//! Low-dimensional coordinate systems embedded in parameter space.
//!
//! A [`Subspace`] maps full parameter vectors to a handful of coordinates and
//! back. [`LinearSubspace`] is a single projection matrix; [`NonlinearSubspace`]
//! chains several of them with an activation on the hidden representations, which
//! is what the nonlinear learnable builder trains.

use candle_core::{Device, Tensor, Var};
use serde::{Deserialize, Serialize};

use crate::error::{DirectionError, Result};
use crate::params::ParameterSet;

/// Width of the innermost coordinate space.
pub const BOTTLENECK_DIM: usize = 2;

/// Element-wise nonlinearity applied between subspace layers.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub enum Activation {
    /// No-op.
    Identity,
    /// `max(x, 0)`.
    #[default]
    Relu,
    /// `max(x, 0) + slope * min(x, 0)`.
    LeakyRelu(f64),
    /// Hyperbolic tangent.
    Tanh,
    /// Logistic sigmoid.
    Sigmoid,
    /// Gaussian error linear unit (tanh approximation).
    Gelu,
}

impl Activation {
    /// Apply the activation to every element.
    ///
    /// # Errors
    ///
    /// Propagates tensor failures.
    pub fn apply(&self, x: &Tensor) -> Result<Tensor> {
        let y = match self {
            Self::Identity => x.clone(),
            Self::Relu => x.relu()?,
            Self::LeakyRelu(slope) => (x.relu()? - (x.neg()?.relu()? * *slope)?)?,
            Self::Tanh => x.tanh()?,
            Self::Sigmoid => (x.neg()?.exp()? + 1.0)?.recip()?,
            Self::Gelu => x.gelu()?,
        };
        Ok(y)
    }
}

/// Shared interface of linear and nonlinear subspaces.
///
/// Points are rows: `project` takes N×F (or a single F vector) and returns N×D
/// coordinates; `reconstruct` is the inverse mapping.
pub trait Subspace {
    /// Dimension of the full space.
    fn input_dim(&self) -> usize;

    /// Dimension of the coordinate space.
    fn output_dim(&self) -> usize;

    /// Device holding the subspace weights.
    fn device(&self) -> &Device;

    /// Map points to coordinates.
    ///
    /// # Errors
    ///
    /// Fails on a dimension mismatch.
    fn project(&self, points: &Tensor) -> Result<Tensor>;

    /// Map coordinates back to points in the full space.
    ///
    /// # Errors
    ///
    /// Fails on a dimension mismatch.
    fn reconstruct(&self, coordinates: &Tensor) -> Result<Tensor>;

    /// Project then reconstruct.
    ///
    /// # Errors
    ///
    /// See [`Subspace::project`] and [`Subspace::reconstruct`].
    fn reconstruct_points(&self, points: &Tensor) -> Result<Tensor> {
        self.reconstruct(&self.project(points)?)
    }

    /// Coordinates of one parameter set (1-D tensor of length `output_dim`).
    ///
    /// # Errors
    ///
    /// Fails if the flattened parameters do not have `input_dim` elements.
    fn project_parameters(&self, parameters: &ParameterSet) -> Result<Tensor> {
        let flat = parameters.flatten()?;
        Ok(self.project(&flat)?.squeeze(0)?)
    }

    /// Parameter set at the given coordinates, shaped like `template`.
    ///
    /// # Errors
    ///
    /// Fails if the reconstruction does not match the template's size.
    fn reconstruct_parameters(
        &self,
        coordinates: &Tensor,
        template: &ParameterSet,
    ) -> Result<ParameterSet> {
        let point = self.reconstruct(coordinates)?.squeeze(0)?;
        ParameterSet::from_vector(&point, template)
    }
}

/// View a 1-D tensor as a single row; pass 2-D tensors through.
pub(crate) fn as_rows(t: &Tensor) -> Result<Tensor> {
    match t.rank() {
        1 => Ok(t.unsqueeze(0)?),
        2 => Ok(t.clone()),
        _ => Err(DirectionError::ShapeMismatch {
            expected: vec![0, 0],
            actual: t.dims().to_vec(),
        }),
    }
}

fn check_width(t: &Tensor, expected: usize) -> Result<()> {
    let (_, width) = t.dims2()?;
    if width != expected {
        return Err(DirectionError::DimensionMismatch {
            expected,
            actual: width,
        });
    }
    Ok(())
}

/// One projection matrix `W` (in × out) with an optional origin.
///
/// `project(x) = (x − origin)·W` and `reconstruct(y) = y·Wᵀ + origin`.
#[derive(Debug, Clone)]
pub struct LinearSubspace {
    weight: Var,
    origin: Option<Tensor>,
}

impl LinearSubspace {
    /// Create a subspace from a weight matrix and optional origin.
    ///
    /// The origin is cast to the weight's dtype and device.
    ///
    /// # Errors
    ///
    /// Fails if `weight` is not 2-D or the origin length differs from its rows.
    pub fn new(weight: &Tensor, origin: Option<&Tensor>) -> Result<Self> {
        Self::from_var(Var::from_tensor(weight)?, origin)
    }

    /// Create a subspace around an existing variable so it can be trained.
    ///
    /// # Errors
    ///
    /// See [`LinearSubspace::new`].
    pub fn from_var(weight: Var, origin: Option<&Tensor>) -> Result<Self> {
        let (in_dim, _) = weight.dims2()?;
        let origin = match origin {
            Some(o) => {
                let o = o
                    .flatten_all()?
                    .to_device(weight.device())?
                    .to_dtype(weight.dtype())?;
                if o.elem_count() != in_dim {
                    return Err(DirectionError::DimensionMismatch {
                        expected: in_dim,
                        actual: o.elem_count(),
                    });
                }
                Some(o)
            }
            None => None,
        };
        Ok(Self { weight, origin })
    }

    /// The projection matrix.
    #[must_use]
    pub fn weight(&self) -> &Tensor {
        self.weight.as_tensor()
    }

    /// The trainable variable behind the projection matrix.
    #[must_use]
    pub fn var(&self) -> &Var {
        &self.weight
    }

    /// The origin, if any.
    #[must_use]
    pub fn origin(&self) -> Option<&Tensor> {
        self.origin.as_ref()
    }

    fn prepare(&self, t: &Tensor) -> Result<Tensor> {
        Ok(as_rows(t)?
            .to_device(self.weight.device())?
            .to_dtype(self.weight.dtype())?)
    }
}

impl Subspace for LinearSubspace {
    fn input_dim(&self) -> usize {
        self.weight.dims()[0]
    }

    fn output_dim(&self) -> usize {
        self.weight.dims()[1]
    }

    fn device(&self) -> &Device {
        self.weight.device()
    }

    fn project(&self, points: &Tensor) -> Result<Tensor> {
        let x = self.prepare(points)?;
        check_width(&x, self.input_dim())?;
        let x = match &self.origin {
            Some(origin) => x.broadcast_sub(origin)?,
            None => x,
        };
        Ok(x.matmul(self.weight.as_tensor())?)
    }

    fn reconstruct(&self, coordinates: &Tensor) -> Result<Tensor> {
        let y = self.prepare(coordinates)?;
        check_width(&y, self.output_dim())?;
        let x = y.matmul(&self.weight.as_tensor().t()?)?;
        match &self.origin {
            Some(origin) => Ok(x.broadcast_add(origin)?),
            None => Ok(x),
        }
    }
}

/// Chain of linear subspaces with an activation on the hidden representations.
///
/// Projection runs the layers front to back and applies the activation after
/// every layer except the bottleneck. Reconstruction runs them back to front and
/// applies the activation after every layer except the one nearest parameter
/// space, so the two directions are symmetric.
#[derive(Debug, Clone)]
pub struct NonlinearSubspace {
    layers: Vec<LinearSubspace>,
    activation: Activation,
}

impl NonlinearSubspace {
    /// Build a chain, validating that its dimensions telescope down to the
    /// bottleneck and that only the first layer carries an origin.
    ///
    /// # Errors
    ///
    /// Returns [`DirectionError::InvalidConfig`] for an empty chain, a misplaced
    /// origin, or a last layer that does not output [`BOTTLENECK_DIM`]; a
    /// [`DirectionError::DimensionMismatch`] if consecutive layers disagree.
    pub fn new(layers: Vec<LinearSubspace>, activation: Activation) -> Result<Self> {
        let last = layers
            .last()
            .ok_or_else(|| DirectionError::invalid_config("subspace chain must not be empty"))?;
        if last.output_dim() != BOTTLENECK_DIM {
            return Err(DirectionError::invalid_config(format!(
                "last layer must output {BOTTLENECK_DIM} coordinates, got {}",
                last.output_dim()
            )));
        }
        for pair in layers.windows(2) {
            if pair[0].output_dim() != pair[1].input_dim() {
                return Err(DirectionError::DimensionMismatch {
                    expected: pair[0].output_dim(),
                    actual: pair[1].input_dim(),
                });
            }
        }
        if layers.iter().skip(1).any(|l| l.origin().is_some()) {
            return Err(DirectionError::invalid_config(
                "only the layer nearest parameter space may hold an origin",
            ));
        }
        Ok(Self { layers, activation })
    }

    /// The layers, outermost first.
    #[must_use]
    pub fn layers(&self) -> &[LinearSubspace] {
        &self.layers
    }

    /// The activation between layers.
    #[must_use]
    pub const fn activation(&self) -> Activation {
        self.activation
    }

    /// Trainable variables of every layer, outermost first.
    #[must_use]
    pub fn vars(&self) -> Vec<Var> {
        self.layers.iter().map(|l| l.var().clone()).collect()
    }
}

impl Subspace for NonlinearSubspace {
    fn input_dim(&self) -> usize {
        self.layers[0].input_dim()
    }

    fn output_dim(&self) -> usize {
        BOTTLENECK_DIM
    }

    fn device(&self) -> &Device {
        self.layers[0].device()
    }

    fn project(&self, points: &Tensor) -> Result<Tensor> {
        let mut x = self.layers[0].project(points)?;
        for layer in &self.layers[1..] {
            x = layer.project(&self.activation.apply(&x)?)?;
        }
        Ok(x)
    }

    fn reconstruct(&self, coordinates: &Tensor) -> Result<Tensor> {
        let mut y = as_rows(coordinates)?;
        for layer in self.layers[1..].iter().rev() {
            y = self.activation.apply(&layer.reconstruct(&y)?)?;
        }
        self.layers[0].reconstruct(&y)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use candle_core::DType;

    fn t2(rows: &[&[f32]], device: &Device) -> Tensor {
        let cols = rows[0].len();
        let data: Vec<f32> = rows.iter().flat_map(|r| r.iter().copied()).collect();
        Tensor::from_vec(data, (rows.len(), cols), device).unwrap()
    }

    #[test]
    fn test_linear_project_and_reconstruct() {
        let device = Device::Cpu;
        // Orthonormal basis of the x/y plane in R^3.
        let w = t2(&[&[1.0, 0.0], &[0.0, 1.0], &[0.0, 0.0]], &device);
        let origin = Tensor::new(&[1.0f32, 1.0, 1.0], &device).unwrap();
        let space = LinearSubspace::new(&w, Some(&origin)).unwrap();

        let point = Tensor::new(&[3.0f32, -2.0, 1.0], &device).unwrap();
        // Coordinates are measured from the origin, not from zero.
        let coords: Vec<Vec<f32>> = space.project(&point).unwrap().to_vec2().unwrap();
        assert_eq!(coords, vec![vec![2.0, -3.0]]);

        let back: Vec<Vec<f32>> = space
            .reconstruct_points(&point)
            .unwrap()
            .to_vec2()
            .unwrap();
        assert_eq!(back, vec![vec![3.0, -2.0, 1.0]]);
    }

    #[test]
    fn test_linear_origin_length_checked() {
        let device = Device::Cpu;
        let w = Tensor::zeros((3, 2), DType::F32, &device).unwrap();
        let origin = Tensor::zeros(4, DType::F32, &device).unwrap();
        assert!(matches!(
            LinearSubspace::new(&w, Some(&origin)),
            Err(DirectionError::DimensionMismatch { .. })
        ));
    }

    #[test]
    fn test_linear_rejects_wrong_width() {
        let device = Device::Cpu;
        let w = Tensor::zeros((3, 2), DType::F32, &device).unwrap();
        let space = LinearSubspace::new(&w, None).unwrap();
        let points = Tensor::zeros((5, 4), DType::F32, &device).unwrap();
        assert!(space.project(&points).is_err());
    }

    #[test]
    fn test_nonlinear_dimensions_telescope() {
        let device = Device::Cpu;
        let layers = vec![
            LinearSubspace::new(&Tensor::zeros((10, 4), DType::F32, &device).unwrap(), None)
                .unwrap(),
            LinearSubspace::new(&Tensor::zeros((3, 2), DType::F32, &device).unwrap(), None)
                .unwrap(),
        ];
        assert!(matches!(
            NonlinearSubspace::new(layers, Activation::Relu),
            Err(DirectionError::DimensionMismatch {
                expected: 4,
                actual: 3
            })
        ));
    }

    #[test]
    fn test_nonlinear_requires_two_dim_bottleneck() {
        let device = Device::Cpu;
        let layers = vec![LinearSubspace::new(
            &Tensor::zeros((10, 3), DType::F32, &device).unwrap(),
            None,
        )
        .unwrap()];
        assert!(matches!(
            NonlinearSubspace::new(layers, Activation::Relu),
            Err(DirectionError::InvalidConfig(_))
        ));
        assert!(NonlinearSubspace::new(Vec::new(), Activation::Relu).is_err());
    }

    #[test]
    fn test_nonlinear_rejects_inner_origin() {
        let device = Device::Cpu;
        let origin = Tensor::zeros(4, DType::F32, &device).unwrap();
        let layers = vec![
            LinearSubspace::new(&Tensor::zeros((10, 4), DType::F32, &device).unwrap(), None)
                .unwrap(),
            LinearSubspace::new(
                &Tensor::zeros((4, 2), DType::F32, &device).unwrap(),
                Some(&origin),
            )
            .unwrap(),
        ];
        assert!(NonlinearSubspace::new(layers, Activation::Tanh).is_err());
    }

    #[test]
    fn test_nonlinear_shapes_and_identity_chain() {
        let device = Device::Cpu;
        let w0 = t2(
            &[&[1.0, 0.0, 0.0], &[0.0, 1.0, 0.0], &[0.0, 0.0, 1.0], &[0.0, 0.0, 0.0]],
            &device,
        );
        let w1 = t2(&[&[1.0, 0.0], &[0.0, 1.0], &[0.0, 0.0]], &device);
        let origin = Tensor::new(&[0.5f32, 0.5, 0.5, 0.5], &device).unwrap();
        let space = NonlinearSubspace::new(
            vec![
                LinearSubspace::new(&w0, Some(&origin)).unwrap(),
                LinearSubspace::new(&w1, None).unwrap(),
            ],
            Activation::Identity,
        )
        .unwrap();

        assert_eq!(space.input_dim(), 4);
        assert_eq!(space.output_dim(), 2);

        let points = t2(&[&[1.5, 2.5, 9.0, 0.5], &[0.5, 0.5, 0.5, 0.5]], &device);
        let coords: Vec<Vec<f32>> = space.project(&points).unwrap().to_vec2().unwrap();
        assert_eq!(coords, vec![vec![1.0, 2.0], vec![0.0, 0.0]]);

        let back: Vec<Vec<f32>> = space.reconstruct(&space.project(&points).unwrap())
            .unwrap()
            .to_vec2()
            .unwrap();
        assert_eq!(back[0], vec![1.5, 2.5, 0.5, 0.5]);
    }

    #[test]
    fn test_activation_applied_between_layers_only() {
        let device = Device::Cpu;
        // Layer 0 maps x -> -x; layer 1 is identity on 2 dims.
        let w0 = t2(&[&[-1.0, 0.0], &[0.0, -1.0]], &device);
        let w1 = t2(&[&[1.0, 0.0], &[0.0, 1.0]], &device);
        let space = NonlinearSubspace::new(
            vec![
                LinearSubspace::new(&w0, None).unwrap(),
                LinearSubspace::new(&w1, None).unwrap(),
            ],
            Activation::Relu,
        )
        .unwrap();

        // Hidden = [-1, 2] -> relu -> [0, 2]; bottleneck output not activated.
        let coords: Vec<Vec<f32>> = space
            .project(&Tensor::new(&[1.0f32, -2.0], &device).unwrap())
            .unwrap()
            .to_vec2()
            .unwrap();
        assert_eq!(coords, vec![vec![0.0, 2.0]]);

        // Reconstruct: [-3, 4] -> w1ᵀ -> relu -> [0, 4] -> w0ᵀ -> [0, -4].
        let back: Vec<Vec<f32>> = space
            .reconstruct(&Tensor::new(&[-3.0f32, 4.0], &device).unwrap())
            .unwrap()
            .to_vec2()
            .unwrap();
        assert_eq!(back, vec![vec![0.0, -4.0]]);
    }

    #[test]
    fn test_activations() {
        let device = Device::Cpu;
        let x = Tensor::new(&[-2.0f32, 0.0, 2.0], &device).unwrap();

        let leaky: Vec<f32> = Activation::LeakyRelu(0.1).apply(&x).unwrap().to_vec1().unwrap();
        assert!((leaky[0] + 0.2).abs() < 1e-6);
        assert_eq!(leaky[2], 2.0);

        let sigmoid: Vec<f32> = Activation::Sigmoid.apply(&x).unwrap().to_vec1().unwrap();
        assert!((sigmoid[1] - 0.5).abs() < 1e-6);
        assert!((sigmoid[0] + sigmoid[2] - 1.0).abs() < 1e-6);

        let ident: Vec<f32> = Activation::Identity.apply(&x).unwrap().to_vec1().unwrap();
        assert_eq!(ident, vec![-2.0, 0.0, 2.0]);
    }

    #[test]
    fn test_parameter_helpers() {
        let device = Device::Cpu;
        let w = t2(&[&[1.0, 0.0], &[0.0, 1.0], &[0.0, 0.0]], &device);
        let space = LinearSubspace::new(&w, None).unwrap();
        let template = ParameterSet::new(vec![
            Tensor::new(&[1.0f32, 2.0], &device).unwrap(),
            Tensor::new(&[3.0f32], &device).unwrap(),
        ])
        .unwrap();

        let coords: Vec<f32> = space.project_parameters(&template).unwrap().to_vec1().unwrap();
        assert_eq!(coords, vec![1.0, 2.0]);

        let rebuilt = space
            .reconstruct_parameters(&Tensor::new(&[1.0f32, 2.0], &device).unwrap(), &template)
            .unwrap();
        assert_eq!(rebuilt.shapes(), vec![vec![2], vec![1]]);
        let bias: Vec<f32> = rebuilt.tensors()[1].to_vec1().unwrap();
        assert_eq!(bias, vec![0.0]);
    }
}
