//! Parameter sets and their flat vector form.
//!
//! A [`ParameterSet`] is the ordered list of a model's parameter tensors. Every
//! direction algorithm works on the flat concatenation of those tensors and maps
//! its results back through the same shape template, so flatten and unflatten
//! must round-trip exactly.

use candle_core::{DType, Device, Tensor};

use crate::error::{DirectionError, Result};

/// Ordered list of parameter tensors, one per layer or parameter group.
#[derive(Debug, Clone)]
pub struct ParameterSet {
    tensors: Vec<Tensor>,
}

impl ParameterSet {
    /// Wrap a non-empty list of tensors.
    ///
    /// # Errors
    ///
    /// Returns [`DirectionError::MissingParameters`] if `tensors` is empty.
    pub fn new(tensors: Vec<Tensor>) -> Result<Self> {
        if tensors.is_empty() {
            return Err(DirectionError::MissingParameters);
        }
        Ok(Self { tensors })
    }

    /// The tensors in order.
    #[must_use]
    pub fn tensors(&self) -> &[Tensor] {
        &self.tensors
    }

    /// Consume the set and return its tensors.
    #[must_use]
    pub fn into_tensors(self) -> Vec<Tensor> {
        self.tensors
    }

    /// Number of tensors.
    #[must_use]
    pub fn len(&self) -> usize {
        self.tensors.len()
    }

    /// Always false for a constructed set; present for API symmetry.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.tensors.is_empty()
    }

    /// Iterate over the tensors.
    pub fn iter(&self) -> std::slice::Iter<'_, Tensor> {
        self.tensors.iter()
    }

    /// Shapes of all tensors, in order.
    #[must_use]
    pub fn shapes(&self) -> Vec<Vec<usize>> {
        self.tensors.iter().map(|t| t.dims().to_vec()).collect()
    }

    /// Total number of scalar parameters.
    #[must_use]
    pub fn elem_count(&self) -> usize {
        self.tensors.iter().map(Tensor::elem_count).sum()
    }

    /// Device of the first tensor.
    #[must_use]
    pub fn device(&self) -> &Device {
        self.tensors[0].device()
    }

    /// Data type of the first tensor.
    #[must_use]
    pub fn dtype(&self) -> DType {
        self.tensors[0].dtype()
    }

    /// Whether `other` has the same number of tensors with the same shapes.
    #[must_use]
    pub fn same_template(&self, other: &Self) -> bool {
        self.len() == other.len()
            && self
                .tensors
                .iter()
                .zip(&other.tensors)
                .all(|(a, b)| a.dims() == b.dims())
    }

    /// Check that `other` matches this set's shape template.
    ///
    /// # Errors
    ///
    /// Returns a length or shape mismatch describing the first difference.
    pub fn ensure_same_template(&self, other: &Self) -> Result<()> {
        if self.len() != other.len() {
            return Err(DirectionError::LengthMismatch {
                expected: self.len(),
                actual: other.len(),
            });
        }
        for (a, b) in self.tensors.iter().zip(&other.tensors) {
            if a.dims() != b.dims() {
                return Err(DirectionError::ShapeMismatch {
                    expected: a.dims().to_vec(),
                    actual: b.dims().to_vec(),
                });
            }
        }
        Ok(())
    }

    /// Concatenate all tensors into one 1-D vector.
    ///
    /// # Errors
    ///
    /// Fails if the tensors live on different devices or have different dtypes.
    pub fn flatten(&self) -> Result<Tensor> {
        let flat = self
            .tensors
            .iter()
            .map(Tensor::flatten_all)
            .collect::<candle_core::Result<Vec<_>>>()?;
        Ok(Tensor::cat(&flat, 0)?)
    }

    /// Split a flat vector back into tensors shaped like `template`.
    ///
    /// Each output tensor takes the dtype and device of its template tensor.
    ///
    /// # Errors
    ///
    /// Returns [`DirectionError::LengthMismatch`] if the vector length differs from
    /// the template's element count.
    pub fn from_vector(vector: &Tensor, template: &Self) -> Result<Self> {
        let vector = vector.flatten_all()?;
        let expected = template.elem_count();
        if vector.elem_count() != expected {
            return Err(DirectionError::LengthMismatch {
                expected,
                actual: vector.elem_count(),
            });
        }

        let mut offset = 0;
        let mut tensors = Vec::with_capacity(template.len());
        for t in &template.tensors {
            let count = t.elem_count();
            let chunk = vector
                .narrow(0, offset, count)?
                .reshape(t.shape().clone())?
                .to_dtype(t.dtype())?
                .to_device(t.device())?;
            tensors.push(chunk);
            offset += count;
        }
        Ok(Self { tensors })
    }

    /// Deep copy into fresh storage, detached from any autograd graph.
    ///
    /// # Errors
    ///
    /// Propagates tensor copy failures.
    pub fn deep_clone(&self) -> Result<Self> {
        let tensors = self
            .tensors
            .iter()
            .map(|t| t.copy().map(|c| c.detach()))
            .collect::<candle_core::Result<Vec<_>>>()?;
        Ok(Self { tensors })
    }

    pub(crate) fn replace(&mut self, index: usize, tensor: Tensor) {
        self.tensors[index] = tensor;
    }
}

impl<'a> IntoIterator for &'a ParameterSet {
    type Item = &'a Tensor;
    type IntoIter = std::slice::Iter<'a, Tensor>;

    fn into_iter(self) -> Self::IntoIter {
        self.tensors.iter()
    }
}

/// Flatten a parameter set into one vector.
///
/// # Errors
///
/// See [`ParameterSet::flatten`].
pub fn parameters_to_vector(parameters: &ParameterSet) -> Result<Tensor> {
    parameters.flatten()
}

/// Inverse of [`parameters_to_vector`].
///
/// # Errors
///
/// See [`ParameterSet::from_vector`].
pub fn vector_to_parameters(vector: &Tensor, template: &ParameterSet) -> Result<ParameterSet> {
    ParameterSet::from_vector(vector, template)
}

/// Deep copy a parameter set for use as an output buffer.
///
/// # Errors
///
/// See [`ParameterSet::deep_clone`].
pub fn clone_parameters(parameters: &ParameterSet) -> Result<ParameterSet> {
    parameters.deep_clone()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_set(device: &Device) -> ParameterSet {
        ParameterSet::new(vec![
            Tensor::randn(0.0f32, 1.0, (4, 3), device).unwrap(),
            Tensor::randn(0.0f32, 1.0, 4, device).unwrap(),
            Tensor::randn(0.0f32, 1.0, (2, 2, 2), device).unwrap(),
        ])
        .unwrap()
    }

    #[test]
    fn test_flatten_round_trip() {
        let device = Device::Cpu;
        let params = sample_set(&device);

        let flat = params.flatten().unwrap();
        assert_eq!(flat.dims(), &[12 + 4 + 8]);

        let restored = ParameterSet::from_vector(&flat, &params).unwrap();
        assert_eq!(restored.shapes(), params.shapes());
        for (a, b) in restored.iter().zip(params.iter()) {
            let a: Vec<f32> = a.flatten_all().unwrap().to_vec1().unwrap();
            let b: Vec<f32> = b.flatten_all().unwrap().to_vec1().unwrap();
            assert_eq!(a, b);
        }
    }

    #[test]
    fn test_flatten_preserves_order() {
        let device = Device::Cpu;
        let params = ParameterSet::new(vec![
            Tensor::new(&[[1.0f32, 2.0], [3.0, 4.0]], &device).unwrap(),
            Tensor::new(&[5.0f32, 6.0], &device).unwrap(),
        ])
        .unwrap();

        let flat: Vec<f32> = params.flatten().unwrap().to_vec1().unwrap();
        assert_eq!(flat, vec![1.0, 2.0, 3.0, 4.0, 5.0, 6.0]);
    }

    #[test]
    fn test_from_vector_length_mismatch() {
        let device = Device::Cpu;
        let params = sample_set(&device);
        let short = Tensor::zeros(5, DType::F32, &device).unwrap();

        let result = ParameterSet::from_vector(&short, &params);
        assert!(matches!(
            result,
            Err(DirectionError::LengthMismatch {
                expected: 24,
                actual: 5
            })
        ));
    }

    #[test]
    fn test_from_vector_takes_template_dtype() {
        let device = Device::Cpu;
        let params = sample_set(&device);
        let flat = params.flatten().unwrap().to_dtype(DType::F64).unwrap();

        let restored = ParameterSet::from_vector(&flat, &params).unwrap();
        assert!(restored.iter().all(|t| t.dtype() == DType::F32));
    }

    #[test]
    fn test_deep_clone_is_independent() {
        let device = Device::Cpu;
        let var = candle_core::Var::new(&[1.0f32, 2.0, 3.0], &device).unwrap();
        let params = ParameterSet::new(vec![var.as_tensor().clone()]).unwrap();

        let cloned = params.deep_clone().unwrap();
        var.set(&Tensor::new(&[7.0f32, 8.0, 9.0], &device).unwrap())
            .unwrap();

        let values: Vec<f32> = cloned.tensors()[0].to_vec1().unwrap();
        assert_eq!(values, vec![1.0, 2.0, 3.0]);
    }

    #[test]
    fn test_empty_set_rejected() {
        assert!(matches!(
            ParameterSet::new(Vec::new()),
            Err(DirectionError::MissingParameters)
        ));
    }

    #[test]
    fn test_template_mismatch() {
        let device = Device::Cpu;
        let a = sample_set(&device);
        let b = ParameterSet::new(vec![Tensor::zeros((4, 3), DType::F32, &device).unwrap()])
            .unwrap();

        assert!(!a.same_template(&b));
        assert!(matches!(
            a.ensure_same_template(&b),
            Err(DirectionError::LengthMismatch { .. })
        ));
    }
}
