//! Training trajectories.
//!
//! Callers may record snapshots with or without the loss observed at that point.
//! The loss is irrelevant for direction computation, so it is dropped here, once,
//! and every builder sees a plain list of parameter sets.

use candle_core::{DType, Device, Tensor};

use crate::error::{DirectionError, Result};
use crate::params::ParameterSet;

/// One recorded training snapshot.
#[derive(Debug, Clone)]
pub enum TrajectoryPoint {
    /// Parameters only.
    Parameters(ParameterSet),
    /// Parameters paired with the loss measured at that step.
    WithLoss(ParameterSet, f64),
}

impl TrajectoryPoint {
    /// The parameter snapshot, discarding any loss.
    #[must_use]
    pub fn into_parameters(self) -> ParameterSet {
        match self {
            Self::Parameters(p) | Self::WithLoss(p, _) => p,
        }
    }
}

impl From<ParameterSet> for TrajectoryPoint {
    fn from(parameters: ParameterSet) -> Self {
        Self::Parameters(parameters)
    }
}

impl From<(ParameterSet, f64)> for TrajectoryPoint {
    fn from((parameters, loss): (ParameterSet, f64)) -> Self {
        Self::WithLoss(parameters, loss)
    }
}

impl From<(ParameterSet, f32)> for TrajectoryPoint {
    fn from((parameters, loss): (ParameterSet, f32)) -> Self {
        Self::WithLoss(parameters, f64::from(loss))
    }
}

/// Non-empty ordered list of parameter snapshots sharing one shape template.
#[derive(Debug, Clone)]
pub struct Trajectory {
    snapshots: Vec<ParameterSet>,
}

impl Trajectory {
    /// Build a trajectory from snapshots, with or without losses.
    ///
    /// # Errors
    ///
    /// Returns [`DirectionError::EmptyTrajectory`] for an empty input, or a
    /// length/shape mismatch if the snapshots disagree on their template.
    pub fn new<I, P>(points: I) -> Result<Self>
    where
        I: IntoIterator<Item = P>,
        P: Into<TrajectoryPoint>,
    {
        let snapshots: Vec<ParameterSet> = points
            .into_iter()
            .map(|p| p.into().into_parameters())
            .collect();

        let first = snapshots.first().ok_or(DirectionError::EmptyTrajectory)?;
        for snapshot in &snapshots[1..] {
            first.ensure_same_template(snapshot)?;
        }

        Ok(Self { snapshots })
    }

    /// Number of snapshots.
    #[must_use]
    pub fn len(&self) -> usize {
        self.snapshots.len()
    }

    /// Always false; a trajectory cannot be constructed empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.snapshots.is_empty()
    }

    /// The snapshots in recording order.
    #[must_use]
    pub fn snapshots(&self) -> &[ParameterSet] {
        &self.snapshots
    }

    /// Check that the snapshots share the optimized parameters' template.
    ///
    /// # Errors
    ///
    /// Returns the mismatch reported by [`ParameterSet::ensure_same_template`].
    pub fn ensure_matches(&self, optimized: &ParameterSet) -> Result<()> {
        optimized.ensure_same_template(&self.snapshots[0])
    }

    /// Flatten every snapshot, optionally subtract `origin`, and move the vectors
    /// to `device` as `dtype`.
    ///
    /// # Errors
    ///
    /// Propagates tensor failures.
    pub fn flattened(
        &self,
        origin: Option<&Tensor>,
        device: &Device,
        dtype: DType,
    ) -> Result<Vec<Tensor>> {
        let origin = origin
            .map(|o| o.to_device(device)?.to_dtype(dtype))
            .transpose()?;

        self.snapshots
            .iter()
            .map(|snapshot| {
                let flat = snapshot.flatten()?.to_device(device)?.to_dtype(dtype)?;
                match &origin {
                    Some(o) => Ok(flat.sub(o)?),
                    None => Ok(flat),
                }
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn snapshot(values: &[f32], device: &Device) -> ParameterSet {
        ParameterSet::new(vec![Tensor::new(values, device).unwrap()]).unwrap()
    }

    #[test]
    fn test_empty_trajectory_rejected() {
        let result = Trajectory::new(Vec::<ParameterSet>::new());
        assert!(matches!(result, Err(DirectionError::EmptyTrajectory)));
    }

    #[test]
    fn test_losses_are_dropped() {
        let device = Device::Cpu;
        let points = vec![
            (snapshot(&[1.0, 2.0], &device), 0.5f64),
            (snapshot(&[3.0, 4.0], &device), 0.25f64),
        ];

        let trajectory = Trajectory::new(points).unwrap();
        assert_eq!(trajectory.len(), 2);
        let second: Vec<f32> = trajectory.snapshots()[1].tensors()[0].to_vec1().unwrap();
        assert_eq!(second, vec![3.0, 4.0]);
    }

    #[test]
    fn test_mixed_points() {
        let device = Device::Cpu;
        let points = vec![
            TrajectoryPoint::from(snapshot(&[1.0, 2.0], &device)),
            TrajectoryPoint::from((snapshot(&[3.0, 4.0], &device), 0.1f32)),
        ];
        assert_eq!(Trajectory::new(points).unwrap().len(), 2);
    }

    #[test]
    fn test_inconsistent_template_rejected() {
        let device = Device::Cpu;
        let points = vec![snapshot(&[1.0, 2.0], &device), snapshot(&[1.0], &device)];
        assert!(matches!(
            Trajectory::new(points),
            Err(DirectionError::ShapeMismatch { .. })
        ));
    }

    #[test]
    fn test_flattened_centers_on_origin() {
        let device = Device::Cpu;
        let trajectory = Trajectory::new(vec![
            snapshot(&[1.0, 2.0], &device),
            snapshot(&[3.0, 5.0], &device),
        ])
        .unwrap();
        let origin = Tensor::new(&[1.0f32, 1.0], &device).unwrap();

        let flat = trajectory
            .flattened(Some(&origin), &device, DType::F64)
            .unwrap();
        let second: Vec<f64> = flat[1].to_vec1().unwrap();
        assert_eq!(second, vec![2.0, 4.0]);
    }
}
