//! Full-batch reconstruction training for learnable subspaces.

use candle_core::{DType, Tensor, Var};
use serde::{Deserialize, Serialize};

use super::early_stopping::{EarlyStopping, StoppingDecision};
use super::optim::{Adam, AdamParams};
use crate::error::Result;
use crate::subspace::{NonlinearSubspace, Subspace};

/// A subspace whose weights can be trained.
pub trait Trainable: Subspace {
    /// Trainable variables, in a stable order.
    fn vars(&self) -> Vec<Var>;
}

impl Trainable for NonlinearSubspace {
    fn vars(&self) -> Vec<Var> {
        NonlinearSubspace::vars(self)
    }
}

/// How squared reconstruction errors are reduced to a scalar loss.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LossReduction {
    /// Sum over every element.
    Sum,
    /// Mean over every element.
    Mean,
}

/// Schedule for [`ReconstructionTrainer`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TrainerSettings {
    /// Adam step size.
    pub learning_rate: f64,
    /// L2 penalty folded into the gradient.
    pub weight_decay: f64,
    /// Maximum number of epochs.
    pub training_epochs: usize,
    /// Early stopping patience in epochs.
    pub early_stopping_epochs: usize,
    /// Loss reduction.
    pub reduction: LossReduction,
}

/// Outcome of a training run.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TrainingReport {
    /// Epoch whose weights were restored.
    pub best_epoch: usize,
    /// Loss of the restored weights.
    pub best_loss: f64,
    /// Loss before the first update.
    pub initial_loss: f64,
    /// Number of epochs evaluated.
    pub epochs_run: usize,
    /// Whether training ended on patience rather than the epoch budget.
    pub stopped_early: bool,
}

/// Trains a [`Trainable`] subspace to reconstruct a fixed dataset.
///
/// Each epoch evaluates the loss on the whole dataset, snapshots the weights
/// if the loss is a new best, and takes one Adam step. When training ends the
/// best snapshot is written back, so the returned model is the one that
/// produced [`TrainingReport::best_loss`].
#[derive(Debug, Clone)]
pub struct ReconstructionTrainer {
    settings: TrainerSettings,
}

impl ReconstructionTrainer {
    /// Create a trainer.
    #[must_use]
    pub const fn new(settings: TrainerSettings) -> Self {
        Self { settings }
    }

    /// The schedule in use.
    #[must_use]
    pub const fn settings(&self) -> &TrainerSettings {
        &self.settings
    }

    /// Reconstruction loss of `model` on `dataset` (rows are samples).
    ///
    /// # Errors
    ///
    /// Propagates shape and tensor failures.
    pub fn loss<M: Trainable + ?Sized>(&self, model: &M, dataset: &Tensor) -> Result<Tensor> {
        let predicted = model.reconstruct_points(dataset)?;
        let squared = (predicted - dataset)?.sqr()?;
        let loss = match self.settings.reduction {
            LossReduction::Sum => squared.sum_all()?,
            LossReduction::Mean => squared.mean_all()?,
        };
        Ok(loss)
    }

    /// Train `model` in place and restore its best weights.
    ///
    /// # Errors
    ///
    /// Propagates tensor and backward-pass failures.
    pub fn train<M: Trainable + ?Sized>(&self, model: &M, dataset: &Tensor) -> Result<TrainingReport> {
        let settings = &self.settings;
        let vars = model.vars();
        let mut optimizer = Adam::new(
            vars.clone(),
            AdamParams {
                learning_rate: settings.learning_rate,
                weight_decay: settings.weight_decay,
                ..AdamParams::default()
            },
        )?;
        let mut stopper = EarlyStopping::new(settings.early_stopping_epochs);

        let mut best_state: Option<Vec<Tensor>> = None;
        let mut initial_loss = f64::NAN;
        let mut epochs_run = 0;
        let mut stopped_early = false;

        for epoch in 0..settings.training_epochs {
            let loss = self.loss(model, dataset)?;
            let value = loss.to_dtype(DType::F64)?.to_scalar::<f64>()?;
            epochs_run = epoch + 1;
            if epoch == 0 {
                initial_loss = value;
            }
            tracing::trace!(epoch, loss = value, "reconstruction loss");

            if stopper.check(value, epoch) == StoppingDecision::NewBest {
                best_state = Some(snapshot(&vars)?);
                tracing::debug!(epoch, loss = value, "new best reconstruction loss");
            }
            if stopper.should_stop() {
                stopped_early = true;
                break;
            }

            optimizer.backward_step(&loss)?;
        }

        if let Some(state) = best_state {
            restore(&vars, &state)?;
        }

        let report = TrainingReport {
            best_epoch: stopper.best_epoch(),
            best_loss: stopper.best_value(),
            initial_loss,
            epochs_run,
            stopped_early,
        };
        tracing::info!(
            best_epoch = report.best_epoch,
            best_loss = report.best_loss,
            initial_loss = report.initial_loss,
            epochs_run = report.epochs_run,
            stopped_early = report.stopped_early,
            "reconstruction training finished"
        );
        Ok(report)
    }
}

/// Copy the current weights into fresh storage.
fn snapshot(vars: &[Var]) -> Result<Vec<Tensor>> {
    // `detach` alone would share storage with the variable, which `Var::set`
    // overwrites in place.
    vars.iter()
        .map(|var| -> Result<Tensor> { Ok(var.as_tensor().copy()?.detach()) })
        .collect()
}

fn restore(vars: &[Var], state: &[Tensor]) -> Result<()> {
    for (var, tensor) in vars.iter().zip(state) {
        var.set(tensor)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::subspace::{Activation, LinearSubspace};
    use candle_core::Device;

    fn plane_dataset(device: &Device) -> Tensor {
        // Points on a 2-D plane inside R^4.
        let rows: Vec<f32> = (0..12)
            .flat_map(|i| {
                let a = (i as f32) * 0.3 - 1.5;
                let b = ((i * 7) % 5) as f32 * 0.4 - 0.8;
                [a, b, a + b, a - b]
            })
            .collect();
        Tensor::from_vec(rows, (12, 4), device).unwrap()
    }

    fn linear_model(device: &Device, seed: u64) -> NonlinearSubspace {
        let mut rng = crate::training::rng_from_seed(Some(seed));
        let w = crate::training::kaiming_uniform(
            (4, 2),
            4,
            crate::training::DEFAULT_NEGATIVE_SLOPE,
            &mut rng,
            device,
        )
        .unwrap();
        NonlinearSubspace::new(
            vec![LinearSubspace::new(&w, None).unwrap()],
            Activation::Identity,
        )
        .unwrap()
    }

    fn settings(epochs: usize, patience: usize, lr: f64) -> TrainerSettings {
        TrainerSettings {
            learning_rate: lr,
            weight_decay: 0.0,
            training_epochs: epochs,
            early_stopping_epochs: patience,
            reduction: LossReduction::Mean,
        }
    }

    #[test]
    fn test_training_reduces_loss() {
        let device = Device::Cpu;
        let data = plane_dataset(&device);
        let model = linear_model(&device, 0);

        let report = ReconstructionTrainer::new(settings(1000, 1000, 0.02))
            .train(&model, &data)
            .unwrap();

        assert!(report.best_loss < report.initial_loss * 0.1, "{report:?}");
        assert_eq!(report.epochs_run, 1000);
        assert!(!report.stopped_early);
    }

    #[test]
    fn test_restored_weights_reproduce_best_loss() {
        let device = Device::Cpu;
        let data = plane_dataset(&device);
        let model = linear_model(&device, 1);
        let trainer = ReconstructionTrainer::new(settings(150, 150, 0.05));

        let report = trainer.train(&model, &data).unwrap();
        let restored: f64 = trainer
            .loss(&model, &data)
            .unwrap()
            .to_dtype(DType::F64)
            .unwrap()
            .to_scalar()
            .unwrap();

        assert!((restored - report.best_loss).abs() <= 1e-6 * report.best_loss.max(1.0));
    }

    #[test]
    fn test_zero_learning_rate_stops_at_patience() {
        let device = Device::Cpu;
        let data = plane_dataset(&device);
        let model = linear_model(&device, 2);

        let report = ReconstructionTrainer::new(settings(1000, 5, 0.0))
            .train(&model, &data)
            .unwrap();

        assert!(report.stopped_early);
        assert_eq!(report.best_epoch, 0);
        assert_eq!(report.epochs_run, 6);
        assert!((report.best_loss - report.initial_loss).abs() < f64::EPSILON);
    }

    #[test]
    fn test_sum_is_mean_times_count() {
        let device = Device::Cpu;
        let data = plane_dataset(&device);
        let model = linear_model(&device, 3);

        let sum: f32 = ReconstructionTrainer::new(TrainerSettings {
            reduction: LossReduction::Sum,
            ..settings(1, 1, 0.0)
        })
        .loss(&model, &data)
        .unwrap()
        .to_scalar()
        .unwrap();
        let mean: f32 = ReconstructionTrainer::new(settings(1, 1, 0.0))
            .loss(&model, &data)
            .unwrap()
            .to_scalar()
            .unwrap();

        assert!((sum - mean * 48.0).abs() < 1e-3 * sum.abs().max(1.0));
    }
}
