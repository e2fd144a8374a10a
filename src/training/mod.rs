//! Training loop pieces for the learnable direction builders.

mod early_stopping;
mod init;
mod optim;
mod trainer;

pub use early_stopping::{EarlyStopping, StoppingDecision};
pub use init::{kaiming_bound, kaiming_uniform, rng_from_seed, DEFAULT_NEGATIVE_SLOPE};
pub use optim::{Adam, AdamParams};
pub use trainer::{
    LossReduction, ReconstructionTrainer, Trainable, TrainerSettings, TrainingReport,
};
