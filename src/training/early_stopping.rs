//! Patience-based early stopping on a minimized loss.
//!
//! ```
//! use landscape_directions::training::{EarlyStopping, StoppingDecision};
//!
//! let mut stopper = EarlyStopping::new(2);
//! assert_eq!(stopper.check(1.0, 0), StoppingDecision::NewBest);
//! assert!(matches!(stopper.check(1.0, 1), StoppingDecision::NoImprovement { .. }));
//! assert_eq!(stopper.check(2.0, 2), StoppingDecision::Stop);
//! ```

/// Early stopping state tracker.
#[derive(Debug, Clone)]
pub struct EarlyStopping {
    /// Epochs without improvement tolerated before stopping.
    patience: usize,
    /// Lowest loss observed so far.
    best_value: f64,
    /// Epoch at which `best_value` was observed.
    best_epoch: usize,
    /// Whether the stopping criterion has been met.
    stopped: bool,
}

/// Result of checking a new loss value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoppingDecision {
    /// Strictly lower loss than any before; checkpoint now.
    NewBest,
    /// No improvement, but patience not exhausted.
    NoImprovement {
        /// Epochs since the best loss.
        count: usize,
        /// Epochs left before stopping.
        remaining: usize,
    },
    /// Patience exhausted.
    Stop,
}

impl EarlyStopping {
    /// Create a tracker that stops once `patience` epochs pass without a new best.
    #[must_use]
    pub const fn new(patience: usize) -> Self {
        Self {
            patience,
            best_value: f64::INFINITY,
            best_epoch: 0,
            stopped: false,
        }
    }

    /// Record the loss of `epoch`.
    ///
    /// A loss counts as an improvement only if it is strictly below the best so
    /// far (NaN never improves). The tracker stops when
    /// `epoch - best_epoch >= patience`; with zero patience that holds on the
    /// same epoch as a new best, in which case `NewBest` is still returned and
    /// [`EarlyStopping::should_stop`] reports the stop.
    pub fn check(&mut self, value: f64, epoch: usize) -> StoppingDecision {
        if self.stopped {
            return StoppingDecision::Stop;
        }

        let improved = value < self.best_value;
        if improved {
            self.best_value = value;
            self.best_epoch = epoch;
        }

        let stale = epoch.saturating_sub(self.best_epoch);
        if stale >= self.patience {
            self.stopped = true;
        }

        if improved {
            StoppingDecision::NewBest
        } else if self.stopped {
            StoppingDecision::Stop
        } else {
            StoppingDecision::NoImprovement {
                count: stale,
                remaining: self.patience - stale,
            }
        }
    }

    /// Whether patience is exhausted.
    #[must_use]
    pub const fn should_stop(&self) -> bool {
        self.stopped
    }

    /// Epoch of the best loss.
    #[must_use]
    pub const fn best_epoch(&self) -> usize {
        self.best_epoch
    }

    /// Best loss observed, or infinity before the first check.
    #[must_use]
    pub const fn best_value(&self) -> f64 {
        self.best_value
    }

    /// Forget all history.
    pub fn reset(&mut self) {
        self.best_value = f64::INFINITY;
        self.best_epoch = 0;
        self.stopped = false;
    }
}
