//! Adam with classic (coupled) L2 weight decay.

use candle_core::backprop::GradStore;
use candle_core::{Tensor, Var};

use crate::error::Result;

/// Adam hyperparameters.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AdamParams {
    /// Step size.
    pub learning_rate: f64,
    /// First moment decay.
    pub beta1: f64,
    /// Second moment decay.
    pub beta2: f64,
    /// Denominator guard.
    pub eps: f64,
    /// L2 penalty added to the gradient before the moment updates.
    pub weight_decay: f64,
}

impl Default for AdamParams {
    fn default() -> Self {
        Self {
            learning_rate: 1e-3,
            beta1: 0.9,
            beta2: 0.999,
            eps: 1e-8,
            weight_decay: 0.0,
        }
    }
}

/// Adam optimizer over a fixed list of variables.
///
/// Unlike AdamW the decay term `weight_decay * w` is folded into the gradient,
/// so it is rescaled by the adaptive denominator like the loss gradient.
#[derive(Debug)]
pub struct Adam {
    vars: Vec<Var>,
    params: AdamParams,
    /// First moment estimates, one per variable.
    m: Vec<Tensor>,
    /// Second moment estimates, one per variable.
    v: Vec<Tensor>,
    /// Step counter for bias correction.
    t: usize,
}

impl Adam {
    /// Create an optimizer with zeroed moments.
    ///
    /// # Errors
    ///
    /// Propagates tensor allocation failures.
    pub fn new(vars: Vec<Var>, params: AdamParams) -> Result<Self> {
        let m = vars
            .iter()
            .map(|var| var.as_tensor().zeros_like())
            .collect::<candle_core::Result<Vec<_>>>()?;
        let v = m.clone();
        Ok(Self {
            vars,
            params,
            m,
            v,
            t: 0,
        })
    }

    /// Current learning rate.
    #[must_use]
    pub const fn learning_rate(&self) -> f64 {
        self.params.learning_rate
    }

    /// Change the learning rate for subsequent steps.
    pub fn set_learning_rate(&mut self, learning_rate: f64) {
        self.params.learning_rate = learning_rate;
    }

    /// Number of steps taken.
    #[must_use]
    pub const fn steps(&self) -> usize {
        self.t
    }

    /// Apply one update from precomputed gradients.
    ///
    /// Variables without a gradient are left untouched.
    ///
    /// # Errors
    ///
    /// Propagates tensor failures.
    pub fn step(&mut self, grads: &GradStore) -> Result<()> {
        self.t += 1;
        let AdamParams {
            learning_rate,
            beta1,
            beta2,
            eps,
            weight_decay,
        } = self.params;

        // Bias correction factors
        let t = i32::try_from(self.t).unwrap_or(i32::MAX);
        let bc1 = 1.0 - beta1.powi(t);
        let bc2 = 1.0 - beta2.powi(t);

        for ((var, m), v) in self.vars.iter().zip(&mut self.m).zip(&mut self.v) {
            let Some(grad) = grads.get(var.as_tensor()) else {
                continue;
            };
            let weight = var.as_tensor().detach();

            let grad = if weight_decay == 0.0 {
                grad.clone()
            } else {
                (grad + (&weight * weight_decay)?)?
            };

            // m = β1 * m + (1 - β1) * g
            let m_new = ((&*m * beta1)? + (&grad * (1.0 - beta1))?)?;
            // v = β2 * v + (1 - β2) * g²
            let v_new = ((&*v * beta2)? + (grad.sqr()? * (1.0 - beta2))?)?;

            let m_hat = (&m_new / bc1)?;
            let v_hat = (&v_new / bc2)?;

            let update = ((m_hat / (v_hat.sqrt()? + eps)?)? * learning_rate)?;
            var.set(&(weight - update)?)?;

            *m = m_new;
            *v = v_new;
        }
        Ok(())
    }

    /// Backpropagate `loss` and apply one update.
    ///
    /// # Errors
    ///
    /// Propagates backward-pass and tensor failures.
    pub fn backward_step(&mut self, loss: &Tensor) -> Result<()> {
        let grads = loss.backward()?;
        self.step(&grads)
    }
}
