//! Thin AdamW wrapper over candle-nn.

use candle_core::Tensor;
use candle_nn::{Optimizer, ParamsAdamW, VarMap};

use crate::config::TrainingConfig;
use crate::error::{GazeError, Result};

/// AdamW over a model's full variable set.
pub struct GazeOptimizer {
    inner: candle_nn::AdamW,
}

impl GazeOptimizer {
    /// Build the optimizer from the training hyperparameters.
    ///
    /// # Errors
    ///
    /// Returns a training error if the optimizer cannot be created.
    pub fn new(varmap: &VarMap, config: &TrainingConfig) -> Result<Self> {
        let params = ParamsAdamW {
            lr: config.learning_rate,
            beta1: config.betas[0],
            beta2: config.betas[1],
            eps: 1e-8,
            weight_decay: config.weight_decay,
        };
        let inner = candle_nn::AdamW::new(varmap.all_vars(), params)
            .map_err(|e| GazeError::training(format!("failed to create AdamW: {e}")))?;
        Ok(Self { inner })
    }

    /// Backward pass plus parameter update on `loss`.
    ///
    /// # Errors
    ///
    /// Returns a training error if the step fails.
    pub fn step(&mut self, loss: &Tensor) -> Result<()> {
        self.inner
            .backward_step(loss)
            .map_err(|e| GazeError::training(format!("optimizer step failed: {e}")))
    }

    /// Current learning rate.
    pub fn learning_rate(&self) -> f64 {
        self.inner.learning_rate()
    }

    /// Set the learning rate (driven by the scheduler).
    pub fn set_learning_rate(&mut self, lr: f64) {
        self.inner.set_learning_rate(lr);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::GazeConfig;

    #[test]
    fn test_build_from_config() {
        let config = GazeConfig::test();
        let varmap = VarMap::new();
        let opt = GazeOptimizer::new(&varmap, &config.training).unwrap();
        assert_eq!(opt.learning_rate(), config.training.learning_rate);
    }

    #[test]
    fn test_set_learning_rate() {
        let config = GazeConfig::test();
        let varmap = VarMap::new();
        let mut opt = GazeOptimizer::new(&varmap, &config.training).unwrap();
        opt.set_learning_rate(1e-4);
        assert_eq!(opt.learning_rate(), 1e-4);
    }
}
