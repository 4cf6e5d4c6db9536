//! Step-decay learning rate schedule.
//!
//! The learning rate is a pure function of the epoch index: the base rate
//! multiplied by `gamma` once per `step_size` completed epochs. Decay is
//! deliberately independent of the loss trend, so a noisy fine-tuning run
//! cannot stall the schedule.

/// `lr(epoch) = base_lr * gamma^(epoch / step_size)` (integer division).
#[derive(Debug, Clone)]
pub struct StepDecay {
    base_lr: f64,
    step_size: usize,
    gamma: f64,
}

impl StepDecay {
    pub fn new(base_lr: f64, step_size: usize, gamma: f64) -> Self {
        Self {
            base_lr,
            step_size: step_size.max(1),
            gamma,
        }
    }

    /// Learning rate for a 0-indexed epoch.
    pub fn lr_at(&self, epoch: usize) -> f64 {
        self.base_lr * self.gamma.powi((epoch / self.step_size) as i32)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_constant_within_a_step() {
        let sched = StepDecay::new(1e-2, 50, 0.9);
        assert_eq!(sched.lr_at(0), 1e-2);
        assert_eq!(sched.lr_at(49), 1e-2);
    }

    #[test]
    fn test_decays_at_step_boundaries() {
        let sched = StepDecay::new(1e-2, 50, 0.9);
        assert!((sched.lr_at(50) - 9e-3).abs() < 1e-12);
        assert!((sched.lr_at(100) - 8.1e-3).abs() < 1e-12);
    }

    #[test]
    fn test_zero_step_size_clamped() {
        let sched = StepDecay::new(1e-2, 0, 0.5);
        assert_eq!(sched.lr_at(0), 1e-2);
        assert_eq!(sched.lr_at(1), 5e-3);
    }
}
