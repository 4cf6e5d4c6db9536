//! Training scheduler: epoch loop over a dataset/model pair.
//!
//! Two regimes share one loop. Full retraining shuffles mini-batches each
//! epoch with a seeded RNG and zeroes recurrent state per batch; streaming
//! fine-tuning feeds single frames in arrival order and carries the
//! caller's session state across steps. The optimizer and the step-decay
//! schedule live in the trainer and persist across `train` calls, so the
//! learning rate keeps decaying over the service's lifetime rather than
//! restarting every request.

use candle_core::{Device, Tensor};
use indicatif::{ProgressBar, ProgressStyle};
use rand::seq::SliceRandom;
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use serde::{Deserialize, Serialize};

use crate::config::GazeConfig;
use crate::dataset::RingBufferDataset;
use crate::error::{GazeError, Result};
use crate::model::{GazeModel, GazeSession, Regime};
use crate::optimizer::GazeOptimizer;
use crate::reducer::FeatureReducer;
use crate::scheduler::StepDecay;
use crate::checkpoint;

/// Last-known training losses.
///
/// `combined` is the mean Euclidean distance between predictions and
/// targets; `horizontal` and `vertical` are mean absolute per-axis errors
/// kept for diagnostics. Before any training has happened all fields hold
/// the `-1.0` sentinel.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LossReport {
    pub horizontal: f32,
    pub vertical: f32,
    pub combined: f32,
}

impl Default for LossReport {
    fn default() -> Self {
        Self {
            horizontal: -1.0,
            vertical: -1.0,
            combined: -1.0,
        }
    }
}

impl LossReport {
    /// Whether any training has produced real values yet.
    pub fn is_sentinel(&self) -> bool {
        self.combined < 0.0
    }
}

/// Owns the optimizer and learning-rate schedule for one model instance.
pub struct Trainer {
    config: GazeConfig,
    device: Device,
    optimizer: GazeOptimizer,
    schedule: StepDecay,
    epochs_completed: usize,
    skipped_batches: u64,
}

impl Trainer {
    /// Build a trainer bound to `model`'s parameters.
    pub fn new(config: &GazeConfig, model: &dyn GazeModel, device: &Device) -> Result<Self> {
        let optimizer = GazeOptimizer::new(model.var_map(), &config.training)?;
        let schedule = StepDecay::new(
            config.training.learning_rate,
            config.training.step_size,
            config.training.gamma,
        );
        Ok(Self {
            config: config.clone(),
            device: device.clone(),
            optimizer,
            schedule,
            epochs_completed: 0,
            skipped_batches: 0,
        })
    }

    /// Batches skipped so far due to unexpected prediction shapes.
    pub fn skipped_batches(&self) -> u64 {
        self.skipped_batches
    }

    /// Total epochs completed across all `train` calls.
    pub fn epochs_completed(&self) -> usize {
        self.epochs_completed
    }

    /// Run `epochs` of training, returning the final epoch's losses.
    ///
    /// `epochs == 0` auto-scales to `1 + len / 100`. A dataset below the
    /// configured minimum size skips training entirely: `prior` is returned
    /// unchanged and no optimizer step runs. Synchronous and blocking.
    ///
    /// # Errors
    ///
    /// Returns a training error when a reducer-requiring model is given no
    /// reducer, and propagates optimizer and checkpoint failures.
    pub fn train(
        &mut self,
        dataset: &RingBufferDataset,
        model: &dyn GazeModel,
        session: &mut GazeSession,
        reducer: Option<&FeatureReducer>,
        epochs: usize,
        regime: Regime,
        prior: LossReport,
    ) -> Result<LossReport> {
        if dataset.len() < self.config.data.dataset_min_size {
            tracing::info!(
                "dataset size {} below minimum {}, skipping training",
                dataset.len(),
                self.config.data.dataset_min_size
            );
            return Ok(prior);
        }
        if model.requires_reducer() && reducer.is_none() {
            return Err(GazeError::training(format!(
                "{} model requires a fitted reducer",
                model.family().tag()
            )));
        }

        let epochs = if epochs == 0 {
            1 + dataset.len() / 100
        } else {
            epochs
        };
        tracing::info!(
            "training {} for {epochs} epochs on {} samples ({:?} regime)",
            model.family().tag(),
            dataset.len(),
            regime
        );

        let pb = ProgressBar::new(epochs as u64);
        pb.set_style(
            ProgressStyle::default_bar()
                .template("{spinner:.green} [{elapsed_precise}] [{wide_bar:.cyan/blue}] {pos:>4}/{len:4} {msg}")
                .unwrap()
                .progress_chars("#>-"),
        );

        let mut report = prior;
        for _ in 0..epochs {
            self.optimizer
                .set_learning_rate(self.schedule.lr_at(self.epochs_completed));

            // An epoch in which every batch was skipped produced no real
            // statistics; the previous report stands.
            match self.run_epoch(dataset, model, session, reducer, regime)? {
                Some(epoch_report) => report = epoch_report,
                None => tracing::warn!("every batch skipped this epoch, keeping previous losses"),
            }
            self.epochs_completed += 1;

            pb.set_message(format!(
                "loss {:.4} (h {:.4} v {:.4})",
                report.combined, report.horizontal, report.vertical
            ));
            pb.inc(1);

            if self.epochs_completed % self.config.training.model_checkpoint_frequency == 0 {
                checkpoint::save(model, &self.config.paths.checkpoint)?;
            }
        }
        pb.finish_and_clear();
        Ok(report)
    }

    fn run_epoch(
        &mut self,
        dataset: &RingBufferDataset,
        model: &dyn GazeModel,
        session: &mut GazeSession,
        reducer: Option<&FeatureReducer>,
        regime: Regime,
    ) -> Result<Option<LossReport>> {
        let len = dataset.len();
        let mut order: Vec<usize> = (0..len).collect();
        let batch_size = match regime {
            Regime::Full => {
                let mut rng = ChaCha8Rng::seed_from_u64(
                    self.config
                        .training
                        .seed
                        .wrapping_add(self.epochs_completed as u64),
                );
                order.shuffle(&mut rng);
                self.config.training.batch_size
            }
            Regime::Streaming => 1,
        };

        let mut sums = LossReport {
            horizontal: 0.0,
            vertical: 0.0,
            combined: 0.0,
        };
        let mut n_batches = 0usize;

        for batch in order.chunks(batch_size) {
            let (xs, ys) = self.assemble(dataset, batch, model, reducer)?;

            // Full regime gets a throwaway session so no state ever crosses
            // a batch boundary.
            let pred = match regime {
                Regime::Full => model.forward(&xs, regime, &mut GazeSession::new())?,
                Regime::Streaming => model.forward(&xs, regime, session)?,
            };
            if pred.dims() != [batch.len(), 2] {
                self.skipped_batches += 1;
                tracing::warn!(
                    "prediction shape {:?} for batch of {}, skipping batch ({} skipped so far)",
                    pred.dims(),
                    batch.len(),
                    self.skipped_batches
                );
                continue;
            }

            let diff = pred.sub(&ys)?;
            let loss = diff.sqr()?.sum(1)?.sqrt()?.mean_all()?;
            let abs = diff.abs()?;
            let h = abs.narrow(1, 0, 1)?.mean_all()?.to_scalar::<f32>()?;
            let v = abs.narrow(1, 1, 1)?.mean_all()?.to_scalar::<f32>()?;

            self.optimizer.step(&loss)?;

            sums.combined += loss.to_scalar::<f32>()?;
            sums.horizontal += h;
            sums.vertical += v;
            n_batches += 1;
        }

        if n_batches == 0 {
            return Ok(None);
        }
        let n = n_batches as f32;
        Ok(Some(LossReport {
            horizontal: sums.horizontal / n,
            vertical: sums.vertical / n,
            combined: sums.combined / n,
        }))
    }

    /// Gather a batch into device tensors, applying the reducer when the
    /// model calls for it.
    fn assemble(
        &self,
        dataset: &RingBufferDataset,
        indices: &[usize],
        model: &dyn GazeModel,
        reducer: Option<&FeatureReducer>,
    ) -> Result<(Tensor, Tensor)> {
        let mut features = Vec::with_capacity(indices.len() * dataset.feature_len());
        let mut targets = Vec::with_capacity(indices.len() * 2);
        for &i in indices {
            let sample = dataset.get(i)?;
            features.extend_from_slice(&sample.features);
            targets.extend_from_slice(&sample.target);
        }
        let xs = Tensor::from_slice(
            &features,
            (indices.len(), dataset.feature_len()),
            &self.device,
        )?;
        let ys = Tensor::from_slice(&targets, (indices.len(), 2), &self.device)?;
        let xs = match reducer {
            Some(reducer) if model.requires_reducer() => reducer.project(&xs)?,
            _ => xs,
        };
        Ok((xs, ys))
    }
}
