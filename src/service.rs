//! Prediction service: the single-threaded orchestrator.
//!
//! Owns the long-horizon dataset, the smaller fine-tuning dataset, the
//! frozen feature reducer, the selected model, the trainer, and the
//! streaming session. All calls are synchronous and blocking; if this is
//! embedded behind a concurrent boundary, that boundary must serialize
//! calls, since dataset mutation and parameter updates are not safe under
//! concurrent access.
//!
//! Cold start: datasets are merged from disk if present, the reducer is
//! loaded or fit (blocking, before any reduced prediction can happen), and
//! the checkpoint is applied when compatible.

use candle_core::{Device, Tensor};
use serde::{Deserialize, Serialize};

use crate::checkpoint;
use crate::config::GazeConfig;
use crate::dataset::{RingBufferDataset, Sample};
use crate::error::{GazeError, Result};
use crate::model::{build_model, GazeModel, GazeSession, Regime};
use crate::reducer::FeatureReducer;
use crate::trainer::{LossReport, Trainer};

/// Predicted screen point, normalized to `[-1, 1]` with origin at center.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GazePoint {
    pub x: f32,
    pub y: f32,
}

/// What the routing layer gets back from `predict` / `add_data`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PredictionResponse {
    /// Current write index of the long-horizon dataset
    pub data_index: usize,
    pub gaze: GazePoint,
    pub losses: LossReport,
}

/// Structured result of `save`: errors become a failure payload, never an
/// escaping error.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SaveOutcome {
    pub status: SaveStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SaveStatus {
    Success,
    Failed,
}

/// Incremental gaze regression service.
pub struct PredictionService {
    config: GazeConfig,
    device: Device,
    dataset: RingBufferDataset,
    finetune: RingBufferDataset,
    reducer: Option<FeatureReducer>,
    model: Box<dyn GazeModel>,
    trainer: Trainer,
    session: GazeSession,
    losses: LossReport,
}

impl PredictionService {
    /// Bring up the full pipeline from a validated configuration.
    ///
    /// # Errors
    ///
    /// Fails on an invalid configuration, an unavailable device, or a
    /// reducer that can neither be loaded nor fit (reduced model with an
    /// empty dataset and no artifact).
    pub fn new(config: GazeConfig) -> Result<Self> {
        config.validate()?;
        let device = config.device.device()?;

        let mut dataset =
            RingBufferDataset::new(config.data.dataset_capacity, config.feature_len())?;
        dataset.load(&config.paths.dataset, true);
        let mut finetune =
            RingBufferDataset::new(config.data.finetune_capacity, config.feature_len())?;
        finetune.load(&config.paths.finetune_dataset, true);

        let model = build_model(&config, &device)?;
        let reducer = if model.requires_reducer() {
            let rows: Vec<Vec<f32>> = dataset.iter().map(|s| s.features.clone()).collect();
            Some(FeatureReducer::load_or_fit(
                &config.paths.reducer,
                &rows,
                config.model.components,
            )?)
        } else {
            None
        };
        checkpoint::load(model.as_ref(), &config.paths.checkpoint);

        let trainer = Trainer::new(&config, model.as_ref(), &device)?;
        Ok(Self {
            config,
            device,
            dataset,
            finetune,
            reducer,
            model,
            trainer,
            session: GazeSession::new(),
            losses: LossReport::default(),
        })
    }

    /// Predict the gaze point for one frame, optionally absorbing it as a
    /// labeled sample first.
    ///
    /// A labeled frame is appended in lockstep to both datasets, and the
    /// long-horizon dataset is persisted every configured number of
    /// insertions.
    ///
    /// # Errors
    ///
    /// Shape mismatches are rejected before any mutation; persistence and
    /// inference failures propagate.
    pub fn predict(
        &mut self,
        features: Vec<f32>,
        label: Option<[f32; 2]>,
    ) -> Result<PredictionResponse> {
        if let Some(target) = label {
            self.absorb(Sample { features: features.clone(), target })?;
        }
        let gaze = self.infer(&features)?;
        Ok(PredictionResponse {
            data_index: self.dataset.cursor(),
            gaze,
            losses: self.losses,
        })
    }

    /// Append a batch of labeled samples, then predict for the last one.
    ///
    /// # Errors
    ///
    /// An empty batch or any malformed sample is a validation error,
    /// reported before a single sample is appended.
    pub fn add_data(&mut self, batch: Vec<Sample>) -> Result<PredictionResponse> {
        let last = batch
            .last()
            .cloned()
            .ok_or_else(|| GazeError::validation("non-empty batch", "empty batch".to_string()))?;
        let expected = self.config.feature_len();
        for (i, sample) in batch.iter().enumerate() {
            if sample.features.len() != expected {
                return Err(GazeError::validation(
                    format!("{expected} features"),
                    format!("{} features in sample {i}", sample.features.len()),
                ));
            }
        }
        for sample in batch {
            self.absorb(sample)?;
        }
        let gaze = self.infer(&last.features)?;
        Ok(PredictionResponse {
            data_index: self.dataset.cursor(),
            gaze,
            losses: self.losses,
        })
    }

    /// Run training and update the stored loss report.
    ///
    /// Streaming mode fine-tunes on the small recent-history dataset in
    /// arrival order with carried state; full mode retrains on the
    /// long-horizon dataset with shuffled batches.
    pub fn train(&mut self, epochs: usize, streaming: bool) -> Result<LossReport> {
        let (dataset, regime) = if streaming {
            (&self.finetune, Regime::Streaming)
        } else {
            (&self.dataset, Regime::Full)
        };
        let report = self.trainer.train(
            dataset,
            self.model.as_ref(),
            &mut self.session,
            self.reducer.as_ref(),
            epochs,
            regime,
            self.losses,
        )?;
        self.losses = report;
        Ok(report)
    }

    /// Persist model checkpoint and both datasets.
    ///
    /// Any failure is folded into the outcome payload; nothing escapes.
    pub fn save(&self) -> SaveOutcome {
        match self.save_inner() {
            Ok(()) => SaveOutcome {
                status: SaveStatus::Success,
                message: None,
            },
            Err(err) => {
                tracing::warn!("save failed: {err}");
                SaveOutcome {
                    status: SaveStatus::Failed,
                    message: Some(err.to_string()),
                }
            }
        }
    }

    fn save_inner(&self) -> Result<()> {
        checkpoint::save(self.model.as_ref(), &self.config.paths.checkpoint)?;
        self.dataset.save(&self.config.paths.dataset)?;
        self.finetune.save(&self.config.paths.finetune_dataset)?;
        Ok(())
    }

    /// Re-apply persisted state. Idempotent: missing or incompatible files
    /// leave the current state in place.
    pub fn load(&mut self) {
        self.dataset.load(&self.config.paths.dataset, true);
        self.finetune.load(&self.config.paths.finetune_dataset, true);
        checkpoint::load(self.model.as_ref(), &self.config.paths.checkpoint);
    }

    /// Current configuration snapshot.
    pub fn config(&self) -> &GazeConfig {
        &self.config
    }

    /// Last-known training losses.
    pub fn losses(&self) -> LossReport {
        self.losses
    }

    /// Long-horizon dataset size.
    pub fn dataset_len(&self) -> usize {
        self.dataset.len()
    }

    /// Drop carried recurrent state at a sequence boundary (e.g. the user
    /// looked away and back).
    pub fn reset_session(&mut self) {
        self.session.reset();
    }

    /// Lockstep append to both datasets plus periodic persistence of the
    /// long-horizon dataset.
    fn absorb(&mut self, sample: Sample) -> Result<()> {
        self.dataset
            .add_item(sample.features.clone(), sample.target)?;
        self.finetune.add_item(sample.features, sample.target)?;

        if self.dataset.cursor() % self.config.data.dataset_checkpoint_frequency == 0 {
            self.dataset.save(&self.config.paths.dataset)?;
            tracing::info!(
                "saved dataset to {} (size {})",
                self.config.paths.dataset.display(),
                self.dataset.len()
            );
        }
        Ok(())
    }

    /// Gradient-free forward pass for one frame.
    fn infer(&mut self, features: &[f32]) -> Result<GazePoint> {
        let expected = self.config.feature_len();
        if features.len() != expected {
            return Err(GazeError::validation(
                format!("{expected} features"),
                format!("{} features", features.len()),
            ));
        }
        let xs = Tensor::from_slice(features, (1, expected), &self.device)?;
        let xs = match &self.reducer {
            Some(reducer) if self.model.requires_reducer() => reducer.project(&xs)?,
            _ => xs,
        };
        // Recurrent variants predict in streaming regime so live inference
        // benefits from carried temporal context.
        let regime = if self.model.is_recurrent() {
            Regime::Streaming
        } else {
            Regime::Full
        };
        let pred = self.model.forward(&xs, regime, &mut self.session)?;
        let row = pred.to_vec2::<f32>()?;
        Ok(GazePoint {
            x: row[0][0],
            y: row[0][1],
        })
    }
}
