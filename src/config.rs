//! Configuration for the gaze training service.
//!
//! The configuration is immutable after construction: it is built once from
//! defaults or a JSON file and validated before any component is constructed.
//! There is no post-construction patching; version-dependent behavior is
//! expressed through [`ModelFamily`] instead of runtime attribute rewrites.

use std::path::{Path, PathBuf};

use candle_core::Device;
use serde::{Deserialize, Serialize};

use crate::error::{GazeError, Result};

/// Model family discriminator.
///
/// Maps a validated tag to exactly one model variant constructor. Unknown
/// tags are rejected at configuration time; there is no default fallback.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ModelFamily {
    /// Raw flattened landmarks through a single linear layer (baseline).
    Linear,
    /// PCA-reduced features through an MLP with a gated calibration branch.
    PcaMlp,
    /// PCA-reduced features through an LSTM with carried streaming state.
    PcaLstm,
}

impl ModelFamily {
    /// Parse a family tag as it appears in config files and checkpoint meta.
    pub fn from_tag(tag: &str) -> Result<Self> {
        match tag {
            "linear" => Ok(Self::Linear),
            "pca-mlp" => Ok(Self::PcaMlp),
            "pca-lstm" => Ok(Self::PcaLstm),
            other => Err(GazeError::config(format!("unknown model family: {other}"))),
        }
    }

    /// The canonical tag for this family.
    pub fn tag(&self) -> &'static str {
        match self {
            Self::Linear => "linear",
            Self::PcaMlp => "pca-mlp",
            Self::PcaLstm => "pca-lstm",
        }
    }

    /// Whether this variant consumes reducer output instead of raw landmarks.
    pub fn requires_reducer(&self) -> bool {
        !matches!(self, Self::Linear)
    }
}

/// Structural hyperparameters for the selected model variant.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelConfig {
    /// Selected model family
    pub family: ModelFamily,
    /// Number of reducer components fed to PCA-based variants
    pub components: usize,
    /// Hidden width of the MLP trunk / LSTM state
    pub hidden_dim: usize,
    /// Number of hidden MLP trunk layers
    pub num_mlp_layers: usize,
    /// Number of calibration layers (MLP variant)
    pub num_calibration_layers: usize,
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            family: ModelFamily::PcaMlp,
            components: 32,
            hidden_dim: 128,
            num_mlp_layers: 2,
            num_calibration_layers: 1,
        }
    }
}

/// Sample-store layout and persistence cadence.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DataConfig {
    /// Number of landmarks per frame
    pub landmark_count: usize,
    /// Coordinates per landmark (x, y, z)
    pub landmark_channels: usize,
    /// Long-horizon ring buffer capacity. Kept small enough that training
    /// tracks changing poses and lighting; the oldest frames fall off first.
    pub dataset_capacity: usize,
    /// Fine-tuning ring buffer capacity (streaming/calibration regime)
    pub finetune_capacity: usize,
    /// Minimum dataset size before training is attempted
    pub dataset_min_size: usize,
    /// Persist the long-horizon dataset every this many insertions
    pub dataset_checkpoint_frequency: usize,
}

impl Default for DataConfig {
    fn default() -> Self {
        Self {
            landmark_count: 478,
            landmark_channels: 3,
            dataset_capacity: 8192,
            finetune_capacity: 512,
            dataset_min_size: 512,
            dataset_checkpoint_frequency: 1024,
        }
    }
}

/// Optimizer and schedule hyperparameters.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrainingConfig {
    /// Batch size for full-batch training
    pub batch_size: usize,
    /// Initial learning rate
    pub learning_rate: f64,
    /// Epochs between multiplicative LR decays
    pub step_size: usize,
    /// Multiplicative LR decay factor
    pub gamma: f64,
    /// Adam betas
    pub betas: [f64; 2],
    /// Weight decay
    pub weight_decay: f64,
    /// Persist the model checkpoint every this many completed epochs
    pub model_checkpoint_frequency: usize,
    /// Seed for epoch shuffling
    pub seed: u64,
}

impl Default for TrainingConfig {
    fn default() -> Self {
        Self {
            batch_size: 64,
            learning_rate: 5e-3,
            step_size: 50,
            gamma: 0.9,
            betas: [0.9, 0.999],
            weight_decay: 0.0,
            model_checkpoint_frequency: 5,
            seed: 42,
        }
    }
}

/// On-disk locations for persisted state.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PathsConfig {
    /// Model checkpoint (safetensors blob + sidecar meta)
    pub checkpoint: PathBuf,
    /// Long-horizon dataset file
    pub dataset: PathBuf,
    /// Fine-tuning dataset file
    pub finetune_dataset: PathBuf,
    /// Persisted reducer artifact
    pub reducer: PathBuf,
}

impl Default for PathsConfig {
    fn default() -> Self {
        Self {
            checkpoint: PathBuf::from("cache/checkpoints/gaze_model.safetensors"),
            dataset: PathBuf::from("cache/checkpoints/gaze_db.json"),
            finetune_dataset: PathBuf::from("cache/checkpoints/gaze_finetune_db.json"),
            reducer: PathBuf::from("cache/checkpoints/gaze_reducer.json"),
        }
    }
}

/// Top-level configuration.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct GazeConfig {
    /// Device to run on ("cpu" or "cuda")
    #[serde(default)]
    pub device: DeviceKind,
    /// Model selection and hyperparameters
    #[serde(default)]
    pub model: ModelConfig,
    /// Dataset layout and persistence
    #[serde(default)]
    pub data: DataConfig,
    /// Optimizer and schedule
    #[serde(default)]
    pub training: TrainingConfig,
    /// File locations
    #[serde(default)]
    pub paths: PathsConfig,
}

/// Requested compute device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum DeviceKind {
    #[default]
    Cpu,
    Cuda,
}

impl DeviceKind {
    /// Resolve the concrete compute device.
    pub fn device(&self) -> Result<Device> {
        match self {
            Self::Cpu => Ok(Device::Cpu),
            Self::Cuda => Ok(Device::new_cuda(0)?),
        }
    }
}

impl GazeConfig {
    /// Load configuration from a JSON file.
    ///
    /// A missing or unparseable file falls back to the defaults with a
    /// warning, matching the service's cold-start behavior.
    pub fn from_file(path: impl AsRef<Path>) -> Self {
        let path = path.as_ref();
        match std::fs::read_to_string(path) {
            Ok(text) => match serde_json::from_str(&text) {
                Ok(config) => config,
                Err(err) => {
                    tracing::warn!("failed to parse {}: {err}; using defaults", path.display());
                    Self::default()
                }
            },
            Err(err) => {
                tracing::warn!("failed to read {}: {err}; using defaults", path.display());
                Self::default()
            }
        }
    }

    /// Write the configuration to a JSON file.
    pub fn to_file(&self, path: impl AsRef<Path>) -> Result<()> {
        let text = serde_json::to_string_pretty(self)?;
        std::fs::write(path, text)?;
        Ok(())
    }

    /// Number of raw feature scalars per frame.
    pub fn feature_len(&self) -> usize {
        self.data.landmark_count * self.data.landmark_channels
    }

    /// Validate the configuration.
    ///
    /// # Errors
    ///
    /// Returns a configuration error on any inconsistent hyperparameter.
    pub fn validate(&self) -> Result<()> {
        if self.data.landmark_count == 0 || self.data.landmark_channels == 0 {
            return Err(GazeError::config("landmark shape must be non-zero"));
        }
        if self.data.dataset_capacity == 0 || self.data.finetune_capacity == 0 {
            return Err(GazeError::config("dataset capacities must be positive"));
        }
        if self.data.dataset_checkpoint_frequency == 0 {
            return Err(GazeError::config(
                "dataset_checkpoint_frequency must be positive",
            ));
        }
        if self.training.batch_size == 0 {
            return Err(GazeError::config("batch_size must be positive"));
        }
        if self.training.learning_rate <= 0.0 {
            return Err(GazeError::config("learning_rate must be positive"));
        }
        if self.training.step_size == 0 {
            return Err(GazeError::config("step_size must be positive"));
        }
        if !(0.0..=1.0).contains(&self.training.gamma) || self.training.gamma == 0.0 {
            return Err(GazeError::config("gamma must be in (0, 1]"));
        }
        if self.training.model_checkpoint_frequency == 0 {
            return Err(GazeError::config(
                "model_checkpoint_frequency must be positive",
            ));
        }
        if self.model.components == 0 || self.model.components > self.feature_len() {
            return Err(GazeError::config(format!(
                "components must be in 1..={}",
                self.feature_len()
            )));
        }
        if self.model.hidden_dim == 0 {
            return Err(GazeError::config("hidden_dim must be positive"));
        }
        Ok(())
    }

    /// Minimal configuration for unit tests: tiny landmark grid, tiny
    /// buffers, no training guard in the way.
    pub fn test() -> Self {
        Self {
            device: DeviceKind::Cpu,
            model: ModelConfig {
                family: ModelFamily::PcaMlp,
                components: 4,
                hidden_dim: 8,
                num_mlp_layers: 1,
                num_calibration_layers: 1,
            },
            data: DataConfig {
                landmark_count: 4,
                landmark_channels: 3,
                dataset_capacity: 64,
                finetune_capacity: 16,
                dataset_min_size: 4,
                dataset_checkpoint_frequency: 8,
            },
            training: TrainingConfig {
                batch_size: 4,
                learning_rate: 1e-2,
                step_size: 10,
                gamma: 0.9,
                betas: [0.9, 0.999],
                weight_decay: 0.0,
                model_checkpoint_frequency: 100,
                seed: 42,
            },
            paths: PathsConfig::default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        let config = GazeConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.feature_len(), 478 * 3);
    }

    #[test]
    fn test_test_config_is_valid() {
        assert!(GazeConfig::test().validate().is_ok());
    }

    #[test]
    fn test_family_tags_round_trip() {
        for family in [ModelFamily::Linear, ModelFamily::PcaMlp, ModelFamily::PcaLstm] {
            assert_eq!(ModelFamily::from_tag(family.tag()).unwrap(), family);
        }
    }

    #[test]
    fn test_unknown_family_rejected() {
        let err = ModelFamily::from_tag("resnet").unwrap_err();
        assert!(matches!(err, GazeError::Config(_)));
    }

    #[test]
    fn test_zero_capacity_rejected() {
        let mut config = GazeConfig::test();
        config.data.dataset_capacity = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_components_wider_than_features_rejected() {
        let mut config = GazeConfig::test();
        config.model.components = config.feature_len() + 1;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_from_file_missing_falls_back_to_default() {
        let config = GazeConfig::from_file("/nonexistent/config.json");
        assert_eq!(config.data.dataset_capacity, 8192);
    }

    #[test]
    fn test_config_file_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        let mut config = GazeConfig::test();
        config.model.family = ModelFamily::PcaLstm;
        config.to_file(&path).unwrap();

        let loaded = GazeConfig::from_file(&path);
        assert_eq!(loaded.model.family, ModelFamily::PcaLstm);
        assert_eq!(loaded.data.dataset_capacity, 64);
    }
}
