//! Tagged model checkpoints: safetensors weights plus a JSON sidecar.
//!
//! The sidecar records the model family and input width so a checkpoint is
//! never silently applied to a model of a different shape. Any load failure
//! (missing file, tag mismatch, deserialization error) is logged and the
//! model keeps its freshly initialized weights, matching the service's
//! cold-start behavior.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::config::ModelFamily;
use crate::error::Result;
use crate::model::GazeModel;

#[derive(Debug, Serialize, Deserialize, PartialEq, Eq)]
struct CheckpointMeta {
    family: ModelFamily,
    input_dim: usize,
}

fn meta_path(path: &Path) -> PathBuf {
    path.with_extension("meta.json")
}

/// Persist the model's weights and the identifying sidecar.
///
/// # Errors
///
/// Propagates I/O and serialization failures; saving is caller-supervised.
pub fn save(model: &dyn GazeModel, path: impl AsRef<Path>) -> Result<()> {
    let path = path.as_ref();
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    model.var_map().save(path)?;
    let meta = CheckpointMeta {
        family: model.family(),
        input_dim: model.input_dim(),
    };
    std::fs::write(meta_path(path), serde_json::to_string(&meta)?)?;
    tracing::info!("saved {} checkpoint to {}", model.family().tag(), path.display());
    Ok(())
}

/// Load weights into the model if a compatible checkpoint exists.
///
/// Returns whether weights were applied. Never fails: an absent checkpoint,
/// a family or width mismatch, or a corrupt blob leaves the model's current
/// (random) weights in place with a warning.
pub fn load(model: &dyn GazeModel, path: impl AsRef<Path>) -> bool {
    let path = path.as_ref();
    if !path.exists() {
        tracing::warn!("no checkpoint at {}, starting from random weights", path.display());
        return false;
    }

    let expected = CheckpointMeta {
        family: model.family(),
        input_dim: model.input_dim(),
    };
    match read_meta(&meta_path(path)) {
        Ok(meta) if meta == expected => {}
        Ok(meta) => {
            tracing::warn!(
                "checkpoint {} is for {} (width {}), model is {} (width {}); keeping random weights",
                path.display(),
                meta.family.tag(),
                meta.input_dim,
                expected.family.tag(),
                expected.input_dim
            );
            return false;
        }
        Err(err) => {
            tracing::warn!(
                "checkpoint meta for {} unreadable: {err}; keeping random weights",
                path.display()
            );
            return false;
        }
    }

    // VarMap shares its store behind an Arc, so a clone loads in place.
    let mut varmap = model.var_map().clone();
    match varmap.load(path) {
        Ok(()) => {
            tracing::info!("loaded {} checkpoint from {}", expected.family.tag(), path.display());
            true
        }
        Err(err) => {
            tracing::warn!(
                "failed to load checkpoint {}: {err}; keeping random weights",
                path.display()
            );
            false
        }
    }
}

fn read_meta(path: &Path) -> Result<CheckpointMeta> {
    let text = std::fs::read_to_string(path)?;
    Ok(serde_json::from_str(&text)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::GazeConfig;
    use crate::model::{build_model, GazeSession, Regime};
    use candle_core::{DType, Device, Tensor};

    fn predict(model: &dyn GazeModel, xs: &Tensor) -> Vec<Vec<f32>> {
        let mut session = GazeSession::new();
        model
            .forward(xs, Regime::Full, &mut session)
            .unwrap()
            .to_vec2::<f32>()
            .unwrap()
    }

    #[test]
    fn test_save_load_round_trip_restores_outputs() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("model.safetensors");
        let config = GazeConfig::test();
        let device = Device::Cpu;

        let source = build_model(&config, &device).unwrap();
        save(source.as_ref(), &path).unwrap();

        let target = build_model(&config, &device).unwrap();
        let xs = Tensor::randn(0.0f32, 1.0, (2, source.input_dim()), &device).unwrap();
        assert!(load(target.as_ref(), &path));
        assert_eq!(predict(source.as_ref(), &xs), predict(target.as_ref(), &xs));
    }

    #[test]
    fn test_missing_checkpoint_keeps_random_weights() {
        let config = GazeConfig::test();
        let model = build_model(&config, &Device::Cpu).unwrap();
        assert!(!load(model.as_ref(), "/nonexistent/model.safetensors"));
    }

    #[test]
    fn test_family_mismatch_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("model.safetensors");
        let device = Device::Cpu;

        let mut mlp_config = GazeConfig::test();
        mlp_config.model.family = ModelFamily::PcaMlp;
        let mlp = build_model(&mlp_config, &device).unwrap();
        save(mlp.as_ref(), &path).unwrap();

        let mut linear_config = GazeConfig::test();
        linear_config.model.family = ModelFamily::Linear;
        let linear = build_model(&linear_config, &device).unwrap();
        let before = {
            let xs = Tensor::zeros((1, linear.input_dim()), DType::F32, &device).unwrap();
            predict(linear.as_ref(), &xs)
        };
        assert!(!load(linear.as_ref(), &path));
        let xs = Tensor::zeros((1, linear.input_dim()), DType::F32, &device).unwrap();
        assert_eq!(before, predict(linear.as_ref(), &xs));
    }

    #[test]
    fn test_corrupt_blob_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("model.safetensors");
        let config = GazeConfig::test();
        let model = build_model(&config, &Device::Cpu).unwrap();

        save(model.as_ref(), &path).unwrap();
        std::fs::write(&path, b"garbage").unwrap();
        assert!(!load(model.as_ref(), &path));
    }
}
