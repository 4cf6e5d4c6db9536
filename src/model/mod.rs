//! Model registry: gaze regression variants behind a capability trait.
//!
//! Each [`ModelFamily`](crate::config::ModelFamily) tag maps to exactly one
//! variant constructor; [`build_model`] is the single construction point.
//! All variants share the [`GazeModel`] trait: a forward pass over a batch
//! of (possibly reduced) feature rows producing `(batch, 2)` screen
//! coordinates in `[-1, 1]`.
//!
//! Recurrent streaming state lives outside the model in a [`GazeSession`],
//! so ownership and reset points are explicit rather than hidden in mutable
//! model buffers.

mod linear;
mod lstm;
mod mlp;

pub use linear::LinearGaze;
pub use lstm::PcaLstmGaze;
pub use mlp::PcaMlpGaze;

use candle_core::{Device, Tensor};
use candle_nn::rnn::LSTMState;
use candle_nn::VarMap;

use crate::config::{GazeConfig, ModelFamily};
use crate::error::Result;

/// Which training/inference regime a forward pass runs under.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Regime {
    /// Shuffled mini-batches, recurrent state zeroed per batch.
    Full,
    /// Single frames in arrival order, recurrent state carried across calls.
    Streaming,
}

/// Carried recurrent state for streaming inference and fine-tuning.
///
/// Owned by the caller and passed explicitly into every forward pass.
/// Non-recurrent variants ignore it. Reset at sequence boundaries, e.g.
/// when the user looks away and back.
#[derive(Debug, Default)]
pub struct GazeSession {
    pub(crate) state: Option<LSTMState>,
}

impl GazeSession {
    pub fn new() -> Self {
        Self::default()
    }

    /// Drop any carried recurrent state; the next streaming step starts
    /// from zeros.
    pub fn reset(&mut self) {
        self.state = None;
    }

    /// Whether a carried state is currently held.
    pub fn is_active(&self) -> bool {
        self.state.is_some()
    }
}

/// Capability trait shared by all gaze regression variants.
pub trait GazeModel {
    /// Run a batch `(batch, input_dim)` through the model, producing
    /// `(batch, 2)` coordinates in `[-1, 1]`.
    ///
    /// Streaming regime requires `batch == 1` on recurrent variants and
    /// updates `session` with detached state.
    fn forward(&self, xs: &Tensor, regime: Regime, session: &mut GazeSession) -> Result<Tensor>;

    /// The family this model was built from.
    fn family(&self) -> ModelFamily;

    /// Expected input width (reduced components or raw feature length).
    fn input_dim(&self) -> usize;

    /// Whether inputs must pass through the feature reducer first.
    fn requires_reducer(&self) -> bool {
        self.family().requires_reducer()
    }

    /// Whether the variant carries recurrent state across streaming calls.
    fn is_recurrent(&self) -> bool {
        false
    }

    /// Parameter store, for checkpointing and optimization.
    fn var_map(&self) -> &VarMap;
}

/// Construct the model variant selected by the configuration.
///
/// Input width is the reducer's component count for reduced families and
/// the raw flattened landmark length for the linear baseline.
pub fn build_model(config: &GazeConfig, device: &Device) -> Result<Box<dyn GazeModel>> {
    let model: Box<dyn GazeModel> = match config.model.family {
        ModelFamily::Linear => Box::new(LinearGaze::new(config.feature_len(), device)?),
        ModelFamily::PcaMlp => Box::new(PcaMlpGaze::new(
            config.model.components,
            config.model.hidden_dim,
            config.model.num_mlp_layers,
            config.model.num_calibration_layers,
            device,
        )?),
        ModelFamily::PcaLstm => Box::new(PcaLstmGaze::new(
            config.model.components,
            config.model.hidden_dim,
            device,
        )?),
    };
    tracing::info!(
        "built {} model, input width {}",
        model.family().tag(),
        model.input_dim()
    );
    Ok(model)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::GazeConfig;

    fn forward_shape(family: ModelFamily) {
        let mut config = GazeConfig::test();
        config.model.family = family;
        let device = Device::Cpu;
        let model = build_model(&config, &device).unwrap();
        let mut session = GazeSession::new();

        let xs = Tensor::zeros((3, model.input_dim()), candle_core::DType::F32, &device).unwrap();
        let ys = model.forward(&xs, Regime::Full, &mut session).unwrap();
        assert_eq!(ys.dims(), &[3, 2]);
        // Output bounded by the final tanh.
        let vals = ys.to_vec2::<f32>().unwrap();
        for row in vals {
            for v in row {
                assert!((-1.0..=1.0).contains(&v));
            }
        }
    }

    #[test]
    fn test_linear_forward_shape() {
        forward_shape(ModelFamily::Linear);
    }

    #[test]
    fn test_pca_mlp_forward_shape() {
        forward_shape(ModelFamily::PcaMlp);
    }

    #[test]
    fn test_pca_lstm_forward_shape() {
        forward_shape(ModelFamily::PcaLstm);
    }

    #[test]
    fn test_input_dim_follows_reducer_requirement() {
        let config = GazeConfig::test();
        let device = Device::Cpu;

        let mut linear = GazeConfig::test();
        linear.model.family = ModelFamily::Linear;
        let baseline = build_model(&linear, &device).unwrap();
        assert!(!baseline.requires_reducer());
        assert_eq!(baseline.input_dim(), linear.feature_len());

        let mut reduced = config;
        reduced.model.family = ModelFamily::PcaMlp;
        let mlp = build_model(&reduced, &device).unwrap();
        assert!(mlp.requires_reducer());
        assert_eq!(mlp.input_dim(), reduced.model.components);
    }

    #[test]
    fn test_session_reset() {
        let mut config = GazeConfig::test();
        config.model.family = ModelFamily::PcaLstm;
        let device = Device::Cpu;
        let model = build_model(&config, &device).unwrap();
        let mut session = GazeSession::new();
        assert!(!session.is_active());

        let xs = Tensor::zeros((1, model.input_dim()), candle_core::DType::F32, &device).unwrap();
        model
            .forward(&xs, Regime::Streaming, &mut session)
            .unwrap();
        assert!(session.is_active());
        session.reset();
        assert!(!session.is_active());
    }
}
