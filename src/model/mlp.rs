//! PCA-MLP variant with a gated calibration branch.

use candle_core::{DType, Device, Tensor};
use candle_nn::{linear, ops::sigmoid, Linear, Module, VarBuilder, VarMap};

use crate::config::ModelFamily;
use crate::error::Result;

use super::{GazeModel, GazeSession, Regime};

/// MLP trunk over reduced features, with a calibration branch blended in
/// through a learned per-output sigmoid gate.
///
/// Trunk and calibration branch share the output projection; the gate reads
/// the trunk features, so blending adapts per frame. Output is tanh-bounded
/// screen coordinates.
pub struct PcaMlpGaze {
    trunk: Vec<Linear>,
    calibration: Vec<Linear>,
    head: Linear,
    gate: Linear,
    varmap: VarMap,
    input_dim: usize,
}

impl PcaMlpGaze {
    pub fn new(
        input_dim: usize,
        hidden_dim: usize,
        num_mlp_layers: usize,
        num_calibration_layers: usize,
        device: &Device,
    ) -> Result<Self> {
        let varmap = VarMap::new();
        let vb = VarBuilder::from_varmap(&varmap, DType::F32, device);

        let mut trunk = vec![linear(input_dim, hidden_dim, vb.pp("trunk_in"))?];
        for i in 0..num_mlp_layers {
            trunk.push(linear(hidden_dim, hidden_dim, vb.pp(format!("trunk_{i}")))?);
        }
        let mut calibration = Vec::with_capacity(num_calibration_layers);
        for i in 0..num_calibration_layers {
            calibration.push(linear(hidden_dim, hidden_dim, vb.pp(format!("calib_{i}")))?);
        }
        let head = linear(hidden_dim, 2, vb.pp("head"))?;
        let gate = linear(hidden_dim, 2, vb.pp("gate"))?;

        Ok(Self {
            trunk,
            calibration,
            head,
            gate,
            varmap,
            input_dim,
        })
    }
}

fn apply_relu_stack(layers: &[Linear], xs: &Tensor) -> Result<Tensor> {
    let mut h = xs.clone();
    for layer in layers {
        h = layer.forward(&h)?.relu()?;
    }
    Ok(h)
}

impl GazeModel for PcaMlpGaze {
    fn forward(&self, xs: &Tensor, _regime: Regime, _session: &mut GazeSession) -> Result<Tensor> {
        let h = apply_relu_stack(&self.trunk, xs)?;
        let h_calib = apply_relu_stack(&self.calibration, &h)?;

        let y_main = self.head.forward(&h)?;
        let y_calib = self.head.forward(&h_calib)?;

        // Per-output blend in (0, 1): 1 leans on the calibration branch.
        let g = sigmoid(&self.gate.forward(&h)?)?;
        let ones = Tensor::ones_like(&g)?;
        let y = g.mul(&y_calib)?.add(&ones.sub(&g)?.mul(&y_main)?)?;
        Ok(y.tanh()?)
    }

    fn family(&self) -> ModelFamily {
        ModelFamily::PcaMlp
    }

    fn input_dim(&self) -> usize {
        self.input_dim
    }

    fn var_map(&self) -> &VarMap {
        &self.varmap
    }
}
