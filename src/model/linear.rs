//! Linear baseline over raw flattened landmarks.

use candle_core::{DType, Device, Tensor};
use candle_nn::{linear, Linear, Module, VarBuilder, VarMap};

use crate::config::ModelFamily;
use crate::error::Result;

use super::{GazeModel, GazeSession, Regime};

/// Single affine map from raw landmarks to screen coordinates, tanh-bounded.
///
/// No reducer, no hidden layers. Useful as a sanity baseline and for
/// deployments where reduced features are unavailable.
pub struct LinearGaze {
    net: Linear,
    varmap: VarMap,
    input_dim: usize,
}

impl LinearGaze {
    pub fn new(input_dim: usize, device: &Device) -> Result<Self> {
        let varmap = VarMap::new();
        let vb = VarBuilder::from_varmap(&varmap, DType::F32, device);
        let net = linear(input_dim, 2, vb.pp("out"))?;
        Ok(Self {
            net,
            varmap,
            input_dim,
        })
    }
}

impl GazeModel for LinearGaze {
    fn forward(&self, xs: &Tensor, _regime: Regime, _session: &mut GazeSession) -> Result<Tensor> {
        Ok(self.net.forward(xs)?.tanh()?)
    }

    fn family(&self) -> ModelFamily {
        ModelFamily::Linear
    }

    fn input_dim(&self) -> usize {
        self.input_dim
    }

    fn var_map(&self) -> &VarMap {
        &self.varmap
    }
}
