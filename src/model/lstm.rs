//! PCA-LSTM streaming variant.

use candle_core::{DType, Device, Tensor};
use candle_nn::rnn::LSTMState;
use candle_nn::{linear, lstm, Linear, LSTMConfig, Module, VarBuilder, VarMap, LSTM, RNN};

use crate::config::ModelFamily;
use crate::error::{GazeError, Result};

use super::{GazeModel, GazeSession, Regime};

const HEAD_HIDDEN: usize = 64;

/// LSTM over reduced features with a small MLP head.
///
/// Full regime treats every frame independently: the recurrent state is
/// zeroed per batch, so the cell acts frame-local and batches shuffle
/// safely. Streaming regime consumes one frame at a time and carries the
/// state through the caller's [`GazeSession`], detached after each step so
/// gradients never flow across frame boundaries.
pub struct PcaLstmGaze {
    lstm: LSTM,
    fc1: Linear,
    fc2: Linear,
    varmap: VarMap,
    input_dim: usize,
}

impl PcaLstmGaze {
    pub fn new(input_dim: usize, hidden_dim: usize, device: &Device) -> Result<Self> {
        let varmap = VarMap::new();
        let vb = VarBuilder::from_varmap(&varmap, DType::F32, device);
        let lstm = lstm(input_dim, hidden_dim, LSTMConfig::default(), vb.pp("lstm"))?;
        let fc1 = linear(hidden_dim, HEAD_HIDDEN, vb.pp("fc1"))?;
        let fc2 = linear(HEAD_HIDDEN, 2, vb.pp("fc2"))?;
        Ok(Self {
            lstm,
            fc1,
            fc2,
            varmap,
            input_dim,
        })
    }

    fn head(&self, h: &Tensor) -> Result<Tensor> {
        let h = self.fc1.forward(h)?.relu()?;
        Ok(self.fc2.forward(&h)?.tanh()?)
    }
}

impl GazeModel for PcaLstmGaze {
    fn forward(&self, xs: &Tensor, regime: Regime, session: &mut GazeSession) -> Result<Tensor> {
        let (batch, _) = xs.dims2()?;
        match regime {
            Regime::Full => {
                let state = self.lstm.zero_state(batch)?;
                let state = self.lstm.step(xs, &state)?;
                self.head(state.h())
            }
            Regime::Streaming => {
                if batch != 1 {
                    return Err(GazeError::validation(
                        "batch of 1 in streaming regime",
                        format!("batch of {batch}"),
                    ));
                }
                let state = match session.state.take() {
                    Some(state) => state,
                    None => self.lstm.zero_state(1)?,
                };
                let next = self.lstm.step(xs, &state)?;
                let out = self.head(next.h())?;
                session.state = Some(LSTMState {
                    h: next.h().detach(),
                    c: next.c().detach(),
                });
                Ok(out)
            }
        }
    }

    fn family(&self) -> ModelFamily {
        ModelFamily::PcaLstm
    }

    fn input_dim(&self) -> usize {
        self.input_dim
    }

    fn is_recurrent(&self) -> bool {
        true
    }

    fn var_map(&self) -> &VarMap {
        &self.varmap
    }
}
