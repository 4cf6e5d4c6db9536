//! Incremental gaze regression from facial landmarks.
//!
//! This crate learns a mapping from per-frame facial-landmark feature
//! vectors to a 2D screen-gaze coordinate while serving predictions,
//! continuously absorbing labeled samples from a live client. It provides:
//! - A bounded ring-buffer sample store with crash-tolerant persistence
//!   and capacity-migration load semantics
//! - A fit-once, deterministic PCA feature reducer
//! - A model registry with linear, gated-MLP, and streaming-LSTM variants
//!   over candle
//! - A training scheduler with two regimes: shuffled full-batch retraining
//!   and single-step streaming fine-tuning with carried recurrent state
//! - A blocking, single-threaded prediction-service orchestrator
//!
//! # Example
//!
//! ```no_run
//! use gazetrain_rs::{GazeConfig, PredictionService};
//!
//! let config = GazeConfig::from_file("cache/config.json");
//! let mut service = PredictionService::new(config).unwrap();
//! let frame = vec![0.0f32; 478 * 3];
//! let response = service.predict(frame, Some([0.25, -0.1])).unwrap();
//! println!("gaze at ({}, {})", response.gaze.x, response.gaze.y);
//! ```

pub mod checkpoint;
pub mod config;
pub mod dataset;
pub mod error;
pub mod model;
pub mod optimizer;
pub mod reducer;
pub mod scheduler;
pub mod service;
pub mod trainer;

pub use config::{DeviceKind, GazeConfig, ModelFamily};
pub use dataset::{RingBufferDataset, Sample};
pub use error::{GazeError, Result};
pub use model::{build_model, GazeModel, GazeSession, Regime};
pub use reducer::FeatureReducer;
pub use service::{GazePoint, PredictionResponse, PredictionService, SaveOutcome, SaveStatus};
pub use trainer::{LossReport, Trainer};

/// Prelude for convenient imports
pub mod prelude {
    pub use crate::config::{GazeConfig, ModelFamily};
    pub use crate::dataset::{RingBufferDataset, Sample};
    pub use crate::error::{GazeError, Result};
    pub use crate::model::{build_model, GazeModel, GazeSession, Regime};
    pub use crate::reducer::FeatureReducer;
    pub use crate::service::{PredictionResponse, PredictionService};
    pub use crate::trainer::{LossReport, Trainer};
}
