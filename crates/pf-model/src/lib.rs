//! # pf-model
//!
//! LSTM regressor for PM2.5 windows on top of candle: model construction,
//! mini-batch Adam training with per-epoch validation, and MSE evaluation.

mod init;
mod lstm;
mod regressor;
mod training;

pub use candle_core::Device;
pub use lstm::{LstmState, ReluLstm};
pub use regressor::{LstmRegressor, LstmRegressorConfig};
pub use training::{inputs_tensor, targets_tensor, TrainingConfig, TrainingHistory};
