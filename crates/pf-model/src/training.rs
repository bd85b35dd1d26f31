//! Mini-batch Adam training and MSE evaluation.

use candle_core::{Device, Tensor};
use candle_nn::{loss, AdamW, Optimizer, ParamsAdamW};
use ndarray::{Array2, Array3};
use pf_types::{DatasetSplit, PfResult, TrainingError};
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::regressor::LstmRegressor;

/// Optimizer and loop settings for one `fit` call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrainingConfig {
    pub learning_rate: f64,
    pub epochs: usize,
    pub batch_size: usize,
    /// Reshuffle the training samples at the start of every epoch.
    pub shuffle: bool,
    pub seed: u64,
    pub beta1: f64,
    pub beta2: f64,
    pub epsilon: f64,
}

impl Default for TrainingConfig {
    fn default() -> Self {
        Self {
            learning_rate: 0.001,
            epochs: 1,
            batch_size: 32,
            shuffle: true,
            seed: 0,
            beta1: 0.9,
            beta2: 0.999,
            epsilon: 1e-7,
        }
    }
}

impl TrainingConfig {
    pub fn new(epochs: usize, batch_size: usize) -> Self {
        Self {
            epochs,
            batch_size,
            ..Self::default()
        }
    }

    pub fn with_learning_rate(mut self, lr: f64) -> Self {
        self.learning_rate = lr;
        self
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }

    pub fn with_shuffle(mut self, shuffle: bool) -> Self {
        self.shuffle = shuffle;
        self
    }

    pub fn validate(&self) -> PfResult<()> {
        if self.epochs == 0 {
            return Err(invalid("epochs must be positive"));
        }
        if self.batch_size == 0 {
            return Err(invalid("batch_size must be positive"));
        }
        if !(self.learning_rate.is_finite() && self.learning_rate > 0.0) {
            return Err(invalid("learning_rate must be a positive number"));
        }
        Ok(())
    }

    fn adam(&self) -> ParamsAdamW {
        // Plain Adam: decoupled weight decay switched off.
        ParamsAdamW {
            lr: self.learning_rate,
            beta1: self.beta1,
            beta2: self.beta2,
            eps: self.epsilon,
            weight_decay: 0.0,
        }
    }
}

fn invalid(message: &str) -> pf_types::PfError {
    TrainingError::InvalidConfig {
        message: message.to_string(),
    }
    .into()
}

/// Per-epoch losses recorded by `fit`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TrainingHistory {
    pub loss: Vec<f64>,
    pub val_loss: Vec<f64>,
}

impl TrainingHistory {
    pub fn epochs(&self) -> usize {
        self.loss.len()
    }

    pub fn final_loss(&self) -> Option<f64> {
        self.loss.last().copied()
    }

    pub fn final_val_loss(&self) -> Option<f64> {
        self.val_loss.last().copied()
    }
}

pub fn inputs_tensor(inputs: &Array3<f32>, device: &Device) -> PfResult<Tensor> {
    let data: Vec<f32> = inputs.iter().copied().collect();
    Ok(Tensor::from_vec(data, inputs.dim(), device)?)
}

pub fn targets_tensor(targets: &Array2<f32>, device: &Device) -> PfResult<Tensor> {
    let data: Vec<f32> = targets.iter().copied().collect();
    Ok(Tensor::from_vec(data, targets.dim(), device)?)
}

impl LstmRegressor {
    /// Trains on `split.train_*`. The validation arrays are only scored after
    /// each epoch and never drive an update.
    pub fn fit(&mut self, split: &DatasetSplit, config: &TrainingConfig) -> PfResult<TrainingHistory> {
        config.validate()?;
        self.check_input("train_inputs", split.train_inputs.dim())?;
        self.check_input("val_inputs", split.val_inputs.dim())?;

        let device = self.device().clone();
        let x_train = inputs_tensor(&split.train_inputs, &device)?;
        let y_train = targets_tensor(&split.train_targets, &device)?;
        let x_val = inputs_tensor(&split.val_inputs, &device)?;
        let y_val = targets_tensor(&split.val_targets, &device)?;

        let samples = split.train_len();
        let mut optimizer = AdamW::new(self.vars(), config.adam())?;
        let mut rng = StdRng::seed_from_u64(config.seed);
        let mut order: Vec<u32> = (0..samples as u32).collect();
        let mut history = TrainingHistory::default();

        for epoch in 0..config.epochs {
            if config.shuffle {
                order.shuffle(&mut rng);
            }

            let mut weighted_loss = 0.0;
            for batch in order.chunks(config.batch_size) {
                let idx = Tensor::from_slice(batch, batch.len(), &device)?;
                let xb = x_train.index_select(&idx, 0)?;
                let yb = y_train.index_select(&idx, 0)?;

                let predictions = self.forward(&xb, true)?;
                let batch_loss = loss::mse(&predictions, &yb)?;
                optimizer.backward_step(&batch_loss)?;

                weighted_loss += batch_loss.to_scalar::<f32>()? as f64 * batch.len() as f64;
            }

            let train_loss = weighted_loss / samples as f64;
            let val_loss = self.mse(&x_val, &y_val)?;
            debug!(epoch, train_loss, val_loss, "epoch finished");
            history.loss.push(train_loss);
            history.val_loss.push(val_loss);
        }

        Ok(history)
    }

    /// Mean squared error over the whole array, inference mode.
    pub fn evaluate(&self, inputs: &Array3<f32>, targets: &Array2<f32>) -> PfResult<f64> {
        self.check_input("evaluation inputs", inputs.dim())?;
        let device = self.device().clone();
        let xs = inputs_tensor(inputs, &device)?;
        let ys = targets_tensor(targets, &device)?;
        self.mse(&xs, &ys)
    }

    fn mse(&self, xs: &Tensor, ys: &Tensor) -> PfResult<f64> {
        let predictions = self.forward(xs, false)?;
        let value = loss::mse(&predictions, ys)?.to_scalar::<f32>()?;
        Ok(value as f64)
    }
}
