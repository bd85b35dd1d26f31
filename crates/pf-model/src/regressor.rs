//! Sequence-to-value regressor: LSTM body, optional dropout and second LSTM,
//! dense output head.

use candle_core::{DType, Device, Tensor, Var};
use candle_nn::ops::dropout;
use candle_nn::{Linear, Module};
use pf_types::{DataError, PfError, PfResult, TrainingError};
use rand::rngs::StdRng;
use rand::SeedableRng;
use serde::{Deserialize, Serialize};

use crate::init::glorot_uniform;
use crate::lstm::ReluLstm;

/// Architecture of one regressor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LstmRegressorConfig {
    /// Window length the model accepts.
    pub time_steps: usize,
    /// Features per time step.
    pub features: usize,
    /// Units in the first LSTM layer.
    pub units: usize,
    /// Width of the dense output layer.
    pub output_units: usize,
    /// Dropout after the first LSTM layer, applied only while fitting.
    pub dropout: Option<f64>,
    /// Units of an optional second LSTM layer.
    pub second_layer_units: Option<usize>,
}

impl LstmRegressorConfig {
    pub fn new(time_steps: usize, features: usize, units: usize, output_units: usize) -> Self {
        Self {
            time_steps,
            features,
            units,
            output_units,
            dropout: None,
            second_layer_units: None,
        }
    }

    pub fn with_dropout(mut self, rate: f64) -> Self {
        self.dropout = Some(rate);
        self
    }

    pub fn with_second_layer(mut self, units: usize) -> Self {
        self.second_layer_units = Some(units);
        self
    }

    pub fn validate(&self) -> PfResult<()> {
        let dims = [
            ("time_steps", self.time_steps),
            ("features", self.features),
            ("units", self.units),
            ("output_units", self.output_units),
        ];
        for (name, value) in dims {
            if value == 0 {
                return Err(invalid(format!("{name} must be positive")));
            }
        }
        if let Some(rate) = self.dropout {
            if !(0.0..1.0).contains(&rate) {
                return Err(invalid(format!("dropout must be in [0, 1), got {rate}")));
            }
        }
        if self.second_layer_units == Some(0) {
            return Err(invalid("second layer units must be positive".to_string()));
        }
        Ok(())
    }

    /// Builds a fresh, untrained model. Weight init is driven by `seed`.
    pub fn build(&self, seed: u64, device: &Device) -> PfResult<LstmRegressor> {
        self.validate()?;
        let mut rng = StdRng::seed_from_u64(seed);

        let lstm = ReluLstm::new(self.features, self.units, &mut rng, device)?;
        let second = match self.second_layer_units {
            Some(units) => Some(ReluLstm::new(self.units, units, &mut rng, device)?),
            None => None,
        };
        let head_in = self.second_layer_units.unwrap_or(self.units);
        let (head, head_vars) = dense_head(head_in, self.output_units, &mut rng, device)?;

        Ok(LstmRegressor {
            config: self.clone(),
            lstm,
            second,
            head,
            head_vars,
            device: device.clone(),
        })
    }
}

fn invalid(message: String) -> PfError {
    TrainingError::InvalidConfig { message }.into()
}

/// Dense output layer. The weight is stored `(outputs, inputs)` as `Linear` expects;
/// the returned vars share storage with it.
fn dense_head(
    inputs: usize,
    outputs: usize,
    rng: &mut StdRng,
    device: &Device,
) -> candle_core::Result<(Linear, Vec<Var>)> {
    let weight = Tensor::from_vec(glorot_uniform(rng, inputs, outputs), (outputs, inputs), device)?;
    let weight = Var::from_tensor(&weight)?;
    let bias = Var::from_tensor(&Tensor::zeros(outputs, DType::F32, device)?)?;
    let linear = Linear::new(weight.as_tensor().clone(), Some(bias.as_tensor().clone()));
    Ok((linear, vec![weight, bias]))
}

/// A built regressor. Every trial owns exactly one and drops it afterwards.
#[derive(Debug, Clone)]
pub struct LstmRegressor {
    config: LstmRegressorConfig,
    lstm: ReluLstm,
    second: Option<ReluLstm>,
    head: Linear,
    head_vars: Vec<Var>,
    device: Device,
}

impl LstmRegressor {
    pub fn config(&self) -> &LstmRegressorConfig {
        &self.config
    }

    pub fn device(&self) -> &Device {
        &self.device
    }

    /// `(time_steps, features)` accepted by the input layer.
    pub fn input_shape(&self) -> (usize, usize) {
        (self.config.time_steps, self.config.features)
    }

    pub fn vars(&self) -> Vec<Var> {
        let mut vars = self.lstm.vars();
        if let Some(second) = &self.second {
            vars.extend(second.vars());
        }
        vars.extend(self.head_vars.iter().cloned());
        vars
    }

    pub fn parameter_count(&self) -> usize {
        self.lstm.parameter_count()
            + self.second.as_ref().map_or(0, ReluLstm::parameter_count)
            + self.head.weight().elem_count()
            + self.head.bias().map_or(0, Tensor::elem_count)
    }

    /// Fails unless `(time_steps, features)` matches the input layer.
    pub fn check_input(&self, which: &str, dims: (usize, usize, usize)) -> PfResult<()> {
        let (n, t, f) = dims;
        if (t, f) != self.input_shape() {
            let (et, ef) = self.input_shape();
            return Err(DataError::ShapeMismatch {
                which: which.to_string(),
                expected: format!("(_, {et}, {ef})"),
                actual: format!("({n}, {t}, {f})"),
            }
            .into());
        }
        Ok(())
    }

    /// `xs` is `(batch, time_steps, features)`, output is `(batch, output_units)`.
    pub fn forward(&self, xs: &Tensor, train: bool) -> PfResult<Tensor> {
        self.check_input("model input", xs.dims3()?)?;
        let rate = self.config.dropout.filter(|r| train && *r > 0.0);

        let top = match &self.second {
            Some(second) => {
                let mut seq = self.lstm.seq_output(xs)?;
                if let Some(rate) = rate {
                    seq = dropout(&seq, rate as f32)?;
                }
                last_hidden(second, &seq)?
            }
            None => {
                let mut h = last_hidden(&self.lstm, xs)?;
                if let Some(rate) = rate {
                    h = dropout(&h, rate as f32)?;
                }
                h
            }
        };

        Ok(self.head.forward(&top)?)
    }
}

fn last_hidden(layer: &ReluLstm, xs: &Tensor) -> PfResult<Tensor> {
    layer
        .seq(xs)?
        .pop()
        .map(|state| state.h)
        .ok_or_else(|| PfError::Internal("LSTM ran over zero time steps".to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn input_layer_matches_window_shape() {
        let model = LstmRegressorConfig::new(3, 5, 8, 1)
            .build(1, &Device::Cpu)
            .unwrap();
        assert_eq!(model.input_shape(), (3, 5));

        let xs = Tensor::zeros((2, 3, 5), DType::F32, &Device::Cpu).unwrap();
        let out = model.forward(&xs, false).unwrap();
        assert_eq!(out.dims(), &[2, 1]);
    }

    #[test]
    fn forward_rejects_wrong_feature_count() {
        let model = LstmRegressorConfig::new(3, 5, 8, 1)
            .build(1, &Device::Cpu)
            .unwrap();
        let xs = Tensor::zeros((2, 3, 4), DType::F32, &Device::Cpu).unwrap();
        assert!(matches!(
            model.forward(&xs, false),
            Err(PfError::Data(DataError::ShapeMismatch { .. }))
        ));
    }

    #[test]
    fn parameter_count_single_layer() {
        let model = LstmRegressorConfig::new(3, 5, 10, 1)
            .build(0, &Device::Cpu)
            .unwrap();
        // LSTM: 4 * 10 * (5 + 10 + 1), dense: 10 * 1 + 1
        assert_eq!(model.parameter_count(), 640 + 11);
        assert_eq!(model.vars().len(), 5);
    }

    #[test]
    fn head_weight_is_out_by_in() {
        let model = LstmRegressorConfig::new(3, 5, 10, 2)
            .build(0, &Device::Cpu)
            .unwrap();
        assert_eq!(model.head.weight().dims(), &[2, 10]);
        assert_eq!(model.head.bias().map(|b| b.dims().to_vec()), Some(vec![2]));
        assert_eq!(model.parameter_count(), 4 * 10 * (5 + 10 + 1) + 10 * 2 + 2);
    }

    #[test]
    fn second_layer_feeds_head() {
        let model = LstmRegressorConfig::new(4, 2, 10, 3)
            .with_second_layer(50)
            .with_dropout(0.2)
            .build(0, &Device::Cpu)
            .unwrap();
        assert_eq!(model.vars().len(), 8);

        let xs = Tensor::ones((6, 4, 2), DType::F32, &Device::Cpu).unwrap();
        assert_eq!(model.forward(&xs, true).unwrap().dims(), &[6, 3]);
        assert_eq!(model.forward(&xs, false).unwrap().dims(), &[6, 3]);
    }

    #[test]
    fn same_seed_same_initial_output() {
        let cfg = LstmRegressorConfig::new(3, 5, 8, 1);
        let xs = Tensor::ones((1, 3, 5), DType::F32, &Device::Cpu).unwrap();
        let a = cfg.build(9, &Device::Cpu).unwrap().forward(&xs, false).unwrap();
        let b = cfg.build(9, &Device::Cpu).unwrap().forward(&xs, false).unwrap();
        assert_eq!(
            a.to_vec2::<f32>().unwrap(),
            b.to_vec2::<f32>().unwrap()
        );
    }

    #[test]
    fn invalid_configs_are_rejected() {
        assert!(LstmRegressorConfig::new(3, 5, 0, 1).validate().is_err());
        assert!(LstmRegressorConfig::new(3, 5, 8, 1)
            .with_dropout(1.0)
            .validate()
            .is_err());
        assert!(LstmRegressorConfig::new(3, 5, 8, 1)
            .with_second_layer(0)
            .validate()
            .is_err());
    }
}
