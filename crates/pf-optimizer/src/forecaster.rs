//! Hyperparameter search for the PM2.5 LSTM forecaster.
//!
//! Every trial samples `neurons`, `epochs` and `batch_size`, builds a fresh
//! single-layer relu LSTM followed by a dense head, trains it with Adam on the
//! training arrays and reports the validation MSE. The study keeps the lowest.

use pf_model::{Device, LstmRegressor, LstmRegressorConfig, TrainingConfig};
use pf_types::{DatasetSplit, PfResult, TrainingError};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::search::{ParameterMapExt, SearchSpace, StrategyKind};
use crate::study::Study;
use crate::trial::{Evaluation, ObjectiveDirection, OptimizationConfig, Trial};

pub const NEURON_CHOICES: [i64; 3] = [8, 10, 50];
pub const EPOCH_CHOICES: [i64; 3] = [100, 50, 30];
pub const BATCH_SIZE_CHOICES: [i64; 4] = [32, 10, 72, 100];
pub const DROPOUT_CHOICES: [f64; 3] = [0.0, 0.1, 0.2];
pub const SECOND_LAYER_CHOICES: [i64; 3] = [10, 50, 100];
pub const LEARNING_RATE: f64 = 0.001;

/// Optional layers that widen the search space. Both are off by default.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ArchitectureSearch {
    /// Candidate dropout rates after the first LSTM layer (`"dropout"`).
    pub dropout: Option<Vec<f64>>,
    /// Candidate unit counts for a second LSTM layer (`"neurons_2"`).
    pub second_layer: Option<Vec<i64>>,
}

impl ArchitectureSearch {
    pub fn with_dropout(mut self, choices: &[f64]) -> Self {
        self.dropout = Some(choices.to_vec());
        self
    }

    pub fn with_second_layer(mut self, choices: &[i64]) -> Self {
        self.second_layer = Some(choices.to_vec());
        self
    }
}

#[derive(Debug, Clone)]
pub struct Pm25Optimizer {
    input_dim: usize,
    n_trials: usize,
    output_nodes: usize,
    architecture: ArchitectureSearch,
    strategy: StrategyKind,
    seed: Option<u64>,
    device: Device,
}

impl Pm25Optimizer {
    /// Stores the configuration only.
    pub fn new(input_dim: usize, n_trials: usize, output_nodes: usize) -> Self {
        Self {
            input_dim,
            n_trials,
            output_nodes,
            architecture: ArchitectureSearch::default(),
            strategy: StrategyKind::default(),
            seed: None,
            device: Device::Cpu,
        }
    }

    pub fn with_architecture(mut self, architecture: ArchitectureSearch) -> Self {
        self.architecture = architecture;
        self
    }

    pub fn with_strategy(mut self, strategy: StrategyKind) -> Self {
        self.strategy = strategy;
        self
    }

    /// Fixes both the sampler and the per-trial weight init.
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = Some(seed);
        self
    }

    pub fn with_device(mut self, device: Device) -> Self {
        self.device = device;
        self
    }

    pub fn n_trials(&self) -> usize {
        self.n_trials
    }

    pub fn search_space(&self) -> SearchSpace {
        let mut space = SearchSpace::new()
            .add_choice("neurons", NEURON_CHOICES)
            .add_choice("epochs", EPOCH_CHOICES)
            .add_choice("batch_size", BATCH_SIZE_CHOICES);
        if let Some(choices) = &self.architecture.dropout {
            space = space.add_choice("dropout", choices.iter().copied());
        }
        if let Some(choices) = &self.architecture.second_layer {
            space = space.add_choice("neurons_2", choices.iter().copied());
        }
        space
    }

    pub fn config(&self) -> OptimizationConfig {
        OptimizationConfig::new("pm25_lstm".to_string(), self.search_space(), self.strategy)
            .with_n_trials(self.n_trials)
            .with_objective("val_loss", ObjectiveDirection::Minimize)
            .with_seed(self.seed)
    }

    /// Builds an untrained model for `trial` shaped after the training windows.
    pub fn create_model(
        &self,
        trial: &Trial,
        split: &DatasetSplit,
        seed: u64,
    ) -> PfResult<LstmRegressor> {
        let params = &trial.parameters;
        let mut config = LstmRegressorConfig::new(
            split.time_steps(),
            split.features(),
            positive(params.int("neurons")?, "neurons")?,
            self.output_nodes,
        );
        if self.architecture.dropout.is_some() {
            config = config.with_dropout(params.float("dropout")?);
        }
        if self.architecture.second_layer.is_some() {
            config = config.with_second_layer(positive(params.int("neurons_2")?, "neurons_2")?);
        }
        config.build(seed, &self.device)
    }

    /// One trial: build, fit, evaluate on the validation arrays.
    pub fn objective(&self, trial: &Trial, split: &DatasetSplit, seed: u64) -> PfResult<Evaluation> {
        let mut model = self.create_model(trial, split, seed)?;

        let params = &trial.parameters;
        let training = TrainingConfig::new(
            positive(params.int("epochs")?, "epochs")?,
            positive(params.int("batch_size")?, "batch_size")?,
        )
        .with_learning_rate(LEARNING_RATE)
        .with_seed(seed);

        debug!(
            "Trial {}: {} trainable parameters",
            trial.trial_number,
            model.parameter_count()
        );
        let history = model.fit(split, &training)?;
        let loss = model.evaluate(&split.val_inputs, &split.val_targets)?;

        Ok(Evaluation::new(loss)
            .with_metric("train_loss", history.final_loss())
            .with_metric("epoch_val_loss", history.final_val_loss()))
    }

    /// Runs the search over `split` and returns the completed study.
    pub fn optimize(&self, split: &DatasetSplit) -> PfResult<Study> {
        split.validate(self.input_dim, self.output_nodes)?;
        info!(
            "Optimizing PM2.5 forecaster: {} train / {} val windows of shape ({}, {})",
            split.train_len(),
            split.val_len(),
            split.time_steps(),
            split.features()
        );

        let base_seed = self.seed.unwrap_or_else(rand::random::<u64>);
        let mut study = Study::new(self.config());
        study.optimize(|trial| {
            let seed = base_seed.wrapping_add(trial.trial_number as u64);
            self.objective(trial, split, seed)
        })?;

        let best = study.best_params()?;
        println!(
            "Best hyperparameters: {}",
            study.config.search_space.describe(best)
        );
        Ok(study)
    }
}

fn positive(value: i64, name: &str) -> PfResult<usize> {
    usize::try_from(value)
        .ok()
        .filter(|v| *v > 0)
        .ok_or_else(|| {
            TrainingError::InvalidConfig {
                message: format!("{name} must be a positive integer, got {value}"),
            }
            .into()
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::search::ParameterValue;
    use ndarray::{Array2, Array3};
    use pf_types::{DataError, PfError};
    use std::collections::HashMap;
    use uuid::Uuid;

    fn split(n_train: usize, n_val: usize, features: usize) -> DatasetSplit {
        let x = |n: usize| {
            Array3::from_shape_fn((n, 3, features), |(i, t, f)| {
                ((i * 7 + t * 3 + f) % 11) as f32 / 11.0
            })
        };
        let y = |n: usize| Array2::from_shape_fn((n, 1), |(i, _)| (i % 5) as f32 / 5.0);
        DatasetSplit::new(x(n_train), y(n_train), x(n_val), y(n_val))
    }

    fn trial(pairs: &[(&str, ParameterValue)]) -> Trial {
        let params: HashMap<String, ParameterValue> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.clone()))
            .collect();
        Trial::new(Uuid::new_v4(), 0, params)
    }

    #[test]
    fn default_space_matches_the_forecaster() {
        let space = Pm25Optimizer::new(5, 3, 1).search_space();
        let names: Vec<&str> = space.names().collect();
        assert_eq!(names, ["neurons", "epochs", "batch_size"]);
        assert_eq!(space.grid_size(), Some(36));
    }

    #[test]
    fn optional_layers_extend_the_space() {
        let arch = ArchitectureSearch::default()
            .with_dropout(&DROPOUT_CHOICES)
            .with_second_layer(&SECOND_LAYER_CHOICES);
        let space = Pm25Optimizer::new(5, 3, 1).with_architecture(arch).search_space();
        let names: Vec<&str> = space.names().collect();
        assert_eq!(names, ["neurons", "epochs", "batch_size", "dropout", "neurons_2"]);
    }

    #[test]
    fn model_input_follows_training_windows() {
        let optimizer = Pm25Optimizer::new(5, 1, 1);
        let data = split(20, 5, 5);
        let t = trial(&[("neurons", ParameterValue::Int(10))]);
        let model = optimizer.create_model(&t, &data, 0).unwrap();
        assert_eq!(model.input_shape(), (3, 5));
        assert_eq!(model.config().units, 10);
        assert_eq!(model.config().dropout, None);
        assert_eq!(model.config().second_layer_units, None);
    }

    #[test]
    fn models_are_built_on_the_configured_device() {
        let optimizer = Pm25Optimizer::new(5, 1, 1).with_device(Device::Cpu);
        let t = trial(&[("neurons", ParameterValue::Int(8))]);
        let model = optimizer.create_model(&t, &split(20, 5, 5), 0).unwrap();
        assert!(matches!(model.device(), Device::Cpu));
    }

    #[test]
    fn optional_layers_reach_the_model() {
        let arch = ArchitectureSearch::default()
            .with_dropout(&DROPOUT_CHOICES)
            .with_second_layer(&SECOND_LAYER_CHOICES);
        let optimizer = Pm25Optimizer::new(5, 1, 1).with_architecture(arch);
        let t = trial(&[
            ("neurons", ParameterValue::Int(8)),
            ("dropout", ParameterValue::Float(0.1)),
            ("neurons_2", ParameterValue::Int(10)),
        ]);
        let model = optimizer.create_model(&t, &split(20, 5, 5), 0).unwrap();
        assert_eq!(model.config().dropout, Some(0.1));
        assert_eq!(model.config().second_layer_units, Some(10));
    }

    #[test]
    fn objective_returns_finite_validation_loss() {
        let optimizer = Pm25Optimizer::new(5, 1, 1);
        let t = trial(&[
            ("neurons", ParameterValue::Int(8)),
            ("epochs", ParameterValue::Int(30)),
            ("batch_size", ParameterValue::Int(10)),
        ]);
        let eval = optimizer.objective(&t, &split(20, 5, 5), 1).unwrap();
        assert!(eval.objective.is_finite() && eval.objective >= 0.0);
        assert!(eval.metrics.contains_key("train_loss"));
        assert!(eval.metrics.contains_key("epoch_val_loss"));
    }

    #[test]
    fn missing_parameter_is_reported() {
        let optimizer = Pm25Optimizer::new(5, 1, 1);
        let t = trial(&[("neurons", ParameterValue::Int(8))]);
        let err = optimizer.objective(&t, &split(20, 5, 5), 1).unwrap_err();
        assert!(err.to_string().contains("epochs"));
    }

    #[test]
    fn mismatched_features_fail_the_search() {
        let optimizer = Pm25Optimizer::new(5, 2, 1).with_seed(3);
        let err = optimizer.optimize(&split(20, 5, 4)).unwrap_err();
        assert!(matches!(err, PfError::Data(DataError::ShapeMismatch { .. })));
    }

    #[test]
    fn empty_training_set_fails_the_search() {
        let optimizer = Pm25Optimizer::new(5, 2, 1);
        let err = optimizer.optimize(&split(0, 5, 5)).unwrap_err();
        assert!(matches!(err, PfError::Data(DataError::Empty { .. })));
    }

    #[test]
    fn non_positive_values_are_rejected() {
        assert!(positive(0, "epochs").is_err());
        assert!(positive(-3, "epochs").is_err());
        assert_eq!(positive(72, "batch_size").unwrap(), 72);
    }
}
