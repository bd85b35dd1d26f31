//! # pf-optimizer
//!
//! Hyperparameter search for the PM2.5 forecaster.
//!
//! Provides categorical search spaces, sweep strategies (grid, random, TPE),
//! trial and study tracking, and [`Pm25Optimizer`], which trains one fresh
//! LSTM per trial and keeps the configuration with the lowest validation loss.

mod forecaster;
mod search;
mod study;
mod trial;

pub use forecaster::{
    ArchitectureSearch, Pm25Optimizer, BATCH_SIZE_CHOICES, DROPOUT_CHOICES, EPOCH_CHOICES,
    LEARNING_RATE, NEURON_CHOICES, SECOND_LAYER_CHOICES,
};
pub use search::{
    GridSearch, ParameterDef, ParameterMapExt, ParameterValue, RandomSearch, SearchSpace,
    SearchStrategy, StrategyKind, TpeSearch,
};
pub use study::{OptimizationState, Study};
pub use trial::{
    Evaluation, ObjectiveDirection, OptimizationConfig, OptimizationId, Trial, TrialResult,
    TrialStatus,
};
