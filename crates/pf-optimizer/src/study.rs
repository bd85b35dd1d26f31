//! A study: one optimization run, its trials and the best result so far.

use chrono::{DateTime, Utc};
use pf_types::{PfResult, SearchError};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::ops::ControlFlow;
use std::time::Instant;
use tracing::{info, warn};

use crate::search::{
    GridSearch, ParameterValue, RandomSearch, SearchStrategy, StrategyKind, TpeSearch,
};
use crate::trial::{
    Evaluation, OptimizationConfig, OptimizationId, Trial, TrialResult, TrialStatus,
};

/// Lifecycle state for an optimization run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OptimizationState {
    Pending,
    Running,
    Completed,
    Failed,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Study {
    pub id: OptimizationId,
    pub config: OptimizationConfig,
    pub state: OptimizationState,
    pub trials: Vec<Trial>,
    pub best_trial: Option<TrialResult>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
    pub error: Option<String>,
}

impl Study {
    pub fn new(config: OptimizationConfig) -> Self {
        Self {
            id: config.id,
            config,
            state: OptimizationState::Pending,
            trials: Vec::new(),
            best_trial: None,
            started_at: None,
            finished_at: None,
            error: None,
        }
    }

    pub fn mark_running(&mut self) {
        self.state = OptimizationState::Running;
        self.started_at = Some(Utc::now());
    }

    pub fn mark_completed(&mut self) {
        self.state = OptimizationState::Completed;
        self.finished_at = Some(Utc::now());
    }

    pub fn mark_failed(&mut self, error: String) {
        self.state = OptimizationState::Failed;
        self.finished_at = Some(Utc::now());
        self.error = Some(error);
    }

    /// Update the best trial if `result` improves on the current best.
    pub fn update_best(&mut self, result: &TrialResult) {
        let improves = match &self.best_trial {
            None => true,
            Some(current) => self
                .config
                .direction
                .improves(result.objective, current.objective),
        };
        if improves {
            self.best_trial = Some(result.clone());
        }
    }

    pub fn trials(&self) -> &[Trial] {
        &self.trials
    }

    pub fn trials_completed(&self) -> usize {
        self.count(TrialStatus::Completed)
    }

    pub fn trials_failed(&self) -> usize {
        self.count(TrialStatus::Failed)
    }

    fn count(&self, status: TrialStatus) -> usize {
        self.trials.iter().filter(|t| t.status == status).count()
    }

    /// Objective values of completed trials, in trial order.
    pub fn objective_values(&self) -> Vec<f64> {
        self.trials.iter().filter_map(Trial::objective).collect()
    }

    pub fn best_params(&self) -> Result<&HashMap<String, ParameterValue>, SearchError> {
        self.best_trial
            .as_ref()
            .map(|best| &best.parameters)
            .ok_or(SearchError::NoCompletedTrials)
    }

    pub fn best_value(&self) -> Result<f64, SearchError> {
        self.best_trial
            .as_ref()
            .map(|best| best.objective)
            .ok_or(SearchError::NoCompletedTrials)
    }

    /// Runs `config.n_trials` trials with the configured strategy.
    pub fn optimize<F>(&mut self, objective: F) -> PfResult<()>
    where
        F: FnMut(&Trial) -> PfResult<Evaluation>,
    {
        let space = self.config.search_space.clone();
        let seed = self.config.seed;
        match self.config.strategy {
            StrategyKind::Grid => self.optimize_with(&mut GridSearch::new(space), objective),
            StrategyKind::Random => {
                self.optimize_with(&mut RandomSearch::new(space, seed), objective)
            }
            StrategyKind::Tpe => {
                let tpe = TpeSearch::new(space, self.config.direction, seed)
                    .with_startup_trials(self.config.startup_trials);
                self.optimize_tpe(&tpe, objective)
            }
        }
    }

    /// Runs trials one after another, each fully evaluated before the next is
    /// suggested. An objective error stops the run and is returned as is.
    /// A non-finite objective marks that trial failed and the run continues.
    pub fn optimize_with<F>(
        &mut self,
        strategy: &mut dyn SearchStrategy,
        mut objective: F,
    ) -> PfResult<()>
    where
        F: FnMut(&Trial) -> PfResult<Evaluation>,
    {
        self.begin(strategy.name())?;

        for trial_number in self.trials.len()..self.config.n_trials {
            let Some(params) = strategy.suggest(1).pop() else {
                info!("Search space exhausted after {} trials", trial_number);
                break;
            };
            if let Some(value) = self.run_trial(params, &mut objective)? {
                if let Some(last) = self.trials.last() {
                    strategy.report(&last.parameters, value);
                }
            }
        }

        self.finish();
        Ok(())
    }

    /// Same contract as [`Study::optimize_with`], with `tpe` proposing every
    /// trial. Failed trials are discarded before they reach the sampler.
    pub fn optimize_tpe<F>(&mut self, tpe: &TpeSearch, mut objective: F) -> PfResult<()>
    where
        F: FnMut(&Trial) -> PfResult<Evaluation>,
    {
        self.begin("tpe")?;

        let remaining = self.config.n_trials.saturating_sub(self.trials.len());
        let mut failure = None;
        let sampled = tpe.run(remaining, |params| {
            match self.run_trial(params, &mut objective) {
                Ok(value) => ControlFlow::Continue(value),
                Err(err) => {
                    failure = Some(err);
                    ControlFlow::Break(())
                }
            }
        });
        if let Some(err) = failure {
            return Err(err);
        }
        if let Err(err) = sampled {
            self.mark_failed(err.to_string());
            return Err(err.into());
        }

        self.finish();
        Ok(())
    }

    fn begin(&mut self, strategy: &str) -> PfResult<()> {
        if let Err(err) = self.config.search_space.validate() {
            self.mark_failed(err.to_string());
            return Err(err.into());
        }

        self.mark_running();
        info!(
            "Starting study '{}': {} trials, strategy {}",
            self.config.name, self.config.n_trials, strategy
        );
        Ok(())
    }

    /// Evaluates one trial and records it. Returns the objective when the
    /// trial completed, `None` when it failed on a non-finite objective.
    fn run_trial<F>(
        &mut self,
        params: HashMap<String, ParameterValue>,
        objective: &mut F,
    ) -> PfResult<Option<f64>>
    where
        F: FnMut(&Trial) -> PfResult<Evaluation>,
    {
        let trial_number = self.trials.len();
        let mut trial = Trial::new(self.id, trial_number, params);
        trial.mark_running();
        let started = Instant::now();

        let value = match objective(&trial) {
            Ok(eval) if eval.objective.is_finite() => {
                let result = TrialResult {
                    trial_id: trial.id,
                    objective: eval.objective,
                    metrics: eval.metrics,
                    parameters: trial.parameters.clone(),
                    duration_ms: Some(started.elapsed().as_millis() as u64),
                };
                info!(
                    "Trial {} finished with {} = {:.6}: {}",
                    trial_number,
                    self.config.objective_metric,
                    result.objective,
                    self.config.search_space.describe(&result.parameters)
                );
                self.update_best(&result);
                trial.mark_completed(result);
                Some(eval.objective)
            }
            Ok(eval) => {
                warn!(
                    "Trial {} returned a non-finite objective ({}), marking failed",
                    trial_number, eval.objective
                );
                trial.mark_failed(format!("objective is not finite: {}", eval.objective));
                None
            }
            Err(err) => {
                trial.mark_failed(err.to_string());
                self.trials.push(trial);
                self.mark_failed(err.to_string());
                return Err(err);
            }
        };
        self.trials.push(trial);
        Ok(value)
    }

    fn finish(&mut self) {
        self.mark_completed();
        match &self.best_trial {
            Some(best) => info!(
                "Study '{}' completed: best {} = {:.6} after {} trials",
                self.config.name,
                self.config.objective_metric,
                best.objective,
                self.trials.len()
            ),
            None => warn!("Study '{}' completed without a successful trial", self.config.name),
        }
    }
}
