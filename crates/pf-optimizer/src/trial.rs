//! Trial tracking and optimization run configuration.

use chrono::{DateTime, Utc};
use pf_types::PfResult;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use uuid::Uuid;

use crate::search::{ParameterValue, SearchSpace, StrategyKind, TpeSearch};

/// Unique optimization run identifier.
pub type OptimizationId = Uuid;

/// Whether we are maximizing or minimizing the objective.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum ObjectiveDirection {
    Maximize,
    #[default]
    Minimize,
}

impl ObjectiveDirection {
    /// True when `candidate` is strictly better than `incumbent`.
    pub fn improves(self, candidate: f64, incumbent: f64) -> bool {
        match self {
            Self::Maximize => candidate > incumbent,
            Self::Minimize => candidate < incumbent,
        }
    }
}

/// Top-level configuration for an optimization run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OptimizationConfig {
    pub id: OptimizationId,
    pub name: String,
    #[serde(default)]
    pub description: String,

    /// The parameter search space.
    pub search_space: SearchSpace,

    /// Which search strategy proposes the next configuration.
    #[serde(default)]
    pub strategy: StrategyKind,

    /// Number of trials to run.
    pub n_trials: usize,

    /// Metric name the objective reports (e.g. "val_loss").
    pub objective_metric: String,

    /// Direction of optimization.
    #[serde(default)]
    pub direction: ObjectiveDirection,

    /// Seed for the strategy's sampler. `None` draws from the OS.
    #[serde(default)]
    pub seed: Option<u64>,

    /// Uniform-sampling warm-up before TPE kicks in.
    #[serde(default = "default_startup_trials")]
    pub startup_trials: usize,

    pub created_at: DateTime<Utc>,
}

fn default_startup_trials() -> usize {
    TpeSearch::DEFAULT_STARTUP_TRIALS
}

impl OptimizationConfig {
    pub fn new(name: String, search_space: SearchSpace, strategy: StrategyKind) -> Self {
        Self {
            id: Uuid::new_v4(),
            name,
            description: String::new(),
            search_space,
            strategy,
            n_trials: 100,
            objective_metric: "val_loss".to_string(),
            direction: ObjectiveDirection::Minimize,
            seed: None,
            startup_trials: default_startup_trials(),
            created_at: Utc::now(),
        }
    }

    pub fn with_n_trials(mut self, n: usize) -> Self {
        self.n_trials = n;
        self
    }

    pub fn with_objective(mut self, metric: &str, direction: ObjectiveDirection) -> Self {
        self.objective_metric = metric.to_string();
        self.direction = direction;
        self
    }

    pub fn with_seed(mut self, seed: Option<u64>) -> Self {
        self.seed = seed;
        self
    }

    pub fn with_startup_trials(mut self, n: usize) -> Self {
        self.startup_trials = n;
        self
    }

    pub fn from_json(json: &str) -> PfResult<Self> {
        Ok(serde_json::from_str(json)?)
    }
}

// ---------------------------------------------------------------------------
// Individual trial
// ---------------------------------------------------------------------------

/// A single trial: one parameter combination, one freshly trained model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Trial {
    pub id: Uuid,
    pub optimization_id: OptimizationId,
    pub trial_number: usize,
    pub parameters: HashMap<String, ParameterValue>,
    pub status: TrialStatus,
    pub result: Option<TrialResult>,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
    pub error: Option<String>,
}

impl Trial {
    pub fn new(
        optimization_id: OptimizationId,
        trial_number: usize,
        parameters: HashMap<String, ParameterValue>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            optimization_id,
            trial_number,
            parameters,
            status: TrialStatus::Pending,
            result: None,
            created_at: Utc::now(),
            started_at: None,
            finished_at: None,
            error: None,
        }
    }

    pub fn mark_running(&mut self) {
        self.status = TrialStatus::Running;
        self.started_at = Some(Utc::now());
    }

    pub fn mark_completed(&mut self, result: TrialResult) {
        self.status = TrialStatus::Completed;
        self.finished_at = Some(Utc::now());
        self.result = Some(result);
    }

    pub fn mark_failed(&mut self, error: String) {
        self.status = TrialStatus::Failed;
        self.finished_at = Some(Utc::now());
        self.error = Some(error);
    }

    pub fn objective(&self) -> Option<f64> {
        self.result.as_ref().map(|r| r.objective)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TrialStatus {
    Pending,
    Running,
    Completed,
    Failed,
}

/// What an objective hands back for one trial.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Evaluation {
    pub objective: f64,
    pub metrics: HashMap<String, f64>,
}

impl Evaluation {
    pub fn new(objective: f64) -> Self {
        Self {
            objective,
            metrics: HashMap::new(),
        }
    }

    pub fn with_metric(mut self, name: &str, value: Option<f64>) -> Self {
        if let Some(value) = value {
            self.metrics.insert(name.to_string(), value);
        }
        self
    }
}

impl From<f64> for Evaluation {
    fn from(objective: f64) -> Self {
        Self::new(objective)
    }
}

/// Result of a single completed trial.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrialResult {
    pub trial_id: Uuid,
    pub objective: f64,
    pub metrics: HashMap<String, f64>,
    pub parameters: HashMap<String, ParameterValue>,
    pub duration_ms: Option<u64>,
}
