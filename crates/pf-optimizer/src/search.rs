//! Search space definitions and parameter sweep strategies.

use optimizer::parameter::{CategoricalParam, Parameter};
use optimizer::sampler::tpe::TpeSampler;
use optimizer::sampler::CompletedTrial;
use optimizer::{Direction, Study as SamplerStudy, TrialPruned};
use pf_types::SearchError;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use std::cell::{Cell, RefCell};
use std::collections::HashMap;
use std::ops::ControlFlow;

use crate::trial::ObjectiveDirection;

/// A concrete parameter value produced by a search strategy.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ParameterValue {
    Int(i64),
    Float(f64),
    Text(String),
}

impl ParameterValue {
    pub fn as_int(&self) -> Option<i64> {
        match self {
            Self::Int(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_float(&self) -> Option<f64> {
        match self {
            Self::Float(v) => Some(*v),
            Self::Int(v) => Some(*v as f64),
            Self::Text(_) => None,
        }
    }
}

impl std::fmt::Display for ParameterValue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Int(v) => write!(f, "{v}"),
            Self::Float(v) => write!(f, "{v:?}"),
            Self::Text(v) => write!(f, "'{v}'"),
        }
    }
}

impl From<i64> for ParameterValue {
    fn from(v: i64) -> Self {
        Self::Int(v)
    }
}

impl From<f64> for ParameterValue {
    fn from(v: f64) -> Self {
        Self::Float(v)
    }
}

impl From<&str> for ParameterValue {
    fn from(v: &str) -> Self {
        Self::Text(v.to_string())
    }
}

/// Typed lookups on a sampled parameter map.
pub trait ParameterMapExt {
    fn int(&self, name: &str) -> Result<i64, SearchError>;
    fn float(&self, name: &str) -> Result<f64, SearchError>;
}

impl ParameterMapExt for HashMap<String, ParameterValue> {
    fn int(&self, name: &str) -> Result<i64, SearchError> {
        lookup(self, name)?
            .as_int()
            .ok_or_else(|| SearchError::WrongParameterType {
                name: name.to_string(),
                expected: "int".to_string(),
            })
    }

    fn float(&self, name: &str) -> Result<f64, SearchError> {
        lookup(self, name)?
            .as_float()
            .ok_or_else(|| SearchError::WrongParameterType {
                name: name.to_string(),
                expected: "float".to_string(),
            })
    }
}

fn lookup<'a>(
    params: &'a HashMap<String, ParameterValue>,
    name: &str,
) -> Result<&'a ParameterValue, SearchError> {
    params.get(name).ok_or_else(|| SearchError::MissingParameter {
        name: name.to_string(),
    })
}

/// A categorical parameter dimension.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParameterDef {
    /// Parameter name (e.g. "neurons").
    pub name: String,
    /// Candidate values, sampled as unordered categories.
    pub choices: Vec<ParameterValue>,
}

/// The full search space: an ordered list of parameter definitions.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SearchSpace {
    pub parameters: Vec<ParameterDef>,
}

impl SearchSpace {
    pub fn new() -> Self {
        Self {
            parameters: Vec::new(),
        }
    }

    pub fn add_choice<V>(mut self, name: impl Into<String>, values: impl IntoIterator<Item = V>) -> Self
    where
        V: Into<ParameterValue>,
    {
        self.parameters.push(ParameterDef {
            name: name.into(),
            choices: values.into_iter().map(Into::into).collect(),
        });
        self
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.parameters.iter().map(|p| p.name.as_str())
    }

    /// Total number of grid points (`None` on overflow).
    pub fn grid_size(&self) -> Option<usize> {
        self.parameters
            .iter()
            .try_fold(1usize, |total, param| total.checked_mul(param.choices.len()))
    }

    pub fn validate(&self) -> Result<(), SearchError> {
        if self.parameters.is_empty() {
            return Err(SearchError::EmptySpace);
        }
        if let Some(param) = self.parameters.iter().find(|p| p.choices.is_empty()) {
            return Err(SearchError::EmptyChoice {
                name: param.name.clone(),
            });
        }
        Ok(())
    }

    /// True when every parameter is present and holds one of its choices.
    pub fn contains(&self, params: &HashMap<String, ParameterValue>) -> bool {
        self.parameters.iter().all(|param| {
            params
                .get(&param.name)
                .is_some_and(|v| param.choices.contains(v))
        })
    }

    /// Renders `params` in space order, e.g. `{'neurons': 10, 'epochs': 50}`.
    pub fn describe(&self, params: &HashMap<String, ParameterValue>) -> String {
        let fields: Vec<String> = self
            .parameters
            .iter()
            .filter_map(|p| params.get(&p.name).map(|v| format!("'{}': {v}", p.name)))
            .collect();
        format!("{{{}}}", fields.join(", "))
    }
}

fn seeded_rng(seed: Option<u64>) -> StdRng {
    match seed {
        Some(seed) => StdRng::seed_from_u64(seed),
        None => StdRng::from_os_rng(),
    }
}

fn sample_uniform(space: &SearchSpace, rng: &mut StdRng) -> HashMap<String, ParameterValue> {
    space
        .parameters
        .iter()
        .map(|param| {
            let idx = rng.random_range(0..param.choices.len());
            (param.name.clone(), param.choices[idx].clone())
        })
        .collect()
}

// ---------------------------------------------------------------------------
// Search strategies
// ---------------------------------------------------------------------------

/// Selects a strategy from configuration.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StrategyKind {
    Grid,
    Random,
    #[default]
    Tpe,
}

/// Common trait for all search strategies.
pub trait SearchStrategy: Send + Sync {
    /// Generate the next batch of parameter combinations to evaluate.
    fn suggest(&mut self, count: usize) -> Vec<HashMap<String, ParameterValue>>;

    /// Report completed trial results so adaptive strategies can learn.
    fn report(&mut self, _params: &HashMap<String, ParameterValue>, _objective: f64) {}

    /// Human-readable strategy name.
    fn name(&self) -> &str;
}

// ---- Grid search ----

/// Exhaustive grid search over the Cartesian product of all choices.
#[derive(Debug, Clone)]
pub struct GridSearch {
    cursor: usize,
    combos: Vec<HashMap<String, ParameterValue>>,
}

impl GridSearch {
    pub fn new(space: SearchSpace) -> Self {
        Self {
            cursor: 0,
            combos: Self::build_grid(&space),
        }
    }

    fn build_grid(space: &SearchSpace) -> Vec<HashMap<String, ParameterValue>> {
        let mut result: Vec<HashMap<String, ParameterValue>> = vec![HashMap::new()];
        for param in &space.parameters {
            let mut next = Vec::with_capacity(result.len() * param.choices.len());
            for existing in &result {
                for value in &param.choices {
                    let mut combo = existing.clone();
                    combo.insert(param.name.clone(), value.clone());
                    next.push(combo);
                }
            }
            result = next;
        }
        result
    }

    pub fn remaining(&self) -> usize {
        self.combos.len() - self.cursor
    }
}

impl SearchStrategy for GridSearch {
    fn suggest(&mut self, count: usize) -> Vec<HashMap<String, ParameterValue>> {
        let end = (self.cursor + count).min(self.combos.len());
        let batch = self.combos[self.cursor..end].to_vec();
        self.cursor = end;
        batch
    }

    fn name(&self) -> &str {
        "grid"
    }
}

// ---- Random search ----

/// Independent uniform sampling across the search space.
#[derive(Debug, Clone)]
pub struct RandomSearch {
    space: SearchSpace,
    rng: StdRng,
}

impl RandomSearch {
    pub fn new(space: SearchSpace, seed: Option<u64>) -> Self {
        Self {
            space,
            rng: seeded_rng(seed),
        }
    }
}

impl SearchStrategy for RandomSearch {
    fn suggest(&mut self, count: usize) -> Vec<HashMap<String, ParameterValue>> {
        (0..count)
            .map(|_| sample_uniform(&self.space, &mut self.rng))
            .collect()
    }

    fn name(&self) -> &str {
        "random"
    }
}

// ---- Tree-structured Parzen Estimator ----

/// TPE over categorical parameters, backed by `optimizer`'s [`TpeSampler`].
///
/// Each parameter is handed to the sampler as a categorical over the indices of
/// its choices. The first `startup_trials` completed trials are drawn
/// uniformly, after which the sampler models good and bad regions from the
/// history. The sampler owns the trial loop, so this strategy is driven through
/// [`TpeSearch::run`] rather than [`SearchStrategy`].
#[derive(Debug, Clone)]
pub struct TpeSearch {
    space: SearchSpace,
    direction: ObjectiveDirection,
    seed: Option<u64>,
    startup_trials: usize,
    candidates: usize,
}

impl TpeSearch {
    pub const DEFAULT_STARTUP_TRIALS: usize = 10;
    pub const DEFAULT_CANDIDATES: usize = 24;

    pub fn new(space: SearchSpace, direction: ObjectiveDirection, seed: Option<u64>) -> Self {
        Self {
            space,
            direction,
            seed,
            startup_trials: Self::DEFAULT_STARTUP_TRIALS,
            candidates: Self::DEFAULT_CANDIDATES,
        }
    }

    pub fn with_startup_trials(mut self, n: usize) -> Self {
        self.startup_trials = n;
        self
    }

    /// Expected-improvement candidates drawn per parameter.
    pub fn with_candidates(mut self, n: usize) -> Self {
        self.candidates = n.max(1);
        self
    }

    fn sampler(&self) -> Result<TpeSampler, SearchError> {
        TpeSampler::builder()
            .n_startup_trials(self.startup_trials)
            .n_ei_candidates(self.candidates)
            .seed(self.seed.unwrap_or_else(rand::random))
            .build()
            .map_err(|err| SearchError::Sampler {
                message: err.to_string(),
            })
    }

    /// Runs up to `n_trials` evaluations. `evaluate` gets each sampled
    /// combination and answers `Continue(Some(objective))` to feed the sampler,
    /// `Continue(None)` to discard the trial, or `Break` to stop the run.
    pub fn run<F>(&self, n_trials: usize, evaluate: F) -> Result<(), SearchError>
    where
        F: FnMut(HashMap<String, ParameterValue>) -> ControlFlow<(), Option<f64>>,
    {
        self.space.validate()?;
        let direction = match self.direction {
            ObjectiveDirection::Minimize => Direction::Minimize,
            ObjectiveDirection::Maximize => Direction::Maximize,
        };
        let study: SamplerStudy<f64> = SamplerStudy::with_sampler(direction, self.sampler()?);
        let params: Vec<CategoricalParam<usize>> = self
            .space
            .parameters
            .iter()
            .map(|def| CategoricalParam::new((0..def.choices.len()).collect()).name(def.name.clone()))
            .collect();

        let evaluate = RefCell::new(evaluate);
        let stopped = Cell::new(false);
        study
            .optimize_with_callback_sampler(
                n_trials,
                |trial: &mut optimizer::Trial| -> optimizer::Result<f64> {
                    if stopped.get() {
                        return Err(TrialPruned.into());
                    }
                    let mut sampled = HashMap::with_capacity(params.len());
                    for (def, param) in self.space.parameters.iter().zip(&params) {
                        let idx = param.suggest(trial)?;
                        sampled.insert(def.name.clone(), def.choices[idx].clone());
                    }
                    match (evaluate.borrow_mut())(sampled) {
                        ControlFlow::Continue(Some(objective)) => Ok(objective),
                        ControlFlow::Continue(None) => Err(TrialPruned.into()),
                        ControlFlow::Break(()) => {
                            stopped.set(true);
                            Err(TrialPruned.into())
                        }
                    }
                },
                |_: &SamplerStudy<f64>, _: &CompletedTrial<f64>| {
                    if stopped.get() {
                        ControlFlow::Break(())
                    } else {
                        ControlFlow::Continue(())
                    }
                },
            )
            .map_err(|err| SearchError::Sampler {
                message: err.to_string(),
            })
    }
}
