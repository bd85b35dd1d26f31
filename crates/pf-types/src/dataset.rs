//! Train/validation split handed to the search by its caller.

use ndarray::{Array2, Array3};
use serde::{Deserialize, Serialize};

use crate::errors::DataError;

/// Pre-processed windows of the PM2.5 series.
///
/// Inputs are `(sample, time_step, feature)`, targets are `(sample, output)`.
/// The search only reads these arrays.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DatasetSplit {
    pub train_inputs: Array3<f32>,
    pub train_targets: Array2<f32>,
    pub val_inputs: Array3<f32>,
    pub val_targets: Array2<f32>,
}

impl DatasetSplit {
    pub fn new(
        train_inputs: Array3<f32>,
        train_targets: Array2<f32>,
        val_inputs: Array3<f32>,
        val_targets: Array2<f32>,
    ) -> Self {
        Self {
            train_inputs,
            train_targets,
            val_inputs,
            val_targets,
        }
    }

    /// Time steps per training window.
    pub fn time_steps(&self) -> usize {
        self.train_inputs.dim().1
    }

    /// Features per time step.
    pub fn features(&self) -> usize {
        self.train_inputs.dim().2
    }

    pub fn train_len(&self) -> usize {
        self.train_inputs.dim().0
    }

    pub fn val_len(&self) -> usize {
        self.val_inputs.dim().0
    }

    /// Checks every array against the configured input and output widths.
    pub fn validate(&self, input_features: usize, outputs: usize) -> Result<(), DataError> {
        check_inputs("train_inputs", &self.train_inputs, None, input_features)?;
        check_targets(
            "train_targets",
            &self.train_targets,
            self.train_len(),
            outputs,
        )?;
        check_inputs(
            "val_inputs",
            &self.val_inputs,
            Some(self.time_steps()),
            input_features,
        )?;
        check_targets("val_targets", &self.val_targets, self.val_len(), outputs)?;
        Ok(())
    }
}

fn check_inputs(
    which: &str,
    inputs: &Array3<f32>,
    time_steps: Option<usize>,
    features: usize,
) -> Result<(), DataError> {
    if inputs.is_empty() {
        return Err(DataError::Empty {
            which: which.to_string(),
        });
    }
    let (n, t, f) = inputs.dim();
    let steps_ok = time_steps.map_or(true, |expected| expected == t);
    if f != features || !steps_ok {
        let steps = time_steps.map_or("_".to_string(), |s| s.to_string());
        return Err(DataError::ShapeMismatch {
            which: which.to_string(),
            expected: format!("(_, {steps}, {features})"),
            actual: format!("({n}, {t}, {f})"),
        });
    }
    Ok(())
}

fn check_targets(
    which: &str,
    targets: &Array2<f32>,
    samples: usize,
    outputs: usize,
) -> Result<(), DataError> {
    if targets.is_empty() {
        return Err(DataError::Empty {
            which: which.to_string(),
        });
    }
    let (n, o) = targets.dim();
    if n != samples {
        return Err(DataError::SampleCountMismatch {
            which: which.to_string(),
            inputs: samples,
            targets: n,
        });
    }
    if o != outputs {
        return Err(DataError::ShapeMismatch {
            which: which.to_string(),
            expected: format!("(_, {outputs})"),
            actual: format!("({n}, {o})"),
        });
    }
    Ok(())
}
