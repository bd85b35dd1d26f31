use thiserror::Error;

/// Main error type for the PM2.5 forecaster search
#[derive(Error, Debug)]
pub enum PfError {
    #[error("Data error: {0}")]
    Data(#[from] DataError),

    #[error("Training error: {0}")]
    Training(#[from] TrainingError),

    #[error("Search error: {0}")]
    Search(#[from] SearchError),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl From<candle_core::Error> for PfError {
    fn from(err: candle_core::Error) -> Self {
        PfError::Training(TrainingError::Tensor(err))
    }
}

/// Errors about the caller-supplied arrays
#[derive(Error, Debug)]
pub enum DataError {
    #[error("Empty array: {which}")]
    Empty { which: String },

    #[error("Shape mismatch in {which}: expected {expected}, got {actual}")]
    ShapeMismatch {
        which: String,
        expected: String,
        actual: String,
    },

    #[error("Sample count mismatch in {which}: {inputs} inputs vs {targets} targets")]
    SampleCountMismatch {
        which: String,
        inputs: usize,
        targets: usize,
    },
}

/// Errors raised while building, fitting or evaluating a model
#[derive(Error, Debug)]
pub enum TrainingError {
    #[error("Tensor operation failed: {0}")]
    Tensor(#[from] candle_core::Error),

    #[error("Invalid training configuration: {message}")]
    InvalidConfig { message: String },
}

/// Errors from the hyperparameter search
#[derive(Error, Debug)]
pub enum SearchError {
    #[error("No trials completed")]
    NoCompletedTrials,

    #[error("Missing parameter: {name}")]
    MissingParameter { name: String },

    #[error("Parameter {name} is not of type {expected}")]
    WrongParameterType { name: String, expected: String },

    #[error("Search space has no parameters")]
    EmptySpace,

    #[error("Parameter {name} has no choices")]
    EmptyChoice { name: String },

    #[error("Sampler failed: {message}")]
    Sampler { message: String },
}

/// Result type alias for forecaster operations
pub type PfResult<T> = Result<T, PfError>;

/// Macro for creating configuration errors
#[macro_export]
macro_rules! config_error {
    ($($arg:tt)*) => {
        $crate::PfError::Config(format!($($arg)*))
    };
}

/// Macro for creating internal errors
#[macro_export]
macro_rules! internal_error {
    ($($arg:tt)*) => {
        $crate::PfError::Internal(format!($($arg)*))
    };
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let error = DataError::ShapeMismatch {
            which: "val_inputs".to_string(),
            expected: "(_, 3, 5)".to_string(),
            actual: "(5, 3, 4)".to_string(),
        };

        assert!(error.to_string().contains("val_inputs"));
        assert!(error.to_string().contains("(_, 3, 5)"));
        assert!(error.to_string().contains("(5, 3, 4)"));
    }

    #[test]
    fn test_error_conversion() {
        let search_error = SearchError::MissingParameter {
            name: "neurons".to_string(),
        };
        let pf_error: PfError = search_error.into();

        match pf_error {
            PfError::Search(SearchError::MissingParameter { name }) => assert_eq!(name, "neurons"),
            other => panic!("Expected Search error, got {other:?}"),
        }
    }

    #[test]
    fn test_candle_error_lands_in_training() {
        let err: PfError = candle_core::Error::Msg("boom".to_string()).into();
        assert!(matches!(err, PfError::Training(TrainingError::Tensor(_))));
    }

    #[test]
    fn test_macros() {
        let config_err = config_error!("batch size must be positive, got {}", 0);
        assert!(matches!(config_err, PfError::Config(_)));
        let internal_err = internal_error!("Something went wrong");
        assert!(internal_err.to_string().contains("Something went wrong"));
    }
}
