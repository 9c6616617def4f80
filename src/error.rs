use thiserror::Error;

/// Errors raised while configuring or running a best-fit search.
#[derive(Error, Debug)]
pub enum FitError {
    /// Invalid or inconsistent configuration, detected before any search starts.
    #[error("Configuration error in '{field}': {message}")]
    Configuration { field: String, message: String },

    /// Requested metallicity/age values absent from the isochrone grid.
    #[error(
        "one or more {parameter} values could not be matched to the isochrone grid.\n\
         Missing values: {missing:?}\n\
         Available values: {available:?}\n\
         Closest available values: {nearest:?}"
    )]
    DataAvailability {
        parameter: String,
        missing: Vec<f64>,
        available: Vec<f64>,
        nearest: Vec<f64>,
    },

    /// Unexpected failure while reading or interpolating grid or cluster files.
    #[error("Computation error ({context}): {message}")]
    Computation { context: String, message: String },

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),
}

impl FitError {
    pub fn config(field: impl Into<String>, message: impl Into<String>) -> Self {
        FitError::Configuration {
            field: field.into(),
            message: message.into(),
        }
    }

    pub fn computation(context: impl Into<String>, message: impl Into<String>) -> Self {
        FitError::Computation {
            context: context.into(),
            message: message.into(),
        }
    }

    pub fn is_configuration(&self) -> bool {
        matches!(self, FitError::Configuration { .. })
    }

    pub fn is_data_availability(&self) -> bool {
        matches!(self, FitError::DataAvailability { .. })
    }
}

pub type Result<T> = std::result::Result<T, FitError>;
