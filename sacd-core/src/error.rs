//! Errors in the library.
use crate::ndarray::Dtype;
use thiserror::Error;

/// Errors in the library.
#[derive(Error, Debug)]
pub enum CoreError {
    /// Element type of an array does not match the expected one.
    #[error("Dtype mismatch: expected {expected:?}, got {actual:?}")]
    DtypeMismatch {
        /// Expected element type.
        expected: Dtype,
        /// Actual element type.
        actual: Dtype,
    },

    /// Shapes of arrays are inconsistent.
    #[error("Shape mismatch: {0}")]
    ShapeMismatch(String),

    /// No model builder was registered under the given name.
    #[error("Unknown model: {0}")]
    UnknownModel(String),

    /// The model rejected a variable set.
    #[error("Invalid model variables: {0}")]
    InvalidVariables(String),

    /// The environment failed to reset or step.
    #[error("Environment error: {0}")]
    Env(String),
}
