//! Error types for image geometry and transform operations.

use thiserror::Error;

/// Errors raised by the core image and transform model.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum CoreError {
    /// Image geometry that cannot map between index and physical space.
    #[error("Invalid geometry: {0}")]
    InvalidGeometry(String),

    /// A matrix that has to be inverted or decomposed is singular.
    #[error("Singular transform: {0}")]
    Singular(String),

    /// Parameter vector does not match the transform model.
    #[error("{kind} transform expects {expected} {what}, got {actual}")]
    ParameterCount {
        kind: String,
        what: &'static str,
        expected: usize,
        actual: usize,
    },

    /// Parameters of one transform kind handed to a model of another.
    #[error("Expected {expected} transform parameters, got {actual}")]
    KindMismatch { expected: String, actual: String },

    /// Transform kind name that is not recognised.
    #[error("Unknown transform kind '{0}'")]
    UnknownKind(String),

    /// Dimensionality differs from what the operation requires.
    #[error("Dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },

    /// Tensor contents could not be read back.
    #[error("Tensor data error: {0}")]
    Data(String),
}

/// Result type for core operations.
pub type Result<T> = std::result::Result<T, CoreError>;

impl CoreError {
    /// Create an invalid geometry error.
    pub fn invalid_geometry(msg: impl Into<String>) -> Self {
        Self::InvalidGeometry(msg.into())
    }

    /// Create a singular transform error.
    pub fn singular(msg: impl Into<String>) -> Self {
        Self::Singular(msg.into())
    }

    /// Create a tensor data error.
    pub fn data(msg: impl Into<String>) -> Self {
        Self::Data(msg.into())
    }
}
