//! Error types for rust_voom

use thiserror::Error;

/// Coarse category of a [`VoomError`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Invalid contrast, singular design, thresholds that remove every gene
    Configuration,
    /// Inputs whose shapes or identifiers do not line up
    DataShape,
    /// A numeric step produced a degenerate result
    NumericDegeneracy,
    /// File system and parser failures
    Io,
}

/// Main error type for the differential expression pipeline
#[derive(Error, Debug)]
pub enum VoomError {
    #[error("Invalid contrast '{contrast}': {reason}")]
    InvalidContrast { contrast: String, reason: String },

    #[error("Singular design matrix: {reason}")]
    SingularDesign { reason: String },

    #[error("No genes remaining after filtering: {reason}")]
    NoGenesRemaining { reason: String },

    #[error("Invalid parameter: {reason}")]
    InvalidParameter { reason: String },

    #[error("Dimension mismatch: expected {expected}, got {got}")]
    DimensionMismatch { expected: String, got: String },

    #[error("Invalid count matrix: {reason}")]
    InvalidCountMatrix { reason: String },

    #[error("Invalid sample design: {reason}")]
    InvalidDesign { reason: String },

    #[error("Sample mismatch between counts and design: {reason}")]
    SampleMismatch { reason: String },

    #[error("Parse error in {file} line {line}: {reason}")]
    Parse {
        file: String,
        line: usize,
        reason: String,
    },

    #[error("Numerical degeneracy in {operation}: {details}")]
    NumericDegeneracy { operation: String, details: String },

    #[error("Insufficient replication: {reason}")]
    InsufficientReplication { reason: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl VoomError {
    /// Category used by callers that only care about the failure class
    pub fn kind(&self) -> ErrorKind {
        match self {
            VoomError::InvalidContrast { .. }
            | VoomError::SingularDesign { .. }
            | VoomError::NoGenesRemaining { .. }
            | VoomError::InvalidParameter { .. } => ErrorKind::Configuration,
            VoomError::DimensionMismatch { .. }
            | VoomError::InvalidCountMatrix { .. }
            | VoomError::InvalidDesign { .. }
            | VoomError::SampleMismatch { .. }
            | VoomError::Parse { .. } => ErrorKind::DataShape,
            VoomError::NumericDegeneracy { .. } | VoomError::InsufficientReplication { .. } => {
                ErrorKind::NumericDegeneracy
            }
            VoomError::Io(_) | VoomError::Csv(_) | VoomError::Json(_) => ErrorKind::Io,
        }
    }

    pub(crate) fn degenerate(operation: &str, details: impl Into<String>) -> Self {
        VoomError::NumericDegeneracy {
            operation: operation.to_string(),
            details: details.into(),
        }
    }
}

/// Result type alias for pipeline operations
pub type Result<T> = std::result::Result<T, VoomError>;
