//! Error types for power-line extraction.
//!
//! Run-level failures abort an extraction and surface as [`ExtractionError`].
//! Curve-fit failures are local to one segment and surface as [`FitError`];
//! the pipeline absorbs them by rejecting that segment only.

use serde::Serialize;
use thiserror::Error;

/// Fatal error for a single extraction run.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ExtractionError {
    #[error("input point cloud is empty")]
    EmptyInput,

    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error(
        "no line points found among {scored_points} scored points \
         (threshold {threshold:.3}, relaxed {relaxed_threshold:.3})"
    )]
    NoCandidateLinePoints {
        threshold: f64,
        relaxed_threshold: f64,
        scored_points: usize,
    },

    #[error("coordinate normalization check failed: {0}")]
    TransformVerification(String),
}

/// Non-fatal failure of a single curve fit.
#[derive(Error, Debug, Clone, Copy, PartialEq, Serialize)]
pub enum FitError {
    #[error("not enough points for the model ({points} < {required})")]
    TooFewPoints { points: usize, required: usize },

    #[error("fit did not converge within {iterations} iterations")]
    NonConvergence { iterations: usize },

    #[error("fit produced non-finite values")]
    NonFinite,

    #[error("normal equations are singular")]
    Singular,
}

pub type Result<T> = std::result::Result<T, ExtractionError>;
