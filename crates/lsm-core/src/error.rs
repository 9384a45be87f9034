//! Error taxonomy for landscape-metric computation and calibration.

use thiserror::Error;

/// Errors raised by the core.
///
/// `InputData` is recovered per window by the pipeline (the window's metrics
/// become undefined). `Config` is fatal before any processing starts.
/// `ModelFit` is fatal for one metric/scale pair only.
#[derive(Error, Debug)]
pub enum LsmError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("TIFF error: {0}")]
    Tiff(#[from] tiff::TiffError),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Invalid input data: {0}")]
    InputData(String),

    #[error("Metric {metric} is undefined: {reason}")]
    UndefinedMetric { metric: &'static str, reason: String },

    #[error("Invalid configuration: {name} = {value} ({reason})")]
    Config {
        name: &'static str,
        value: String,
        reason: String,
    },

    #[error("Output cell ({row}, {col}) was already written by another window")]
    CellConflict { row: usize, col: usize },

    #[error("Calibration fit failed for {metric} at scale {scale}: {reason}")]
    ModelFit {
        metric: &'static str,
        scale: String,
        reason: String,
    },
}

impl LsmError {
    pub(crate) fn config(name: &'static str, value: impl ToString, reason: impl Into<String>) -> Self {
        LsmError::Config {
            name,
            value: value.to_string(),
            reason: reason.into(),
        }
    }
}

/// Result alias used throughout the crate.
pub type Result<T> = std::result::Result<T, LsmError>;
