//! Error types for the churn pipeline

use thiserror::Error;

/// Errors raised by cleaning, aggregation, training and evaluation
#[derive(Debug, Error)]
pub enum ChurnError {
    /// Input rows are missing, mistyped, or nothing survived cleaning
    #[error("Data validation failed: {0}")]
    DataValidation(String),

    /// A label-derived column was requested as a model feature
    #[error("Column '{column}' leaks the churn label and cannot be used as a feature")]
    LeakageGuard { column: String },

    /// Held-out labels contain a single class, so ROC-AUC is undefined
    #[error("Held-out labels contain only class {class}; ROC-AUC is undefined")]
    InsufficientClassDiversity { class: usize },

    #[error("Cannot stratify split: {0}")]
    SplitStratification(String),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// Fitting or scoring an estimator failed
    #[error("Estimator error: {0}")]
    Estimator(String),

    #[error("All {0} model variants failed")]
    AllVariantsFailed(usize),

    #[error("Polars error: {0}")]
    Polars(#[from] polars::prelude::PolarsError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Result alias used throughout the library
pub type Result<T> = std::result::Result<T, ChurnError>;
