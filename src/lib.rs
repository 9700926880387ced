//! ChurnForge: customer churn prediction from e-commerce transaction logs
//!
//! Raw order lines are cleaned, aggregated into one feature row per customer,
//! labelled by purchase recency, and used to train and evaluate classifiers
//! on a single shared, stratified train/test split.

pub mod clean;
pub mod cli;
pub mod config;
pub mod error;
pub mod estimator;
pub mod evaluate;
pub mod features;
pub mod pipeline;
pub mod scaler;
pub mod source;
pub mod split;
pub mod tracking;
pub mod train;
pub mod viz;

// Re-export public items for easier access
pub use clean::{clean_records, clean_records_with_summary, CleaningSummary};
pub use cli::Args;
pub use config::{
    ClassWeight, EstimatorSpec, FeatureColumn, ModelVariant, PipelineConfig, SplitConfig,
    TrainingConfig, CHURN_THRESHOLD_DAYS,
};
pub use error::{ChurnError, Result};
pub use estimator::{build_estimator, Estimator};
pub use evaluate::{evaluate_classifier, evaluate_estimator, roc_auc_score, Evaluation};
pub use features::{build_customer_features, derive_churn, CustomerFeatureRow, CustomerFeatureTable};
pub use pipeline::{run_pipeline, PipelineReport, VariantReport};
pub use scaler::StandardScaler;
pub use source::{CsvSource, RecordSource, TransactionRecord};
pub use split::{stratified_split, TrainTestSplit};
pub use train::{train_models, train_models_with, ModelArtifact, TrainingOutcome, VariantFailure};
