//! End-to-end batch run: clean, aggregate, train, evaluate

use crate::clean::{clean_records_with_summary, CleaningSummary};
use crate::config::PipelineConfig;
use crate::error::{ChurnError, Result};
use crate::evaluate::{evaluate_classifier, Evaluation};
use crate::features::{build_customer_features, CustomerFeatureTable};
use crate::source::TransactionRecord;
use crate::tracking::TrackingSink;
use crate::train::{train_models, ModelArtifact, TrainingOutcome};
use ndarray::{Array1, Array2};
use tracing::{info, warn};

/// Held-out evaluation of one trained variant
#[derive(Debug)]
pub struct VariantReport {
    pub variant: String,
    pub train_auc: f64,
    pub evaluation: Result<Evaluation>,
}

/// Everything one pipeline run produced
#[derive(Debug)]
pub struct PipelineReport {
    pub cleaning: CleaningSummary,
    pub features: CustomerFeatureTable,
    pub training: TrainingOutcome,
    pub evaluations: Vec<VariantReport>,
}

impl PipelineReport {
    /// Raw held-out features and labels from the shared split
    pub fn test_partition(&self, config: &PipelineConfig) -> Result<(Array2<f64>, Array1<usize>)> {
        held_out(&self.features, &self.training, config)
    }

    pub fn evaluation(&self, variant: &str) -> Option<&VariantReport> {
        self.evaluations.iter().find(|e| e.variant == variant)
    }
}

fn held_out(
    table: &CustomerFeatureTable,
    training: &TrainingOutcome,
    config: &PipelineConfig,
) -> Result<(Array2<f64>, Array1<usize>)> {
    let test = table.select_rows(&training.split.test)?;
    Ok((test.feature_matrix(&config.training.features)?, test.labels()))
}

/// Run the whole batch over `records`
///
/// The feature table and split are computed once; evaluation reuses the
/// trainer's partition rather than drawing its own.
pub fn run_pipeline<I>(
    records: I,
    config: &PipelineConfig,
    sink: &mut dyn TrackingSink,
) -> Result<PipelineReport>
where
    I: IntoIterator<Item = TransactionRecord>,
{
    config.validate()?;

    let (clean, cleaning) = clean_records_with_summary(records);
    if clean.is_empty() {
        return Err(ChurnError::DataValidation(format!(
            "none of {} records survived cleaning",
            cleaning.input_rows
        )));
    }

    let features = build_customer_features(&clean, config.churn_threshold_days)?;
    drop(clean);

    let training = train_models(&features, &config.training, sink)?;
    let (x_test, y_test) = held_out(&features, &training, config)?;

    let evaluations = training
        .models
        .iter()
        .map(|model| evaluate_variant(model, &x_test, &y_test))
        .collect();

    Ok(PipelineReport {
        cleaning,
        features,
        training,
        evaluations,
    })
}

fn evaluate_variant(model: &ModelArtifact, x_test: &Array2<f64>, y_test: &Array1<usize>) -> VariantReport {
    let evaluation = evaluate_classifier(model, x_test, y_test);
    match &evaluation {
        Ok(e) => info!(variant = model.name(), roc_auc = e.roc_auc, "Evaluated model"),
        Err(e) => warn!(variant = model.name(), error = %e, "Evaluation failed"),
    }
    VariantReport {
        variant: model.name().to_string(),
        train_auc: model.train_auc(),
        evaluation,
    }
}
