//! Model training over a shared split and scaler

use crate::config::{ClassWeight, EstimatorSpec, ModelVariant, TrainingConfig};
use crate::error::{ChurnError, Result};
use crate::estimator::{build_estimator, Estimator};
use crate::evaluate::roc_auc_score;
use crate::features::CustomerFeatureTable;
use crate::scaler::StandardScaler;
use crate::split::{stratified_split, TrainTestSplit};
use crate::tracking::{RunHandle, TrackingResult, TrackingSink};
use ndarray::{Array1, Array2, Axis};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// A fitted classifier together with the scaler that produced its inputs
#[derive(Debug)]
pub struct ModelArtifact {
    variant: ModelVariant,
    estimator: Box<dyn Estimator>,
    /// `None` when the variant was fit on raw features
    scaler: Option<Arc<StandardScaler>>,
    train_auc: f64,
    params: Vec<(String, String)>,
}

impl ModelArtifact {
    pub fn name(&self) -> &str {
        &self.variant.name
    }

    pub fn variant(&self) -> &ModelVariant {
        &self.variant
    }

    pub fn estimator(&self) -> &dyn Estimator {
        self.estimator.as_ref()
    }

    pub fn scaler(&self) -> Option<&StandardScaler> {
        self.scaler.as_deref()
    }

    /// Held-out ROC-AUC measured right after fitting
    pub fn train_auc(&self) -> f64 {
        self.train_auc
    }

    /// Parameters reported to the tracking sink
    pub fn params(&self) -> &[(String, String)] {
        &self.params
    }

    /// Map raw feature rows into the estimator's input space
    pub fn prepare(&self, features: &Array2<f64>) -> Result<Array2<f64>> {
        match &self.scaler {
            Some(scaler) => scaler.transform(features),
            None => Ok(features.clone()),
        }
    }

    /// Churn probability for raw feature rows
    pub fn churn_probability(&self, features: &Array2<f64>) -> Result<Array1<f64>> {
        let proba = self.estimator.predict_probability(&self.prepare(features)?)?;
        Ok(proba.column(1).to_owned())
    }
}

/// A variant that could not be trained
#[derive(Debug)]
pub struct VariantFailure {
    pub variant: String,
    pub error: ChurnError,
}

/// Result of one training run
#[derive(Debug)]
pub struct TrainingOutcome {
    /// Partition shared by every variant and by evaluation
    pub split: TrainTestSplit,
    /// Scaler fit on the training partition, shared by scale-sensitive variants
    pub scaler: Option<Arc<StandardScaler>>,
    pub models: Vec<ModelArtifact>,
    pub failures: Vec<VariantFailure>,
}

impl TrainingOutcome {
    pub fn model(&self, name: &str) -> Option<&ModelArtifact> {
        self.models.iter().find(|m| m.name() == name)
    }
}

struct Partitions {
    raw_train: Array2<f64>,
    scaled_train: Option<Array2<f64>>,
    raw_test: Array2<f64>,
    scaled_test: Option<Array2<f64>>,
    y_train: Array1<usize>,
    y_test: Array1<usize>,
}

impl Partitions {
    fn inputs(&self, scaled: bool) -> (&Array2<f64>, &Array2<f64>) {
        match (scaled, &self.scaled_train, &self.scaled_test) {
            (true, Some(train), Some(test)) => (train, test),
            _ => (&self.raw_train, &self.raw_test),
        }
    }
}

/// Fit every configured variant on one split of `table`
///
/// The split and scaler are computed once and shared. A failing variant is
/// recorded in `failures`; the call only fails when no variant succeeds.
pub fn train_models(
    table: &CustomerFeatureTable,
    config: &TrainingConfig,
    sink: &mut dyn TrackingSink,
) -> Result<TrainingOutcome> {
    train_models_with(table, config, sink, &build_estimator)
}

/// Like [`train_models`], building each variant's estimator with `factory`
pub fn train_models_with(
    table: &CustomerFeatureTable,
    config: &TrainingConfig,
    sink: &mut dyn TrackingSink,
    factory: &dyn Fn(&EstimatorSpec) -> Box<dyn Estimator>,
) -> Result<TrainingOutcome> {
    config.validate()?;
    if table.is_empty() {
        return Err(ChurnError::DataValidation(
            "feature table has no customers".to_string(),
        ));
    }

    let x = table.feature_matrix(&config.features)?;
    let y = table.labels();
    let split = stratified_split(&y, &config.split)?;

    let raw_train = x.select(Axis(0), &split.train);
    let raw_test = x.select(Axis(0), &split.test);
    let scaler = if config.scale_features {
        Some(Arc::new(StandardScaler::fit(&raw_train)?))
    } else {
        None
    };
    let (scaled_train, scaled_test) = match &scaler {
        Some(s) => (Some(s.transform(&raw_train)?), Some(s.transform(&raw_test)?)),
        None => (None, None),
    };
    let data = Partitions {
        raw_train,
        scaled_train,
        raw_test,
        scaled_test,
        y_train: y.select(Axis(0), &split.train),
        y_test: y.select(Axis(0), &split.test),
    };

    info!(
        customers = table.len(),
        train = split.train.len(),
        test = split.test.len(),
        variants = config.variants.len(),
        "Training churn models"
    );

    let mut models = Vec::new();
    let mut failures = Vec::new();
    for variant in &config.variants {
        match train_variant(table, config, variant, &data, scaler.as_ref(), factory) {
            Ok(artifact) => {
                info!(variant = %variant.name, roc_auc = artifact.train_auc, "Trained model");
                if let Err(e) = record_run(sink, &artifact) {
                    warn!(variant = %variant.name, error = %e, "Failed to record tracking run");
                }
                models.push(artifact);
            }
            Err(error) => {
                warn!(variant = %variant.name, error = %error, "Model variant failed");
                failures.push(VariantFailure {
                    variant: variant.name.clone(),
                    error,
                });
            }
        }
    }

    if models.is_empty() {
        return Err(ChurnError::AllVariantsFailed(failures.len()));
    }

    Ok(TrainingOutcome {
        split,
        scaler,
        models,
        failures,
    })
}

fn train_variant(
    table: &CustomerFeatureTable,
    config: &TrainingConfig,
    variant: &ModelVariant,
    data: &Partitions,
    scaler: Option<&Arc<StandardScaler>>,
    factory: &dyn Fn(&EstimatorSpec) -> Box<dyn Estimator>,
) -> Result<ModelArtifact> {
    let scaled = scaler.is_some() && variant.estimator.requires_scaling();
    let (x_train, x_test) = data.inputs(scaled);

    let mut estimator = factory(&variant.estimator);
    match variant.class_weight {
        ClassWeight::Balanced => {
            let (x_bal, y_bal) = balance_classes(x_train, &data.y_train);
            debug!(variant = %variant.name, rows = x_bal.nrows(), "Oversampled minority class");
            estimator.fit(&x_bal, &y_bal)?;
        }
        ClassWeight::None => estimator.fit(x_train, &data.y_train)?,
    }

    let proba = estimator.predict_probability(x_test)?;
    let scores = proba.column(1).to_vec();
    let train_auc = roc_auc_score(&data.y_test.to_vec(), &scores)?;

    let mut params = vec![
        ("model_type".to_string(), variant.estimator.kind().to_string()),
        (
            "churn_threshold_days".to_string(),
            table.churn_threshold_days().to_string(),
        ),
        ("features".to_string(), config.feature_names()),
        ("class_weight".to_string(), variant.class_weight.to_string()),
        ("scaled".to_string(), scaled.to_string()),
        ("test_fraction".to_string(), config.split.test_fraction.to_string()),
        ("split_seed".to_string(), config.split.seed.to_string()),
    ];
    params.extend(variant.estimator.params());

    Ok(ModelArtifact {
        variant: variant.clone(),
        estimator,
        scaler: if scaled { scaler.cloned() } else { None },
        train_auc,
        params,
    })
}

/// Repeat minority-class rows until both classes have equal counts
fn balance_classes(x: &Array2<f64>, y: &Array1<usize>) -> (Array2<f64>, Array1<usize>) {
    let (positives, negatives): (Vec<usize>, Vec<usize>) =
        (0..y.len()).partition(|&i| y[i] == 1);
    let (minority, majority_len) = if positives.len() < negatives.len() {
        (positives, negatives.len())
    } else {
        (negatives, positives.len())
    };

    let mut rows: Vec<usize> = (0..y.len()).collect();
    if !minority.is_empty() {
        rows.extend(
            minority
                .iter()
                .cycle()
                .take(majority_len - minority.len()),
        );
    }
    (x.select(Axis(0), &rows), y.select(Axis(0), &rows))
}

/// Report one run; the run is closed even when logging into it fails
fn record_run(sink: &mut dyn TrackingSink, artifact: &ModelArtifact) -> TrackingResult<()> {
    let run = sink.begin_run(artifact.name())?;
    let logged = log_run_contents(sink, &run, artifact);
    match (logged, sink.end_run(run)) {
        (Err(e), Err(end)) => {
            warn!(variant = artifact.name(), error = %end, "Failed to close tracking run");
            Err(e)
        }
        (logged, ended) => logged.and(ended),
    }
}

fn log_run_contents(
    sink: &mut dyn TrackingSink,
    run: &RunHandle,
    artifact: &ModelArtifact,
) -> TrackingResult<()> {
    for (key, value) in artifact.params() {
        sink.log_param(run, key, value)?;
    }
    if let Some(scaler) = artifact.scaler() {
        sink.log_param(run, "scaler", &serde_json::to_string(scaler)?)?;
    }
    sink.log_metric(run, "roc_auc", artifact.train_auc())?;
    sink.log_model(run, artifact.estimator())
}
