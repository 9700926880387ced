//! Typed pipeline configuration

use crate::error::{ChurnError, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;
use std::path::{Path, PathBuf};

/// Days without a purchase after which a customer counts as churned
pub const CHURN_THRESHOLD_DAYS: i64 = 90;

/// Fraction of customers held out for testing
pub const DEFAULT_TEST_FRACTION: f64 = 0.2;

/// Seed shared by the split and any seeded estimator
pub const DEFAULT_SEED: u64 = 42;

/// Columns of the customer feature table
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FeatureColumn {
    NumOrders,
    TotalQuantity,
    TotalSpent,
    RecencyDays,
    LastPurchaseDate,
}

impl FeatureColumn {
    /// The leakage-free feature set used unless configured otherwise
    pub const DEFAULT_FEATURES: [FeatureColumn; 3] = [
        FeatureColumn::NumOrders,
        FeatureColumn::TotalQuantity,
        FeatureColumn::TotalSpent,
    ];

    /// Whether the churn label is derived from this column
    pub fn leaks_label(self) -> bool {
        matches!(self, FeatureColumn::RecencyDays | FeatureColumn::LastPurchaseDate)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            FeatureColumn::NumOrders => "num_orders",
            FeatureColumn::TotalQuantity => "total_quantity",
            FeatureColumn::TotalSpent => "total_spent",
            FeatureColumn::RecencyDays => "recency_days",
            FeatureColumn::LastPurchaseDate => "last_purchase_date",
        }
    }

    /// Reject any leaking column in `columns`
    pub fn guard(columns: &[FeatureColumn]) -> Result<()> {
        match columns.iter().find(|c| c.leaks_label()) {
            Some(column) => Err(ChurnError::LeakageGuard {
                column: column.as_str().to_string(),
            }),
            None => Ok(()),
        }
    }
}

impl fmt::Display for FeatureColumn {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Class-imbalance handling, selectable per variant
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ClassWeight {
    #[default]
    None,
    Balanced,
}

impl fmt::Display for ClassWeight {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ClassWeight::None => f.write_str("none"),
            ClassWeight::Balanced => f.write_str("balanced"),
        }
    }
}

/// Estimator kind and its hyperparameters
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum EstimatorSpec {
    LogisticRegression {
        #[serde(default = "default_max_iterations")]
        max_iterations: u64,
        /// L2 regularization strength
        #[serde(default = "default_alpha")]
        alpha: f64,
    },
    RandomForest {
        #[serde(default = "default_n_trees")]
        n_trees: usize,
        #[serde(default)]
        max_depth: Option<usize>,
        #[serde(default = "default_seed")]
        seed: u64,
    },
    DecisionTree {
        #[serde(default)]
        max_depth: Option<usize>,
    },
}

impl EstimatorSpec {
    pub fn kind(&self) -> &'static str {
        match self {
            EstimatorSpec::LogisticRegression { .. } => "logistic_regression",
            EstimatorSpec::RandomForest { .. } => "random_forest",
            EstimatorSpec::DecisionTree { .. } => "decision_tree",
        }
    }

    /// Tree models split on thresholds and are fit on raw features
    pub fn requires_scaling(&self) -> bool {
        matches!(self, EstimatorSpec::LogisticRegression { .. })
    }

    /// Hyperparameters as tracking key-value pairs
    pub fn params(&self) -> Vec<(String, String)> {
        let depth = |d: &Option<usize>| d.map_or_else(|| "none".to_string(), |d| d.to_string());
        match self {
            EstimatorSpec::LogisticRegression {
                max_iterations,
                alpha,
            } => vec![
                ("max_iterations".to_string(), max_iterations.to_string()),
                ("alpha".to_string(), alpha.to_string()),
            ],
            EstimatorSpec::RandomForest {
                n_trees,
                max_depth,
                seed,
            } => vec![
                ("n_estimators".to_string(), n_trees.to_string()),
                ("max_depth".to_string(), depth(max_depth)),
                ("random_state".to_string(), seed.to_string()),
            ],
            EstimatorSpec::DecisionTree { max_depth } => {
                vec![("max_depth".to_string(), depth(max_depth))]
            }
        }
    }

    fn validate(&self) -> Result<()> {
        match self {
            EstimatorSpec::LogisticRegression {
                max_iterations,
                alpha,
            } => {
                if *max_iterations == 0 {
                    return Err(ChurnError::InvalidConfig(
                        "max_iterations must be positive".to_string(),
                    ));
                }
                if !alpha.is_finite() || *alpha < 0.0 {
                    return Err(ChurnError::InvalidConfig(format!(
                        "alpha must be a non-negative number, got {alpha}"
                    )));
                }
            }
            EstimatorSpec::RandomForest { n_trees, .. } if *n_trees == 0 => {
                return Err(ChurnError::InvalidConfig(
                    "random forest needs at least one tree".to_string(),
                ));
            }
            _ => {}
        }
        Ok(())
    }
}

fn default_max_iterations() -> u64 {
    1000
}

fn default_alpha() -> f64 {
    1.0
}

fn default_n_trees() -> usize {
    200
}

fn default_seed() -> u64 {
    DEFAULT_SEED
}

/// One named model to train
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelVariant {
    pub name: String,
    pub estimator: EstimatorSpec,
    #[serde(default)]
    pub class_weight: ClassWeight,
}

impl ModelVariant {
    pub fn logistic_regression() -> Self {
        Self {
            name: "logistic_regression".to_string(),
            estimator: EstimatorSpec::LogisticRegression {
                max_iterations: default_max_iterations(),
                alpha: default_alpha(),
            },
            class_weight: ClassWeight::None,
        }
    }

    pub fn random_forest() -> Self {
        Self {
            name: "random_forest".to_string(),
            estimator: EstimatorSpec::RandomForest {
                n_trees: default_n_trees(),
                max_depth: None,
                seed: DEFAULT_SEED,
            },
            class_weight: ClassWeight::Balanced,
        }
    }
}

/// Held-out split parameters
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SplitConfig {
    pub test_fraction: f64,
    pub seed: u64,
}

impl Default for SplitConfig {
    fn default() -> Self {
        Self {
            test_fraction: DEFAULT_TEST_FRACTION,
            seed: DEFAULT_SEED,
        }
    }
}

/// Everything the trainer needs besides the feature table
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TrainingConfig {
    pub features: Vec<FeatureColumn>,
    pub split: SplitConfig,
    /// Standardize features for variants that need it
    pub scale_features: bool,
    pub variants: Vec<ModelVariant>,
}

impl Default for TrainingConfig {
    fn default() -> Self {
        Self {
            features: FeatureColumn::DEFAULT_FEATURES.to_vec(),
            split: SplitConfig::default(),
            scale_features: true,
            variants: vec![
                ModelVariant::logistic_regression(),
                ModelVariant::random_forest(),
            ],
        }
    }
}

impl TrainingConfig {
    pub fn validate(&self) -> Result<()> {
        if self.features.is_empty() {
            return Err(ChurnError::InvalidConfig(
                "at least one feature column is required".to_string(),
            ));
        }
        FeatureColumn::guard(&self.features)?;

        let fraction = self.split.test_fraction;
        if !(fraction > 0.0 && fraction < 1.0) {
            return Err(ChurnError::InvalidConfig(format!(
                "test_fraction must be in (0, 1), got {fraction}"
            )));
        }

        if self.variants.is_empty() {
            return Err(ChurnError::InvalidConfig(
                "at least one model variant is required".to_string(),
            ));
        }
        let mut names = HashSet::new();
        for variant in &self.variants {
            if !names.insert(variant.name.as_str()) {
                return Err(ChurnError::InvalidConfig(format!(
                    "duplicate model variant name '{}'",
                    variant.name
                )));
            }
            variant.estimator.validate()?;
        }
        Ok(())
    }

    pub fn feature_names(&self) -> String {
        self.features
            .iter()
            .map(|c| c.as_str())
            .collect::<Vec<_>>()
            .join(",")
    }
}

/// Top-level configuration supplied by the enclosing application
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Transaction CSV location
    pub source: Option<PathBuf>,
    pub churn_threshold_days: i64,
    pub training: TrainingConfig,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            source: None,
            churn_threshold_days: CHURN_THRESHOLD_DAYS,
            training: TrainingConfig::default(),
        }
    }
}

impl PipelineConfig {
    /// Load a JSON configuration file; omitted fields take their defaults
    pub fn from_json_file(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        let config: PipelineConfig = serde_json::from_str(&text)?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.churn_threshold_days < 0 {
            return Err(ChurnError::InvalidConfig(format!(
                "churn threshold must be non-negative, got {}",
                self.churn_threshold_days
            )));
        }
        self.training.validate()
    }
}
