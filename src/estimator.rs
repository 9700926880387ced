//! Pluggable binary classifiers backed by linfa

use crate::config::EstimatorSpec;
use crate::error::{ChurnError, Result};
use linfa::prelude::*;
use linfa_logistic::{FittedLogisticRegression, LogisticRegression};
use linfa_trees::DecisionTree;
use ndarray::{Array1, Array2, Axis};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde_json::json;
use std::fmt;

/// Capability set every model variant provides
///
/// Labels are 0 (retained) and 1 (churned). Probability rows are
/// `[P(class 0), P(class 1)]`.
pub trait Estimator: fmt::Debug + Send + Sync {
    fn kind(&self) -> &'static str;

    fn fit(&mut self, features: &Array2<f64>, labels: &Array1<usize>) -> Result<()>;

    fn predict(&self, features: &Array2<f64>) -> Result<Array1<usize>>;

    fn predict_probability(&self, features: &Array2<f64>) -> Result<Array2<f64>>;

    /// Serializable description of the fitted model
    fn snapshot(&self) -> serde_json::Value;
}

/// Instantiate an unfitted estimator for `spec`
pub fn build_estimator(spec: &EstimatorSpec) -> Box<dyn Estimator> {
    match *spec {
        EstimatorSpec::LogisticRegression {
            max_iterations,
            alpha,
        } => Box::new(LogisticRegressionModel::new(max_iterations, alpha)),
        EstimatorSpec::RandomForest {
            n_trees,
            max_depth,
            seed,
        } => Box::new(RandomForestModel::new(n_trees, max_depth, seed)),
        EstimatorSpec::DecisionTree { max_depth } => Box::new(DecisionTreeModel::new(max_depth)),
    }
}

fn check_training_data(features: &Array2<f64>, labels: &Array1<usize>) -> Result<()> {
    if features.nrows() != labels.len() {
        return Err(ChurnError::Estimator(format!(
            "{} feature rows but {} labels",
            features.nrows(),
            labels.len()
        )));
    }
    if labels.iter().any(|&l| l > 1) {
        return Err(ChurnError::Estimator("labels must be 0 or 1".to_string()));
    }
    let positives = labels.iter().filter(|&&l| l == 1).count();
    if positives == 0 || positives == labels.len() {
        return Err(ChurnError::Estimator(
            "training labels contain a single class".to_string(),
        ));
    }
    Ok(())
}

fn not_fitted(kind: &str) -> ChurnError {
    ChurnError::Estimator(format!("{kind} has not been fitted"))
}

/// Stack positive-class probabilities into `[1 - p, p]` rows
fn probability_rows(positive: &Array1<f64>) -> Array2<f64> {
    let mut rows = Array2::zeros((positive.len(), 2));
    for (mut row, &p) in rows.outer_iter_mut().zip(positive.iter()) {
        row[0] = 1.0 - p;
        row[1] = p;
    }
    rows
}

/// L2-regularized logistic regression
pub struct LogisticRegressionModel {
    max_iterations: u64,
    alpha: f64,
    fitted: Option<FittedLogistic>,
}

struct FittedLogistic {
    model: FittedLogisticRegression<f64, usize>,
    /// Label linfa treats as its positive class
    positive_class: usize,
}

impl LogisticRegressionModel {
    pub fn new(max_iterations: u64, alpha: f64) -> Self {
        Self {
            max_iterations,
            alpha,
            fitted: None,
        }
    }
}

impl fmt::Debug for LogisticRegressionModel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LogisticRegressionModel")
            .field("max_iterations", &self.max_iterations)
            .field("alpha", &self.alpha)
            .field("fitted", &self.fitted.is_some())
            .finish()
    }
}

impl Estimator for LogisticRegressionModel {
    fn kind(&self) -> &'static str {
        "logistic_regression"
    }

    fn fit(&mut self, features: &Array2<f64>, labels: &Array1<usize>) -> Result<()> {
        check_training_data(features, labels)?;
        let dataset = Dataset::new(features.to_owned(), labels.to_owned());
        let model = LogisticRegression::default()
            .max_iterations(self.max_iterations)
            .alpha(self.alpha)
            .fit(&dataset)
            .map_err(|e| ChurnError::Estimator(format!("logistic regression: {e}")))?;

        // linfa picks its own positive label; recover it from one confident row
        let probs = model.predict_probabilities(features);
        let preds: Array1<usize> = model.predict(features);
        let positive_class = probs
            .iter()
            .zip(preds.iter())
            .find_map(|(&p, &pred)| {
                if p > 0.5 {
                    Some(pred)
                } else if p < 0.5 {
                    Some(1 - pred)
                } else {
                    None
                }
            })
            .unwrap_or(1);

        self.fitted = Some(FittedLogistic {
            model,
            positive_class,
        });
        Ok(())
    }

    fn predict(&self, features: &Array2<f64>) -> Result<Array1<usize>> {
        let fitted = self.fitted.as_ref().ok_or_else(|| not_fitted(self.kind()))?;
        Ok(fitted.model.predict(features))
    }

    fn predict_probability(&self, features: &Array2<f64>) -> Result<Array2<f64>> {
        let fitted = self.fitted.as_ref().ok_or_else(|| not_fitted(self.kind()))?;
        let p = fitted.model.predict_probabilities(features);
        let churn = if fitted.positive_class == 1 {
            p
        } else {
            p.mapv(|v| 1.0 - v)
        };
        Ok(probability_rows(&churn))
    }

    fn snapshot(&self) -> serde_json::Value {
        match &self.fitted {
            Some(fitted) => json!({
                "kind": self.kind(),
                "max_iterations": self.max_iterations,
                "alpha": self.alpha,
                "coefficients": fitted.model.params().to_vec(),
                "intercept": fitted.model.intercept(),
                "positive_class": fitted.positive_class,
            }),
            None => json!({ "kind": self.kind(), "fitted": false }),
        }
    }
}

fn fit_tree(
    features: Array2<f64>,
    labels: Array1<usize>,
    max_depth: Option<usize>,
) -> Result<DecisionTree<f64, usize>> {
    DecisionTree::params()
        .max_depth(max_depth)
        .fit(&Dataset::new(features, labels))
        .map_err(|e| ChurnError::Estimator(format!("decision tree: {e}")))
}

/// Single CART decision tree (Gini impurity)
pub struct DecisionTreeModel {
    max_depth: Option<usize>,
    tree: Option<DecisionTree<f64, usize>>,
}

impl DecisionTreeModel {
    pub fn new(max_depth: Option<usize>) -> Self {
        Self {
            max_depth,
            tree: None,
        }
    }
}

impl fmt::Debug for DecisionTreeModel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DecisionTreeModel")
            .field("max_depth", &self.max_depth)
            .field("fitted", &self.tree.is_some())
            .finish()
    }
}

impl Estimator for DecisionTreeModel {
    fn kind(&self) -> &'static str {
        "decision_tree"
    }

    fn fit(&mut self, features: &Array2<f64>, labels: &Array1<usize>) -> Result<()> {
        check_training_data(features, labels)?;
        self.tree = Some(fit_tree(features.to_owned(), labels.to_owned(), self.max_depth)?);
        Ok(())
    }

    fn predict(&self, features: &Array2<f64>) -> Result<Array1<usize>> {
        let tree = self.tree.as_ref().ok_or_else(|| not_fitted(self.kind()))?;
        Ok(tree.predict(features))
    }

    fn predict_probability(&self, features: &Array2<f64>) -> Result<Array2<f64>> {
        let churn = self.predict(features)?.mapv(|label| label as f64);
        Ok(probability_rows(&churn))
    }

    fn snapshot(&self) -> serde_json::Value {
        match &self.tree {
            Some(tree) => json!({
                "kind": self.kind(),
                "max_depth": self.max_depth,
                "depth": tree.max_depth(),
                "leaves": tree.num_leaves(),
            }),
            None => json!({ "kind": self.kind(), "fitted": false }),
        }
    }
}

/// Bootstrap-aggregated decision trees
///
/// Each tree is fit on a bootstrap sample drawn from a per-forest seeded
/// RNG; the churn probability is the share of trees voting churn.
pub struct RandomForestModel {
    n_trees: usize,
    max_depth: Option<usize>,
    seed: u64,
    trees: Vec<DecisionTree<f64, usize>>,
}

impl RandomForestModel {
    pub fn new(n_trees: usize, max_depth: Option<usize>, seed: u64) -> Self {
        Self {
            n_trees,
            max_depth,
            seed,
            trees: Vec::new(),
        }
    }

    fn votes(&self, features: &Array2<f64>) -> Result<Array1<f64>> {
        if self.trees.is_empty() {
            return Err(not_fitted(self.kind()));
        }
        let mut votes = Array1::<f64>::zeros(features.nrows());
        for tree in &self.trees {
            let pred: Array1<usize> = tree.predict(features);
            votes += &pred.mapv(|label| label as f64);
        }
        Ok(votes / self.trees.len() as f64)
    }
}

impl fmt::Debug for RandomForestModel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RandomForestModel")
            .field("n_trees", &self.n_trees)
            .field("max_depth", &self.max_depth)
            .field("seed", &self.seed)
            .field("fitted_trees", &self.trees.len())
            .finish()
    }
}

impl Estimator for RandomForestModel {
    fn kind(&self) -> &'static str {
        "random_forest"
    }

    fn fit(&mut self, features: &Array2<f64>, labels: &Array1<usize>) -> Result<()> {
        check_training_data(features, labels)?;
        let n = features.nrows();
        let mut rng = StdRng::seed_from_u64(self.seed);

        let mut trees = Vec::with_capacity(self.n_trees);
        for _ in 0..self.n_trees {
            let sample: Vec<usize> = (0..n).map(|_| rng.gen_range(0..n)).collect();
            let x = features.select(Axis(0), &sample);
            let y = labels.select(Axis(0), &sample);
            trees.push(fit_tree(x, y, self.max_depth)?);
        }
        self.trees = trees;
        Ok(())
    }

    fn predict(&self, features: &Array2<f64>) -> Result<Array1<usize>> {
        Ok(self.votes(features)?.mapv(|p| usize::from(p > 0.5)))
    }

    fn predict_probability(&self, features: &Array2<f64>) -> Result<Array2<f64>> {
        Ok(probability_rows(&self.votes(features)?))
    }

    fn snapshot(&self) -> serde_json::Value {
        let depths: Vec<usize> = self.trees.iter().map(|t| t.max_depth()).collect();
        json!({
            "kind": self.kind(),
            "n_trees": self.n_trees,
            "max_depth": self.max_depth,
            "seed": self.seed,
            "fitted": !self.trees.is_empty(),
            "tree_depths": depths,
        })
    }
}
