//! Held-out evaluation: classification report and ROC-AUC

use crate::error::{ChurnError, Result};
use crate::estimator::Estimator;
use crate::train::ModelArtifact;
use ndarray::{Array1, Array2};
use std::fmt;

/// Element [i][j] counts samples with true label i predicted as j
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConfusionMatrix {
    matrix: Vec<Vec<usize>>,
    n_classes: usize,
}

impl ConfusionMatrix {
    pub fn from_predictions(y_pred: &[usize], y_true: &[usize], n_classes: usize) -> Self {
        let mut matrix = vec![vec![0; n_classes]; n_classes];
        for (&pred, &truth) in y_pred.iter().zip(y_true) {
            if pred < n_classes && truth < n_classes {
                matrix[truth][pred] += 1;
            }
        }
        Self { matrix, n_classes }
    }

    pub fn n_classes(&self) -> usize {
        self.n_classes
    }

    pub fn get(&self, true_label: usize, predicted_label: usize) -> usize {
        self.matrix[true_label][predicted_label]
    }

    pub fn true_positives(&self, class: usize) -> usize {
        self.matrix[class][class]
    }

    pub fn false_positives(&self, class: usize) -> usize {
        (0..self.n_classes)
            .filter(|&i| i != class)
            .map(|i| self.matrix[i][class])
            .sum()
    }

    pub fn false_negatives(&self, class: usize) -> usize {
        (0..self.n_classes)
            .filter(|&j| j != class)
            .map(|j| self.matrix[class][j])
            .sum()
    }

    pub fn support(&self, class: usize) -> usize {
        self.matrix[class].iter().sum()
    }

    pub fn total(&self) -> usize {
        self.matrix.iter().flatten().sum()
    }

    pub fn accuracy(&self) -> f64 {
        let total = self.total();
        if total == 0 {
            return 0.0;
        }
        (0..self.n_classes).map(|c| self.matrix[c][c]).sum::<usize>() as f64 / total as f64
    }
}

impl fmt::Display for ConfusionMatrix {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:>8}", "")?;
        for class in 0..self.n_classes {
            write!(f, " {:>8}", format!("pred {class}"))?;
        }
        writeln!(f)?;
        for (class, row) in self.matrix.iter().enumerate() {
            write!(f, "{:>8}", format!("true {class}"))?;
            for count in row {
                write!(f, " {count:>8}")?;
            }
            writeln!(f)?;
        }
        Ok(())
    }
}

/// Precision, recall, F1 and support for each class
#[derive(Debug, Clone, PartialEq)]
pub struct ClassMetrics {
    pub precision: Vec<f64>,
    pub recall: Vec<f64>,
    pub f1: Vec<f64>,
    pub support: Vec<usize>,
}

impl ClassMetrics {
    pub fn from_confusion_matrix(cm: &ConfusionMatrix) -> Self {
        let n = cm.n_classes();
        let mut metrics = Self {
            precision: Vec::with_capacity(n),
            recall: Vec::with_capacity(n),
            f1: Vec::with_capacity(n),
            support: Vec::with_capacity(n),
        };

        for class in 0..n {
            let tp = cm.true_positives(class) as f64;
            let fp = cm.false_positives(class) as f64;
            let fn_ = cm.false_negatives(class) as f64;

            let p = if tp + fp > 0.0 { tp / (tp + fp) } else { 0.0 };
            let r = if tp + fn_ > 0.0 { tp / (tp + fn_) } else { 0.0 };
            let f = if p + r > 0.0 { 2.0 * p * r / (p + r) } else { 0.0 };

            metrics.precision.push(p);
            metrics.recall.push(r);
            metrics.f1.push(f);
            metrics.support.push(cm.support(class));
        }
        metrics
    }

    fn macro_avg(values: &[f64]) -> f64 {
        if values.is_empty() {
            0.0
        } else {
            values.iter().sum::<f64>() / values.len() as f64
        }
    }

    fn weighted_avg(&self, values: &[f64]) -> f64 {
        let total: usize = self.support.iter().sum();
        if total == 0 {
            return 0.0;
        }
        values
            .iter()
            .zip(&self.support)
            .map(|(v, &s)| v * s as f64)
            .sum::<f64>()
            / total as f64
    }
}

/// sklearn-style per-class precision/recall/F1 table
pub fn classification_report(cm: &ConfusionMatrix) -> String {
    let metrics = ClassMetrics::from_confusion_matrix(cm);
    let total_support: usize = metrics.support.iter().sum();
    let mut report = String::new();

    report.push_str(&format!(
        "{:>12} {:>10} {:>10} {:>10} {:>10}\n\n",
        "", "precision", "recall", "f1-score", "support"
    ));
    for class in 0..cm.n_classes() {
        report.push_str(&format!(
            "{:>12} {:>10.2} {:>10.2} {:>10.2} {:>10}\n",
            class,
            metrics.precision[class],
            metrics.recall[class],
            metrics.f1[class],
            metrics.support[class]
        ));
    }
    report.push('\n');
    report.push_str(&format!(
        "{:>12} {:>10} {:>10} {:>10.2} {:>10}\n",
        "accuracy",
        "",
        "",
        cm.accuracy(),
        total_support
    ));
    report.push_str(&format!(
        "{:>12} {:>10.2} {:>10.2} {:>10.2} {:>10}\n",
        "macro avg",
        ClassMetrics::macro_avg(&metrics.precision),
        ClassMetrics::macro_avg(&metrics.recall),
        ClassMetrics::macro_avg(&metrics.f1),
        total_support
    ));
    report.push_str(&format!(
        "{:>12} {:>10.2} {:>10.2} {:>10.2} {:>10}\n",
        "weighted avg",
        metrics.weighted_avg(&metrics.precision),
        metrics.weighted_avg(&metrics.recall),
        metrics.weighted_avg(&metrics.f1),
        total_support
    ));
    report
}

fn require_both_classes(labels: &[usize]) -> Result<()> {
    if let Some(&label) = labels.iter().find(|&&l| l > 1) {
        return Err(ChurnError::DataValidation(format!(
            "churn labels must be 0 or 1, found {label}"
        )));
    }
    match labels.first() {
        None => Err(ChurnError::DataValidation(
            "cannot evaluate on an empty held-out set".to_string(),
        )),
        Some(&first) if labels.iter().all(|&l| l == first) => {
            Err(ChurnError::InsufficientClassDiversity { class: first })
        }
        Some(_) => Ok(()),
    }
}

/// Shared preconditions of the ROC computations
fn check_scored_labels(labels: &[usize], scores: &[f64]) -> Result<()> {
    if labels.len() != scores.len() {
        return Err(ChurnError::DataValidation(format!(
            "{} labels but {} scores",
            labels.len(),
            scores.len()
        )));
    }
    require_both_classes(labels)?;
    if let Some(bad) = scores.iter().find(|s| !s.is_finite()) {
        return Err(ChurnError::Estimator(format!(
            "positive-class scores must be finite, got {bad}"
        )));
    }
    Ok(())
}

/// Area under the ROC curve for binary labels and positive-class scores
///
/// Computed as the Mann-Whitney statistic with tied scores sharing their
/// average rank.
pub fn roc_auc_score(labels: &[usize], scores: &[f64]) -> Result<f64> {
    check_scored_labels(labels, scores)?;

    let mut order: Vec<usize> = (0..scores.len()).collect();
    order.sort_by(|&a, &b| scores[a].total_cmp(&scores[b]));

    let mut ranks = vec![0.0; scores.len()];
    let mut start = 0;
    while start < order.len() {
        let mut end = start + 1;
        while end < order.len() && scores[order[end]] == scores[order[start]] {
            end += 1;
        }
        // ranks are 1-based; ties share the mean of their positions
        let rank = (start + end + 1) as f64 / 2.0;
        for &idx in &order[start..end] {
            ranks[idx] = rank;
        }
        start = end;
    }

    let n_pos = labels.iter().filter(|&&l| l == 1).count() as f64;
    let n_neg = labels.len() as f64 - n_pos;
    let pos_rank_sum: f64 = labels
        .iter()
        .zip(&ranks)
        .filter(|(l, _)| **l == 1)
        .map(|(_, r)| r)
        .sum();

    Ok((pos_rank_sum - n_pos * (n_pos + 1.0) / 2.0) / (n_pos * n_neg))
}

/// ROC curve as (false positive rate, true positive rate) points
pub fn roc_curve(labels: &[usize], scores: &[f64]) -> Result<Vec<(f64, f64)>> {
    check_scored_labels(labels, scores)?;
    let n_pos = labels.iter().filter(|&&l| l == 1).count() as f64;
    let n_neg = labels.len() as f64 - n_pos;

    let mut order: Vec<usize> = (0..scores.len()).collect();
    order.sort_by(|&a, &b| scores[b].total_cmp(&scores[a]));

    let mut points = vec![(0.0, 0.0)];
    let (mut tp, mut fp) = (0.0, 0.0);
    for (i, &idx) in order.iter().enumerate() {
        if labels[idx] == 1 {
            tp += 1.0;
        } else {
            fp += 1.0;
        }
        let threshold_changes = order
            .get(i + 1)
            .map_or(true, |&next| scores[next] != scores[idx]);
        if threshold_changes {
            points.push((fp / n_neg, tp / n_pos));
        }
    }
    Ok(points)
}

/// Metrics from one prediction pass over held-out data
#[derive(Debug, Clone)]
pub struct Evaluation {
    pub roc_auc: f64,
    pub confusion: ConfusionMatrix,
    pub classification_report: String,
    /// Positive-class probabilities, row-aligned with the held-out labels
    pub scores: Vec<f64>,
}

impl Evaluation {
    pub fn roc_curve(&self, labels: &Array1<usize>) -> Result<Vec<(f64, f64)>> {
        roc_curve(&labels.to_vec(), &self.scores)
    }
}

/// Score an estimator on features already in its input space
///
/// Read-only: neither the model nor the data is modified, so repeated calls
/// return identical results.
pub fn evaluate_estimator(
    model: &dyn Estimator,
    features: &Array2<f64>,
    labels: &Array1<usize>,
) -> Result<Evaluation> {
    let y_true = labels.to_vec();
    require_both_classes(&y_true)?;

    let y_pred = model.predict(features)?.to_vec();
    let proba = model.predict_probability(features)?;
    if proba.ncols() < 2 {
        return Err(ChurnError::Estimator(format!(
            "{} returned {} probability column(s)",
            model.kind(),
            proba.ncols()
        )));
    }
    let scores = proba.column(1).to_vec();

    let confusion = ConfusionMatrix::from_predictions(&y_pred, &y_true, 2);
    let classification_report = classification_report(&confusion);
    let roc_auc = roc_auc_score(&y_true, &scores)?;

    Ok(Evaluation {
        roc_auc,
        confusion,
        classification_report,
        scores,
    })
}

/// Score a trained artifact on raw (unscaled) held-out features
pub fn evaluate_classifier(
    artifact: &ModelArtifact,
    features: &Array2<f64>,
    labels: &Array1<usize>,
) -> Result<Evaluation> {
    let prepared = artifact.prepare(features)?;
    evaluate_estimator(artifact.estimator(), &prepared, labels)
}
