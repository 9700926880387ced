//! Stratified, seeded train/test partitioning

use crate::config::SplitConfig;
use crate::error::{ChurnError, Result};
use ndarray::Array1;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use std::collections::BTreeMap;
use tracing::debug;

/// Row indices of each partition, sorted ascending
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrainTestSplit {
    pub train: Vec<usize>,
    pub test: Vec<usize>,
}

impl TrainTestSplit {
    pub fn len(&self) -> usize {
        self.train.len() + self.test.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Partition rows so both sides keep the label proportions of `labels`
///
/// The test side gets `ceil(test_fraction * n)` rows; every class appears in
/// both partitions. Identical labels and seed always yield the same split.
pub fn stratified_split(labels: &Array1<usize>, config: &SplitConfig) -> Result<TrainTestSplit> {
    let n = labels.len();
    let fraction = config.test_fraction;
    if !(fraction > 0.0 && fraction < 1.0) {
        return Err(ChurnError::InvalidConfig(format!(
            "test_fraction must be in (0, 1), got {fraction}"
        )));
    }

    let mut by_class: BTreeMap<usize, Vec<usize>> = BTreeMap::new();
    for (idx, &label) in labels.iter().enumerate() {
        by_class.entry(label).or_default().push(idx);
    }

    if let Some((class, members)) = by_class.iter().find(|(_, m)| m.len() < 2) {
        return Err(ChurnError::SplitStratification(format!(
            "class {class} has {} member(s); at least 2 are required",
            members.len()
        )));
    }

    let n_classes = by_class.len();
    let n_test = (fraction * n as f64).ceil() as usize;
    let n_train = n - n_test;
    if n_test < n_classes || n_train < n_classes {
        return Err(ChurnError::SplitStratification(format!(
            "{n} rows with test fraction {fraction} leave {n_train} train / {n_test} test rows for {n_classes} classes"
        )));
    }

    let counts: Vec<usize> = by_class.values().map(Vec::len).collect();
    let allocation = allocate_test_rows(&counts, n_test);

    let mut rng = StdRng::seed_from_u64(config.seed);
    let mut train = Vec::with_capacity(n_train);
    let mut test = Vec::with_capacity(n_test);
    for (members, &take) in by_class.into_values().zip(&allocation) {
        let mut shuffled = members;
        shuffled.shuffle(&mut rng);
        test.extend_from_slice(&shuffled[..take]);
        train.extend_from_slice(&shuffled[take..]);
    }
    train.sort_unstable();
    test.sort_unstable();

    debug!(train = train.len(), test = test.len(), seed = config.seed, "Stratified split");
    Ok(TrainTestSplit { train, test })
}

/// Proportional per-class test counts summing to `n_test`, each in `1..count`
fn allocate_test_rows(counts: &[usize], n_test: usize) -> Vec<usize> {
    let total: usize = counts.iter().sum();
    let mut allocation: Vec<usize> = counts
        .iter()
        .map(|&c| {
            let share = (n_test as f64 * c as f64 / total as f64).round() as usize;
            share.clamp(1, c - 1)
        })
        .collect();

    loop {
        let assigned: usize = allocation.iter().sum();
        if assigned == n_test {
            break;
        }
        if assigned > n_test {
            // shrink the class holding the most test rows
            let Some(idx) = (0..counts.len())
                .filter(|&i| allocation[i] > 1)
                .max_by_key(|&i| (allocation[i], std::cmp::Reverse(i)))
            else {
                break;
            };
            allocation[idx] -= 1;
        } else {
            // grow the class with the most rows still in train
            let Some(idx) = (0..counts.len())
                .filter(|&i| allocation[i] < counts[i] - 1)
                .max_by_key(|&i| (counts[i] - allocation[i], std::cmp::Reverse(i)))
            else {
                break;
            };
            allocation[idx] += 1;
        }
    }
    allocation
}
