//! Feature standardization fitted on the training partition only

use crate::error::{ChurnError, Result};
use ndarray::{Array1, Array2, Axis};
use serde::Serialize;

/// Per-column zero-mean, unit-variance transform
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StandardScaler {
    mean: Array1<f64>,
    /// Population standard deviation; constant columns store 1.0
    std: Array1<f64>,
}

impl StandardScaler {
    /// Learn column statistics from `features`
    pub fn fit(features: &Array2<f64>) -> Result<Self> {
        let mean = features.mean_axis(Axis(0)).ok_or_else(|| {
            ChurnError::DataValidation("cannot fit a scaler on zero rows".to_string())
        })?;
        let std = features
            .std_axis(Axis(0), 0.0)
            .mapv(|s| if s > f64::EPSILON { s } else { 1.0 });
        Ok(Self { mean, std })
    }

    pub fn n_features(&self) -> usize {
        self.mean.len()
    }

    pub fn mean(&self) -> &Array1<f64> {
        &self.mean
    }

    pub fn std(&self) -> &Array1<f64> {
        &self.std
    }

    /// Apply `(x - mean) / std` column-wise
    pub fn transform(&self, features: &Array2<f64>) -> Result<Array2<f64>> {
        if features.ncols() != self.n_features() {
            return Err(ChurnError::DataValidation(format!(
                "scaler was fit on {} features, got {}",
                self.n_features(),
                features.ncols()
            )));
        }
        Ok((features - &self.mean) / &self.std)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use ndarray::array;

    #[test]
    fn test_fit_statistics() {
        let x = array![[1.0, 10.0], [3.0, 10.0], [5.0, 10.0]];
        let scaler = StandardScaler::fit(&x).unwrap();

        assert_relative_eq!(scaler.mean()[0], 3.0);
        assert_relative_eq!(scaler.std()[0], (8.0f64 / 3.0).sqrt());
        // constant column falls back to unit scale
        assert_relative_eq!(scaler.std()[1], 1.0);

        let scaled = scaler.transform(&x).unwrap();
        assert_relative_eq!(scaled.column(0).sum(), 0.0, epsilon = 1e-12);
        assert_relative_eq!(scaled[[1, 1]], 0.0);
    }

    #[test]
    fn test_transform_uses_training_statistics_only() {
        let train = array![[1.0, 100.0], [2.0, 200.0], [3.0, 300.0], [4.0, 400.0]];
        let test = array![[10.0, 50.0], [0.0, 1000.0]];
        let scaler = StandardScaler::fit(&train).unwrap();
        let scaled = scaler.transform(&test).unwrap();

        for col in 0..2 {
            let column = train.column(col);
            let mean = column.sum() / column.len() as f64;
            let var = column.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / column.len() as f64;
            for row in 0..test.nrows() {
                let expected = (test[[row, col]] - mean) / var.sqrt();
                assert_relative_eq!(scaled[[row, col]], expected, epsilon = 1e-12);
            }
        }
    }

    #[test]
    fn test_shape_mismatch_and_empty() {
        let scaler = StandardScaler::fit(&array![[1.0, 2.0], [3.0, 4.0]]).unwrap();
        assert!(scaler.transform(&array![[1.0, 2.0, 3.0]]).is_err());
        assert!(StandardScaler::fit(&Array2::<f64>::zeros((0, 2))).is_err());
    }
}
