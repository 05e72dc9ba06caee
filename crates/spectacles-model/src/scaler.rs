//! Per-column standardisation fitted on the training matrix.

use ndarray::{Array2, ArrayView2};
use serde::{Deserialize, Serialize};

/// Variances at or below this are treated as constant columns.
const MIN_VARIANCE: f64 = 1e-12;

/// Standard scaler: `(x - mean) / std` per column, population std.
///
/// Passthrough columns (one-hot indicators) and constant columns keep
/// mean 0 / scale 1 so they are left unchanged.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StandardScaler {
    columns: Vec<String>,
    mean: Vec<f64>,
    scale: Vec<f64>,
}

impl StandardScaler {
    /// Fit on `x`, whose columns are named by `columns`.
    pub fn fit(columns: &[String], x: ArrayView2<f64>, passthrough: &[bool]) -> Self {
        let rows = x.nrows() as f64;
        let mut mean = vec![0.0; columns.len()];
        let mut scale = vec![1.0; columns.len()];

        for (j, col) in x.columns().into_iter().enumerate().take(columns.len()) {
            if passthrough.get(j).copied().unwrap_or(false) || x.nrows() == 0 {
                continue;
            }
            let m = col.sum() / rows;
            let var = col.iter().map(|v| (v - m).powi(2)).sum::<f64>() / rows;
            mean[j] = m;
            if var > MIN_VARIANCE {
                scale[j] = var.sqrt();
            }
        }

        Self {
            columns: columns.to_vec(),
            mean,
            scale,
        }
    }

    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    pub fn mean(&self) -> &[f64] {
        &self.mean
    }

    pub fn scale(&self) -> &[f64] {
        &self.scale
    }

    pub fn transform_row(&self, row: &mut [f64]) {
        for ((v, m), s) in row.iter_mut().zip(&self.mean).zip(&self.scale) {
            *v = (*v - m) / s;
        }
    }

    pub fn transform(&self, x: &mut Array2<f64>) {
        for mut row in x.rows_mut() {
            for ((v, m), s) in row.iter_mut().zip(&self.mean).zip(&self.scale) {
                *v = (*v - m) / s;
            }
        }
    }
}
