//! Permutation feature importance

use crate::error::{ExplainError, Result};
use crate::training::{accuracy, Classifier};
use ndarray::{Array1, Array2};
use polars::prelude::{Column, CsvWriter, DataFrame, SerWriter};
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::path::Path;
use tracing::{debug, info};

/// One row of the importance table
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImportanceRecord {
    pub feature: String,
    pub importance_mean: f64,
    pub importance_std: f64,
}

/// Result of feature importance computation
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ImportanceResult {
    /// Feature names, in column order
    pub feature_names: Vec<String>,
    /// Score of the unshuffled data
    pub baseline_score: f64,
    /// Mean importance scores (NaN replaced by 0)
    pub importances_mean: Vec<f64>,
    /// Population standard deviation of importance scores
    pub importances_std: Vec<f64>,
    /// Raw importance scores per feature and repetition
    pub importances_raw: Vec<Vec<f64>>,
}

impl ImportanceResult {
    /// Feature indices by importance, descending; ties keep column order
    pub fn sorted_indices(&self) -> Vec<usize> {
        let mut indices: Vec<usize> = (0..self.importances_mean.len()).collect();
        indices.sort_by(|&a, &b| {
            self.importances_mean[b]
                .partial_cmp(&self.importances_mean[a])
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        indices
    }

    /// One record per feature, most important first
    pub fn to_records(&self) -> Vec<ImportanceRecord> {
        self.sorted_indices()
            .into_iter()
            .map(|i| ImportanceRecord {
                feature: self.feature_names[i].clone(),
                importance_mean: self.importances_mean[i],
                importance_std: self.importances_std[i],
            })
            .collect()
    }

    /// Sorted records as a polars frame with columns `feature,importance_mean,importance_std`
    pub fn to_dataframe(&self) -> Result<DataFrame> {
        let records = self.to_records();
        let features: Vec<&str> = records.iter().map(|r| r.feature.as_str()).collect();
        let means: Vec<f64> = records.iter().map(|r| r.importance_mean).collect();
        let stds: Vec<f64> = records.iter().map(|r| r.importance_std).collect();

        let df = DataFrame::new(vec![
            Column::new("feature".into(), features),
            Column::new("importance_mean".into(), means),
            Column::new("importance_std".into(), stds),
        ])?;
        Ok(df)
    }

    /// Write the sorted table as CSV with a header row
    pub fn write_csv(&self, path: &Path) -> Result<()> {
        let mut df = self.to_dataframe()?;
        let mut file = File::create(path)?;
        CsvWriter::new(&mut file)
            .include_header(true)
            .finish(&mut df)?;
        info!(path = %path.display(), rows = df.height(), "Feature importance written");
        Ok(())
    }
}

/// Permutation feature importance calculator
pub struct PermutationImportance<F>
where
    F: Fn(&Array2<f64>) -> Result<Array1<f64>> + Sync,
{
    /// Prediction function
    predict_fn: F,
    /// Number of permutation repeats
    n_repeats: usize,
    /// Random seed
    seed: u64,
    /// Feature names
    feature_names: Option<Vec<String>>,
}

impl<F> PermutationImportance<F>
where
    F: Fn(&Array2<f64>) -> Result<Array1<f64>> + Sync,
{
    /// Create new permutation importance calculator
    pub fn new(predict_fn: F) -> Self {
        Self {
            predict_fn,
            n_repeats: 10,
            seed: 42,
            feature_names: None,
        }
    }

    /// Set number of permutation repeats
    pub fn with_n_repeats(mut self, n_repeats: usize) -> Self {
        self.n_repeats = n_repeats.max(1);
        self
    }

    /// Set random seed
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }

    /// Set feature names
    pub fn with_feature_names(mut self, names: Vec<String>) -> Self {
        self.feature_names = Some(names);
        self
    }

    /// Importance as the drop in accuracy when a column is shuffled
    pub fn compute(&self, x: &Array2<f64>, y: &Array1<f64>) -> Result<ImportanceResult> {
        self.compute_with_scorer(x, y, |y_true, y_pred| accuracy(y_true, y_pred))
    }

    /// Compute permutation importance with a custom score (higher is better)
    pub fn compute_with_scorer<S>(
        &self,
        x: &Array2<f64>,
        y: &Array1<f64>,
        scorer: S,
    ) -> Result<ImportanceResult>
    where
        S: Fn(&Array1<f64>, &Array1<f64>) -> f64 + Sync,
    {
        let n_features = x.ncols();
        if x.nrows() != y.len() {
            return Err(ExplainError::ShapeError {
                expected: format!("y length = {}", x.nrows()),
                actual: format!("y length = {}", y.len()),
            });
        }

        let feature_names = match &self.feature_names {
            Some(names) if names.len() == n_features => names.clone(),
            Some(names) => {
                return Err(ExplainError::ShapeError {
                    expected: format!("{} feature names", n_features),
                    actual: format!("{} feature names", names.len()),
                })
            }
            None => (0..n_features).map(|i| format!("feature_{}", i)).collect(),
        };

        let baseline_pred = (self.predict_fn)(x)?;
        let baseline_score = scorer(y, &baseline_pred);

        // Sub-seeds are drawn up front so results do not depend on scheduling
        let mut master = ChaCha8Rng::seed_from_u64(self.seed);
        let column_seeds: Vec<u64> = (0..n_features).map(|_| master.gen()).collect();

        let importances_raw: Vec<Vec<f64>> = column_seeds
            .par_iter()
            .enumerate()
            .map(|(feature_idx, &seed)| {
                let mut rng = ChaCha8Rng::seed_from_u64(seed);
                let mut x_permuted = x.clone();
                let original: Vec<f64> = x.column(feature_idx).to_vec();

                let mut scores = Vec::with_capacity(self.n_repeats);
                for _ in 0..self.n_repeats {
                    let mut col = original.clone();
                    col.shuffle(&mut rng);
                    x_permuted.column_mut(feature_idx).assign(&Array1::from_vec(col));

                    let permuted_pred = (self.predict_fn)(&x_permuted)?;
                    scores.push(baseline_score - scorer(y, &permuted_pred));
                }
                debug!(feature = feature_idx, "Permuted feature scored");
                Ok(scores)
            })
            .collect::<Result<_>>()?;

        let importances_mean: Vec<f64> = importances_raw
            .iter()
            .map(|scores| nan_to_zero(scores.iter().sum::<f64>() / scores.len() as f64))
            .collect();

        let importances_std: Vec<f64> = importances_raw
            .iter()
            .zip(importances_mean.iter())
            .map(|(scores, mean)| {
                let variance: f64 =
                    scores.iter().map(|s| (s - mean).powi(2)).sum::<f64>() / scores.len() as f64;
                nan_to_zero(variance.sqrt())
            })
            .collect();

        Ok(ImportanceResult {
            feature_names,
            baseline_score,
            importances_mean,
            importances_std,
            importances_raw,
        })
    }
}

fn nan_to_zero(v: f64) -> f64 {
    if v.is_nan() {
        0.0
    } else {
        v
    }
}

/// Permutation importance of a classifier's `predict` under accuracy
pub fn permutation_importance<M: Classifier + ?Sized>(
    model: &M,
    x: &Array2<f64>,
    y: &Array1<f64>,
    feature_names: &[String],
    n_repeats: usize,
    seed: u64,
) -> Result<ImportanceResult> {
    let result = PermutationImportance::new(|data: &Array2<f64>| model.predict(data))
        .with_n_repeats(n_repeats)
        .with_seed(seed)
        .with_feature_names(feature_names.to_vec())
        .compute(x, y)?;

    info!(
        features = feature_names.len(),
        repeats = n_repeats,
        baseline = result.baseline_score,
        "Permutation importance computed"
    );
    Ok(result)
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    fn first_column_classifier(x: &Array2<f64>) -> Result<Array1<f64>> {
        Ok(x.column(0).mapv(|v| if v > 0.5 { 1.0 } else { 0.0 }))
    }

    fn sample() -> (Array2<f64>, Array1<f64>) {
        let x = array![
            [0.0, 5.0],
            [1.0, 3.0],
            [0.0, 1.0],
            [1.0, 2.0],
            [0.0, 4.0],
            [1.0, 0.0],
            [0.0, 2.0],
            [1.0, 1.0],
        ];
        let y = x.column(0).to_owned();
        (x, y)
    }

    #[test]
    fn test_irrelevant_feature_scores_zero() {
        let (x, y) = sample();
        let result = PermutationImportance::new(first_column_classifier)
            .with_n_repeats(5)
            .compute(&x, &y)
            .unwrap();

        assert_eq!(result.baseline_score, 1.0);
        assert_eq!(result.importances_mean[1], 0.0);
        assert_eq!(result.importances_std[1], 0.0);
        assert!(result.importances_mean[0] >= 0.0);
        assert_eq!(result.sorted_indices()[0], 0);
    }

    #[test]
    fn test_same_seed_same_result() {
        let (x, y) = sample();
        let a = PermutationImportance::new(first_column_classifier)
            .with_seed(3)
            .compute(&x, &y)
            .unwrap();
        let b = PermutationImportance::new(first_column_classifier)
            .with_seed(3)
            .compute(&x, &y)
            .unwrap();
        assert_eq!(a.importances_raw, b.importances_raw);
    }

    #[test]
    fn test_ties_keep_column_order() {
        let result = ImportanceResult {
            feature_names: vec!["a".into(), "b".into(), "c".into()],
            baseline_score: 1.0,
            importances_mean: vec![0.1, 0.3, 0.1],
            importances_std: vec![0.0; 3],
            importances_raw: vec![vec![]; 3],
        };
        let names: Vec<String> = result.to_records().into_iter().map(|r| r.feature).collect();
        assert_eq!(names, vec!["b", "a", "c"]);
    }

    #[test]
    fn test_name_count_mismatch_rejected() {
        let (x, y) = sample();
        let result = PermutationImportance::new(first_column_classifier)
            .with_feature_names(vec!["only_one".into()])
            .compute(&x, &y);
        assert!(matches!(result, Err(ExplainError::ShapeError { .. })));
    }

    #[test]
    fn test_csv_header_and_rows() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("feature_importance.csv");
        let result = ImportanceResult {
            feature_names: vec!["rain".into(), "slope".into()],
            baseline_score: 0.9,
            importances_mean: vec![0.05, 0.2],
            importances_std: vec![0.01, 0.02],
            importances_raw: vec![vec![]; 2],
        };
        result.write_csv(&path).unwrap();

        let text = std::fs::read_to_string(&path).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines[0], "feature,importance_mean,importance_std");
        assert_eq!(lines.len(), 3);
        assert!(lines[1].starts_with("slope,"));
        assert!(lines[2].starts_with("rain,"));
    }
}
