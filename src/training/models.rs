//! Model traits, the serialized model enum, and accuracy scoring

use super::decision_tree::DecisionTree;
use super::linear_models::LogisticRegression;
use super::random_forest::RandomForest;
use crate::error::{ExplainError, Result};
use crate::utils::data_loader::{read_artifact, write_artifact};
use ndarray::{Array1, Array2};
use serde::{Deserialize, Serialize};
use std::path::Path;
use tracing::info;

/// Fraction of predictions equal to the true label
pub fn accuracy(y_true: &Array1<f64>, y_pred: &Array1<f64>) -> f64 {
    if y_true.is_empty() {
        return 0.0;
    }
    let correct = y_true
        .iter()
        .zip(y_pred.iter())
        .filter(|(t, p)| (*t - *p).abs() < 0.5)
        .count();
    correct as f64 / y_true.len() as f64
}

/// A fitted probabilistic classifier
pub trait Classifier: Send + Sync {
    /// Class probabilities, shape `(n_samples, n_classes)`, columns in `classes()` order
    fn predict_proba(&self, x: &Array2<f64>) -> Result<Array2<f64>>;

    /// Class labels, ascending
    fn classes(&self) -> &[f64];

    /// Number of input features
    fn n_features(&self) -> usize;

    /// Most probable class label per row
    fn predict(&self, x: &Array2<f64>) -> Result<Array1<f64>> {
        let proba = self.predict_proba(x)?;
        let classes = self.classes();
        let labels = proba
            .rows()
            .into_iter()
            .map(|row| {
                let mut best = 0;
                for (j, &p) in row.iter().enumerate() {
                    if p > row[best] {
                        best = j;
                    }
                }
                classes.get(best).copied().unwrap_or(best as f64)
            })
            .collect();
        Ok(labels)
    }
}

impl Classifier for DecisionTree {
    fn predict_proba(&self, x: &Array2<f64>) -> Result<Array2<f64>> {
        DecisionTree::predict_proba(self, x)
    }

    fn classes(&self) -> &[f64] {
        DecisionTree::classes(self)
    }

    fn n_features(&self) -> usize {
        DecisionTree::n_features(self)
    }
}

impl Classifier for RandomForest {
    fn predict_proba(&self, x: &Array2<f64>) -> Result<Array2<f64>> {
        RandomForest::predict_proba(self, x)
    }

    fn classes(&self) -> &[f64] {
        RandomForest::classes(self)
    }

    fn n_features(&self) -> usize {
        RandomForest::n_features(self)
    }
}

impl Classifier for LogisticRegression {
    fn predict_proba(&self, x: &Array2<f64>) -> Result<Array2<f64>> {
        LogisticRegression::predict_proba(self, x)
    }

    fn classes(&self) -> &[f64] {
        &LogisticRegression::CLASSES
    }

    fn n_features(&self) -> usize {
        LogisticRegression::n_features(self)
    }
}

/// A trained flood classifier as stored on disk
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TrainedModel {
    DecisionTree(DecisionTree),
    RandomForest(RandomForest),
    LogisticRegression(LogisticRegression),
}

impl TrainedModel {
    /// Deserialize a model (JSON or bincode by extension)
    pub fn load(path: &Path) -> Result<Self> {
        let model: Self = read_artifact(path)?;
        if model.n_features() == 0 {
            return Err(ExplainError::ModelNotFitted);
        }
        info!(
            path = %path.display(),
            kind = model.kind(),
            features = model.n_features(),
            "Model loaded"
        );
        Ok(model)
    }

    /// Serialize the model (JSON or bincode by extension)
    pub fn save(&self, path: &Path) -> Result<()> {
        write_artifact(self, path)
    }

    /// Short name of the model family
    pub fn kind(&self) -> &'static str {
        match self {
            TrainedModel::DecisionTree(_) => "decision_tree",
            TrainedModel::RandomForest(_) => "random_forest",
            TrainedModel::LogisticRegression(_) => "logistic_regression",
        }
    }

    fn inner(&self) -> &dyn Classifier {
        match self {
            TrainedModel::DecisionTree(m) => m,
            TrainedModel::RandomForest(m) => m,
            TrainedModel::LogisticRegression(m) => m,
        }
    }
}

impl Classifier for TrainedModel {
    fn predict_proba(&self, x: &Array2<f64>) -> Result<Array2<f64>> {
        let n_features = self.n_features();
        if x.ncols() != n_features {
            return Err(ExplainError::ShapeError {
                expected: format!("{} features", n_features),
                actual: format!("{} features", x.ncols()),
            });
        }
        self.inner().predict_proba(x)
    }

    fn classes(&self) -> &[f64] {
        self.inner().classes()
    }

    fn n_features(&self) -> usize {
        self.inner().n_features()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    #[test]
    fn test_accuracy() {
        let y_true = array![1.0, 0.0, 1.0, 1.0, 0.0, 1.0, 0.0, 0.0];
        let y_pred = array![1.0, 0.0, 1.0, 0.0, 0.0, 1.0, 1.0, 0.0];

        assert!((accuracy(&y_true, &y_pred) - 0.75).abs() < 1e-12);
        assert_eq!(accuracy(&array![], &array![]), 0.0);
    }

    #[test]
    fn test_predict_takes_argmax_class() {
        let model = TrainedModel::LogisticRegression(LogisticRegression::from_parameters(
            array![1.0],
            0.0,
        ));
        let pred = model.predict(&array![[-3.0], [3.0]]).unwrap();
        assert_eq!(pred, array![0.0, 1.0]);
    }

    #[test]
    fn test_wrong_width_rejected() {
        let model = TrainedModel::LogisticRegression(LogisticRegression::from_parameters(
            array![1.0, 2.0],
            0.0,
        ));
        assert!(matches!(
            model.predict_proba(&array![[1.0]]),
            Err(ExplainError::ShapeError { .. })
        ));
    }

    #[test]
    fn test_json_is_tagged_by_family() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("flood_model_a.json");
        let model = TrainedModel::LogisticRegression(LogisticRegression::from_parameters(
            array![0.5, -0.5],
            0.1,
        ));
        model.save(&path).unwrap();

        let text = std::fs::read_to_string(&path).unwrap();
        assert!(text.starts_with("{\"logistic_regression\""));

        let loaded = TrainedModel::load(&path).unwrap();
        assert_eq!(loaded.kind(), "logistic_regression");
        assert_eq!(loaded.n_features(), 2);
    }
}
