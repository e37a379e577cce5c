//! Dataset bundle loading and validation

use crate::error::{ExplainError, Result};
use ndarray::{Array1, Array2};
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::{BufReader, BufWriter};
use std::path::Path;
use tracing::{debug, info};

/// On-disk encoding of a bundle or model, chosen by file extension
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArtifactFormat {
    Json,
    Bincode,
}

impl ArtifactFormat {
    /// Detect the format from a path's extension
    pub fn from_path(path: &Path) -> Result<Self> {
        let ext = path
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| e.to_lowercase())
            .unwrap_or_default();

        match ext.as_str() {
            "json" => Ok(ArtifactFormat::Json),
            "bin" | "bincode" => Ok(ArtifactFormat::Bincode),
            _ => Err(ExplainError::DataError(format!(
                "Unsupported artifact format '{}' for {}",
                ext,
                path.display()
            ))),
        }
    }
}

/// Read a serde value from a JSON or bincode file
pub(crate) fn read_artifact<T: serde::de::DeserializeOwned>(path: &Path) -> Result<T> {
    let format = ArtifactFormat::from_path(path)?;
    let reader = BufReader::new(File::open(path)?);
    let value = match format {
        ArtifactFormat::Json => serde_json::from_reader(reader)?,
        ArtifactFormat::Bincode => bincode::deserialize_from(reader)?,
    };
    Ok(value)
}

/// Write a serde value as JSON or bincode depending on the extension
pub(crate) fn write_artifact<T: Serialize>(value: &T, path: &Path) -> Result<()> {
    let format = ArtifactFormat::from_path(path)?;
    let writer = BufWriter::new(File::create(path)?);
    match format {
        ArtifactFormat::Json => serde_json::to_writer(writer, value)?,
        ArtifactFormat::Bincode => bincode::serialize_into(writer, value)?,
    }
    Ok(())
}

/// Pre-processed train/test split with feature names
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatasetBundle {
    /// Training features (rows = samples)
    pub x_train: Array2<f64>,
    /// Training labels in {0, 1}
    pub y_train: Array1<f64>,
    /// Held-out features
    pub x_test: Array2<f64>,
    /// Held-out labels in {0, 1}
    pub y_test: Array1<f64>,
    /// Column names, one per feature
    pub feature_names: Vec<String>,
}

impl DatasetBundle {
    /// Build a bundle in memory, validating and clamping it like a loaded one
    pub fn new(
        x_train: Array2<f64>,
        y_train: Array1<f64>,
        x_test: Array2<f64>,
        y_test: Array1<f64>,
        feature_names: Vec<String>,
    ) -> Result<Self> {
        let mut bundle = Self {
            x_train,
            y_train,
            x_test,
            y_test,
            feature_names,
        };
        bundle.validate()?;
        bundle.clamp_non_negative();
        Ok(bundle)
    }

    /// Load a bundle from disk, then validate and clamp it
    pub fn load(path: &Path) -> Result<Self> {
        let mut bundle: Self = read_artifact(path)?;
        bundle.validate()?;
        bundle.clamp_non_negative();

        info!(
            path = %path.display(),
            train_rows = bundle.x_train.nrows(),
            test_rows = bundle.x_test.nrows(),
            features = bundle.n_features(),
            "Dataset bundle loaded"
        );
        Ok(bundle)
    }

    /// Persist the bundle (JSON or bincode by extension)
    pub fn save(&self, path: &Path) -> Result<()> {
        write_artifact(self, path)
    }

    /// Number of feature columns
    pub fn n_features(&self) -> usize {
        self.feature_names.len()
    }

    /// Check shape and label invariants
    pub fn validate(&self) -> Result<()> {
        let n_names = self.feature_names.len();

        for (split, x) in [("x_train", &self.x_train), ("x_test", &self.x_test)] {
            if x.ncols() != n_names {
                return Err(ExplainError::ShapeError {
                    expected: format!("{} columns = {} (feature names)", split, n_names),
                    actual: format!("{} columns = {}", split, x.ncols()),
                });
            }
        }

        for (split, x, y) in [
            ("train", &self.x_train, &self.y_train),
            ("test", &self.x_test, &self.y_test),
        ] {
            if x.nrows() != y.len() {
                return Err(ExplainError::ShapeError {
                    expected: format!("{} labels = {}", split, x.nrows()),
                    actual: format!("{} labels = {}", split, y.len()),
                });
            }
            if let Some(bad) = y.iter().find(|&&v| v != 0.0 && v != 1.0) {
                return Err(ExplainError::ValidationError(format!(
                    "{} labels must be binary (0/1), found {}",
                    split, bad
                )));
            }
        }

        if self.x_train.nrows() == 0 {
            return Err(ExplainError::ValidationError(
                "training split is empty".to_string(),
            ));
        }
        if self.x_test.nrows() == 0 {
            return Err(ExplainError::ValidationError("test split is empty".to_string()));
        }

        Ok(())
    }

    /// Replace negative and NaN feature values with zero
    pub fn clamp_non_negative(&mut self) {
        let mut clamped = 0usize;
        for x in [&mut self.x_train, &mut self.x_test] {
            x.mapv_inplace(|v| {
                if v >= 0.0 {
                    v
                } else {
                    clamped += 1;
                    0.0
                }
            });
        }
        if clamped > 0 {
            debug!(values = clamped, "Clamped negative or NaN feature values to zero");
        }
    }
}
