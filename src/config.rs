//! Pipeline configuration

use crate::error::{ExplainError, Result};
use crate::explainability::FeatureSelection;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Configuration for an explainability run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Serialized dataset bundle (`.json` or `.bin`)
    pub dataset_path: PathBuf,

    /// Directory searched for trained models
    pub model_dir: PathBuf,

    /// Shell glob (`*`, `?`, `[...]`, `{a,b}`) a model file name must match
    pub model_pattern: String,

    /// Directory all artifacts are written to
    pub output_dir: PathBuf,

    /// Number of shuffles per feature for permutation importance
    pub n_repeats: usize,

    /// Fixed seed for permutation importance
    pub permutation_seed: u64,

    /// Maximum number of features reported by LIME
    pub lime_num_features: usize,

    /// Neighbourhood size sampled by LIME
    pub lime_num_samples: usize,

    /// How LIME picks the features of its surrogate
    pub lime_feature_selection: FeatureSelection,

    /// Number of test rows explained by SHAP
    pub shap_sample_size: usize,

    /// Resolution of rendered plots
    pub dpi: u32,

    /// Seed for LIME/SHAP sampling; entropy-seeded when absent
    pub seed: Option<u64>,

    /// Open each plot with the system viewer after saving
    pub display_plots: bool,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            dataset_path: PathBuf::from("data/processed/flood_dataset.json"),
            model_dir: PathBuf::from("models"),
            model_pattern: "flood_model_*.json".to_string(),
            output_dir: PathBuf::from("results/explainability"),
            n_repeats: 10,
            permutation_seed: 42,
            lime_num_features: 10,
            lime_num_samples: 5000,
            lime_feature_selection: FeatureSelection::Auto,
            shap_sample_size: 500,
            dpi: 300,
            seed: None,
            display_plots: true,
        }
    }
}

impl PipelineConfig {
    /// Create a configuration with the default paths and constants
    pub fn new() -> Self {
        Self::default()
    }

    /// Load a configuration from a JSON file; missing keys take defaults
    pub fn from_file(path: &Path) -> Result<Self> {
        let json = std::fs::read_to_string(path)?;
        let config: Self = serde_json::from_str(&json)
            .map_err(|e| ExplainError::ConfigError(format!("{}: {}", path.display(), e)))?;
        Ok(config)
    }

    /// Builder method to set the dataset path
    pub fn with_dataset(mut self, path: impl Into<PathBuf>) -> Self {
        self.dataset_path = path.into();
        self
    }

    /// Builder method to set the model directory
    pub fn with_model_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.model_dir = dir.into();
        self
    }

    /// Builder method to set the model file pattern
    pub fn with_model_pattern(mut self, pattern: impl Into<String>) -> Self {
        self.model_pattern = pattern.into();
        self
    }

    /// Builder method to set the output directory
    pub fn with_output_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.output_dir = dir.into();
        self
    }

    /// Builder method to set the sampling seed
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = Some(seed);
        self
    }

    /// Builder method to set the permutation repeat count
    pub fn with_n_repeats(mut self, n: usize) -> Self {
        self.n_repeats = n;
        self
    }

    /// Builder method to set the SHAP sample size
    pub fn with_shap_sample_size(mut self, n: usize) -> Self {
        self.shap_sample_size = n;
        self
    }

    /// Builder method to set the LIME neighbourhood size
    pub fn with_lime_num_samples(mut self, n: usize) -> Self {
        self.lime_num_samples = n;
        self
    }

    /// Builder method to set the LIME feature selection strategy
    pub fn with_lime_feature_selection(mut self, selection: FeatureSelection) -> Self {
        self.lime_feature_selection = selection;
        self
    }

    /// Builder method to set plot resolution
    pub fn with_dpi(mut self, dpi: u32) -> Self {
        self.dpi = dpi;
        self
    }

    /// Builder method to toggle opening plots after saving
    pub fn with_display_plots(mut self, display: bool) -> Self {
        self.display_plots = display;
        self
    }

    /// Reject values no stage can run with
    pub fn validate(&self) -> Result<()> {
        let checks = [
            (self.n_repeats == 0, "n_repeats", self.n_repeats.to_string()),
            (self.lime_num_features == 0, "lime_num_features", self.lime_num_features.to_string()),
            (self.lime_num_samples < 2, "lime_num_samples", self.lime_num_samples.to_string()),
            (self.shap_sample_size == 0, "shap_sample_size", self.shap_sample_size.to_string()),
            (self.dpi == 0, "dpi", self.dpi.to_string()),
        ];
        for (bad, name, value) in checks {
            if bad {
                return Err(ExplainError::ConfigError(format!(
                    "{} = {} is out of range",
                    name, value
                )));
            }
        }
        if self.model_pattern.trim().is_empty() {
            return Err(ExplainError::ConfigError("model_pattern is empty".to_string()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_match_fixed_constants() {
        let config = PipelineConfig::default();
        assert_eq!(config.n_repeats, 10);
        assert_eq!(config.permutation_seed, 42);
        assert_eq!(config.lime_num_features, 10);
        assert_eq!(config.shap_sample_size, 500);
        assert_eq!(config.dpi, 300);
        assert!(config.seed.is_none());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_zero_repeats() {
        let config = PipelineConfig::default().with_n_repeats(0);
        assert!(matches!(config.validate(), Err(ExplainError::ConfigError(_))));
    }

    #[test]
    fn test_partial_json_takes_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        std::fs::write(&path, r#"{ "seed": 7, "dpi": 150 }"#).unwrap();

        let config = PipelineConfig::from_file(&path).unwrap();
        assert_eq!(config.seed, Some(7));
        assert_eq!(config.dpi, 150);
        assert_eq!(config.n_repeats, 10);
        assert_eq!(config.lime_feature_selection, FeatureSelection::Auto);
    }

    #[test]
    fn test_feature_selection_from_json() {
        let config: PipelineConfig =
            serde_json::from_str(r#"{ "lime_feature_selection": "highest_weights" }"#).unwrap();
        assert_eq!(config.lime_feature_selection, FeatureSelection::HighestWeights);
    }
}
