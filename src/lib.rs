//! Flood Explain - explainability pipeline for flood classifiers
//!
//! This crate explains a trained binary flood classifier with:
//! - Permutation feature importance
//! - LIME local surrogate explanations
//! - SHAP attributions (exact TreeSHAP for tree models, linear SHAP otherwise)
//!
//! # Modules
//!
//! ## Models and data
//! - [`training`] - Decision tree, random forest and logistic regression models,
//!   plus the registry that finds the newest saved model
//! - [`utils`] - Dataset bundle loading and numeric helpers
//!
//! ## Explanations
//! - [`explainability`] - Permutation importance, LIME and SHAP
//! - [`export`] - HTML report for LIME explanations
//! - [`visualization`] - SHAP summary and waterfall plots
//!
//! ## Orchestration
//! - [`pipeline`] - The sequential explainability run
//! - [`config`] - Run configuration
//! - [`cli`] - Command-line interface

// Core error handling
pub mod error;
pub mod config;

// Models and data
pub mod training;
pub mod utils;

// Explanations
pub mod explainability;
pub mod export;
pub mod visualization;

// Orchestration
pub mod pipeline;
pub mod cli;

pub use error::{ExplainError, Result};

/// Re-export commonly used types
pub mod prelude {
    // Error handling
    pub use crate::error::{ExplainError, Result};

    // Configuration and pipeline
    pub use crate::config::PipelineConfig;
    pub use crate::pipeline::{Artifacts, Pipeline, PipelineReport, Stage, StageEvent};

    // Data
    pub use crate::utils::{ArtifactFormat, DatasetBundle};

    // Models
    pub use crate::training::{
        Classifier, DecisionTree, LogisticRegression, ModelRegistry, RandomForest, TrainedModel,
    };

    // Explainability
    pub use crate::explainability::{
        permutation_importance, Explanation, ImportanceResult, LimeExplanation,
        LimeTabularExplainer, PermutationImportance, ShapExplainer, ShapOutput, ShapValues,
    };

    // Export and plots
    pub use crate::export::LimeReport;
    pub use crate::visualization::{plot_summary, plot_waterfall};
}
