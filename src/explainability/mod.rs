//! Model explainability module
//!
//! Provides model interpretation and explanation methods including:
//! - Permutation feature importance
//! - LIME local surrogate explanations
//! - SHAP attributions (exact TreeSHAP and linear)

mod importance;
mod lime;
mod shap;

pub use importance::{permutation_importance, ImportanceRecord, ImportanceResult, PermutationImportance};
pub use lime::{FeatureSelection, LimeExplanation, LimeTabularExplainer, QuartileDiscretizer};
pub use shap::{
    model_output, Explanation, FeatureContribution, LinearExplainer, ShapExplainer, ShapOutput,
    ShapValues, TreeExplainer,
};
