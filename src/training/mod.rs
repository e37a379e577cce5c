//! Classifier models the pipeline can explain
//!
//! Provides the model families a flood classifier is stored as:
//! - Decision trees and Random Forests (explained exactly by TreeSHAP)
//! - Logistic regression (explained by the linear SHAP explainer)
//!
//! plus the weighted ridge regression LIME fits as its local surrogate,
//! and discovery of the newest model file on disk.

mod models;
pub mod decision_tree;
pub mod linear_models;
pub mod random_forest;
pub mod registry;

pub use decision_tree::{Criterion, DecisionTree, TreeNode};
pub use linear_models::{LogisticRegression, RidgeRegression};
pub use models::{accuracy, Classifier, TrainedModel};
pub use random_forest::{MaxFeatures, RandomForest};
pub use registry::{find_newest_model, select_newest, ModelCandidate, ModelRegistry};
