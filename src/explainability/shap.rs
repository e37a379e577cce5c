//! SHAP attributions
//!
//! Tree models are explained with exact path-dependent TreeSHAP over leaf class
//! probabilities, using training sample counts as node covers. Logistic
//! regression is explained in margin space against the mean of a background
//! set. Either way `base_value + sum(values[row])` reproduces the model output.

use crate::error::{ExplainError, Result};
use crate::training::{Classifier, TrainedModel, TreeNode};
use ndarray::{Array1, Array2, Axis};
use serde::{Deserialize, Serialize};
use tracing::info;

/// Feature contribution to a prediction
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeatureContribution {
    /// Feature index
    pub feature_index: usize,
    /// Feature name
    pub feature_name: String,
    /// Feature value for this instance
    pub feature_value: f64,
    /// Contribution to the output (SHAP value)
    pub contribution: f64,
}

/// SHAP values of one model output over a set of explained rows
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ShapValues {
    /// Attributions, shape `(n_samples, n_features)`
    pub values: Array2<f64>,
    /// Expected model output
    pub base_value: f64,
    /// Explained rows, shape `(n_samples, n_features)`
    pub data: Array2<f64>,
    /// Column names
    pub feature_names: Vec<String>,
    /// Row index of each explained sample in the source matrix
    pub sample_indices: Vec<usize>,
    /// Class column explained; `None` for a margin
    pub class_index: Option<usize>,
}

impl ShapValues {
    /// Number of explained rows
    pub fn n_samples(&self) -> usize {
        self.values.nrows()
    }

    /// Number of features
    pub fn n_features(&self) -> usize {
        self.values.ncols()
    }

    /// Reconstructed model output for an explained row
    pub fn output(&self, row: usize) -> f64 {
        self.base_value + self.values.row(row).sum()
    }

    /// Mean absolute attribution per feature
    pub fn mean_abs(&self) -> Array1<f64> {
        self.values
            .mapv(f64::abs)
            .mean_axis(Axis(0))
            .unwrap_or_else(|| Array1::zeros(self.n_features()))
    }

    /// Feature indices by mean |SHAP|, descending
    pub fn feature_order(&self) -> Vec<usize> {
        let mean_abs = self.mean_abs();
        let mut order: Vec<usize> = (0..self.n_features()).collect();
        order.sort_by(|&a, &b| {
            mean_abs[b]
                .partial_cmp(&mean_abs[a])
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        order
    }

    /// Bind one explained row to its sample index
    pub fn explanation(&self, row: usize) -> Result<Explanation> {
        if row >= self.n_samples() {
            return Err(ExplainError::ValidationError(format!(
                "row {} out of range for {} explained samples",
                row,
                self.n_samples()
            )));
        }
        Ok(Explanation {
            sample_index: self.sample_indices[row],
            class_index: self.class_index,
            values: self.values.row(row).to_vec(),
            base_value: self.base_value,
            data: self.data.row(row).to_vec(),
            feature_names: self.feature_names.clone(),
        })
    }
}

/// Attributions of a single explained row
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Explanation {
    /// Row index in the source matrix
    pub sample_index: usize,
    /// Class column explained; `None` for a margin
    pub class_index: Option<usize>,
    pub values: Vec<f64>,
    pub base_value: f64,
    pub data: Vec<f64>,
    pub feature_names: Vec<String>,
}

impl Explanation {
    /// `base_value + sum(values)`
    pub fn output(&self) -> f64 {
        self.base_value + self.values.iter().sum::<f64>()
    }

    /// Contributions sorted by absolute value, descending
    pub fn sorted_contributions(&self) -> Vec<FeatureContribution> {
        let mut contributions: Vec<FeatureContribution> = self
            .values
            .iter()
            .enumerate()
            .map(|(i, &v)| FeatureContribution {
                feature_index: i,
                feature_name: self.feature_names[i].clone(),
                feature_value: self.data[i],
                contribution: v,
            })
            .collect();
        contributions.sort_by(|a, b| {
            b.contribution
                .abs()
                .partial_cmp(&a.contribution.abs())
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        contributions
    }
}

/// SHAP output shape, decided once per model
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ShapOutput {
    /// Binary or single-output model
    Single(ShapValues),
    /// One set of values per class
    PerClass(Vec<ShapValues>),
}

impl ShapOutput {
    /// Name of the output branch
    pub fn branch(&self) -> &'static str {
        match self {
            ShapOutput::Single(_) => "single",
            ShapOutput::PerClass(_) => "per_class",
        }
    }

    /// All per-output value sets
    pub fn outputs(&self) -> Vec<&ShapValues> {
        match self {
            ShapOutput::Single(values) => vec![values],
            ShapOutput::PerClass(per_class) => per_class.iter().collect(),
        }
    }

    /// Number of explained rows
    pub fn n_samples(&self) -> usize {
        self.outputs().first().map_or(0, |v| v.n_samples())
    }
}

#[derive(Debug, Clone, Copy)]
struct PathElement {
    feature: Option<usize>,
    zero_fraction: f64,
    one_fraction: f64,
    pweight: f64,
}

fn extend_path(path: &mut Vec<PathElement>, zero_fraction: f64, one_fraction: f64, feature: Option<usize>) {
    let depth = path.len();
    path.push(PathElement {
        feature,
        zero_fraction,
        one_fraction,
        pweight: if depth == 0 { 1.0 } else { 0.0 },
    });
    for i in (0..depth).rev() {
        path[i + 1].pweight += one_fraction * path[i].pweight * (i + 1) as f64 / (depth + 1) as f64;
        path[i].pweight = zero_fraction * path[i].pweight * (depth - i) as f64 / (depth + 1) as f64;
    }
}

fn unwind_path(path: &mut Vec<PathElement>, path_index: usize) {
    let depth = path.len() - 1;
    let one_fraction = path[path_index].one_fraction;
    let zero_fraction = path[path_index].zero_fraction;
    let mut next_one_portion = path[depth].pweight;

    for i in (0..depth).rev() {
        if one_fraction != 0.0 {
            let tmp = path[i].pweight;
            path[i].pweight = next_one_portion * (depth + 1) as f64 / ((i + 1) as f64 * one_fraction);
            next_one_portion =
                tmp - path[i].pweight * zero_fraction * (depth - i) as f64 / (depth + 1) as f64;
        } else {
            path[i].pweight = path[i].pweight * (depth + 1) as f64 / (zero_fraction * (depth - i) as f64);
        }
    }

    for i in path_index..depth {
        path[i].feature = path[i + 1].feature;
        path[i].zero_fraction = path[i + 1].zero_fraction;
        path[i].one_fraction = path[i + 1].one_fraction;
    }
    path.pop();
}

fn unwound_path_sum(path: &[PathElement], path_index: usize) -> f64 {
    let depth = path.len() - 1;
    let one_fraction = path[path_index].one_fraction;
    let zero_fraction = path[path_index].zero_fraction;
    let mut next_one_portion = path[depth].pweight;
    let mut total = 0.0;

    if one_fraction != 0.0 {
        for i in (0..depth).rev() {
            let tmp = next_one_portion / ((i + 1) as f64 * one_fraction);
            total += tmp;
            next_one_portion = path[i].pweight - tmp * zero_fraction * (depth - i) as f64;
        }
    } else {
        for i in (0..depth).rev() {
            total += path[i].pweight / (zero_fraction * (depth - i) as f64);
        }
    }
    total * (depth + 1) as f64
}

/// Exact TreeSHAP for single trees and averaged forests
#[derive(Debug, Clone)]
pub struct TreeExplainer<'a> {
    trees: Vec<&'a TreeNode>,
    n_classes: usize,
    n_features: usize,
}

impl<'a> TreeExplainer<'a> {
    /// Explain the average of the given trees' leaf distributions
    pub fn new(trees: Vec<&'a TreeNode>, n_classes: usize, n_features: usize) -> Result<Self> {
        if trees.is_empty() {
            return Err(ExplainError::ModelNotFitted);
        }
        Ok(Self {
            trees,
            n_classes,
            n_features,
        })
    }

    /// Number of class outputs
    pub fn n_classes(&self) -> usize {
        self.n_classes
    }

    /// Cover-weighted mean leaf distribution, averaged over trees
    pub fn expected_value(&self) -> Vec<f64> {
        let mut expected = vec![0.0; self.n_classes];
        for tree in &self.trees {
            let root_cover = tree.n_samples().max(1) as f64;
            accumulate_leaves(tree, root_cover, &mut expected);
        }
        let n_trees = self.trees.len() as f64;
        expected.iter_mut().for_each(|v| *v /= n_trees);
        expected
    }

    /// Attributions for every row, indexed `[class][row, feature]`
    pub fn shap_values(&self, x: &Array2<f64>) -> Result<Vec<Array2<f64>>> {
        if x.ncols() != self.n_features {
            return Err(ExplainError::ShapeError {
                expected: format!("{} features", self.n_features),
                actual: format!("{} features", x.ncols()),
            });
        }

        let mut per_class = vec![Array2::zeros((x.nrows(), self.n_features)); self.n_classes];
        let n_trees = self.trees.len() as f64;

        for (row_idx, row) in x.rows().into_iter().enumerate() {
            let sample = row.to_vec();
            let mut phi = Array2::<f64>::zeros((self.n_features, self.n_classes));
            for tree in &self.trees {
                tree_shap(tree, &sample, &[], 1.0, 1.0, None, &mut phi);
            }
            for (k, values) in per_class.iter_mut().enumerate() {
                for j in 0..self.n_features {
                    values[[row_idx, j]] = phi[[j, k]] / n_trees;
                }
            }
        }
        Ok(per_class)
    }
}

fn accumulate_leaves(node: &TreeNode, root_cover: f64, expected: &mut [f64]) {
    match node {
        TreeNode::Leaf { distribution, n_samples } => {
            let weight = *n_samples as f64 / root_cover;
            for (e, p) in expected.iter_mut().zip(distribution.iter()) {
                *e += weight * p;
            }
        }
        TreeNode::Split { left, right, .. } => {
            accumulate_leaves(left, root_cover, expected);
            accumulate_leaves(right, root_cover, expected);
        }
    }
}

fn tree_shap(
    node: &TreeNode,
    x: &[f64],
    parent_path: &[PathElement],
    zero_fraction: f64,
    one_fraction: f64,
    feature: Option<usize>,
    phi: &mut Array2<f64>,
) {
    let mut path = parent_path.to_vec();
    extend_path(&mut path, zero_fraction, one_fraction, feature);

    match node {
        TreeNode::Leaf { distribution, .. } => {
            for i in 1..path.len() {
                let el = path[i];
                let Some(f) = el.feature else { continue };
                let w = unwound_path_sum(&path, i) * (el.one_fraction - el.zero_fraction);
                for (k, &p) in distribution.iter().enumerate() {
                    phi[[f, k]] += w * p;
                }
            }
        }
        TreeNode::Split {
            feature_idx,
            threshold,
            left,
            right,
            n_samples,
            ..
        } => {
            let (hot, cold) = if x[*feature_idx] <= *threshold {
                (left, right)
            } else {
                (right, left)
            };
            let cover = (*n_samples).max(1) as f64;
            let hot_zero_fraction = hot.n_samples() as f64 / cover;
            let cold_zero_fraction = cold.n_samples() as f64 / cover;

            let mut incoming_zero_fraction = 1.0;
            let mut incoming_one_fraction = 1.0;
            if let Some(idx) = path.iter().position(|el| el.feature == Some(*feature_idx)) {
                incoming_zero_fraction = path[idx].zero_fraction;
                incoming_one_fraction = path[idx].one_fraction;
                unwind_path(&mut path, idx);
            }

            tree_shap(
                hot,
                x,
                &path,
                hot_zero_fraction * incoming_zero_fraction,
                incoming_one_fraction,
                Some(*feature_idx),
                phi,
            );
            tree_shap(
                cold,
                x,
                &path,
                cold_zero_fraction * incoming_zero_fraction,
                0.0,
                Some(*feature_idx),
                phi,
            );
        }
    }
}

/// Interventional SHAP for a linear margin
#[derive(Debug, Clone)]
pub struct LinearExplainer {
    coefficients: Array1<f64>,
    intercept: f64,
    mean: Array1<f64>,
}

impl LinearExplainer {
    /// Explain `w . x + b` relative to the background mean
    pub fn new(coefficients: Array1<f64>, intercept: f64, background: &Array2<f64>) -> Result<Self> {
        if background.ncols() != coefficients.len() {
            return Err(ExplainError::ShapeError {
                expected: format!("{} background columns", coefficients.len()),
                actual: format!("{} background columns", background.ncols()),
            });
        }
        let mean = background
            .mean_axis(Axis(0))
            .ok_or_else(|| ExplainError::ValidationError("background set is empty".to_string()))?;
        Ok(Self {
            coefficients,
            intercept,
            mean,
        })
    }

    /// `w . mean + b`
    pub fn expected_value(&self) -> f64 {
        self.coefficients.dot(&self.mean) + self.intercept
    }

    /// `w_j * (x_ij - mean_j)` for every row
    pub fn shap_values(&self, x: &Array2<f64>) -> Result<Array2<f64>> {
        if x.ncols() != self.coefficients.len() {
            return Err(ExplainError::ShapeError {
                expected: format!("{} features", self.coefficients.len()),
                actual: format!("{} features", x.ncols()),
            });
        }
        let centered = x - &self.mean.view().insert_axis(Axis(0));
        Ok(centered * &self.coefficients.view().insert_axis(Axis(0)))
    }
}

/// Explainer chosen for a model family
#[derive(Debug, Clone)]
pub enum ShapExplainer<'a> {
    Tree(TreeExplainer<'a>),
    Linear(LinearExplainer),
}

impl<'a> ShapExplainer<'a> {
    /// Pick the explainer for `model`; `background` feeds the linear baseline
    pub fn for_model(model: &'a TrainedModel, background: &Array2<f64>) -> Result<Self> {
        let explainer = match model {
            TrainedModel::DecisionTree(tree) => {
                let root = tree.root().ok_or(ExplainError::ModelNotFitted)?;
                ShapExplainer::Tree(TreeExplainer::new(
                    vec![root],
                    tree.classes().len(),
                    tree.n_features(),
                )?)
            }
            TrainedModel::RandomForest(forest) => {
                let roots = forest
                    .trees()
                    .iter()
                    .map(|t| t.root().ok_or(ExplainError::ModelNotFitted))
                    .collect::<Result<Vec<_>>>()?;
                ShapExplainer::Tree(TreeExplainer::new(
                    roots,
                    forest.classes().len(),
                    forest.n_features(),
                )?)
            }
            TrainedModel::LogisticRegression(lr) => {
                let coefficients = lr.coefficients().ok_or(ExplainError::ModelNotFitted)?;
                ShapExplainer::Linear(LinearExplainer::new(
                    coefficients.clone(),
                    lr.intercept(),
                    background,
                )?)
            }
        };
        Ok(explainer)
    }

    /// Explain `x`, whose rows came from `sample_indices` of the source matrix
    pub fn explain(
        &self,
        x: &Array2<f64>,
        sample_indices: &[usize],
        feature_names: &[String],
    ) -> Result<ShapOutput> {
        if sample_indices.len() != x.nrows() {
            return Err(ExplainError::ShapeError {
                expected: format!("{} sample indices", x.nrows()),
                actual: format!("{} sample indices", sample_indices.len()),
            });
        }
        if feature_names.len() != x.ncols() {
            return Err(ExplainError::ShapeError {
                expected: format!("{} feature names", x.ncols()),
                actual: format!("{} feature names", feature_names.len()),
            });
        }

        let wrap = |values: Array2<f64>, base_value: f64, class_index: Option<usize>| ShapValues {
            values,
            base_value,
            data: x.clone(),
            feature_names: feature_names.to_vec(),
            sample_indices: sample_indices.to_vec(),
            class_index,
        };

        let output = match self {
            ShapExplainer::Linear(linear) => {
                ShapOutput::Single(wrap(linear.shap_values(x)?, linear.expected_value(), None))
            }
            ShapExplainer::Tree(tree) => {
                let mut per_class = tree.shap_values(x)?;
                let expected = tree.expected_value();
                if tree.n_classes() <= 2 {
                    let k = tree.n_classes().saturating_sub(1);
                    let values = per_class.swap_remove(k);
                    ShapOutput::Single(wrap(values, expected[k], Some(k)))
                } else {
                    ShapOutput::PerClass(
                        per_class
                            .into_iter()
                            .zip(expected)
                            .enumerate()
                            .map(|(k, (values, base))| wrap(values, base, Some(k)))
                            .collect(),
                    )
                }
            }
        };

        info!(
            samples = x.nrows(),
            branch = output.branch(),
            "SHAP values computed"
        );
        Ok(output)
    }
}

/// Model output the SHAP values of `values` add up to, for one row of `x`
pub fn model_output(model: &TrainedModel, x: &Array2<f64>, class_index: Option<usize>) -> Result<Array1<f64>> {
    match (model, class_index) {
        (TrainedModel::LogisticRegression(lr), None) => lr.decision_function(x),
        (_, Some(k)) => Ok(model.predict_proba(x)?.column(k).to_owned()),
        (_, None) => Err(ExplainError::ValidationError(
            "tree outputs are explained per class".to_string(),
        )),
    }
}
