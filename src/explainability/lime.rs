//! LIME tabular explanations
//!
//! Continuous features are discretized into training quartiles. Perturbed rows
//! are drawn bin-by-bin from the training distribution, then mapped to a binary
//! "same bin as the instance" representation. A weighted ridge surrogate is fit
//! on that representation around the explained row.

use crate::error::{ExplainError, Result};
use crate::training::{Classifier, RidgeRegression};
use crate::utils::{percentile, sorted_copy};
use ndarray::{Array1, Array2, ArrayView1, Axis};
use rand::distributions::{Distribution, WeightedIndex};
use rand::Rng;
use rand_distr::Normal;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

const STD_EPSILON: f64 = 1e-11;
const TRUNCNORM_TRIES: usize = 100;

/// How the surrogate's features are chosen
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FeatureSelection {
    /// Forward selection for up to 6 features, highest weights beyond
    #[default]
    Auto,
    /// Greedy forward selection on weighted R²
    Forward,
    /// Largest `|coef * instance|` of a ridge fit on all features
    HighestWeights,
}

/// Quartile bins of every training column
#[derive(Debug, Clone)]
pub struct QuartileDiscretizer {
    /// Deduplicated quartile boundaries per feature
    boundaries: Vec<Vec<f64>>,
    /// Human-readable bin conditions per feature
    names: Vec<Vec<String>>,
    means: Vec<Vec<f64>>,
    stds: Vec<Vec<f64>>,
    mins: Vec<Vec<f64>>,
    maxs: Vec<Vec<f64>>,
}

impl QuartileDiscretizer {
    /// Fit bins on training data
    pub fn fit(data: &Array2<f64>, feature_names: &[String]) -> Result<Self> {
        if data.nrows() == 0 {
            return Err(ExplainError::ValidationError(
                "cannot discretize an empty training set".to_string(),
            ));
        }

        let mut discretizer = Self {
            boundaries: Vec::with_capacity(data.ncols()),
            names: Vec::with_capacity(data.ncols()),
            means: Vec::with_capacity(data.ncols()),
            stds: Vec::with_capacity(data.ncols()),
            mins: Vec::with_capacity(data.ncols()),
            maxs: Vec::with_capacity(data.ncols()),
        };

        for (j, column) in data.axis_iter(Axis(1)).enumerate() {
            let sorted = sorted_copy(column.iter().copied());
            let mut qts: Vec<f64> = [25.0, 50.0, 75.0]
                .iter()
                .map(|&q| percentile(&sorted, q))
                .collect();
            qts.dedup();

            let name = &feature_names[j];
            let n = qts.len();
            let mut names = vec![format!("{} <= {:.2}", name, qts[0])];
            for i in 0..n - 1 {
                names.push(format!("{:.2} < {} <= {:.2}", qts[i], name, qts[i + 1]));
            }
            names.push(format!("{} > {:.2}", name, qts[n - 1]));

            let mut means = Vec::with_capacity(n + 1);
            let mut stds = Vec::with_capacity(n + 1);
            for bin in 0..=n {
                let selection: Vec<f64> = column
                    .iter()
                    .copied()
                    .filter(|&v| bin_of(&qts, v) == bin)
                    .collect();
                if selection.is_empty() {
                    means.push(0.0);
                    stds.push(STD_EPSILON);
                } else {
                    let (mean, std) = mean_std(&selection);
                    means.push(mean);
                    stds.push(std + STD_EPSILON);
                }
            }

            let mut mins = vec![sorted[0]];
            mins.extend_from_slice(&qts);
            let mut maxs = qts.clone();
            maxs.push(sorted[sorted.len() - 1]);

            discretizer.boundaries.push(qts);
            discretizer.names.push(names);
            discretizer.means.push(means);
            discretizer.stds.push(stds);
            discretizer.mins.push(mins);
            discretizer.maxs.push(maxs);
        }

        Ok(discretizer)
    }

    /// Bin index of `value` in feature `feature`
    pub fn bin(&self, feature: usize, value: f64) -> usize {
        bin_of(&self.boundaries[feature], value)
    }

    /// Bin indices of a whole row
    pub fn discretize_row(&self, row: ArrayView1<f64>) -> Vec<usize> {
        row.iter().enumerate().map(|(j, &v)| self.bin(j, v)).collect()
    }

    /// Condition text of a bin, e.g. `"0.50 < rainfall <= 1.20"`
    pub fn bin_name(&self, feature: usize, bin: usize) -> &str {
        &self.names[feature][bin]
    }

    /// Sample a concrete value inside a bin from its truncated normal
    pub fn undiscretize<R: Rng + ?Sized>(&self, feature: usize, bin: usize, rng: &mut R) -> f64 {
        let lo = self.mins[feature][bin];
        let hi = self.maxs[feature][bin];
        if lo >= hi {
            return lo;
        }
        let mean = self.means[feature][bin];
        let std = self.stds[feature][bin];
        let normal = match Normal::new(mean, std) {
            Ok(n) => n,
            Err(_) => return mean.clamp(lo, hi),
        };
        for _ in 0..TRUNCNORM_TRIES {
            let v = normal.sample(rng);
            if v >= lo && v <= hi {
                return v;
            }
        }
        normal.sample(rng).clamp(lo, hi)
    }
}

/// numpy `searchsorted(side="left")`: count of boundaries strictly below `value`
fn bin_of(boundaries: &[f64], value: f64) -> usize {
    boundaries.iter().take_while(|&&q| q < value).count()
}

fn mean_std(values: &[f64]) -> (f64, f64) {
    let n = values.len() as f64;
    let mean = values.iter().sum::<f64>() / n;
    let var = values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / n;
    (mean, var.sqrt())
}

/// Result of explaining one instance
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LimeExplanation {
    /// Row index of the explained instance in the test split
    pub instance_index: usize,
    /// Column of `predict_proba` that was explained
    pub label: usize,
    /// Display names of the classes, in `predict_proba` column order
    pub class_names: Vec<String>,
    /// Bin conditions and surrogate weights, by |weight| descending
    pub feature_weights: Vec<(String, f64)>,
    /// Feature names and the instance's values
    pub feature_values: Vec<(String, f64)>,
    /// Surrogate intercept
    pub intercept: f64,
    /// Surrogate prediction at the instance
    pub local_prediction: f64,
    /// Model class probabilities at the instance
    pub model_probabilities: Vec<f64>,
    /// Weighted R² of the surrogate on the neighbourhood
    pub score: f64,
}

impl LimeExplanation {
    /// `(condition, weight)` pairs, largest magnitude first
    pub fn as_list(&self) -> &[(String, f64)] {
        &self.feature_weights
    }
}

/// LIME explainer over a training set
#[derive(Debug, Clone)]
pub struct LimeTabularExplainer {
    discretizer: QuartileDiscretizer,
    feature_names: Vec<String>,
    class_names: Option<Vec<String>>,
    /// Bin ids present in training and their frequencies, per feature
    bin_values: Vec<Vec<usize>>,
    bin_frequencies: Vec<Vec<f64>>,
    /// Mean and scale of the discretized training data
    scaler_mean: Array1<f64>,
    scaler_scale: Array1<f64>,
    kernel_width: f64,
    feature_selection: FeatureSelection,
}

impl LimeTabularExplainer {
    /// Fit discretization and scaling statistics on training data
    pub fn new(training_data: &Array2<f64>, feature_names: Vec<String>) -> Result<Self> {
        let n_features = training_data.ncols();
        if feature_names.len() != n_features {
            return Err(ExplainError::ShapeError {
                expected: format!("{} feature names", n_features),
                actual: format!("{} feature names", feature_names.len()),
            });
        }

        let discretizer = QuartileDiscretizer::fit(training_data, &feature_names)?;

        let mut bin_values = Vec::with_capacity(n_features);
        let mut bin_frequencies = Vec::with_capacity(n_features);
        let mut scaler_mean = Array1::zeros(n_features);
        let mut scaler_scale = Array1::ones(n_features);

        for (j, column) in training_data.axis_iter(Axis(1)).enumerate() {
            let bins: Vec<usize> = column.iter().map(|&v| discretizer.bin(j, v)).collect();

            let mut counts = vec![0usize; discretizer.boundaries[j].len() + 1];
            for &b in &bins {
                counts[b] += 1;
            }
            let total = bins.len() as f64;
            let (values, freqs): (Vec<usize>, Vec<f64>) = counts
                .iter()
                .enumerate()
                .filter(|(_, c)| **c > 0)
                .map(|(b, &c)| (b, c as f64 / total))
                .unzip();
            bin_values.push(values);
            bin_frequencies.push(freqs);

            let as_f64: Vec<f64> = bins.iter().map(|&b| b as f64).collect();
            let (mean, std) = mean_std(&as_f64);
            scaler_mean[j] = mean;
            scaler_scale[j] = if std == 0.0 { 1.0 } else { std };
        }

        Ok(Self {
            discretizer,
            feature_names,
            class_names: None,
            bin_values,
            bin_frequencies,
            scaler_mean,
            scaler_scale,
            kernel_width: 0.75 * (n_features as f64).sqrt(),
            feature_selection: FeatureSelection::Auto,
        })
    }

    /// Set display names for the classes
    pub fn with_class_names(mut self, names: Vec<String>) -> Self {
        self.class_names = Some(names);
        self
    }

    /// Set the feature selection strategy
    pub fn with_feature_selection(mut self, selection: FeatureSelection) -> Self {
        self.feature_selection = selection;
        self
    }

    fn kernel(&self, distance: f64) -> f64 {
        (-(distance * distance) / (self.kernel_width * self.kernel_width))
            .exp()
            .sqrt()
    }

    /// Draw the neighbourhood: returns `(binary, inverse)`, row 0 being the instance
    pub fn sample_neighbourhood<R: Rng + ?Sized>(
        &self,
        instance: ArrayView1<f64>,
        num_samples: usize,
        rng: &mut R,
    ) -> Result<(Array2<f64>, Array2<f64>)> {
        let n_features = self.feature_names.len();
        if instance.len() != n_features {
            return Err(ExplainError::ShapeError {
                expected: format!("{} features", n_features),
                actual: format!("{} features", instance.len()),
            });
        }
        let num_samples = num_samples.max(1);
        let first_row = self.discretizer.discretize_row(instance);

        let mut binary = Array2::zeros((num_samples, n_features));
        let mut inverse = Array2::zeros((num_samples, n_features));

        for j in 0..n_features {
            let choice = WeightedIndex::new(&self.bin_frequencies[j])
                .map_err(|e| ExplainError::ComputationError(format!("bin weights: {}", e)))?;
            binary[[0, j]] = 1.0;
            inverse[[0, j]] = instance[j];
            for i in 1..num_samples {
                let bin = self.bin_values[j][choice.sample(rng)];
                binary[[i, j]] = if bin == first_row[j] { 1.0 } else { 0.0 };
                inverse[[i, j]] = self.discretizer.undiscretize(j, bin, rng);
            }
        }

        Ok((binary, inverse))
    }

    /// Explain `instance` (row `instance_index` of the test split) for class column `label`
    pub fn explain_instance<M, R>(
        &self,
        model: &M,
        instance: ArrayView1<f64>,
        instance_index: usize,
        label: usize,
        num_features: usize,
        num_samples: usize,
        rng: &mut R,
    ) -> Result<LimeExplanation>
    where
        M: Classifier + ?Sized,
        R: Rng + ?Sized,
    {
        let (binary, inverse) = self.sample_neighbourhood(instance, num_samples, rng)?;

        let scaled = (&binary - &self.scaler_mean.view().insert_axis(Axis(0)))
            / &self.scaler_scale.view().insert_axis(Axis(0));
        let origin = scaled.row(0).to_owned();
        let weights: Array1<f64> = scaled
            .rows()
            .into_iter()
            .map(|row| {
                let d = (&row - &origin).mapv(|v| v * v).sum().sqrt();
                self.kernel(d)
            })
            .collect();

        let proba = model.predict_proba(&inverse)?;
        if label >= proba.ncols() {
            return Err(ExplainError::ValidationError(format!(
                "label {} out of range for {} classes",
                label,
                proba.ncols()
            )));
        }
        let target = proba.column(label).to_owned();

        let used = self.select_features(&scaled, &target, &weights, num_features)?;
        debug!(selected = used.len(), "LIME features selected");

        let subset = scaled.select(Axis(1), &used);
        let mut surrogate = RidgeRegression::new(1.0);
        surrogate.fit_weighted(&subset, &target, &weights)?;
        let score = surrogate.score_weighted(&subset, &target, &weights)?;
        let local_prediction = surrogate.predict(&subset.slice(ndarray::s![0..1, ..]).to_owned())?[0];
        let coefficients = surrogate
            .coefficients
            .as_ref()
            .ok_or(ExplainError::ModelNotFitted)?;

        let first_row = self.discretizer.discretize_row(instance);
        let mut feature_weights: Vec<(String, f64)> = used
            .iter()
            .zip(coefficients.iter())
            .map(|(&f, &w)| (self.discretizer.bin_name(f, first_row[f]).to_string(), w))
            .collect();
        feature_weights.sort_by(|a, b| {
            b.1.abs()
                .partial_cmp(&a.1.abs())
                .unwrap_or(std::cmp::Ordering::Equal)
        });

        let model_probabilities = proba.row(0).to_vec();
        let class_names = self.class_names.clone().unwrap_or_else(|| {
            model.classes().iter().map(|c| format!("class {}", c)).collect()
        });

        info!(
            instance = instance_index,
            score,
            local_prediction,
            "LIME explanation fitted"
        );

        Ok(LimeExplanation {
            instance_index,
            label,
            class_names,
            feature_weights,
            feature_values: self
                .feature_names
                .iter()
                .cloned()
                .zip(instance.iter().copied())
                .collect(),
            intercept: surrogate.intercept.unwrap_or(0.0),
            local_prediction,
            model_probabilities,
            score,
        })
    }

    fn select_features(
        &self,
        data: &Array2<f64>,
        target: &Array1<f64>,
        weights: &Array1<f64>,
        num_features: usize,
    ) -> Result<Vec<usize>> {
        let method = match self.feature_selection {
            FeatureSelection::Auto if num_features <= 6 => FeatureSelection::Forward,
            FeatureSelection::Auto => FeatureSelection::HighestWeights,
            other => other,
        };
        match method {
            FeatureSelection::Forward => forward_selection(data, target, weights, num_features),
            _ => highest_weights(data, target, weights, num_features),
        }
    }
}

fn forward_selection(
    data: &Array2<f64>,
    target: &Array1<f64>,
    weights: &Array1<f64>,
    num_features: usize,
) -> Result<Vec<usize>> {
    let mut used: Vec<usize> = Vec::new();
    for _ in 0..num_features.min(data.ncols()) {
        let mut best = None;
        let mut best_score = f64::NEG_INFINITY;
        for feature in 0..data.ncols() {
            if used.contains(&feature) {
                continue;
            }
            let mut candidate = used.clone();
            candidate.push(feature);
            let subset = data.select(Axis(1), &candidate);

            let mut model = RidgeRegression::new(0.0);
            // A singular candidate set simply cannot win this round
            if model.fit_weighted(&subset, target, weights).is_err() {
                continue;
            }
            let score = model.score_weighted(&subset, target, weights)?;
            if best.is_none() || score > best_score {
                best = Some(feature);
                best_score = score;
            }
        }
        match best {
            Some(feature) => used.push(feature),
            None => break,
        }
    }
    Ok(used)
}

fn highest_weights(
    data: &Array2<f64>,
    target: &Array1<f64>,
    weights: &Array1<f64>,
    num_features: usize,
) -> Result<Vec<usize>> {
    let mut model = RidgeRegression::new(0.01);
    model.fit_weighted(data, target, weights)?;
    let coef = model.coefficients.as_ref().ok_or(ExplainError::ModelNotFitted)?;

    let mut ranked: Vec<(usize, f64)> = coef
        .iter()
        .zip(data.row(0).iter())
        .map(|(c, x)| c * x)
        .enumerate()
        .collect();
    ranked.sort_by(|a, b| {
        b.1.abs()
            .partial_cmp(&a.1.abs())
            .unwrap_or(std::cmp::Ordering::Equal)
    });
    Ok(ranked.into_iter().take(num_features).map(|(i, _)| i).collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::training::LogisticRegression;
    use ndarray::array;
    use rand::SeedableRng;
    use rand_chacha::ChaCha8Rng;

    fn names(n: usize) -> Vec<String> {
        (0..n).map(|i| format!("f{}", i)).collect()
    }

    fn training() -> Array2<f64> {
        Array2::from_shape_fn((40, 3), |(i, j)| ((i * (j + 3)) % 17) as f64 / 4.0)
    }

    #[test]
    fn test_quartile_bins_and_names() {
        let data = array![[1.0], [2.0], [3.0], [4.0], [5.0]];
        let disc = QuartileDiscretizer::fit(&data, &["rain".to_string()]).unwrap();

        assert_eq!(disc.bin(0, 1.0), 0);
        assert_eq!(disc.bin(0, 2.0), 0);
        assert_eq!(disc.bin(0, 2.5), 1);
        assert_eq!(disc.bin(0, 5.0), 3);
        assert_eq!(disc.bin_name(0, 0), "rain <= 2.00");
        assert_eq!(disc.bin_name(0, 1), "2.00 < rain <= 3.00");
        assert_eq!(disc.bin_name(0, 3), "rain > 4.00");
    }

    #[test]
    fn test_constant_column_has_single_bin() {
        let data = array![[2.0], [2.0], [2.0]];
        let disc = QuartileDiscretizer::fit(&data, &["slope".to_string()]).unwrap();
        let mut rng = ChaCha8Rng::seed_from_u64(0);

        assert_eq!(disc.bin(0, 2.0), 0);
        assert_eq!(disc.undiscretize(0, 0, &mut rng), 2.0);
    }

    #[test]
    fn test_undiscretize_stays_in_bin() {
        let data = training();
        let disc = QuartileDiscretizer::fit(&data, &names(3)).unwrap();
        let mut rng = ChaCha8Rng::seed_from_u64(9);

        for _ in 0..200 {
            let v = disc.undiscretize(1, 2, &mut rng);
            assert!(
                v >= disc.mins[1][2] && v <= disc.maxs[1][2],
                "value {} left its bin",
                v
            );
        }
    }

    #[test]
    fn test_neighbourhood_row_zero_is_instance() {
        let data = training();
        let explainer = LimeTabularExplainer::new(&data, names(3)).unwrap();
        let mut rng = ChaCha8Rng::seed_from_u64(1);

        let instance = data.row(5);
        let (binary, inverse) = explainer.sample_neighbourhood(instance, 50, &mut rng).unwrap();
        assert_eq!(binary.dim(), (50, 3));
        assert_eq!(inverse.row(0), instance);
        assert!(binary.row(0).iter().all(|&b| b == 1.0));
        assert!(binary.iter().all(|&b| b == 0.0 || b == 1.0));
    }

    #[test]
    fn test_explanation_ranks_driving_feature() {
        let data = training();
        let model = LogisticRegression::from_parameters(array![4.0, 0.0, 0.0], -4.0);
        let explainer = LimeTabularExplainer::new(&data, names(3))
            .unwrap()
            .with_class_names(vec!["No Flood".into(), "Flood".into()]);
        let mut rng = ChaCha8Rng::seed_from_u64(3);

        let exp = explainer
            .explain_instance(&model, data.row(11), 11, 1, 10, 1000, &mut rng)
            .unwrap();

        assert_eq!(exp.instance_index, 11);
        assert_eq!(exp.feature_weights.len(), 3);
        assert!(exp.feature_weights[0].0.contains("f0"));
        assert_eq!(exp.model_probabilities.len(), 2);
        assert_eq!(exp.class_names[1], "Flood");
        assert!(exp.score.is_finite());
    }

    #[test]
    fn test_forward_selection_limits_count() {
        let data = training();
        let model = LogisticRegression::from_parameters(array![1.0, -1.0, 0.5], 0.0);
        let explainer = LimeTabularExplainer::new(&data, names(3)).unwrap();
        let mut rng = ChaCha8Rng::seed_from_u64(4);

        let exp = explainer
            .explain_instance(&model, data.row(0), 0, 1, 2, 300, &mut rng)
            .unwrap();
        assert_eq!(exp.feature_weights.len(), 2);
    }

    #[test]
    fn test_highest_weights_selection_keeps_driving_feature() {
        let data = training();
        let model = LogisticRegression::from_parameters(array![4.0, 0.0, 0.0], -4.0);
        let explainer = LimeTabularExplainer::new(&data, names(3))
            .unwrap()
            .with_feature_selection(FeatureSelection::HighestWeights);
        let mut rng = ChaCha8Rng::seed_from_u64(3);

        let exp = explainer
            .explain_instance(&model, data.row(11), 11, 1, 1, 1000, &mut rng)
            .unwrap();
        assert_eq!(exp.feature_weights.len(), 1);
        assert!(exp.feature_weights[0].0.contains("f0"));
    }
}
