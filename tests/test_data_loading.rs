//! Integration test: dataset bundles and model discovery

use flood_explain::training::{Classifier, DecisionTree, ModelRegistry, TrainedModel};
use flood_explain::utils::DatasetBundle;
use flood_explain::ExplainError;
use ndarray::{array, Array1, Array2};
use std::path::Path;

fn bundle() -> DatasetBundle {
    DatasetBundle::new(
        array![[1.0, 20.0], [2.0, -5.0], [8.0, 30.0], [9.0, 35.0]],
        array![0.0, 0.0, 1.0, 1.0],
        array![[1.5, 22.0], [8.5, f64::NAN]],
        array![0.0, 1.0],
        vec!["rainfall".to_string(), "river_level".to_string()],
    )
    .unwrap()
}

fn fitted_tree(n_features: usize) -> TrainedModel {
    let x = Array2::from_shape_fn((8, n_features), |(i, j)| (i + j) as f64);
    let y = Array1::from_shape_fn(8, |i| if i >= 4 { 1.0 } else { 0.0 });
    let mut tree = DecisionTree::new().with_max_depth(2);
    tree.fit(&x, &y).unwrap();
    TrainedModel::DecisionTree(tree)
}

fn touch_model(dir: &Path, name: &str) {
    fitted_tree(2).save(&dir.join(name)).unwrap();
}

#[test]
fn test_bundle_json_and_bincode_agree() {
    let dir = tempfile::tempdir().unwrap();
    let original = bundle();

    let json = dir.path().join("bundle.json");
    let bin = dir.path().join("bundle.bin");
    original.save(&json).unwrap();
    original.save(&bin).unwrap();

    let from_json = DatasetBundle::load(&json).unwrap();
    let from_bin = DatasetBundle::load(&bin).unwrap();
    assert_eq!(from_json.x_train, from_bin.x_train);
    assert_eq!(from_json.feature_names, original.feature_names);
}

#[test]
fn test_bundle_negative_and_nan_clamped() {
    let b = bundle();
    assert_eq!(b.x_train[[1, 1]], 0.0);
    assert_eq!(b.x_test[[1, 1]], 0.0);
    assert!(b.x_train.iter().all(|v| *v >= 0.0));
}

#[test]
fn test_bundle_rejects_non_binary_labels() {
    let result = DatasetBundle::new(
        array![[1.0], [2.0]],
        array![0.0, 2.0],
        array![[1.0]],
        array![1.0],
        vec!["rainfall".to_string()],
    );
    assert!(matches!(result, Err(ExplainError::ValidationError(_))));
}

#[test]
fn test_bundle_rejects_name_mismatch() {
    let result = DatasetBundle::new(
        array![[1.0, 2.0]],
        array![0.0],
        array![[1.0, 2.0]],
        array![1.0],
        vec!["rainfall".to_string()],
    );
    assert!(matches!(result, Err(ExplainError::ShapeError { .. })));
}

#[test]
fn test_unknown_extension_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let result = DatasetBundle::load(&dir.path().join("bundle.csv"));
    assert!(result.is_err());
}

#[test]
fn test_registry_finds_only_matching_models() {
    let dir = tempfile::tempdir().unwrap();
    touch_model(dir.path(), "flood_model_20240101.json");
    touch_model(dir.path(), "other_model.json");
    std::fs::write(dir.path().join("flood_model_notes.txt"), "x").unwrap();

    let registry = ModelRegistry::new(dir.path(), "flood_model_*.json").unwrap();
    let candidates = registry.candidates().unwrap();
    assert_eq!(candidates.len(), 1);

    let newest = registry.newest().unwrap();
    assert_eq!(newest.file_name().unwrap(), "flood_model_20240101.json");
    assert_eq!(TrainedModel::load(&newest).unwrap().n_features(), 2);
}

#[test]
fn test_registry_empty_dir_is_model_not_found() {
    let dir = tempfile::tempdir().unwrap();
    let registry = ModelRegistry::new(dir.path(), "flood_model_*.json").unwrap();
    match registry.newest() {
        Err(ExplainError::ModelNotFound { pattern, .. }) => assert_eq!(pattern, "flood_model_*.json"),
        other => panic!("expected ModelNotFound, got {:?}", other),
    }
}

#[test]
fn test_registry_missing_dir_is_model_not_found() {
    let dir = tempfile::tempdir().unwrap();
    let registry = ModelRegistry::new(dir.path().join("absent"), "flood_model_*.json").unwrap();
    assert!(matches!(registry.newest(), Err(ExplainError::ModelNotFound { .. })));
}
