//! Integration test: explainability run end-to-end

use flood_explain::config::PipelineConfig;
use flood_explain::explainability::FeatureSelection;
use flood_explain::pipeline::{
    waterfall_file_for_class, Pipeline, PipelineReport, IMPORTANCE_FILE, LIME_FILE, SHAP_SUMMARY_FILE,
    SHAP_WATERFALL_FILE,
};
use flood_explain::training::{DecisionTree, LogisticRegression, RandomForest, TrainedModel};
use flood_explain::utils::DatasetBundle;
use ndarray::{array, Array1, Array2};
use std::path::{Path, PathBuf};
use std::process::Command;

fn flood_bundle() -> DatasetBundle {
    let x = |n: usize, offset: usize| {
        Array2::from_shape_fn((n, 3), |(i, j)| match j {
            0 => (i + offset) as f64,
            1 => (((i + offset) * 7) % 11) as f64,
            _ => (((i + offset) * 3) % 5) as f64 * 0.5,
        })
    };
    let y = |n: usize, offset: usize| {
        Array1::from_shape_fn(n, |i| if (i + offset) % 20 >= 10 { 1.0 } else { 0.0 })
    };
    DatasetBundle::new(
        x(20, 0),
        y(20, 0),
        x(12, 3),
        y(12, 3),
        vec!["rainfall".to_string(), "humidity".to_string(), "river_level".to_string()],
    )
    .unwrap()
}

struct Workspace {
    _dir: tempfile::TempDir,
    bundle: PathBuf,
    models: PathBuf,
    output: PathBuf,
}

fn workspace(model: Option<TrainedModel>) -> Workspace {
    let dir = tempfile::tempdir().unwrap();
    let bundle = dir.path().join("flood_dataset.bin");
    let models = dir.path().join("models");
    let output = dir.path().join("results");
    std::fs::create_dir_all(&models).unwrap();
    flood_bundle().save(&bundle).unwrap();
    if let Some(model) = model {
        model.save(&models.join("flood_model_1.json")).unwrap();
    }
    Workspace {
        _dir: dir,
        bundle,
        models,
        output,
    }
}

fn tree_model() -> TrainedModel {
    let b = flood_bundle();
    let mut tree = DecisionTree::new().with_max_depth(3);
    tree.fit(&b.x_train, &b.y_train).unwrap();
    TrainedModel::DecisionTree(tree)
}

fn config(ws: &Workspace) -> PipelineConfig {
    PipelineConfig::new()
        .with_dataset(&ws.bundle)
        .with_model_dir(&ws.models)
        .with_output_dir(&ws.output)
        .with_n_repeats(3)
        .with_shap_sample_size(8)
        .with_lime_num_samples(300)
        .with_dpi(40)
        .with_seed(5)
        .with_display_plots(false)
}

fn assert_artifacts(output: &Path) {
    for file in [IMPORTANCE_FILE, LIME_FILE, SHAP_SUMMARY_FILE, SHAP_WATERFALL_FILE] {
        let path = output.join(file);
        assert!(path.exists(), "{} should exist", path.display());
        assert!(std::fs::metadata(&path).unwrap().len() > 0);
    }
    let csv = std::fs::read_to_string(output.join(IMPORTANCE_FILE)).unwrap();
    assert_eq!(csv.lines().count(), 4, "header plus one row per feature");
    let html = std::fs::read_to_string(output.join(LIME_FILE)).unwrap();
    assert!(html.contains("Flood"));
}

#[test]
fn test_tree_model_run_writes_all_artifacts() {
    let ws = workspace(Some(tree_model()));
    let report = Pipeline::new(config(&ws)).unwrap().run().unwrap();

    assert_artifacts(&ws.output);
    assert_eq!(report.model_kind, "decision_tree");
    assert_eq!(report.shap_branch, "single");
    assert_eq!(report.shap_sample_rows.len(), 8);
    assert!(report.lime_instance < 12);
    assert_eq!(report.waterfall_test_row, report.shap_sample_rows[report.waterfall_sample]);
    assert_eq!(report.plots.len(), 2);
}

#[test]
fn test_forest_and_linear_models_run() {
    let b = flood_bundle();
    let mut rf = RandomForest::new(5).with_max_depth(3).with_random_state(1);
    rf.fit(&b.x_train, &b.y_train).unwrap();
    let lr = LogisticRegression::from_parameters(array![0.2, 0.0, 0.1], -2.0);

    for model in [TrainedModel::RandomForest(rf), TrainedModel::LogisticRegression(lr)] {
        let kind = model.kind();
        let ws = workspace(Some(model));
        let report = Pipeline::new(config(&ws)).unwrap().run().unwrap();
        assert_artifacts(&ws.output);
        assert_eq!(report.model_kind, kind);
    }
}

#[test]
fn test_multiclass_tree_writes_per_class_waterfalls() {
    let b = flood_bundle();
    let labels = Array1::from_shape_fn(b.x_train.nrows(), |i| (i % 3) as f64);
    let mut tree = DecisionTree::new().with_max_depth(4);
    tree.fit(&b.x_train, &labels).unwrap();
    let ws = workspace(Some(TrainedModel::DecisionTree(tree)));

    let report = Pipeline::new(config(&ws)).unwrap().run().unwrap();

    assert_eq!(report.shap_branch, "per_class");
    assert_eq!(report.plots.len(), 4);
    assert!(ws.output.join(SHAP_SUMMARY_FILE).exists());
    assert!(!ws.output.join(SHAP_WATERFALL_FILE).exists());
    for class in 0..3 {
        let path = ws.output.join(waterfall_file_for_class(class));
        assert!(path.exists(), "{} should exist", path.display());
        assert!(report.plots.contains(&path));
    }
    let html = std::fs::read_to_string(ws.output.join(LIME_FILE)).unwrap();
    assert!(html.contains("class 2"));
}

#[test]
fn test_highest_weights_selection_run() {
    let ws = workspace(Some(tree_model()));
    let config = config(&ws).with_lime_feature_selection(FeatureSelection::HighestWeights);
    let report = Pipeline::new(config).unwrap().run().unwrap();

    assert_artifacts(&ws.output);
    assert_eq!(report.shap_branch, "single");
}

#[test]
fn test_seeded_runs_pick_the_same_rows() {
    let ws = workspace(Some(tree_model()));
    let pipeline = Pipeline::new(config(&ws)).unwrap();
    let a = pipeline.run().unwrap();
    let b = pipeline.run().unwrap();

    assert_eq!(a.lime_instance, b.lime_instance);
    assert_eq!(a.shap_sample_rows, b.shap_sample_rows);
    assert_eq!(a.waterfall_sample, b.waterfall_sample);
    assert_eq!(a.importance, b.importance);
}

#[test]
fn test_sample_size_capped_by_test_rows() {
    let ws = workspace(Some(tree_model()));
    let report = Pipeline::new(config(&ws).with_shap_sample_size(500))
        .unwrap()
        .run()
        .unwrap();
    assert_eq!(report.shap_sample_rows.len(), 12);
}

#[test]
fn test_feature_count_mismatch_rejected() {
    let ws = workspace(Some(TrainedModel::LogisticRegression(
        LogisticRegression::from_parameters(array![0.2, 0.1], 0.0),
    )));
    let pipeline = Pipeline::new(config(&ws)).unwrap();
    assert!(matches!(
        pipeline.load(),
        Err(flood_explain::ExplainError::ShapeError { .. })
    ));
}

#[test]
fn test_binary_writes_report() {
    let ws = workspace(Some(tree_model()));
    let report_path = ws.output.join("run.json");
    let status = Command::new(env!("CARGO_BIN_EXE_flood-explain"))
        .args(["--dataset", ws.bundle.to_str().unwrap()])
        .args(["--model-dir", ws.models.to_str().unwrap()])
        .args(["--output-dir", ws.output.to_str().unwrap()])
        .args(["--seed", "3", "--n-repeats", "2", "--shap-sample-size", "5"])
        .args(["--lime-samples", "200", "--dpi", "40", "--no-display"])
        .args(["--report", report_path.to_str().unwrap()])
        .status()
        .unwrap();

    assert!(status.success());
    assert_artifacts(&ws.output);
    let report: PipelineReport =
        serde_json::from_str(&std::fs::read_to_string(&report_path).unwrap()).unwrap();
    assert_eq!(report.seed, Some(3));
    assert_eq!(report.shap_sample_rows.len(), 5);
}

#[test]
fn test_binary_exits_one_without_model() {
    let ws = workspace(None);
    let output = Command::new(env!("CARGO_BIN_EXE_flood-explain"))
        .args(["--dataset", ws.bundle.to_str().unwrap()])
        .args(["--model-dir", ws.models.to_str().unwrap()])
        .args(["--output-dir", ws.output.to_str().unwrap()])
        .arg("--no-display")
        .output()
        .unwrap();

    assert_eq!(output.status.code(), Some(1));
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("flood_model_*.json"));
    assert!(!ws.output.join(IMPORTANCE_FILE).exists());
}
