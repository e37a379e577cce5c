//! Explainability pipeline
//!
//! Loads the dataset bundle and the newest model, then runs permutation
//! importance, LIME and SHAP in that order, writing every artifact to the
//! output directory.

use crate::config::PipelineConfig;
use crate::error::{ExplainError, Result};
use crate::explainability::{
    permutation_importance, ImportanceRecord, ImportanceResult, LimeExplanation,
    LimeTabularExplainer, ShapExplainer, ShapOutput,
};
use crate::export::LimeReport;
use crate::training::{Classifier, ModelRegistry, TrainedModel};
use crate::utils::DatasetBundle;
use crate::visualization::{self, plot_summary, plot_waterfall};
use chrono::{DateTime, Utc};
use ndarray::Axis;
use rand::seq::index::sample;
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Instant;
use tracing::{info, warn};

pub const IMPORTANCE_FILE: &str = "feature_importance.csv";
pub const LIME_FILE: &str = "lime_explanation.html";
pub const SHAP_SUMMARY_FILE: &str = "shap_summary.png";
pub const SHAP_WATERFALL_FILE: &str = "shap_waterfall_plot.png";

/// File name of the waterfall plot for class `class_index` of a per-class output
pub fn waterfall_file_for_class(class_index: usize) -> String {
    format!("shap_waterfall_plot_class_{}.png", class_index)
}

/// Everything the stages read
#[derive(Debug, Clone)]
pub struct Artifacts {
    pub bundle: DatasetBundle,
    pub model: TrainedModel,
    pub model_path: PathBuf,
}

/// Pipeline stages, in execution order
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Stage {
    Load,
    PermutationImportance,
    Lime,
    Shap,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Stage::Load => "Loading dataset and model",
            Stage::PermutationImportance => "Computing permutation importance",
            Stage::Lime => "Fitting LIME explanation",
            Stage::Shap => "Computing SHAP values",
        };
        f.write_str(name)
    }
}

/// Progress notification passed to [`Pipeline::run_with`]
#[derive(Debug, Clone)]
pub enum StageEvent {
    Started(Stage),
    Finished { stage: Stage, detail: String },
}

/// Output of the SHAP stage
#[derive(Debug, Clone)]
pub struct ShapStageResult {
    pub output: ShapOutput,
    /// Test-set row indices that were explained, in sample order
    pub sample_rows: Vec<usize>,
    /// Position within the sample used for the waterfall plot(s)
    pub waterfall_sample: usize,
    pub plots: Vec<PathBuf>,
}

impl ShapStageResult {
    /// Test-set row shown in the waterfall plot(s)
    pub fn waterfall_test_row(&self) -> usize {
        self.sample_rows[self.waterfall_sample]
    }
}

/// Summary of a completed run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineReport {
    pub output_dir: PathBuf,
    pub model_path: PathBuf,
    pub model_kind: String,
    pub seed: Option<u64>,
    pub importance: Vec<ImportanceRecord>,
    pub importance_csv: PathBuf,
    pub lime_instance: usize,
    pub lime_report: PathBuf,
    pub shap_branch: String,
    pub shap_sample_rows: Vec<usize>,
    pub waterfall_sample: usize,
    pub waterfall_test_row: usize,
    pub plots: Vec<PathBuf>,
    pub started_at: DateTime<Utc>,
    pub elapsed_secs: f64,
}

impl PipelineReport {
    /// Write the report as pretty JSON
    pub fn save(&self, path: &Path) -> Result<()> {
        let json = serde_json::to_string_pretty(self)?;
        std::fs::write(path, json)?;
        Ok(())
    }
}

/// Sequential explainability run over one model
pub struct Pipeline {
    config: PipelineConfig,
}

impl Pipeline {
    /// Create a pipeline; the configuration is validated up front
    pub fn new(config: PipelineConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self { config })
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// Run RNG for LIME and SHAP sampling
    pub fn rng(&self) -> ChaCha8Rng {
        match self.config.seed {
            Some(seed) => ChaCha8Rng::seed_from_u64(seed),
            None => ChaCha8Rng::from_entropy(),
        }
    }

    /// Load the bundle and the newest model, and prepare the output directory
    pub fn load(&self) -> Result<Artifacts> {
        let bundle = DatasetBundle::load(&self.config.dataset_path)?;
        let model_path =
            ModelRegistry::new(&self.config.model_dir, &self.config.model_pattern)?.newest()?;
        let model = TrainedModel::load(&model_path)?;

        if model.n_features() != bundle.n_features() {
            return Err(ExplainError::ShapeError {
                expected: format!("{} features (dataset bundle)", bundle.n_features()),
                actual: format!("{} features (model)", model.n_features()),
            });
        }

        std::fs::create_dir_all(&self.config.output_dir)?;
        Ok(Artifacts {
            bundle,
            model,
            model_path,
        })
    }

    /// Permutation importance on the test split, written as CSV
    pub fn permutation_stage(&self, artifacts: &Artifacts) -> Result<ImportanceResult> {
        let bundle = &artifacts.bundle;
        let result = permutation_importance(
            &artifacts.model,
            &bundle.x_test,
            &bundle.y_test,
            &bundle.feature_names,
            self.config.n_repeats,
            self.config.permutation_seed,
        )?;
        result.write_csv(&self.config.output_dir.join(IMPORTANCE_FILE))?;
        Ok(result)
    }

    /// LIME explanation of one random test row, written as HTML
    pub fn lime_stage<R: Rng + ?Sized>(&self, artifacts: &Artifacts, rng: &mut R) -> Result<LimeExplanation> {
        let bundle = &artifacts.bundle;
        let classes = artifacts.model.classes();
        let class_names: Vec<String> = if classes.len() == 2 {
            vec!["No Flood".to_string(), "Flood".to_string()]
        } else {
            classes.iter().map(|c| format!("class {}", c)).collect()
        };
        let label = classes.len().saturating_sub(1).min(1);

        let instance_index = rng.gen_range(0..bundle.x_test.nrows());
        let explainer = LimeTabularExplainer::new(&bundle.x_train, bundle.feature_names.clone())?
            .with_class_names(class_names)
            .with_feature_selection(self.config.lime_feature_selection);
        let explanation = explainer.explain_instance(
            &artifacts.model,
            bundle.x_test.row(instance_index),
            instance_index,
            label,
            self.config.lime_num_features,
            self.config.lime_num_samples,
            rng,
        )?;

        LimeReport::new(&explanation).save(&self.config.output_dir.join(LIME_FILE))?;
        Ok(explanation)
    }

    /// SHAP values over a random test sample, plus summary and waterfall plots
    pub fn shap_stage<R: Rng + ?Sized>(&self, artifacts: &Artifacts, rng: &mut R) -> Result<ShapStageResult> {
        let bundle = &artifacts.bundle;
        let n_test = bundle.x_test.nrows();
        let n_sample = self.config.shap_sample_size.min(n_test);

        let sample_rows = sample(rng, n_test, n_sample).into_vec();
        let x_sample = bundle.x_test.select(Axis(0), &sample_rows);

        let explainer = ShapExplainer::for_model(&artifacts.model, &bundle.x_train)?;
        let output = explainer.explain(&x_sample, &sample_rows, &bundle.feature_names)?;

        let dpi = self.config.dpi;
        let mut plots = Vec::new();

        let summary_path = self.config.output_dir.join(SHAP_SUMMARY_FILE);
        plot_summary(&output, &summary_path, dpi)?;
        plots.push(summary_path);

        let waterfall_sample = rng.gen_range(0..n_sample);
        match &output {
            ShapOutput::Single(values) => {
                let path = self.config.output_dir.join(SHAP_WATERFALL_FILE);
                plot_waterfall(&values.explanation(waterfall_sample)?, &path, dpi)?;
                plots.push(path);
            }
            ShapOutput::PerClass(per_class) => {
                for (k, values) in per_class.iter().enumerate() {
                    let class_index = values.class_index.unwrap_or(k);
                    let path = self.config.output_dir.join(waterfall_file_for_class(class_index));
                    plot_waterfall(&values.explanation(waterfall_sample)?, &path, dpi)?;
                    plots.push(path);
                }
            }
        }

        if self.config.display_plots {
            for plot in &plots {
                visualization::display(plot);
            }
        }

        Ok(ShapStageResult {
            output,
            sample_rows,
            waterfall_sample,
            plots,
        })
    }

    /// Run every stage
    pub fn run(&self) -> Result<PipelineReport> {
        self.run_with(|_| {})
    }

    /// Run every stage, reporting progress to `on_event`
    pub fn run_with<F: FnMut(StageEvent)>(&self, mut on_event: F) -> Result<PipelineReport> {
        let started_at = Utc::now();
        let start = Instant::now();
        let mut rng = self.rng();
        if self.config.seed.is_none() {
            warn!("No seed configured; LIME and SHAP sampling will differ between runs");
        }

        on_event(StageEvent::Started(Stage::Load));
        let artifacts = self.load()?;
        on_event(StageEvent::Finished {
            stage: Stage::Load,
            detail: format!(
                "{} model, {} test rows",
                artifacts.model.kind(),
                artifacts.bundle.x_test.nrows()
            ),
        });

        on_event(StageEvent::Started(Stage::PermutationImportance));
        let importance = self.permutation_stage(&artifacts)?;
        on_event(StageEvent::Finished {
            stage: Stage::PermutationImportance,
            detail: IMPORTANCE_FILE.to_string(),
        });

        on_event(StageEvent::Started(Stage::Lime));
        let lime = self.lime_stage(&artifacts, &mut rng)?;
        on_event(StageEvent::Finished {
            stage: Stage::Lime,
            detail: format!("{} (test row {})", LIME_FILE, lime.instance_index),
        });

        on_event(StageEvent::Started(Stage::Shap));
        let shap = self.shap_stage(&artifacts, &mut rng)?;
        on_event(StageEvent::Finished {
            stage: Stage::Shap,
            detail: format!("{} plots, {} branch", shap.plots.len(), shap.output.branch()),
        });

        let report = PipelineReport {
            output_dir: self.config.output_dir.clone(),
            model_path: artifacts.model_path.clone(),
            model_kind: artifacts.model.kind().to_string(),
            seed: self.config.seed,
            importance: importance.to_records(),
            importance_csv: self.config.output_dir.join(IMPORTANCE_FILE),
            lime_instance: lime.instance_index,
            lime_report: self.config.output_dir.join(LIME_FILE),
            shap_branch: shap.output.branch().to_string(),
            waterfall_test_row: shap.waterfall_test_row(),
            shap_sample_rows: shap.sample_rows,
            waterfall_sample: shap.waterfall_sample,
            plots: shap.plots,
            started_at,
            elapsed_secs: start.elapsed().as_secs_f64(),
        };

        info!(
            output_dir = %report.output_dir.display(),
            elapsed_secs = report.elapsed_secs,
            "Explainability run complete"
        );
        Ok(report)
    }
}
