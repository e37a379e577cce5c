//! Flood Explain CLI Module
//!
//! Command-line interface for the explainability run.

use clap::Parser;
use colored::*;
use std::path::{Path, PathBuf};

use crate::config::PipelineConfig;
use crate::pipeline::{Pipeline, PipelineReport, StageEvent};

// ─── Styling helpers ───────────────────────────────────────────────────────────

fn dim(s: &str) -> ColoredString   { s.truecolor(100, 100, 100) }
fn accent(s: &str) -> ColoredString { s.truecolor(120, 170, 255) }
fn muted(s: &str) -> ColoredString  { s.truecolor(140, 140, 140) }
fn ok(s: &str) -> ColoredString     { s.truecolor(100, 210, 120) }

fn step_ok(msg: &str) {
    println!("  {} {}", ok("✓"), msg);
}

fn step_run(msg: &str) {
    println!("  {} {}...", accent("›"), msg);
}

fn step_done(detail: &str) {
    println!("    {} {}", ok("done"), dim(detail));
}

fn section(title: &str) {
    println!();
    println!("  {}", title.white().bold());
    println!("  {}", dim(&"─".repeat(56)));
}

fn kv(key: &str, val: &str) -> String {
    format!("{:<18} {}", muted(key), val.white())
}

// ─── CLI definition ────────────────────────────────────────────────────────────

#[derive(Parser, Debug)]
#[command(name = "flood-explain")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Explain the newest flood classifier: permutation importance, LIME and SHAP")]
#[command(long_about = None)]
pub struct Cli {
    /// JSON configuration file; flags below override its values
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Dataset bundle (.json or .bin)
    #[arg(short, long)]
    pub dataset: Option<PathBuf>,

    /// Directory searched for saved models
    #[arg(long)]
    pub model_dir: Option<PathBuf>,

    /// File-name glob a model must match
    #[arg(long)]
    pub model_pattern: Option<String>,

    /// Directory receiving the CSV, HTML and PNG artifacts
    #[arg(short, long)]
    pub output_dir: Option<PathBuf>,

    /// Seed for LIME and SHAP sampling; unseeded runs differ each time
    #[arg(long)]
    pub seed: Option<u64>,

    /// Shuffles per feature for permutation importance
    #[arg(long)]
    pub n_repeats: Option<usize>,

    /// Test rows explained by SHAP
    #[arg(long)]
    pub shap_sample_size: Option<usize>,

    /// Perturbed samples drawn by LIME
    #[arg(long)]
    pub lime_samples: Option<usize>,

    /// Plot resolution
    #[arg(long)]
    pub dpi: Option<u32>,

    /// Do not open plots after saving them
    #[arg(long)]
    pub no_display: bool,

    /// Also write a JSON run report to this path
    #[arg(long)]
    pub report: Option<PathBuf>,
}

impl Cli {
    /// Configuration file (or defaults) with command-line overrides applied
    pub fn to_config(&self) -> crate::Result<PipelineConfig> {
        let mut config = match &self.config {
            Some(path) => PipelineConfig::from_file(path)?,
            None => PipelineConfig::new(),
        };

        if let Some(path) = &self.dataset {
            config = config.with_dataset(path);
        }
        if let Some(dir) = &self.model_dir {
            config = config.with_model_dir(dir);
        }
        if let Some(pattern) = &self.model_pattern {
            config = config.with_model_pattern(pattern);
        }
        if let Some(dir) = &self.output_dir {
            config = config.with_output_dir(dir);
        }
        if let Some(seed) = self.seed {
            config = config.with_seed(seed);
        }
        if let Some(n) = self.n_repeats {
            config = config.with_n_repeats(n);
        }
        if let Some(n) = self.shap_sample_size {
            config = config.with_shap_sample_size(n);
        }
        if let Some(n) = self.lime_samples {
            config = config.with_lime_num_samples(n);
        }
        if let Some(dpi) = self.dpi {
            config = config.with_dpi(dpi);
        }
        if self.no_display {
            config = config.with_display_plots(false);
        }
        Ok(config)
    }
}

// ─── Commands ──────────────────────────────────────────────────────────────────

/// Run the full pipeline with progress output
pub fn cmd_run(cli: &Cli) -> crate::Result<PipelineReport> {
    let config = cli.to_config()?;
    let pipeline = Pipeline::new(config)?;

    section("Explain");
    let report = pipeline.run_with(|event| match event {
        StageEvent::Started(stage) => step_run(&stage.to_string()),
        StageEvent::Finished { detail, .. } => step_done(&detail),
    })?;

    if let Some(path) = &cli.report {
        report.save(path)?;
        step_ok(&format!("Run report → {}", path.display()));
    }

    print_summary(&report);
    Ok(report)
}

fn print_summary(report: &PipelineReport) {
    section("Summary");
    println!("  {}", kv("Output", &display_path(&report.output_dir)));
    println!("  {}", kv("Model", &display_path(&report.model_path)));
    println!("  {}", kv("Model kind", &report.model_kind));
    println!("  {}", kv("LIME test row", &report.lime_instance.to_string()));
    println!("  {}", kv("SHAP rows", &report.shap_sample_rows.len().to_string()));
    println!("  {}", kv("Waterfall test row", &report.waterfall_test_row.to_string()));
    println!("  {}", kv("Time", &format!("{:.2}s", report.elapsed_secs)));

    if let Some(top) = report.importance.first() {
        println!(
            "  {}",
            kv(
                "Top feature",
                &format!("{} ({:.4} ± {:.4})", top.feature, top.importance_mean, top.importance_std)
            )
        );
    }

    println!();
    step_ok(&display_path(&report.importance_csv));
    step_ok(&display_path(&report.lime_report));
    for plot in &report.plots {
        step_ok(&display_path(plot));
    }
    println!();
    println!("  {} {}", ok("Explainability results saved to"), display_path(&report.output_dir).white().bold());
    println!();
}

fn display_path(path: &Path) -> String {
    path.display().to_string()
}
