//! Flood Explain - Main Entry Point
//!
//! Runs the explainability pipeline over the newest saved flood model.

use clap::Parser;
use flood_explain::cli::{cmd_run, Cli};
use flood_explain::ExplainError;
use tracing::error;

fn main() -> anyhow::Result<()> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "flood_explain=info".into()),
        )
        .init();

    let cli = Cli::parse();

    match cmd_run(&cli) {
        Ok(_) => Ok(()),
        Err(e @ ExplainError::ModelNotFound { .. }) => {
            error!(error = %e, "No trained model available");
            eprintln!("{}. Train and save a model first.", e);
            std::process::exit(1);
        }
        Err(e) => Err(e.into()),
    }
}
