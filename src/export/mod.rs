//! Report export
//!
//! Renders explanation results to self-contained files:
//! - LIME explanation as an HTML report (handlebars)

mod lime_report;

pub use lime_report::LimeReport;
