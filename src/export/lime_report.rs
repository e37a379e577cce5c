//! Self-contained HTML report of a LIME explanation

use crate::error::Result;
use crate::explainability::LimeExplanation;
use chrono::{DateTime, Utc};
use handlebars::Handlebars;
use serde::Serialize;
use std::path::Path;
use tracing::info;

const TEMPLATE: &str = r#"<!DOCTYPE html>
<html lang="en">
<head>
<meta charset="utf-8">
<title>LIME explanation: instance {{instance_index}}</title>
<style>
body { font-family: sans-serif; margin: 2em; color: #222; }
h2 { margin-top: 1.5em; }
table { border-collapse: collapse; }
td, th { padding: 4px 10px; border-bottom: 1px solid #ddd; text-align: left; }
.bar-row { display: flex; align-items: center; margin: 3px 0; }
.bar-label { width: 22em; font-size: 0.9em; }
.bar-track { position: relative; width: 400px; height: 16px; background: #f3f3f3; }
.bar { position: absolute; top: 0; height: 16px; }
.pos { background: #ff0052; }
.neg { background: #008bfa; }
.prob { background: #ff7f0e; height: 16px; }
.meta { color: #666; font-size: 0.85em; }
</style>
</head>
<body>
<h1>LIME explanation</h1>
<p class="meta">Test instance {{instance_index}}, explaining class "{{explained_class}}". Generated {{generated_at}}.</p>

<h2>Prediction probabilities</h2>
{{#each probabilities}}
<div class="bar-row">
  <span class="bar-label">{{name}} ({{value}})</span>
  <div class="bar-track"><div class="prob" style="width: {{width}}%"></div></div>
</div>
{{/each}}

<h2>Feature weights</h2>
{{#each weights}}
<div class="bar-row">
  <span class="bar-label">{{condition}} ({{value}})</span>
  <div class="bar-track"><div class="bar {{class}}" style="left: {{left}}%; width: {{width}}%"></div></div>
</div>
{{/each}}
<p class="meta">Intercept {{intercept}}, local prediction {{local_prediction}}, surrogate R&sup2; {{score}}.</p>

<h2>Feature values</h2>
<table>
<tr><th>Feature</th><th>Value</th></tr>
{{#each values}}
<tr><td>{{name}}</td><td>{{value}}</td></tr>
{{/each}}
</table>
</body>
</html>
"#;

#[derive(Debug, Serialize)]
struct ProbabilityRow {
    name: String,
    value: String,
    width: String,
}

#[derive(Debug, Serialize)]
struct WeightRow {
    condition: String,
    value: String,
    class: &'static str,
    left: String,
    width: String,
}

#[derive(Debug, Serialize)]
struct ValueRow {
    name: String,
    value: String,
}

#[derive(Debug, Serialize)]
struct ReportContext {
    instance_index: usize,
    explained_class: String,
    generated_at: String,
    probabilities: Vec<ProbabilityRow>,
    weights: Vec<WeightRow>,
    intercept: String,
    local_prediction: String,
    score: String,
    values: Vec<ValueRow>,
}

/// Renders LIME explanations to HTML
pub struct LimeReport<'a> {
    explanation: &'a LimeExplanation,
    generated_at: DateTime<Utc>,
}

impl<'a> LimeReport<'a> {
    pub fn new(explanation: &'a LimeExplanation) -> Self {
        Self {
            explanation,
            generated_at: Utc::now(),
        }
    }

    fn context(&self) -> ReportContext {
        let exp = self.explanation;

        let probabilities = exp
            .model_probabilities
            .iter()
            .enumerate()
            .map(|(k, &p)| ProbabilityRow {
                name: exp
                    .class_names
                    .get(k)
                    .cloned()
                    .unwrap_or_else(|| format!("class {}", k)),
                value: format!("{:.2}", p),
                width: format!("{:.1}", (p * 100.0).clamp(0.0, 100.0)),
            })
            .collect();

        // Bars grow left or right from the centre line, scaled to the largest weight
        let max_abs = exp
            .feature_weights
            .iter()
            .map(|(_, w)| w.abs())
            .fold(0.0_f64, f64::max);
        let weights = exp
            .feature_weights
            .iter()
            .map(|(condition, w)| {
                let half = if max_abs > 0.0 { w.abs() / max_abs * 50.0 } else { 0.0 };
                let left = if *w >= 0.0 { 50.0 } else { 50.0 - half };
                WeightRow {
                    condition: condition.clone(),
                    value: format!("{:.4}", w),
                    class: if *w >= 0.0 { "pos" } else { "neg" },
                    left: format!("{:.1}", left),
                    width: format!("{:.1}", half),
                }
            })
            .collect();

        let values = exp
            .feature_values
            .iter()
            .map(|(name, v)| ValueRow {
                name: name.clone(),
                value: format!("{:.2}", v),
            })
            .collect();

        ReportContext {
            instance_index: exp.instance_index,
            explained_class: exp
                .class_names
                .get(exp.label)
                .cloned()
                .unwrap_or_else(|| format!("class {}", exp.label)),
            generated_at: self.generated_at.format("%Y-%m-%d %H:%M:%S UTC").to_string(),
            probabilities,
            weights,
            intercept: format!("{:.4}", exp.intercept),
            local_prediction: format!("{:.4}", exp.local_prediction),
            score: format!("{:.4}", exp.score),
            values,
        }
    }

    /// Render the report as an HTML string
    pub fn render(&self) -> Result<String> {
        let mut handlebars = Handlebars::new();
        handlebars.set_strict_mode(false);
        let html = handlebars.render_template(TEMPLATE, &self.context())?;
        Ok(html)
    }

    /// Render and write the report to `path`
    pub fn save(&self, path: &Path) -> Result<()> {
        let html = self.render()?;
        std::fs::write(path, html)?;
        info!(path = %path.display(), "LIME report written");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn explanation() -> LimeExplanation {
        LimeExplanation {
            instance_index: 4,
            label: 1,
            class_names: vec!["No Flood".into(), "Flood".into()],
            feature_weights: vec![
                ("rainfall > 3.00".into(), 0.4),
                ("<script> <= 1.00".into(), -0.1),
            ],
            feature_values: vec![("rainfall".into(), 3.5), ("<script>".into(), 0.2)],
            intercept: 0.3,
            local_prediction: 0.6,
            model_probabilities: vec![0.25, 0.75],
            score: 0.8,
        }
    }

    #[test]
    fn test_report_contains_sections() {
        let exp = explanation();
        let html = LimeReport::new(&exp).render().unwrap();

        assert!(html.contains("Prediction probabilities"));
        assert!(html.contains("Flood (0.75)"));
        assert!(html.contains("rainfall &gt; 3.00"));
        assert!(html.contains("Test instance 4"));
    }

    #[test]
    fn test_feature_names_are_escaped() {
        let exp = explanation();
        let html = LimeReport::new(&exp).render().unwrap();
        assert!(!html.contains("<script>"));
        assert!(html.contains("&lt;script&gt;"));
    }

    #[test]
    fn test_bars_scale_to_largest_weight() {
        let exp = explanation();
        let ctx = LimeReport::new(&exp).context();
        assert_eq!(ctx.weights[0].width, "50.0");
        assert_eq!(ctx.weights[0].left, "50.0");
        assert_eq!(ctx.weights[1].width, "12.5");
        assert_eq!(ctx.weights[1].left, "37.5");
    }

    #[test]
    fn test_save_writes_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("lime_explanation.html");
        LimeReport::new(&explanation()).save(&path).unwrap();
        assert!(std::fs::read_to_string(&path).unwrap().starts_with("<!DOCTYPE html>"));
    }
}
