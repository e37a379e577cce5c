//! SHAP summary plots: beeswarm for a single output, stacked bars per class

use super::{render_with_fallback, value_color, DrawResult, FigureStyle, CLASS_COLORS};
use crate::error::{ExplainError, Result};
use crate::explainability::{ShapOutput, ShapValues};
use crate::utils::{percentile, sorted_copy};
use plotters::prelude::*;
use plotters::style::text_anchor::{HPos, Pos, VPos};
use std::path::Path;
use tracing::info;

/// Most features shown in a summary plot
pub const MAX_DISPLAY: usize = 20;

const ROW_HEIGHT_IN: f64 = 0.4;
const WIDTH_IN: f64 = 8.0;
const LABEL_AREA_IN: f64 = 2.6;
const COLORBAR_IN: f64 = 0.9;

fn figure(n_rows: usize, dpi: u32) -> FigureStyle {
    FigureStyle::new(WIDTH_IN + COLORBAR_IN, n_rows as f64 * ROW_HEIGHT_IN + 1.5, dpi)
}

/// Render the summary matching the output shape
pub fn plot_summary(output: &ShapOutput, path: &Path, dpi: u32) -> Result<()> {
    match output {
        ShapOutput::Single(values) => plot_summary_beeswarm(values, path, dpi),
        ShapOutput::PerClass(per_class) => plot_summary_bar(per_class, path, dpi),
    }
}

/// Vertical offset in `[-0.35, 0.35]` for the `i`-th dot of a row
fn jitter(i: usize) -> f64 {
    let h = (i as u64).wrapping_mul(2_654_435_761) % 1000;
    (h as f64 / 999.0 - 0.5) * 0.7
}

/// Per-feature colour range: 5th to 95th percentile, or min to max if that collapses
fn color_range(column: &[f64]) -> (f64, f64) {
    let sorted = sorted_copy(column.iter().copied());
    let (mut lo, mut hi) = (percentile(&sorted, 5.0), percentile(&sorted, 95.0));
    if lo >= hi {
        lo = sorted.first().copied().unwrap_or(0.0);
        hi = sorted.last().copied().unwrap_or(0.0);
    }
    (lo, hi)
}

fn x_range(lo: f64, hi: f64) -> std::ops::Range<f64> {
    let span = (hi - lo).abs().max(1e-9);
    (lo - span * 0.05)..(hi + span * 0.05)
}

/// Beeswarm of every explained row; one line per feature, dots coloured by feature value
pub fn plot_summary_beeswarm(values: &ShapValues, path: &Path, dpi: u32) -> Result<()> {
    if values.n_samples() == 0 {
        return Err(ExplainError::PlotError("no SHAP values to plot".to_string()));
    }
    let order: Vec<usize> = values.feature_order().into_iter().take(MAX_DISPLAY).collect();
    let n_rows = order.len();
    let style = figure(n_rows, dpi);

    let lo = values.values.iter().copied().fold(0.0_f64, f64::min);
    let hi = values.values.iter().copied().fold(0.0_f64, f64::max);

    render_with_fallback(path, &style, |buffer, with_text| {
        let root = BitMapBackend::with_buffer(buffer, style.pixel_size()).into_drawing_area();
        root.fill(&WHITE)?;
        let (plot_area, bar_area) = root.split_horizontally(style.px(WIDTH_IN));

        let label_area = if with_text { style.px(LABEL_AREA_IN) } else { style.px(0.3) };
        let mut chart = ChartBuilder::on(&plot_area)
            .margin(style.px(0.15))
            .y_label_area_size(label_area)
            .x_label_area_size(style.px(0.7))
            .build_cartesian_2d(x_range(lo, hi), -0.5..(n_rows as f64 - 0.5))?;

        let font = style.font_px(11.0);
        if with_text {
            chart
                .configure_mesh()
                .disable_mesh()
                .y_labels(0)
                .x_labels(6)
                .x_desc("SHAP value (impact on model output)")
                .label_style(("sans-serif", font))
                .axis_desc_style(("sans-serif", font))
                .x_label_formatter(&|v| format!("{:.2}", v))
                .draw()?;
        }

        chart.draw_series(std::iter::once(PathElement::new(
            vec![(0.0, -0.5), (0.0, n_rows as f64 - 0.5)],
            RGBColor(153, 153, 153).stroke_width(style.px(0.01).max(1) as u32),
        )))?;

        let radius = style.px(0.025).max(2);
        for (rank, &feature) in order.iter().enumerate() {
            let y = (n_rows - 1 - rank) as f64;
            let column: Vec<f64> = values.data.column(feature).to_vec();
            let (vmin, vmax) = color_range(&column);

            chart.draw_series(values.values.column(feature).iter().enumerate().map(|(i, &v)| {
                let t = if vmax > vmin {
                    (column[i] - vmin) / (vmax - vmin)
                } else {
                    0.5
                };
                Circle::new((v, y + jitter(i)), radius, value_color(t).mix(0.85).filled())
            }))?;

            if with_text {
                let (px, py) = chart.backend_coord(&(x_range(lo, hi).start, y));
                let text = TextStyle::from(("sans-serif", font).into_font())
                    .color(&BLACK)
                    .pos(Pos::new(HPos::Right, VPos::Center));
                root.draw_text(&values.feature_names[feature], &text, (px - style.px(0.1), py))?;
            }
        }

        draw_colorbar(&bar_area, &style, with_text)?;
        root.present()?;
        Ok(())
    })?;

    info!(path = %path.display(), features = n_rows, "SHAP summary plot saved");
    Ok(())
}

fn draw_colorbar(area: &DrawingArea<BitMapBackend, plotters::coord::Shift>, style: &FigureStyle, with_text: bool) -> DrawResult {
    let (w, h) = area.dim_in_pixel();
    let (w, h) = (w as i32, h as i32);
    let top = style.px(0.6);
    let bottom = h - style.px(0.9);
    let left = style.px(0.1);
    let right = (left + style.px(0.15)).min(w);
    let steps = 100;
    let span = (bottom - top).max(1);

    for s in 0..steps {
        let y0 = top + span * s / steps;
        let y1 = top + span * (s + 1) / steps;
        let t = 1.0 - s as f64 / (steps - 1) as f64;
        area.draw(&Rectangle::new([(left, y0), (right, y1)], value_color(t).filled()))?;
    }

    if with_text {
        let font = style.font_px(10.0);
        let text = TextStyle::from(("sans-serif", font).into_font())
            .color(&BLACK)
            .pos(Pos::new(HPos::Left, VPos::Center));
        area.draw_text("High", &text, (right + style.px(0.05), top))?;
        area.draw_text("Low", &text, (right + style.px(0.05), bottom))?;
        area.draw_text("Feature value", &text, (left, bottom + style.px(0.3)))?;
    }
    Ok(())
}

/// Stacked horizontal bars of mean |SHAP| per class
pub fn plot_summary_bar(per_class: &[ShapValues], path: &Path, dpi: u32) -> Result<()> {
    let first = per_class
        .first()
        .ok_or_else(|| ExplainError::PlotError("no classes to plot".to_string()))?;
    let means: Vec<Vec<f64>> = per_class.iter().map(|v| v.mean_abs().to_vec()).collect();
    let n_features = first.n_features();
    let totals: Vec<f64> = (0..n_features)
        .map(|j| means.iter().map(|m| m[j]).sum())
        .collect();

    let mut order: Vec<usize> = (0..n_features).collect();
    order.sort_by(|&a, &b| {
        totals[b]
            .partial_cmp(&totals[a])
            .unwrap_or(std::cmp::Ordering::Equal)
    });
    order.truncate(MAX_DISPLAY);
    let n_rows = order.len();
    let style = figure(n_rows, dpi);
    let x_max = order.iter().map(|&j| totals[j]).fold(0.0_f64, f64::max);

    render_with_fallback(path, &style, |buffer, with_text| {
        let root = BitMapBackend::with_buffer(buffer, style.pixel_size()).into_drawing_area();
        root.fill(&WHITE)?;

        let label_area = if with_text { style.px(LABEL_AREA_IN) } else { style.px(0.3) };
        let mut chart = ChartBuilder::on(&root)
            .margin(style.px(0.15))
            .y_label_area_size(label_area)
            .x_label_area_size(style.px(0.7))
            .build_cartesian_2d(0.0..(x_max.max(1e-9) * 1.05), -0.5..(n_rows as f64 - 0.5))?;

        let font = style.font_px(11.0);
        if with_text {
            chart
                .configure_mesh()
                .disable_mesh()
                .y_labels(0)
                .x_labels(6)
                .x_desc("mean(|SHAP value|) (average impact on model output magnitude)")
                .label_style(("sans-serif", font))
                .axis_desc_style(("sans-serif", font))
                .x_label_formatter(&|v| format!("{:.3}", v))
                .draw()?;
        }

        let mut offsets = vec![0.0; n_features];
        for (k, class_means) in means.iter().enumerate() {
            let color = CLASS_COLORS[k % CLASS_COLORS.len()];
            let bars: Vec<Rectangle<(f64, f64)>> = order
                .iter()
                .enumerate()
                .map(|(rank, &j)| {
                    let y = (n_rows - 1 - rank) as f64;
                    let x0 = offsets[j];
                    let x1 = x0 + class_means[j];
                    Rectangle::new([(x0, y - 0.35), (x1, y + 0.35)], color.filled())
                })
                .collect();
            for &j in &order {
                offsets[j] += class_means[j];
            }

            let series = chart.draw_series(bars)?;
            if with_text {
                let legend_px = style.px(0.12);
                series
                    .label(format!("Class {}", per_class[k].class_index.unwrap_or(k)))
                    .legend(move |(x, y)| {
                        Rectangle::new([(x, y - legend_px / 2), (x + legend_px, y + legend_px / 2)], color.filled())
                    });
            }
        }

        if with_text {
            chart
                .configure_series_labels()
                .position(SeriesLabelPosition::LowerRight)
                .label_font(("sans-serif", font))
                .background_style(WHITE.mix(0.8))
                .border_style(BLACK)
                .draw()?;

            let text = TextStyle::from(("sans-serif", font).into_font())
                .color(&BLACK)
                .pos(Pos::new(HPos::Right, VPos::Center));
            for (rank, &j) in order.iter().enumerate() {
                let y = (n_rows - 1 - rank) as f64;
                let (px, py) = chart.backend_coord(&(0.0, y));
                root.draw_text(&first.feature_names[j], &text, (px - style.px(0.1), py))?;
            }
        }

        root.present()?;
        Ok(())
    })?;

    info!(
        path = %path.display(),
        classes = per_class.len(),
        features = n_rows,
        "SHAP per-class summary plot saved"
    );
    Ok(())
}
