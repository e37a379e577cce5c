//! Waterfall plot of a single SHAP explanation

use super::{render_with_fallback, FigureStyle, BLUE_LOW, RED_HIGH};
use crate::error::Result;
use crate::explainability::Explanation;
use plotters::prelude::*;
use plotters::style::text_anchor::{HPos, Pos, VPos};
use std::path::Path;
use tracing::info;

/// Features drawn individually; the rest are merged into one bar
pub const MAX_DISPLAY: usize = 10;

const ROW_HEIGHT_IN: f64 = 0.5;
const WIDTH_IN: f64 = 8.0;
const LABEL_AREA_IN: f64 = 2.8;

/// One bar of the waterfall, in drawing order (top to bottom)
#[derive(Debug, Clone, PartialEq)]
pub struct WaterfallBar {
    pub label: String,
    pub value: f64,
    pub start: f64,
    pub end: f64,
}

/// Bars from the largest |SHAP| at the top down to the merged remainder, accumulating
/// bottom-up from the base value so the top bar ends at f(x)
pub fn waterfall_bars(explanation: &Explanation, max_display: usize) -> Vec<WaterfallBar> {
    let contributions = explanation.sorted_contributions();
    let shown = contributions.len().min(max_display);

    let mut rows: Vec<(String, f64)> = contributions[..shown]
        .iter()
        .map(|c| (format!("{:.3} = {}", c.feature_value, c.feature_name), c.contribution))
        .collect();
    let rest = &contributions[shown..];
    if !rest.is_empty() {
        let sum: f64 = rest.iter().map(|c| c.contribution).sum();
        rows.push((format!("{} other features", rest.len()), sum));
    }

    let mut bars = Vec::with_capacity(rows.len());
    let mut cumulative = explanation.base_value;
    for (label, value) in rows.into_iter().rev() {
        let start = cumulative;
        cumulative += value;
        bars.push(WaterfallBar {
            label,
            value,
            start,
            end: cumulative,
        });
    }
    bars.reverse();
    bars
}

/// Render the waterfall of `explanation` to `path`
pub fn plot_waterfall(explanation: &Explanation, path: &Path, dpi: u32) -> Result<()> {
    let bars = waterfall_bars(explanation, MAX_DISPLAY);
    let n_rows = bars.len().max(1);
    let style = FigureStyle::new(WIDTH_IN, n_rows as f64 * ROW_HEIGHT_IN + 1.5, dpi);

    let base = explanation.base_value;
    let fx = explanation.output();
    let lo = bars
        .iter()
        .flat_map(|b| [b.start, b.end])
        .fold(base.min(fx), f64::min);
    let hi = bars
        .iter()
        .flat_map(|b| [b.start, b.end])
        .fold(base.max(fx), f64::max);
    let span = (hi - lo).abs().max(1e-9);
    let x_range = (lo - span * 0.15)..(hi + span * 0.15);

    render_with_fallback(path, &style, |buffer, with_text| {
        let root = BitMapBackend::with_buffer(buffer, style.pixel_size()).into_drawing_area();
        root.fill(&WHITE)?;

        let label_area = if with_text { style.px(LABEL_AREA_IN) } else { style.px(0.3) };
        let mut chart = ChartBuilder::on(&root)
            .margin(style.px(0.15))
            .y_label_area_size(label_area)
            .x_label_area_size(style.px(0.7))
            .build_cartesian_2d(x_range.clone(), -0.5..(n_rows as f64 - 0.5))?;

        let font = style.font_px(11.0);
        if with_text {
            chart
                .configure_mesh()
                .disable_mesh()
                .y_labels(0)
                .x_labels(6)
                .x_desc(format!("E[f(X)] = {:.3}    f(x) = {:.3}", base, fx))
                .label_style(("sans-serif", font))
                .axis_desc_style(("sans-serif", font))
                .x_label_formatter(&|v| format!("{:.2}", v))
                .draw()?;
        }

        for x in [base, fx] {
            chart.draw_series(std::iter::once(PathElement::new(
                vec![(x, -0.5), (x, n_rows as f64 - 0.5)],
                RGBColor(190, 190, 190).stroke_width(style.px(0.01).max(1) as u32),
            )))?;
        }

        chart.draw_series(bars.iter().enumerate().map(|(rank, bar)| {
            let y = (n_rows - 1 - rank) as f64;
            let color = if bar.value >= 0.0 { RED_HIGH } else { BLUE_LOW };
            Rectangle::new([(bar.start, y - 0.3), (bar.end, y + 0.3)], color.filled())
        }))?;

        if with_text {
            let left = TextStyle::from(("sans-serif", font).into_font())
                .color(&BLACK)
                .pos(Pos::new(HPos::Right, VPos::Center));
            let right = TextStyle::from(("sans-serif", font * 0.9).into_font())
                .color(&BLACK)
                .pos(Pos::new(HPos::Left, VPos::Center));

            for (rank, bar) in bars.iter().enumerate() {
                let y = (n_rows - 1 - rank) as f64;
                let (px, py) = chart.backend_coord(&(x_range.start, y));
                root.draw_text(&bar.label, &left, (px - style.px(0.1), py))?;

                let (bx, by) = chart.backend_coord(&(bar.start.max(bar.end), y));
                root.draw_text(&format!("{:+.3}", bar.value), &right, (bx + style.px(0.05), by))?;
            }
        }

        root.present()?;
        Ok(())
    })?;

    info!(
        path = %path.display(),
        sample = explanation.sample_index,
        "SHAP waterfall plot saved"
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn explanation(values: Vec<f64>) -> Explanation {
        let n = values.len();
        Explanation {
            sample_index: 2,
            class_index: Some(1),
            values,
            base_value: 0.5,
            data: vec![1.0; n],
            feature_names: (0..n).map(|i| format!("f{}", i)).collect(),
        }
    }

    #[test]
    fn test_bars_accumulate_to_output() {
        let exp = explanation(vec![0.1, -0.3, 0.05]);
        let bars = waterfall_bars(&exp, 10);

        assert_eq!(bars.len(), 3);
        assert!(bars[0].label.ends_with("f1"));
        assert!((bars.last().unwrap().start - 0.5).abs() < 1e-12);
        assert!((bars[0].end - exp.output()).abs() < 1e-12);
        for pair in bars.windows(2) {
            assert!((pair[1].end - pair[0].start).abs() < 1e-12);
        }
    }

    #[test]
    fn test_remainder_is_merged() {
        let values: Vec<f64> = (0..14).map(|i| (i as f64 + 1.0) * 0.01).collect();
        let exp = explanation(values);
        let bars = waterfall_bars(&exp, 10);

        assert_eq!(bars.len(), 11);
        assert_eq!(bars[10].label, "4 other features");
        assert!((bars[10].value - (0.01 + 0.02 + 0.03 + 0.04)).abs() < 1e-12);
        assert!((bars[0].end - exp.output()).abs() < 1e-12);
    }
}
