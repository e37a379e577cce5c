//! Visualization module — SHAP plots rendered to PNG with plotters.
//!
//! Figures are sized in inches and rasterized at the configured DPI into an RGB
//! buffer, then encoded as PNG with the DPI recorded in a pHYs chunk. Text needs
//! a system font; when none can be loaded the figure is drawn again without
//! text rather than failing the run.

pub mod summary_plot;
pub mod waterfall;

pub use summary_plot::{plot_summary, plot_summary_bar, plot_summary_beeswarm};
pub use waterfall::plot_waterfall;

use crate::error::{ExplainError, Result};
use plotters::prelude::*;
use std::error::Error;
use std::fs::File;
use std::io::BufWriter;
use std::path::Path;
use tracing::{debug, warn};

pub(crate) type DrawResult = std::result::Result<(), Box<dyn Error>>;

/// Colour of low feature values and negative attributions
pub const BLUE_LOW: RGBColor = RGBColor(0, 138, 250);
/// Colour of high feature values and positive attributions
pub const RED_HIGH: RGBColor = RGBColor(255, 0, 82);

/// Per-class bar colours
pub(crate) const CLASS_COLORS: [RGBColor; 6] = [
    RGBColor(0, 138, 250),
    RGBColor(255, 0, 82),
    RGBColor(44, 160, 44),
    RGBColor(255, 127, 14),
    RGBColor(148, 103, 189),
    RGBColor(140, 86, 75),
];

/// Figure size in inches and raster resolution
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FigureStyle {
    pub width_in: f64,
    pub height_in: f64,
    pub dpi: u32,
}

impl FigureStyle {
    pub fn new(width_in: f64, height_in: f64, dpi: u32) -> Self {
        Self {
            width_in,
            height_in,
            dpi,
        }
    }

    /// Pixel dimensions: inches × dpi
    pub fn pixel_size(&self) -> (u32, u32) {
        let dpi = self.dpi as f64;
        (
            (self.width_in * dpi).round().max(1.0) as u32,
            (self.height_in * dpi).round().max(1.0) as u32,
        )
    }

    /// Pixels for a length given in inches
    pub fn px(&self, inches: f64) -> i32 {
        (inches * self.dpi as f64).round() as i32
    }

    /// Font size in pixels for a size given in points
    pub fn font_px(&self, points: f64) -> f64 {
        points * self.dpi as f64 / 72.0
    }

    /// Resolution as PNG stores it
    pub fn pixels_per_meter(&self) -> u32 {
        (self.dpi as f64 / METERS_PER_INCH).round() as u32
    }

    fn buffer_len(&self) -> usize {
        let (w, h) = self.pixel_size();
        w as usize * h as usize * 3
    }
}

const METERS_PER_INCH: f64 = 0.0254;

/// Linear blend from blue (t = 0) to red (t = 1)
pub fn value_color(t: f64) -> RGBColor {
    let t = if t.is_finite() { t.clamp(0.0, 1.0) } else { 0.5 };
    let lerp = |a: u8, b: u8| (a as f64 + (b as f64 - a as f64) * t).round() as u8;
    RGBColor(
        lerp(BLUE_LOW.0, RED_HIGH.0),
        lerp(BLUE_LOW.1, RED_HIGH.1),
        lerp(BLUE_LOW.2, RED_HIGH.2),
    )
}

/// Draw into an RGB buffer and save it as PNG
///
/// `draw` gets the buffer and whether to render text. On failure (typically no
/// usable font) the figure is drawn again without text.
pub(crate) fn render_with_fallback<F>(path: &Path, style: &FigureStyle, draw: F) -> Result<()>
where
    F: Fn(&mut [u8], bool) -> DrawResult,
{
    let mut buffer = vec![0u8; style.buffer_len()];
    if let Err(e) = draw(&mut buffer, true) {
        warn!(
            path = %path.display(),
            error = %e,
            "Plot text could not be rendered, saving without labels"
        );
        buffer.fill(0);
        draw(&mut buffer, false)
            .map_err(|e| ExplainError::PlotError(format!("{}: {}", path.display(), e)))?;
    }
    write_png(path, &buffer, style)
}

/// Encode an RGB buffer as an 8-bit PNG carrying the figure's DPI
pub(crate) fn write_png(path: &Path, rgb: &[u8], style: &FigureStyle) -> Result<()> {
    let (width, height) = style.pixel_size();
    let ppm = style.pixels_per_meter();

    let file = BufWriter::new(File::create(path)?);
    let mut encoder = png::Encoder::new(file, width, height);
    encoder.set_color(png::ColorType::Rgb);
    encoder.set_depth(png::BitDepth::Eight);
    encoder.set_pixel_dims(Some(png::PixelDimensions {
        xppu: ppm,
        yppu: ppm,
        unit: png::Unit::Meter,
    }));

    let mut writer = encoder.write_header()?;
    writer.write_image_data(rgb)?;
    writer.finish()?;
    debug!(path = %path.display(), width, height, dpi = style.dpi, "PNG written");
    Ok(())
}

/// Open a saved plot with the system viewer; failures are only logged
pub fn display(path: &Path) {
    match open::that(path) {
        Ok(()) => debug!(path = %path.display(), "Opened plot"),
        Err(e) => warn!(path = %path.display(), error = %e, "Could not open plot viewer"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pixel_size_is_inches_times_dpi() {
        let style = FigureStyle::new(8.0, 6.0, 300);
        assert_eq!(style.pixel_size(), (2400, 1800));
        assert_eq!(style.px(0.5), 150);
        assert!((style.font_px(12.0) - 50.0).abs() < 1e-12);
    }

    #[test]
    fn test_value_color_endpoints() {
        assert_eq!(value_color(0.0), BLUE_LOW);
        assert_eq!(value_color(1.0), RED_HIGH);
        assert_eq!(value_color(2.0), RED_HIGH);
        assert_eq!(value_color(f64::NAN), value_color(0.5));
    }

    fn tiny() -> FigureStyle {
        FigureStyle::new(0.5, 0.25, 40)
    }

    #[test]
    fn test_fallback_retries_without_text() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("fallback.png");
        let calls = std::cell::RefCell::new(Vec::new());
        let result = render_with_fallback(&path, &tiny(), |buffer, with_text| {
            calls.borrow_mut().push(with_text);
            if with_text {
                buffer.fill(1);
                Err("no font".into())
            } else {
                Ok(())
            }
        });
        assert!(result.is_ok());
        assert_eq!(*calls.borrow(), vec![true, false]);
        assert!(path.exists());
    }

    #[test]
    fn test_fallback_reports_second_failure() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("broken.png");
        let result = render_with_fallback(&path, &tiny(), |_, _| Err("broken".into()));
        assert!(matches!(result, Err(ExplainError::PlotError(_))));
        assert!(!path.exists());
    }

    #[test]
    fn test_png_records_dpi() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("dpi.png");
        let style = FigureStyle::new(0.5, 0.25, 300);
        assert_eq!(style.pixels_per_meter(), 11811);

        render_with_fallback(&path, &style, |buffer, _| {
            let root = BitMapBackend::with_buffer(buffer, style.pixel_size()).into_drawing_area();
            root.fill(&WHITE)?;
            root.present()?;
            Ok(())
        })
        .unwrap();

        let decoder = png::Decoder::new(File::open(&path).unwrap());
        let reader = decoder.read_info().unwrap();
        let info = reader.info();
        assert_eq!((info.width, info.height), (150, 75));
        let dims = info.pixel_dims.unwrap();
        assert_eq!((dims.xppu, dims.yppu), (11811, 11811));
        assert_eq!(dims.unit, png::Unit::Meter);
    }
}
