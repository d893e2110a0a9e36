//! SHAP bar charts rendered to SVG and shipped base64-encoded in responses.

use crate::error::{AppError, Result};
use crate::ml::explainer::{FeatureAttribution, GlobalImportance, LocalExplanation};
use base64ct::{Base64, Encoding};
use plotters::coord::ranged1d::SegmentValue;
use plotters::prelude::*;
use serde::{Deserialize, Serialize};
use std::path::Path;

pub const SVG_MIME: &str = "image/svg+xml";

const WIDTH: u32 = 760;
const ROW_HEIGHT: u32 = 34;
const LABEL_AREA: u32 = 190;

const POSITIVE: RGBColor = RGBColor(0xEF, 0x53, 0x50);
const NEGATIVE: RGBColor = RGBColor(0x66, 0xBB, 0x6A);
const IMPORTANCE: RGBColor = RGBColor(0x1E, 0x88, 0xE5);

/// Chart as it appears in a prediction response
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EncodedChart {
    #[serde(rename = "type")]
    pub mime_type: String,
    pub base64_data: String,
    pub title: String,
}

impl EncodedChart {
    pub fn new(bytes: &[u8], mime_type: &str, title: impl Into<String>) -> Self {
        Self {
            mime_type: mime_type.to_string(),
            base64_data: Base64::encode_string(bytes),
            title: title.into(),
        }
    }

    /// Read a prerendered chart, guessing the MIME type from the extension
    pub fn from_file(path: &Path, title: impl Into<String>) -> Result<Self> {
        let mime_type = mime_for(path).ok_or_else(|| {
            AppError::Chart(format!("unsupported chart format: {}", path.display()))
        })?;
        let bytes = std::fs::read(path)?;
        Ok(Self::new(&bytes, mime_type, title))
    }
}

fn mime_for(path: &Path) -> Option<&'static str> {
    let extension = path.extension()?.to_str()?.to_ascii_lowercase();
    match extension.as_str() {
        "svg" => Some(SVG_MIME),
        "png" => Some("image/png"),
        "jpg" | "jpeg" => Some("image/jpeg"),
        _ => None,
    }
}

fn chart_err<E: std::fmt::Display>(err: E) -> AppError {
    AppError::Chart(err.to_string())
}

/// Signed local attribution chart; `None` when there is nothing to draw
pub fn local_chart(explanation: &LocalExplanation, probability: f64) -> Result<Option<EncodedChart>> {
    if explanation.is_empty() {
        return Ok(None);
    }

    let title = format!("Local SHAP explanation (churn probability {:.2})", probability);
    let svg = render_bars(
        &explanation.attributions,
        &title,
        "SHAP value (impact on churn log-odds)",
        |value| if value > 0.0 { POSITIVE } else { NEGATIVE },
    )?;
    Ok(Some(EncodedChart::new(svg.as_bytes(), SVG_MIME, title)))
}

pub fn global_chart_svg(importance: &GlobalImportance) -> Result<String> {
    render_bars(
        &importance.features,
        "Global feature importance",
        "mean |SHAP value|",
        |_| IMPORTANCE,
    )
}

pub fn write_global_chart(importance: &GlobalImportance, path: &Path) -> Result<()> {
    let svg = global_chart_svg(importance)?;
    std::fs::write(path, svg)?;
    Ok(())
}

/// Horizontal bars, first attribution drawn on top
fn render_bars(
    bars: &[FeatureAttribution],
    title: &str,
    x_desc: &str,
    color: impl Fn(f64) -> RGBColor,
) -> Result<String> {
    if bars.is_empty() {
        return Err(AppError::Chart("no attributions to plot".to_string()));
    }
    let n = bars.len();
    let (x_min, x_max) = value_range(bars);
    let height = 110 + ROW_HEIGHT * n as u32;

    let mut svg = String::new();
    {
        let root = SVGBackend::with_string(&mut svg, (WIDTH, height)).into_drawing_area();
        root.fill(&WHITE).map_err(chart_err)?;

        let mut chart = ChartBuilder::on(&root)
            .caption(title, ("sans-serif", 20))
            .margin(14)
            .x_label_area_size(42)
            .y_label_area_size(LABEL_AREA)
            .build_cartesian_2d(x_min..x_max, (0..n - 1).into_segmented())
            .map_err(chart_err)?;

        let label = |y: &SegmentValue<usize>| match y {
            SegmentValue::CenterOf(i) | SegmentValue::Exact(i) if *i < n => {
                bars[n - 1 - *i].feature.clone()
            }
            _ => String::new(),
        };
        chart
            .configure_mesh()
            .disable_y_mesh()
            .y_labels(n)
            .y_label_formatter(&label)
            .x_desc(x_desc)
            .axis_desc_style(("sans-serif", 14))
            .label_style(("sans-serif", 13))
            .draw()
            .map_err(chart_err)?;

        chart
            .draw_series(bars.iter().enumerate().map(|(rank, bar)| {
                let slot = n - 1 - rank;
                let mut rect = Rectangle::new(
                    [
                        (0.0, SegmentValue::Exact(slot)),
                        (bar.value, SegmentValue::Exact(slot + 1)),
                    ],
                    color(bar.value).filled(),
                );
                rect.set_margin(5, 5, 0, 0);
                rect
            }))
            .map_err(chart_err)?;

        chart
            .draw_series(std::iter::once(PathElement::new(
                vec![(0.0, SegmentValue::Exact(0)), (0.0, SegmentValue::Last)],
                BLACK.stroke_width(1),
            )))
            .map_err(chart_err)?;

        root.present().map_err(chart_err)?;
    }
    Ok(svg)
}

fn value_range(bars: &[FeatureAttribution]) -> (f64, f64) {
    let low = bars.iter().map(|b| b.value).fold(0.0_f64, f64::min);
    let high = bars.iter().map(|b| b.value).fold(0.0_f64, f64::max);
    let span = high - low;
    if span <= f64::EPSILON {
        return (-1.0, 1.0);
    }
    (low - 0.1 * span, high + 0.1 * span)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn attribution(feature: &str, value: f64) -> FeatureAttribution {
        FeatureAttribution {
            feature: feature.to_string(),
            value,
        }
    }

    fn explanation() -> LocalExplanation {
        LocalExplanation {
            attributions: vec![attribution("Age", 0.8), attribution("IsActiveMember", -0.3)],
            expected_value: Some(-1.2),
        }
    }

    #[test]
    fn test_local_chart_is_svg() {
        let chart = local_chart(&explanation(), 0.734).unwrap().unwrap();
        assert_eq!(chart.mime_type, SVG_MIME);
        assert!(chart.title.contains("0.73"));

        let svg = Base64::decode_vec(&chart.base64_data).unwrap();
        let svg = String::from_utf8(svg).unwrap();
        assert!(svg.contains("<svg"));
        assert!(svg.contains("Age"));
        assert!(svg.contains("IsActiveMember"));
    }

    #[test]
    fn test_empty_explanation_has_no_chart() {
        assert!(local_chart(&LocalExplanation::default(), 0.5).unwrap().is_none());
    }

    #[test]
    fn test_value_range_includes_zero() {
        let (low, high) = value_range(&[attribution("a", 0.5), attribution("b", 0.2)]);
        assert!(low < 0.0 && high > 0.5);
        assert_eq!(value_range(&[attribution("a", 0.0)]), (-1.0, 1.0));
    }

    #[test]
    fn test_global_chart_round_trips_through_file() {
        let importance = GlobalImportance {
            n_samples: 10,
            expected_value: -1.0,
            features: vec![attribution("Age", 0.6), attribution("Balance", 0.2)],
        };
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("shap_summary.svg");
        write_global_chart(&importance, &path).unwrap();

        let chart = EncodedChart::from_file(&path, "Global").unwrap();
        assert_eq!(chart.mime_type, SVG_MIME);
        assert!(!chart.base64_data.is_empty());
    }

    #[test]
    fn test_mime_by_extension() {
        assert_eq!(mime_for(Path::new("a/b.PNG")), Some("image/png"));
        assert_eq!(mime_for(Path::new("chart.svg")), Some(SVG_MIME));
        assert_eq!(mime_for(Path::new("chart.gif")), None);
        assert!(EncodedChart::from_file(Path::new("chart.gif"), "x").is_err());
    }
}
