//! Diagnostic plots written as self-contained plotly HTML.

use anyhow::{Context, Result};
use plotly::common::{DashType, Line, Mode};
use plotly::layout::{Axis, BarMode, HoverMode, Legend, Margin};
use plotly::{Bar, Layout, Plot, Scatter};
use stats::RocCurve;
use std::path::Path;

const SCORE_BINS: usize = 50;

fn standard_layout(x_label: &str, y_label: &str) -> Layout {
    Layout::new()
        .margin(Margin::new().left(70).right(65).top(30).bottom(70))
        .show_legend(true)
        .hover_mode(HoverMode::Closest)
        .x_axis(Axis::new().title(x_label))
        .y_axis(Axis::new().title(y_label))
        .legend(Legend::new().background_color("#ffffff"))
}

fn threshold_line(threshold: f64, y_max: f64) -> Box<Scatter<f64, f64>> {
    Scatter::new(vec![threshold, threshold], vec![0.0, y_max])
        .mode(Mode::Lines)
        .name("Threshold")
        .line(Line::new().color("black").dash(DashType::Dash))
}

/// Histogram of `values` over `[0, 1]` normalised to unit area; returns bin
/// centres and densities.
pub(crate) fn density_histogram(values: &[f32], bins: usize) -> (Vec<f64>, Vec<f64>) {
    let width = 1.0 / bins as f64;
    let mut counts = vec![0usize; bins];
    for &v in values {
        let bin = ((f64::from(v) / width).floor().max(0.0) as usize).min(bins - 1);
        counts[bin] += 1;
    }
    let total = values.len().max(1) as f64;
    let centres = (0..bins).map(|b| (b as f64 + 0.5) * width).collect();
    let densities = counts.iter().map(|&c| c as f64 / total / width).collect();
    (centres, densities)
}

/// ROC curves, one trace per named curve.
pub fn roc_plot(curves: &[(&str, &RocCurve)]) -> Plot {
    let mut plot = Plot::new();
    for (name, curve) in curves {
        plot.add_trace(
            Scatter::new(curve.fpr.clone(), curve.tpr.clone())
                .mode(Mode::Lines)
                .name(*name),
        );
    }
    plot.set_layout(standard_layout("False positive rate", "True positive rate"));
    plot
}

/// Accuracy as a function of the decision threshold.
pub fn accuracy_plot(curves: &[(&str, Vec<f64>, Vec<f64>)], threshold: f64) -> Plot {
    let mut plot = Plot::new();
    for (name, thresholds, accuracy) in curves {
        plot.add_trace(
            Scatter::new(thresholds.clone(), accuracy.clone())
                .mode(Mode::Lines)
                .name(*name),
        );
    }
    plot.add_trace(threshold_line(threshold, 1.0));
    plot.set_layout(standard_layout("Threshold", "Accuracy"));
    plot
}

/// Overlaid score densities with the decision threshold marked.
pub fn score_distribution_plot(groups: &[(&str, &[f32])], threshold: f64) -> Plot {
    let mut plot = Plot::new();
    let mut y_max: f64 = 0.0;
    for (name, scores) in groups {
        let (centres, densities) = density_histogram(scores, SCORE_BINS);
        y_max = densities.iter().copied().fold(y_max, f64::max);
        plot.add_trace(Bar::new(centres, densities).name(*name).opacity(0.6));
    }
    plot.add_trace(threshold_line(threshold, y_max));
    plot.set_layout(standard_layout("Doublet score", "Density").bar_mode(BarMode::Overlay));
    plot
}

/// Metric values over successive dates, one trace per metric.
pub fn tracking_plot(dates: &[String], metrics: &[(&str, Vec<f64>)]) -> Plot {
    let mut plot = Plot::new();
    for (name, values) in metrics {
        plot.add_trace(
            Scatter::new(dates.to_vec(), values.clone())
                .mode(Mode::LinesMarkers)
                .name(*name),
        );
    }
    plot.set_layout(standard_layout("Date", "Score"));
    plot
}

pub fn write_plot(plot: &Plot, path: &Path) -> Result<()> {
    std::fs::write(path, plot.to_html()).with_context(|| format!("writing plot {path:?}"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_density_histogram() {
        let values = [0.0f32, 0.1, 0.5, 0.99, 1.0];
        let (centres, densities) = density_histogram(&values, 10);
        assert_eq!(centres.len(), 10);
        assert!((centres[0] - 0.05).abs() < 1e-12);
        let area: f64 = densities.iter().map(|d| d * 0.1).sum();
        assert!((area - 1.0).abs() < 1e-9);
        // 1.0 falls in the last bin
        assert!((densities[9] - 2.0 / 5.0 / 0.1).abs() < 1e-9);
    }

    #[test]
    fn test_write_plots() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let curve = stats::roc_curve(&[false, true, false, true], &[0.1, 0.9, 0.4, 0.3])
            .expect("both classes present");
        let path = dir.path().join("roc.html");
        write_plot(&roc_plot(&[("Train", &curve)]), &path)?;
        let html = std::fs::read_to_string(&path)?;
        assert!(html.contains("Train"));

        let dist = score_distribution_plot(&[("Observed", &[0.1, 0.2, 0.8])], 0.5);
        write_plot(&dist, &dir.path().join("dist.html"))?;
        Ok(())
    }
}
