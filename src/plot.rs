//! SVG charts for experiment results.

use std::path::Path;

use plotters::prelude::*;

use crate::error::{Result, StudyError};

fn plot_err<E: std::fmt::Display>(e: E) -> StudyError {
    StudyError::Plot(e.to_string())
}

/// Name for a y axis tick: only integer ticks inside the range carry a label.
fn tick_label(names: &[String], v: f64) -> String {
    let rounded = v.round();
    if (v - rounded).abs() > 1e-6 || rounded < 0.0 {
        return String::new();
    }
    names.get(rounded as usize).cloned().unwrap_or_default()
}

/// Horizontal bar per feature, one row each, y range `[-1, n]`.
pub fn plot_feature_importances<P: AsRef<Path>>(
    path: P,
    names: &[String],
    importances: &[f64],
) -> Result<()> {
    if names.len() != importances.len() {
        return Err(StudyError::InvalidArgument(format!(
            "{} names for {} importances",
            names.len(),
            importances.len()
        )));
    }
    let n = names.len();
    let x_max = importances.iter().cloned().fold(0.0, f64::max).max(1e-3) * 1.1;
    let label_width = names.iter().map(|s| s.len()).max().unwrap_or(0) as u32 * 7 + 20;

    let root = SVGBackend::new(path.as_ref(), (800, 160 + 28 * n as u32)).into_drawing_area();
    root.fill(&WHITE).map_err(plot_err)?;

    let mut chart = ChartBuilder::on(&root)
        .margin(20)
        .x_label_area_size(40)
        .y_label_area_size(label_width.max(60))
        .build_cartesian_2d(0f64..x_max, -1f64..n as f64)
        .map_err(plot_err)?;

    let formatter = |v: &f64| tick_label(names, *v);
    chart
        .configure_mesh()
        .disable_y_mesh()
        .y_labels(n + 2)
        .y_label_formatter(&formatter)
        .x_desc("Feature Importances")
        .y_desc("Features")
        .draw()
        .map_err(plot_err)?;

    chart
        .draw_series(importances.iter().enumerate().map(|(i, &v)| {
            let y = i as f64;
            Rectangle::new([(0.0, y - 0.4), (v, y + 0.4)], BLUE.mix(0.8).filled())
        }))
        .map_err(plot_err)?;

    root.present().map_err(plot_err)?;
    Ok(())
}
