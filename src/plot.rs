// convstack - training-error chart export

use crate::history::ErrorHistory;

/// Render the training-error history as a PNG line chart.
///
/// Diagnostic only: any failure here (or the `plots` feature being
/// disabled) leaves the network untouched.
#[cfg(feature = "plots")]
pub fn plot_history_png<P: AsRef<std::path::Path>>(
    path: P,
    history: &ErrorHistory,
    title: &str,
    img_width: u32,
    img_height: u32,
) -> Result<(), Box<dyn std::error::Error>> {
    use plotters::prelude::*;

    let root = BitMapBackend::new(path.as_ref(), (img_width, img_height)).into_drawing_area();
    root.fill(&WHITE)?;

    let max_value = history.values().iter().copied().fold(0.01f32, f32::max);
    let x_max = ((history.len() * history.step()) as f32).max(1.0);

    let mut chart = ChartBuilder::on(&root)
        .margin(20)
        .caption(title, ("sans-serif", 22))
        .x_label_area_size(45)
        .y_label_area_size(45)
        .build_cartesian_2d(0.0f32..x_max, 0.0f32..max_value * 1.02)?;
    chart
        .configure_mesh()
        .x_desc("Training Step")
        .y_desc("Matching Error")
        .draw()?;

    let series: Vec<(f32, f32)> = history
        .values()
        .iter()
        .enumerate()
        .map(|(i, &v)| ((i * history.step()) as f32, v))
        .collect();
    chart.draw_series(LineSeries::new(series, &BLUE))?;

    root.present()?;
    Ok(())
}

#[cfg(not(feature = "plots"))]
pub fn plot_history_png<P: AsRef<std::path::Path>>(
    _path: P,
    _history: &ErrorHistory,
    _title: &str,
    _img_width: u32,
    _img_height: u32,
) -> Result<(), Box<dyn std::error::Error>> {
    Err("plots feature is not enabled".into())
}
