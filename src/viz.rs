//! Visualization functions using Plotters for churn model analysis

use crate::config::PipelineConfig;
use crate::evaluate::roc_curve;
use crate::features::CustomerFeatureTable;
use crate::pipeline::PipelineReport;
use plotters::prelude::*;
use std::path::Path;

/// Color palette for model curves
const MODEL_COLORS: [RGBColor; 5] = [RED, BLUE, GREEN, MAGENTA, CYAN];

/// A named ROC curve as (false positive rate, true positive rate) points
pub type NamedCurve = (String, Vec<(f64, f64)>);

/// ROC curves of every successfully evaluated model on the shared test split
pub fn roc_curves(report: &PipelineReport, config: &PipelineConfig) -> anyhow::Result<Vec<NamedCurve>> {
    let (_, y_test) = report.test_partition(config)?;
    let labels = y_test.to_vec();

    let mut curves = Vec::new();
    for variant in &report.evaluations {
        if let Ok(evaluation) = &variant.evaluation {
            curves.push((variant.variant.clone(), roc_curve(&labels, &evaluation.scores)?));
        }
    }
    Ok(curves)
}

/// Plot ROC curves against the chance diagonal
///
/// # Arguments
/// * `curves` - Model names with their ROC points
/// * `output_path` - Path to save the PNG plot
/// * `plot_title` - Title for the plot
pub fn create_roc_visualization(
    curves: &[NamedCurve],
    output_path: &str,
    plot_title: Option<&str>,
) -> anyhow::Result<()> {
    let title = plot_title.unwrap_or("Churn Models: ROC Curves on Held-out Customers");

    let root = BitMapBackend::new(output_path, (800, 600)).into_drawing_area();
    root.fill(&WHITE)?;

    let mut chart = ChartBuilder::on(&root)
        .caption(title, ("sans-serif", 30))
        .margin(10)
        .x_label_area_size(50)
        .y_label_area_size(60)
        .build_cartesian_2d(0f64..1f64, 0f64..1.05f64)?;

    chart
        .configure_mesh()
        .x_desc("False Positive Rate")
        .y_desc("True Positive Rate")
        .axis_desc_style(("sans-serif", 15))
        .draw()?;

    chart.draw_series(LineSeries::new(
        vec![(0.0, 0.0), (1.0, 1.0)],
        &BLACK.mix(0.3),
    ))?;

    for (i, (name, points)) in curves.iter().enumerate() {
        let color = MODEL_COLORS[i % MODEL_COLORS.len()];
        chart
            .draw_series(LineSeries::new(points.iter().copied(), color.stroke_width(2)))?
            .label(name.as_str())
            .legend(move |(x, y)| PathElement::new(vec![(x, y), (x + 20, y)], color));
    }

    chart
        .configure_series_labels()
        .background_style(WHITE.mix(0.8))
        .border_style(BLACK)
        .draw()?;

    root.present()?;
    println!("ROC curves saved to: {}", output_path);

    Ok(())
}

/// Bar chart of retained vs churned customers
pub fn create_class_balance_chart(
    table: &CustomerFeatureTable,
    output_path: &str,
) -> anyhow::Result<()> {
    let churned = table.rows().iter().filter(|r| r.churn).count();
    let counts = [table.len() - churned, churned];
    let max_count = counts.iter().copied().max().unwrap_or(1).max(1) as f64;

    let root = BitMapBackend::new(output_path, (600, 400)).into_drawing_area();
    root.fill(&WHITE)?;

    let mut chart = ChartBuilder::on(&root)
        .caption(
            format!("Churn Labels (threshold {} days)", table.churn_threshold_days()),
            ("sans-serif", 26),
        )
        .margin(10)
        .x_label_area_size(40)
        .y_label_area_size(50)
        .build_cartesian_2d(-0.5f64..1.5f64, 0f64..(max_count * 1.1))?;

    chart
        .configure_mesh()
        .x_desc("Label (0 = retained, 1 = churned)")
        .y_desc("Number of Customers")
        .axis_desc_style(("sans-serif", 15))
        .draw()?;

    for (label, &count) in counts.iter().enumerate() {
        let color = if label == 1 { &RED } else { &BLUE };
        chart.draw_series(std::iter::once(Rectangle::new(
            [(label as f64 - 0.4, 0.0), (label as f64 + 0.4, count as f64)],
            color.filled(),
        )))?;
    }

    root.present()?;
    println!("Class balance chart saved to: {}", output_path);

    Ok(())
}

/// Print model statistics to console
pub fn print_model_statistics(report: &PipelineReport) {
    let features = &report.features;
    println!("\n=== Customer Features ===");
    println!("Customers: {}", features.len());
    println!("Reference date: {}", features.reference_date());
    println!(
        "Churn rate: {:.1}% (threshold {} days)",
        features.churn_rate() * 100.0,
        features.churn_threshold_days()
    );

    println!("\n=== Models ===");
    println!("  Model                | Train AUC | Eval AUC");
    println!("  ---------------------|-----------|---------");
    for variant in &report.evaluations {
        let eval_auc = match &variant.evaluation {
            Ok(e) => format!("{:.4}", e.roc_auc),
            Err(_) => "n/a".to_string(),
        };
        println!("  {:20} | {:9.4} | {}", variant.variant, variant.train_auc, eval_auc);
    }

    for failure in &report.training.failures {
        println!("  {:20} | failed: {}", failure.variant, failure.error);
    }

    for variant in &report.evaluations {
        match &variant.evaluation {
            Ok(e) => {
                println!("\n--- {} ---", variant.variant);
                println!("{}", e.classification_report);
                print!("{}", e.confusion);
            }
            Err(err) => println!("\n--- {} --- evaluation failed: {}", variant.variant, err),
        }
    }
}

/// Generate the ROC plot and the class balance chart next to it
pub fn generate_visualization_report(
    report: &PipelineReport,
    config: &PipelineConfig,
    base_output_path: &str,
) -> anyhow::Result<()> {
    let curves = roc_curves(report, config)?;
    create_roc_visualization(&curves, base_output_path, None)?;

    let balance_chart_path = balance_chart_path(base_output_path);
    create_class_balance_chart(&report.features, &balance_chart_path)?;

    Ok(())
}

/// `roc.png` -> `roc_balance.png`, next to the ROC plot
fn balance_chart_path(base_output_path: &str) -> String {
    let base = Path::new(base_output_path);
    let stem = base
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "roc".to_string());
    let file_name = match base.extension() {
        Some(ext) => format!("{stem}_balance.{}", ext.to_string_lossy()),
        None => format!("{stem}_balance.png"),
    };
    base.with_file_name(file_name).to_string_lossy().into_owned()
}
