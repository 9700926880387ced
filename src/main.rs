//! ChurnForge: customer churn prediction from transaction logs
//!
//! This is the main entrypoint that orchestrates data loading, feature
//! aggregation, model training, evaluation and reporting.

use anyhow::{Context, Result};
use churnforge::tracking::open_sink;
use churnforge::{run_pipeline, viz, Args, CsvSource, RecordSource};
use clap::Parser;
use std::path::PathBuf;
use std::time::Instant;
use tracing::info;
use tracing_subscriber::EnvFilter;

const DEFAULT_INPUT: &str = "data.csv";

fn main() -> Result<()> {
    let args = Args::parse();

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        if args.verbose {
            EnvFilter::new("debug")
        } else {
            EnvFilter::new("info")
        }
    });
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let config = args.pipeline_config()?;
    let input = config
        .source
        .clone()
        .unwrap_or_else(|| PathBuf::from(DEFAULT_INPUT));

    println!("=== Churn Prediction Pipeline ===\n");
    let start_time = Instant::now();

    // Step 1: Load transactions
    let load_start = Instant::now();
    let records = CsvSource::new(&input)
        .records()
        .with_context(|| format!("failed to load transactions from {}", input.display()))?;
    info!(
        rows = records.len(),
        elapsed_ms = load_start.elapsed().as_millis() as u64,
        "Loaded input"
    );

    // Step 2: Clean, aggregate, train and evaluate
    let mut sink = open_sink(args.tracking_dir.as_deref());
    let report = run_pipeline(records, &config, sink.as_mut())?;

    let cleaning = &report.cleaning;
    println!(
        "✓ Cleaned {} rows: kept {}, dropped {} (missing customer {}, cancelled {}, quantity {}, price {})",
        cleaning.input_rows,
        cleaning.kept_rows,
        cleaning.dropped_rows(),
        cleaning.missing_customer,
        cleaning.cancelled,
        cleaning.non_positive_quantity,
        cleaning.non_positive_price
    );
    println!(
        "✓ Trained {} model(s) on {} customers ({} held out)",
        report.training.models.len(),
        report.features.len(),
        report.training.split.test.len()
    );

    viz::print_model_statistics(&report);

    // Step 3: Optional exports
    if let Some(path) = &args.features_out {
        report.features.write_csv(path)?;
        println!("\nFeature table saved to: {}", path.display());
    }
    if let Some(plot) = &args.plot {
        viz::generate_visualization_report(&report, &config, plot)?;
    }
    if let Some(dir) = args.tracking_dir.as_ref().filter(|d| d.is_dir()) {
        println!("Tracking runs saved to: {}", dir.display());
    }

    println!("\n=== Pipeline Complete ===");
    println!(
        "Total processing time: {:.2}s",
        start_time.elapsed().as_secs_f64()
    );

    Ok(())
}
