//! Command-line interface definitions and argument parsing

use crate::config::PipelineConfig;
use crate::error::Result;
use clap::Parser;
use std::path::PathBuf;

/// Churn prediction CLI: customer features, classifiers, held-out metrics
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Args {
    /// Path to the transaction CSV (overrides the config file source)
    #[arg(short, long)]
    pub input: Option<PathBuf>,

    /// JSON pipeline configuration; omitted fields take defaults
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Days without purchase after which a customer is labelled churned
    #[arg(long)]
    pub churn_threshold: Option<i64>,

    /// Fraction of customers held out for evaluation
    #[arg(long)]
    pub test_fraction: Option<f64>,

    /// Seed for the train/test split
    #[arg(long)]
    pub seed: Option<u64>,

    /// Fit every model on raw, unscaled features
    #[arg(long)]
    pub no_scale: bool,

    /// Write one JSON tracking record per trained model into this directory
    #[arg(long)]
    pub tracking_dir: Option<PathBuf>,

    /// Output path for the ROC curve plot
    /// Example: --plot roc.png also writes roc_balance.png
    #[arg(short, long)]
    pub plot: Option<String>,

    /// Export the customer feature table as CSV
    #[arg(long)]
    pub features_out: Option<PathBuf>,

    /// Enable verbose output
    #[arg(short, long)]
    pub verbose: bool,
}

impl Args {
    /// Merge the optional config file with command-line overrides
    pub fn pipeline_config(&self) -> Result<PipelineConfig> {
        let mut config = match &self.config {
            Some(path) => PipelineConfig::from_json_file(path)?,
            None => PipelineConfig::default(),
        };

        if let Some(input) = &self.input {
            config.source = Some(input.clone());
        }
        if let Some(days) = self.churn_threshold {
            config.churn_threshold_days = days;
        }
        if let Some(fraction) = self.test_fraction {
            config.training.split.test_fraction = fraction;
        }
        if let Some(seed) = self.seed {
            config.training.split.seed = seed;
        }
        if self.no_scale {
            config.training.scale_features = false;
        }

        config.validate()?;
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn args(extra: &[&str]) -> Args {
        let mut argv = vec!["churnforge"];
        argv.extend_from_slice(extra);
        Args::parse_from(argv)
    }

    #[test]
    fn test_defaults_without_flags() {
        let config = args(&[]).pipeline_config().unwrap();
        assert_eq!(config, PipelineConfig::default());
    }

    #[test]
    fn test_flags_override_config_file() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(
            file,
            r#"{{"source": "from_file.csv", "churn_threshold_days": 30, "training": {{"split": {{"seed": 1}}}}}}"#
        )
        .unwrap();
        let path = file.path().to_str().unwrap();

        let config = args(&["-c", path, "--seed", "7", "--no-scale", "-i", "retail.csv"])
            .pipeline_config()
            .unwrap();
        assert_eq!(config.source, Some(PathBuf::from("retail.csv")));
        assert_eq!(config.churn_threshold_days, 30);
        assert_eq!(config.training.split.seed, 7);
        assert!(!config.training.scale_features);
    }

    #[test]
    fn test_invalid_override_rejected() {
        assert!(args(&["--test-fraction", "1.5"]).pipeline_config().is_err());
        assert!(args(&["--churn-threshold=-5"]).pipeline_config().is_err());
    }
}
