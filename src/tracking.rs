//! Experiment tracking sinks
//!
//! The trainer reports one run per model variant: parameters, the held-out
//! AUC and a model snapshot. Sinks are best-effort observers; the in-memory
//! training results never depend on them.

use crate::estimator::Estimator;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// Errors from tracking operations
#[derive(Debug, thiserror::Error)]
pub enum TrackingError {
    #[error("Run not found: {0}")]
    RunNotFound(u64),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),
}

pub type TrackingResult<T> = std::result::Result<T, TrackingError>;

/// Handle to an open run
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunHandle {
    pub id: u64,
    pub name: String,
}

/// Everything logged for one run
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RunRecord {
    pub id: u64,
    pub name: String,
    pub params: BTreeMap<String, String>,
    pub metrics: BTreeMap<String, f64>,
    pub model: Option<serde_json::Value>,
    pub finished: bool,
}

/// Destination for experiment runs
pub trait TrackingSink {
    fn begin_run(&mut self, name: &str) -> TrackingResult<RunHandle>;

    fn log_param(&mut self, run: &RunHandle, key: &str, value: &str) -> TrackingResult<()>;

    fn log_metric(&mut self, run: &RunHandle, key: &str, value: f64) -> TrackingResult<()>;

    fn log_model(&mut self, run: &RunHandle, model: &dyn Estimator) -> TrackingResult<()>;

    fn end_run(&mut self, run: RunHandle) -> TrackingResult<()>;
}

/// Discards everything
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopSink {
    next_id: u64,
}

impl TrackingSink for NoopSink {
    fn begin_run(&mut self, name: &str) -> TrackingResult<RunHandle> {
        self.next_id += 1;
        Ok(RunHandle {
            id: self.next_id,
            name: name.to_string(),
        })
    }

    fn log_param(&mut self, _run: &RunHandle, _key: &str, _value: &str) -> TrackingResult<()> {
        Ok(())
    }

    fn log_metric(&mut self, _run: &RunHandle, _key: &str, _value: f64) -> TrackingResult<()> {
        Ok(())
    }

    fn log_model(&mut self, _run: &RunHandle, _model: &dyn Estimator) -> TrackingResult<()> {
        Ok(())
    }

    fn end_run(&mut self, _run: RunHandle) -> TrackingResult<()> {
        Ok(())
    }
}

/// Keeps runs in memory, in the order they were started
#[derive(Debug, Default, Clone)]
pub struct InMemorySink {
    runs: Vec<RunRecord>,
}

impl InMemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn runs(&self) -> &[RunRecord] {
        &self.runs
    }

    pub fn run_by_name(&self, name: &str) -> Option<&RunRecord> {
        self.runs.iter().find(|r| r.name == name)
    }

    fn run_mut(&mut self, run: &RunHandle) -> TrackingResult<&mut RunRecord> {
        self.runs
            .iter_mut()
            .find(|r| r.id == run.id)
            .ok_or(TrackingError::RunNotFound(run.id))
    }
}

impl TrackingSink for InMemorySink {
    fn begin_run(&mut self, name: &str) -> TrackingResult<RunHandle> {
        let id = self.runs.len() as u64 + 1;
        self.runs.push(RunRecord {
            id,
            name: name.to_string(),
            ..RunRecord::default()
        });
        Ok(RunHandle {
            id,
            name: name.to_string(),
        })
    }

    fn log_param(&mut self, run: &RunHandle, key: &str, value: &str) -> TrackingResult<()> {
        self.run_mut(run)?
            .params
            .insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn log_metric(&mut self, run: &RunHandle, key: &str, value: f64) -> TrackingResult<()> {
        self.run_mut(run)?.metrics.insert(key.to_string(), value);
        Ok(())
    }

    fn log_model(&mut self, run: &RunHandle, model: &dyn Estimator) -> TrackingResult<()> {
        self.run_mut(run)?.model = Some(model.snapshot());
        Ok(())
    }

    fn end_run(&mut self, run: RunHandle) -> TrackingResult<()> {
        self.run_mut(&run)?.finished = true;
        Ok(())
    }
}

/// Writes each finished run to `<dir>/<name>-<id>.json`
#[derive(Debug)]
pub struct JsonDirSink {
    dir: PathBuf,
    pending: InMemorySink,
}

impl JsonDirSink {
    pub fn new(dir: impl AsRef<Path>) -> TrackingResult<Self> {
        let dir = dir.as_ref().to_path_buf();
        fs::create_dir_all(&dir)?;
        Ok(Self {
            dir,
            pending: InMemorySink::new(),
        })
    }

    pub fn run_path(&self, run: &RunHandle) -> PathBuf {
        self.dir.join(format!("{}-{}.json", run.name, run.id))
    }
}

impl TrackingSink for JsonDirSink {
    fn begin_run(&mut self, name: &str) -> TrackingResult<RunHandle> {
        self.pending.begin_run(name)
    }

    fn log_param(&mut self, run: &RunHandle, key: &str, value: &str) -> TrackingResult<()> {
        self.pending.log_param(run, key, value)
    }

    fn log_metric(&mut self, run: &RunHandle, key: &str, value: f64) -> TrackingResult<()> {
        self.pending.log_metric(run, key, value)
    }

    fn log_model(&mut self, run: &RunHandle, model: &dyn Estimator) -> TrackingResult<()> {
        self.pending.log_model(run, model)
    }

    fn end_run(&mut self, run: RunHandle) -> TrackingResult<()> {
        let path = self.run_path(&run);
        self.pending.end_run(run.clone())?;
        let record = self.pending.run_mut(&run)?;
        fs::write(&path, serde_json::to_string_pretty(record)?)?;
        debug!(path = %path.display(), "Wrote tracking run");
        Ok(())
    }
}

/// JSON runs under `dir` when given, otherwise discard
///
/// A directory that cannot be created disables tracking with a warning
/// instead of failing the caller.
pub fn open_sink(dir: Option<&Path>) -> Box<dyn TrackingSink> {
    match dir.map(JsonDirSink::new) {
        Some(Ok(sink)) => Box::new(sink),
        Some(Err(e)) => {
            warn!(error = %e, "Tracking disabled: cannot open run directory");
            Box::new(NoopSink::default())
        }
        None => Box::new(NoopSink::default()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::EstimatorSpec;
    use crate::estimator::build_estimator;

    #[test]
    fn test_in_memory_sink_records_run() {
        let mut sink = InMemorySink::new();
        let run = sink.begin_run("logistic_regression").unwrap();
        sink.log_param(&run, "model_type", "logistic_regression").unwrap();
        sink.log_metric(&run, "roc_auc", 0.75).unwrap();
        let model = build_estimator(&EstimatorSpec::DecisionTree { max_depth: None });
        sink.log_model(&run, model.as_ref()).unwrap();
        sink.end_run(run).unwrap();

        let record = sink.run_by_name("logistic_regression").unwrap();
        assert_eq!(record.params["model_type"], "logistic_regression");
        assert_eq!(record.metrics["roc_auc"], 0.75);
        assert!(record.model.is_some());
        assert!(record.finished);
    }

    #[test]
    fn test_unknown_run_is_error() {
        let mut sink = InMemorySink::new();
        let stray = RunHandle {
            id: 9,
            name: "ghost".to_string(),
        };
        assert!(matches!(
            sink.log_metric(&stray, "roc_auc", 0.5),
            Err(TrackingError::RunNotFound(9))
        ));
    }

    #[test]
    fn test_json_dir_sink_writes_file() {
        let dir = tempfile::tempdir().unwrap();
        let mut sink = JsonDirSink::new(dir.path().join("runs")).unwrap();
        let run = sink.begin_run("random_forest").unwrap();
        let path = sink.run_path(&run);
        sink.log_param(&run, "n_estimators", "200").unwrap();
        sink.log_metric(&run, "roc_auc", 0.81).unwrap();
        sink.end_run(run).unwrap();

        let text = std::fs::read_to_string(path).unwrap();
        let record: RunRecord = serde_json::from_str(&text).unwrap();
        assert_eq!(record.name, "random_forest");
        assert_eq!(record.params["n_estimators"], "200");
        assert!(record.finished);
    }

    #[test]
    fn test_unusable_directory_falls_back_to_noop() {
        let blocker = tempfile::NamedTempFile::new().unwrap();
        let dir = blocker.path().join("runs");

        let mut sink = open_sink(Some(dir.as_path()));
        let run = sink.begin_run("logistic_regression").unwrap();
        sink.log_metric(&run, "roc_auc", 0.7).unwrap();
        sink.end_run(run).unwrap();
        assert!(!dir.exists());
    }

    #[test]
    fn test_open_sink_writes_into_directory() {
        let dir = tempfile::tempdir().unwrap();
        let mut sink = open_sink(Some(dir.path()));
        let run = sink.begin_run("forest").unwrap();
        sink.end_run(run).unwrap();
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 1);
    }

    #[test]
    fn test_noop_sink_accepts_everything() {
        let mut sink = NoopSink::default();
        let run = sink.begin_run("x").unwrap();
        assert!(sink.log_metric(&run, "roc_auc", 1.0).is_ok());
        assert!(sink.end_run(run).is_ok());
    }
}
