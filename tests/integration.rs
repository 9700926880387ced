//! Integration tests for ChurnForge

use chrono::{Duration, NaiveDate, NaiveDateTime};
use churnforge::tracking::{InMemorySink, JsonDirSink, NoopSink, RunRecord};
use churnforge::{
    build_customer_features, build_estimator, clean_records, evaluate_estimator, run_pipeline,
    train_models, ChurnError, CsvSource, EstimatorSpec, FeatureColumn, PipelineConfig,
    RecordSource, TransactionRecord,
};
use std::io::Write;
use tempfile::NamedTempFile;

/// Create a test CSV file with sample data
fn create_test_csv() -> NamedTempFile {
    let mut file = NamedTempFile::new().unwrap();
    writeln!(
        file,
        "InvoiceNo,StockCode,Description,Quantity,InvoiceDate,UnitPrice,CustomerID,Country"
    )
    .unwrap();

    // 40 customers: even ids stopped buying in early 2011, odd ids are active
    for c in 0..40u32 {
        let customer = 12_000 + c;
        if c % 2 == 0 {
            writeln!(
                file,
                "{},22752,SET 7 BABUSHKA NESTING BOXES,{},2011-0{}-0{}T10:15:00,7.65,{},United Kingdom",
                540_000 + c,
                1 + c % 3,
                1 + c % 6,
                1 + c % 9,
                customer
            )
            .unwrap();
        } else {
            for o in 0..(2 + c % 5) {
                writeln!(
                    file,
                    "{},85123A,WHITE HANGING HEART T-LIGHT HOLDER,{},2011-11-{:02}T08:26:00,2.55,{},United Kingdom",
                    560_000 + c * 10 + o,
                    4 + o,
                    1 + (c + o) % 28,
                    customer
                )
                .unwrap();
            }
        }
    }

    // Rows the cleaner must drop
    writeln!(file, "C536379,D,Discount,-1,2011-12-01T09:41:00,27.50,12001,United Kingdom").unwrap();
    writeln!(file, "536414,22139,,56,2011-12-01T11:52:00,0,,United Kingdom").unwrap();
    writeln!(file, "536415,22140,FREE GIFT,3,2011-12-01T11:53:00,0,12003,United Kingdom").unwrap();

    file
}

fn day(n: i64) -> NaiveDateTime {
    NaiveDate::from_ymd_opt(2011, 1, 1)
        .unwrap()
        .and_hms_opt(0, 0, 0)
        .unwrap()
        + Duration::days(n)
}

fn line(invoice: &str, customer: &str, quantity: i64, price: f64, at: i64) -> TransactionRecord {
    TransactionRecord {
        invoice_id: invoice.to_string(),
        customer_id: Some(customer.to_string()),
        quantity,
        unit_price: price,
        timestamp: day(at),
    }
}

#[test]
fn test_end_to_end_pipeline() {
    let test_file = create_test_csv();
    let records = CsvSource::new(test_file.path()).records().unwrap();
    assert_eq!(records.len(), 20 + (1..40).step_by(2).map(|c| 2 + c % 5).sum::<u32>() as usize + 3);

    let config = PipelineConfig::default();
    let mut sink = InMemorySink::new();
    let report = run_pipeline(records, &config, &mut sink).unwrap();

    assert_eq!(report.cleaning.dropped_rows(), 3);
    assert_eq!(report.features.len(), 40);
    assert!((report.features.churn_rate() - 0.5).abs() < 1e-12);
    assert_eq!(report.training.split.test.len(), 8);

    assert_eq!(report.evaluations.len(), 2);
    for eval in &report.evaluations {
        let evaluation = eval.evaluation.as_ref().unwrap();
        assert!((0.0..=1.0).contains(&evaluation.roc_auc));
        assert_eq!(evaluation.roc_auc, eval.train_auc);
    }

    let runs = sink.runs();
    assert_eq!(runs.len(), 2);
    assert!(runs.iter().all(|r| r.metrics.contains_key("roc_auc") && r.model.is_some()));
}

#[test]
fn test_tiny_dataset_scenario() {
    // Customer A: three purchases over 100 days; customer B: one purchase 10 days before the end
    let records = vec![
        line("1001", "A", 2, 10.0, 0),
        line("1002", "A", 1, 5.0, 50),
        line("1003", "A", 4, 2.5, 100),
        line("1004", "B", 3, 5.0, 90),
    ];
    let table = build_customer_features(&clean_records(records), 90).unwrap();

    assert_eq!(table.reference_date(), day(100));
    let a = table.get("A").unwrap();
    assert_eq!(a.recency_days, 0);
    assert_eq!(a.num_orders, 3);
    assert!(!a.churn);
    let b = table.get("B").unwrap();
    assert_eq!(b.recency_days, 10);
    assert!(!b.churn);

    // single-class held-out labels make ROC-AUC undefined
    let x = table.feature_matrix(&FeatureColumn::DEFAULT_FEATURES).unwrap();
    let y = table.labels();
    let mut model = build_estimator(&EstimatorSpec::DecisionTree { max_depth: Some(2) });
    model
        .fit(
            &ndarray::array![[1.0, 1.0, 5.0], [4.0, 12.0, 60.0], [1.0, 2.0, 9.0], [5.0, 20.0, 90.0]],
            &ndarray::array![1, 0, 1, 0],
        )
        .unwrap();
    let result = evaluate_estimator(model.as_ref(), &x, &y);
    assert!(matches!(
        result,
        Err(ChurnError::InsufficientClassDiversity { class: 0 })
    ));

    // no variant can learn from a single class
    let result = train_models(&table, &PipelineConfig::default().training, &mut NoopSink::default());
    assert!(matches!(result, Err(ChurnError::AllVariantsFailed(2))));
}

#[test]
fn test_total_spent_is_sum_of_line_amounts() {
    let records = vec![line("1", "A", 2, 10.0, 0), line("2", "A", 3, 5.0, 1)];
    let table = build_customer_features(&records, 90).unwrap();
    let row = table.get("A").unwrap();
    assert_eq!(row.total_spent, 35.0);
    assert_ne!(row.total_spent, 75.0);
}

#[test]
fn test_recency_threshold_labels() {
    let records = vec![line("1", "A", 1, 1.0, 5), line("2", "B", 1, 1.0, 100)];
    let table = build_customer_features(&records, 90).unwrap();
    let a = table.get("A").unwrap();
    assert_eq!(a.recency_days, 95);
    assert!(a.churn);
}

#[test]
fn test_determinism_under_fixed_seed() {
    let test_file = create_test_csv();
    let config = PipelineConfig::default();

    let first = run_pipeline(
        CsvSource::new(test_file.path()).records().unwrap(),
        &config,
        &mut NoopSink::default(),
    )
    .unwrap();
    let second = run_pipeline(
        CsvSource::new(test_file.path()).records().unwrap(),
        &config,
        &mut NoopSink::default(),
    )
    .unwrap();

    assert_eq!(first.features, second.features);
    assert_eq!(first.training.split, second.training.split);
}

#[test]
fn test_leakage_guard_in_pipeline_config() {
    let test_file = create_test_csv();
    let mut config = PipelineConfig::default();
    config.training.features = vec![FeatureColumn::NumOrders, FeatureColumn::LastPurchaseDate];

    let result = run_pipeline(
        CsvSource::new(test_file.path()).records().unwrap(),
        &config,
        &mut NoopSink::default(),
    );
    assert!(matches!(result, Err(ChurnError::LeakageGuard { column }) if column == "last_purchase_date"));
}

#[test]
fn test_json_tracking_runs_written() {
    let test_file = create_test_csv();
    let dir = tempfile::tempdir().unwrap();
    let mut sink = JsonDirSink::new(dir.path()).unwrap();

    run_pipeline(
        CsvSource::new(test_file.path()).records().unwrap(),
        &PipelineConfig::default(),
        &mut sink,
    )
    .unwrap();

    let mut names: Vec<String> = std::fs::read_dir(dir.path())
        .unwrap()
        .map(|entry| {
            let text = std::fs::read_to_string(entry.unwrap().path()).unwrap();
            serde_json::from_str::<RunRecord>(&text).unwrap().name
        })
        .collect();
    names.sort();
    assert_eq!(names, vec!["logistic_regression", "random_forest"]);
}
