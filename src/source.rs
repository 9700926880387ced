//! Transaction records and the CSV record source

use crate::error::{ChurnError, Result};
use chrono::{DateTime, NaiveDateTime};
use polars::prelude::*;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// One order line as read from the source
#[derive(Debug, Clone, PartialEq)]
pub struct TransactionRecord {
    pub invoice_id: String,
    pub customer_id: Option<String>,
    pub quantity: i64,
    pub unit_price: f64,
    pub timestamp: NaiveDateTime,
}

impl TransactionRecord {
    /// Amount billed for this line
    pub fn line_amount(&self) -> f64 {
        self.quantity as f64 * self.unit_price
    }
}

/// Anything that can produce an ordered batch of transactions
pub trait RecordSource {
    fn records(&self) -> Result<Vec<TransactionRecord>>;
}

impl RecordSource for Vec<TransactionRecord> {
    fn records(&self) -> Result<Vec<TransactionRecord>> {
        Ok(self.clone())
    }
}

const INVOICE_COLUMN: &str = "InvoiceNo";
const QUANTITY_COLUMN: &str = "Quantity";
const DATE_COLUMN: &str = "InvoiceDate";
const PRICE_COLUMN: &str = "UnitPrice";
const CUSTOMER_COLUMN: &str = "CustomerID";

/// Online Retail CSV export read through Polars
#[derive(Debug, Clone)]
pub struct CsvSource {
    path: PathBuf,
}

impl CsvSource {
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl RecordSource for CsvSource {
    fn records(&self) -> Result<Vec<TransactionRecord>> {
        // Every column is read as text so ids keep their exact spelling
        let df = LazyCsvReader::new(&self.path)
            .with_has_header(true)
            .with_infer_schema_length(Some(0))
            .finish()?
            .collect()?;

        debug!(path = %self.path.display(), rows = df.height(), "Read transaction CSV");

        let invoices = text_column(&df, INVOICE_COLUMN)?;
        let quantities = text_column(&df, QUANTITY_COLUMN)?;
        let dates = text_column(&df, DATE_COLUMN)?;
        let prices = text_column(&df, PRICE_COLUMN)?;
        let customers = text_column(&df, CUSTOMER_COLUMN)?;

        let mut records = Vec::with_capacity(df.height());
        for row in 0..df.height() {
            let line = row + 2; // header is line 1
            let invoice_id = required(invoices[row], INVOICE_COLUMN, line)?.trim().to_string();
            let quantity = parse_quantity(required(quantities[row], QUANTITY_COLUMN, line)?)
                .ok_or_else(|| invalid(QUANTITY_COLUMN, line, quantities[row]))?;
            let unit_price = required(prices[row], PRICE_COLUMN, line)?
                .trim()
                .parse::<f64>()
                .map_err(|_| invalid(PRICE_COLUMN, line, prices[row]))?;
            let timestamp = parse_timestamp(required(dates[row], DATE_COLUMN, line)?)
                .ok_or_else(|| invalid(DATE_COLUMN, line, dates[row]))?;

            records.push(TransactionRecord {
                invoice_id,
                customer_id: customers[row].and_then(normalize_customer_id),
                quantity,
                unit_price,
                timestamp,
            });
        }

        info!(path = %self.path.display(), records = records.len(), "Loaded transactions");
        Ok(records)
    }
}

fn text_column<'a>(df: &'a DataFrame, name: &str) -> Result<Vec<Option<&'a str>>> {
    let column = df.column(name).map_err(|_| {
        ChurnError::DataValidation(format!("missing required column '{name}'"))
    })?;
    let values = column
        .str()
        .map_err(|_| ChurnError::DataValidation(format!("column '{name}' is not text")))?;
    Ok(values.into_iter().collect())
}

fn required<'a>(value: Option<&'a str>, column: &str, line: usize) -> Result<&'a str> {
    value.ok_or_else(|| {
        ChurnError::DataValidation(format!("line {line}: missing value for '{column}'"))
    })
}

fn invalid(column: &str, line: usize, value: Option<&str>) -> ChurnError {
    ChurnError::DataValidation(format!(
        "line {line}: invalid {column} value '{}'",
        value.unwrap_or_default()
    ))
}

fn parse_quantity(raw: &str) -> Option<i64> {
    let raw = raw.trim();
    raw.parse::<i64>().ok().or_else(|| {
        raw.parse::<f64>()
            .ok()
            .filter(|v| v.fract() == 0.0 && v.is_finite())
            .map(|v| v as i64)
    })
}

/// Spreadsheet exports write numeric ids as `17850.0`
fn normalize_customer_id(raw: &str) -> Option<String> {
    let raw = raw.trim();
    if raw.is_empty() {
        return None;
    }
    match raw.strip_suffix(".0") {
        Some(stem) if !stem.is_empty() && stem.chars().all(|c| c.is_ascii_digit()) => {
            Some(stem.to_string())
        }
        _ => Some(raw.to_string()),
    }
}

const TIMESTAMP_FORMATS: [&str; 5] = [
    "%Y-%m-%dT%H:%M:%S",
    "%Y-%m-%dT%H:%M",
    "%Y-%m-%d %H:%M:%S",
    "%Y-%m-%d %H:%M",
    "%m/%d/%Y %H:%M",
];

/// Parse the timestamp layouts found in retail exports
pub fn parse_timestamp(raw: &str) -> Option<NaiveDateTime> {
    let raw = raw.trim();
    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return Some(dt.naive_utc());
    }
    TIMESTAMP_FORMATS
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(raw, fmt).ok())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn create_test_csv() -> NamedTempFile {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, "InvoiceNo,StockCode,Description,Quantity,InvoiceDate,UnitPrice,CustomerID,Country").unwrap();
        writeln!(file, "536365,85123A,WHITE HANGING HEART T-LIGHT HOLDER,6,2010-12-01T08:26:00Z,2.55,17850,United Kingdom").unwrap();
        writeln!(file, "C536379,D,Discount,-1,12/1/2010 9:41,27.50,14527.0,United Kingdom").unwrap();
        writeln!(file, "536414,22139,,56,2010-12-01 11:52:00,0,,United Kingdom").unwrap();
        file
    }

    #[test]
    fn test_csv_source_reads_all_rows() {
        let file = create_test_csv();
        let records = CsvSource::new(file.path()).records().unwrap();
        assert_eq!(records.len(), 3);

        assert_eq!(records[0].invoice_id, "536365");
        assert_eq!(records[0].customer_id.as_deref(), Some("17850"));
        assert_eq!(records[0].quantity, 6);

        assert_eq!(records[1].invoice_id, "C536379");
        assert_eq!(records[1].customer_id.as_deref(), Some("14527"));
        assert_eq!(records[1].quantity, -1);
        assert_eq!(
            records[1].timestamp,
            NaiveDate::from_ymd_opt(2010, 12, 1)
                .unwrap()
                .and_hms_opt(9, 41, 0)
                .unwrap()
        );

        assert_eq!(records[2].customer_id, None);
        assert_eq!(records[2].unit_price, 0.0);
    }

    #[test]
    fn test_missing_column_is_validation_error() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, "InvoiceNo,Quantity,InvoiceDate,UnitPrice").unwrap();
        writeln!(file, "536365,6,2010-12-01T08:26:00,2.55").unwrap();

        let result = CsvSource::new(file.path()).records();
        assert!(matches!(result, Err(ChurnError::DataValidation(msg)) if msg.contains("CustomerID")));
    }

    #[test]
    fn test_mistyped_quantity_is_validation_error() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, "InvoiceNo,Quantity,InvoiceDate,UnitPrice,CustomerID").unwrap();
        writeln!(file, "536365,six,2010-12-01T08:26:00,2.55,17850").unwrap();

        let result = CsvSource::new(file.path()).records();
        assert!(matches!(result, Err(ChurnError::DataValidation(msg)) if msg.contains("line 2")));
    }

    #[test]
    fn test_parse_timestamp_formats() {
        assert!(parse_timestamp("2011-12-09T12:50:00Z").is_some());
        assert!(parse_timestamp("2011-12-09T12:50").is_some());
        assert!(parse_timestamp("2011-12-09 12:50:00").is_some());
        assert!(parse_timestamp("12/9/2011 12:50").is_some());
        assert!(parse_timestamp("yesterday").is_none());
    }

    #[test]
    fn test_line_amount() {
        let record = TransactionRecord {
            invoice_id: "1".to_string(),
            customer_id: Some("1".to_string()),
            quantity: 3,
            unit_price: 2.5,
            timestamp: NaiveDate::from_ymd_opt(2011, 1, 1)
                .unwrap()
                .and_hms_opt(0, 0, 0)
                .unwrap(),
        };
        assert_eq!(record.line_amount(), 7.5);
    }
}
