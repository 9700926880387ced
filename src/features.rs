//! Customer-level feature aggregation and churn labelling

use crate::config::FeatureColumn;
use crate::error::{ChurnError, Result};
use crate::source::TransactionRecord;
use chrono::{DateTime, NaiveDateTime};
use ndarray::{Array1, Array2};
use polars::prelude::*;
use std::path::Path;
use tracing::info;

/// Churn label policy: churned iff the customer has been silent for longer than the threshold
pub fn derive_churn(recency_days: i64, threshold_days: i64) -> bool {
    recency_days > threshold_days
}

/// Aggregated behaviour of one customer
#[derive(Debug, Clone, PartialEq)]
pub struct CustomerFeatureRow {
    pub customer_id: String,
    pub last_purchase_date: NaiveDateTime,
    /// Distinct invoices
    pub num_orders: usize,
    pub total_quantity: i64,
    /// Sum of per-line `quantity * unit_price`
    pub total_spent: f64,
    pub recency_days: i64,
    pub churn: bool,
}

impl CustomerFeatureRow {
    pub fn value(&self, column: FeatureColumn) -> f64 {
        match column {
            FeatureColumn::NumOrders => self.num_orders as f64,
            FeatureColumn::TotalQuantity => self.total_quantity as f64,
            FeatureColumn::TotalSpent => self.total_spent,
            FeatureColumn::RecencyDays => self.recency_days as f64,
            FeatureColumn::LastPurchaseDate => {
                self.last_purchase_date.and_utc().timestamp() as f64
            }
        }
    }
}

/// One row per customer, sorted by customer id
#[derive(Debug, Clone, PartialEq)]
pub struct CustomerFeatureTable {
    rows: Vec<CustomerFeatureRow>,
    reference_date: NaiveDateTime,
    churn_threshold_days: i64,
}

/// Build the customer feature table from cleaned transactions
///
/// The reference date is the latest timestamp across all transactions, so
/// recency is measured against one shared "now" for every customer.
pub fn build_customer_features(
    records: &[TransactionRecord],
    churn_threshold_days: i64,
) -> Result<CustomerFeatureTable> {
    if records.is_empty() {
        return Err(ChurnError::DataValidation(
            "no transactions survived cleaning".to_string(),
        ));
    }

    let transactions = transactions_frame(records)?;

    let reference_micros = transactions
        .clone()
        .lazy()
        .select([col("Timestamp").max()])
        .collect()?
        .column("Timestamp")?
        .i64()?
        .get(0)
        .ok_or_else(|| ChurnError::DataValidation("no transaction timestamps".to_string()))?;
    let reference_date = from_micros(reference_micros)?;

    let per_customer = transactions
        .lazy()
        .with_column((col("Quantity").cast(DataType::Float64) * col("UnitPrice")).alias("LineAmount"))
        .group_by([col("CustomerID")])
        .agg([
            col("Timestamp").max().alias("LastPurchase"),
            col("InvoiceNo").n_unique().cast(DataType::UInt64).alias("NumOrders"),
            col("Quantity").sum().alias("TotalQuantity"),
            // per-line amounts, never sum(quantity) * sum(price)
            col("LineAmount").sum().alias("TotalSpent"),
        ])
        .sort(["CustomerID"], SortMultipleOptions::default())
        .collect()?;

    let ids = per_customer.column("CustomerID")?.str()?;
    let last_purchase = per_customer.column("LastPurchase")?.i64()?;
    let num_orders = per_customer.column("NumOrders")?.u64()?;
    let total_quantity = per_customer.column("TotalQuantity")?.i64()?;
    let total_spent = per_customer.column("TotalSpent")?.f64()?;

    let mut rows = Vec::with_capacity(per_customer.height());
    for idx in 0..per_customer.height() {
        let missing = || ChurnError::DataValidation(format!("incomplete aggregate in row {idx}"));
        let last_purchase_date = from_micros(last_purchase.get(idx).ok_or_else(missing)?)?;
        let recency_days = (reference_date - last_purchase_date).num_days();
        rows.push(CustomerFeatureRow {
            customer_id: ids.get(idx).ok_or_else(missing)?.to_string(),
            last_purchase_date,
            num_orders: num_orders.get(idx).ok_or_else(missing)? as usize,
            total_quantity: total_quantity.get(idx).ok_or_else(missing)?,
            total_spent: total_spent.get(idx).ok_or_else(missing)?,
            recency_days,
            churn: derive_churn(recency_days, churn_threshold_days),
        });
    }

    let table = CustomerFeatureTable {
        rows,
        reference_date,
        churn_threshold_days,
    };
    info!(
        customers = table.len(),
        reference_date = %reference_date,
        churn_rate = table.churn_rate(),
        "Built customer feature table"
    );
    Ok(table)
}

/// Cleaned transactions as a frame; timestamps in epoch microseconds
fn transactions_frame(records: &[TransactionRecord]) -> Result<DataFrame> {
    let mut customers = Vec::with_capacity(records.len());
    for record in records {
        let customer_id = record.customer_id.as_deref().ok_or_else(|| {
            ChurnError::DataValidation(format!(
                "invoice {} has no customer id; clean records before aggregating",
                record.invoice_id
            ))
        })?;
        customers.push(customer_id);
    }
    let invoices: Vec<&str> = records.iter().map(|r| r.invoice_id.as_str()).collect();
    let quantities: Vec<i64> = records.iter().map(|r| r.quantity).collect();
    let prices: Vec<f64> = records.iter().map(|r| r.unit_price).collect();
    let timestamps: Vec<i64> = records
        .iter()
        .map(|r| r.timestamp.and_utc().timestamp_micros())
        .collect();

    Ok(DataFrame::new(vec![
        Series::new("CustomerID", customers),
        Series::new("InvoiceNo", invoices),
        Series::new("Quantity", quantities),
        Series::new("UnitPrice", prices),
        Series::new("Timestamp", timestamps),
    ])?)
}

fn from_micros(micros: i64) -> Result<NaiveDateTime> {
    DateTime::from_timestamp_micros(micros)
        .map(|dt| dt.naive_utc())
        .ok_or_else(|| ChurnError::DataValidation(format!("timestamp {micros} out of range")))
}

impl CustomerFeatureTable {
    pub fn rows(&self) -> &[CustomerFeatureRow] {
        &self.rows
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn reference_date(&self) -> NaiveDateTime {
        self.reference_date
    }

    pub fn churn_threshold_days(&self) -> i64 {
        self.churn_threshold_days
    }

    pub fn get(&self, customer_id: &str) -> Option<&CustomerFeatureRow> {
        self.rows
            .binary_search_by(|row| row.customer_id.as_str().cmp(customer_id))
            .ok()
            .map(|idx| &self.rows[idx])
    }

    /// Share of churned customers
    pub fn churn_rate(&self) -> f64 {
        if self.rows.is_empty() {
            return 0.0;
        }
        self.rows.iter().filter(|r| r.churn).count() as f64 / self.rows.len() as f64
    }

    /// Model input matrix in `columns` order; leaking columns are refused
    pub fn feature_matrix(&self, columns: &[FeatureColumn]) -> Result<Array2<f64>> {
        FeatureColumn::guard(columns)?;
        let data: Vec<f64> = self
            .rows
            .iter()
            .flat_map(|row| columns.iter().map(move |&c| row.value(c)))
            .collect();
        Array2::from_shape_vec((self.rows.len(), columns.len()), data)
            .map_err(|e| ChurnError::DataValidation(e.to_string()))
    }

    /// 0/1 churn labels aligned with `feature_matrix` rows
    pub fn labels(&self) -> Array1<usize> {
        self.rows.iter().map(|r| usize::from(r.churn)).collect()
    }

    /// Sub-table of the rows at `indices`, keeping reference date and threshold
    pub fn select_rows(&self, indices: &[usize]) -> Result<CustomerFeatureTable> {
        let rows = indices
            .iter()
            .map(|&i| {
                self.rows.get(i).cloned().ok_or_else(|| {
                    ChurnError::DataValidation(format!(
                        "row index {i} out of range for {} customers",
                        self.rows.len()
                    ))
                })
            })
            .collect::<Result<Vec<_>>>()?;
        Ok(CustomerFeatureTable {
            rows,
            reference_date: self.reference_date,
            churn_threshold_days: self.churn_threshold_days,
        })
    }

    /// Export for auditing
    pub fn write_csv(&self, path: &Path) -> Result<()> {
        let ids: Vec<&str> = self.rows.iter().map(|r| r.customer_id.as_str()).collect();
        let last_purchase: Vec<String> = self
            .rows
            .iter()
            .map(|r| r.last_purchase_date.format("%Y-%m-%dT%H:%M:%S").to_string())
            .collect();
        let num_orders: Vec<u64> = self.rows.iter().map(|r| r.num_orders as u64).collect();
        let total_quantity: Vec<i64> = self.rows.iter().map(|r| r.total_quantity).collect();
        let total_spent: Vec<f64> = self.rows.iter().map(|r| r.total_spent).collect();
        let recency: Vec<i64> = self.rows.iter().map(|r| r.recency_days).collect();
        let churn: Vec<u32> = self.rows.iter().map(|r| u32::from(r.churn)).collect();

        let mut df = DataFrame::new(vec![
            Series::new("customer_id", ids),
            Series::new("last_purchase_date", last_purchase),
            Series::new("num_orders", num_orders),
            Series::new("total_quantity", total_quantity),
            Series::new("total_spent", total_spent),
            Series::new("recency_days", recency),
            Series::new("churn", churn),
        ])?;

        let mut file = std::fs::File::create(path)?;
        CsvWriter::new(&mut file).include_header(true).finish(&mut df)?;
        info!(path = %path.display(), customers = self.len(), "Wrote feature table");
        Ok(())
    }
}
