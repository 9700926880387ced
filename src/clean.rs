//! Record cleaning: keep only valid, non-cancelled order lines

use crate::source::TransactionRecord;
use tracing::{debug, info};

/// Invoices starting with this character are cancellations
pub const CANCELLATION_MARKER: char = 'C';

/// Why a record was dropped
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DropReason {
    MissingCustomer,
    Cancelled,
    NonPositiveQuantity,
    NonPositivePrice,
}

/// Counts collected while cleaning
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CleaningSummary {
    pub input_rows: usize,
    pub kept_rows: usize,
    pub missing_customer: usize,
    pub cancelled: usize,
    pub non_positive_quantity: usize,
    pub non_positive_price: usize,
}

impl CleaningSummary {
    pub fn dropped_rows(&self) -> usize {
        self.input_rows - self.kept_rows
    }

    fn record_drop(&mut self, reason: DropReason) {
        match reason {
            DropReason::MissingCustomer => self.missing_customer += 1,
            DropReason::Cancelled => self.cancelled += 1,
            DropReason::NonPositiveQuantity => self.non_positive_quantity += 1,
            DropReason::NonPositivePrice => self.non_positive_price += 1,
        }
    }
}

/// Whether an invoice id denotes a cancellation
pub fn is_cancellation(invoice_id: &str) -> bool {
    invoice_id.starts_with(CANCELLATION_MARKER)
}

/// First failed check for `record`, or `None` if it is valid
pub fn check_record(record: &TransactionRecord) -> Option<DropReason> {
    if record.customer_id.is_none() {
        Some(DropReason::MissingCustomer)
    } else if is_cancellation(&record.invoice_id) {
        Some(DropReason::Cancelled)
    } else if record.quantity <= 0 {
        Some(DropReason::NonPositiveQuantity)
    } else if !(record.unit_price > 0.0) {
        Some(DropReason::NonPositivePrice)
    } else {
        None
    }
}

/// Filter records down to the valid subset
///
/// An empty result is returned as-is; rejecting it is left to the aggregator.
pub fn clean_records<I>(records: I) -> Vec<TransactionRecord>
where
    I: IntoIterator<Item = TransactionRecord>,
{
    clean_records_with_summary(records).0
}

/// Filter records and report how many were dropped for each reason
pub fn clean_records_with_summary<I>(records: I) -> (Vec<TransactionRecord>, CleaningSummary)
where
    I: IntoIterator<Item = TransactionRecord>,
{
    let mut summary = CleaningSummary::default();
    let mut kept = Vec::new();

    for record in records {
        summary.input_rows += 1;
        match check_record(&record) {
            None => kept.push(record),
            Some(reason) => summary.record_drop(reason),
        }
    }
    summary.kept_rows = kept.len();

    debug!(
        missing_customer = summary.missing_customer,
        cancelled = summary.cancelled,
        non_positive_quantity = summary.non_positive_quantity,
        non_positive_price = summary.non_positive_price,
        "Dropped records by reason"
    );
    info!(
        input = summary.input_rows,
        kept = summary.kept_rows,
        "Cleaned transaction records"
    );

    (kept, summary)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{NaiveDate, NaiveDateTime};
    use proptest::prelude::*;

    fn ts(day: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2011, 1, day)
            .unwrap()
            .and_hms_opt(10, 0, 0)
            .unwrap()
    }

    fn record(invoice: &str, customer: Option<&str>, quantity: i64, price: f64) -> TransactionRecord {
        TransactionRecord {
            invoice_id: invoice.to_string(),
            customer_id: customer.map(str::to_string),
            quantity,
            unit_price: price,
            timestamp: ts(1),
        }
    }

    #[test]
    fn test_each_filter_applies() {
        let records = vec![
            record("536365", Some("17850"), 6, 2.55),
            record("536366", None, 6, 2.55),
            record("C536367", Some("17850"), 6, 2.55),
            record("536368", Some("17850"), 0, 2.55),
            record("536369", Some("17850"), -3, 2.55),
            record("536370", Some("17850"), 6, 0.0),
            record("536371", Some("17850"), 6, -1.0),
        ];

        let (kept, summary) = clean_records_with_summary(records);
        assert_eq!(kept.len(), 1);
        assert_eq!(kept[0].invoice_id, "536365");
        assert_eq!(
            summary,
            CleaningSummary {
                input_rows: 7,
                kept_rows: 1,
                missing_customer: 1,
                cancelled: 1,
                non_positive_quantity: 2,
                non_positive_price: 2,
            }
        );
        assert_eq!(summary.dropped_rows(), 6);
    }

    #[test]
    fn test_nan_price_is_dropped() {
        let kept = clean_records(vec![record("1", Some("1"), 1, f64::NAN)]);
        assert!(kept.is_empty());
    }

    #[test]
    fn test_empty_result_is_not_an_error() {
        let kept = clean_records(vec![record("C1", Some("1"), 1, 1.0)]);
        assert!(kept.is_empty());
        assert!(clean_records(Vec::new()).is_empty());
    }

    #[test]
    fn test_cancellation_marker_only_at_start() {
        assert!(is_cancellation("C536379"));
        assert!(!is_cancellation("536379C"));
        assert!(!is_cancellation("A563185"));
        assert!(!is_cancellation(" C536379"));
        assert!(!is_cancellation("c536379"));
    }

    fn arb_record() -> impl Strategy<Value = TransactionRecord> {
        (
            prop_oneof![Just("C"), Just(""), Just("A")],
            100_000u32..999_999,
            proptest::option::of(0u32..50),
            -5i64..20,
            -10.0f64..50.0,
            1u32..28,
        )
            .prop_map(|(prefix, invoice, customer, quantity, price, day)| TransactionRecord {
                invoice_id: format!("{prefix}{invoice}"),
                customer_id: customer.map(|c| c.to_string()),
                quantity,
                unit_price: price,
                timestamp: ts(day),
            })
    }

    proptest! {
        #[test]
        fn prop_survivors_satisfy_all_predicates(records in proptest::collection::vec(arb_record(), 0..64)) {
            for r in clean_records(records) {
                prop_assert!(r.customer_id.is_some());
                prop_assert!(!r.invoice_id.starts_with(CANCELLATION_MARKER));
                prop_assert!(r.quantity > 0);
                prop_assert!(r.unit_price > 0.0);
            }
        }

        #[test]
        fn prop_cleaning_is_idempotent(records in proptest::collection::vec(arb_record(), 0..64)) {
            let once = clean_records(records);
            let twice = clean_records(once.clone());
            prop_assert_eq!(once, twice);
        }
    }
}
