//! Quantity entry and the submitted transaction row.
use super::{Check, Checklist, FormError, VehicleRecord};
use chrono::NaiveDateTime;
use serde_json::Value;

/// Quantity input is cut to this many digits.
pub const MAX_QUANTITY_DIGITS: usize = 3;

/// Number of columns in the backend sheet.
pub const ROW_WIDTH: usize = 20;

const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Parse the quantity field: digits only, at most three, at least 1.
pub fn parse_quantity(input: &str) -> Result<u16, FormError> {
    let digits: String = input
        .chars()
        .filter(char::is_ascii_digit)
        .take(MAX_QUANTITY_DIGITS)
        .collect();
    match digits.parse::<u16>() {
        Ok(n) if n >= 1 => Ok(n),
        _ => Err(FormError::MissingQuantity),
    }
}

/// One row as appended to the backend sheet.
///
/// | col | content |
/// |---|---|
/// | 1 | transaction id (epoch ms when the record was loaded) |
/// | 2 | timestamp `YYYY-MM-DD HH:MM:SS` |
/// | 3 | overall verdict `"true"` / `"false"` |
/// | 4 | checklist note |
/// | 5 | photo answer |
/// | 6-9 | `"<answer> - <record value>"` per field |
/// | 10 | quantity |
/// | 11 | `"unknown"` |
/// | 12-20 | empty |
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransactionRow {
    columns: Vec<String>,
}

impl TransactionRow {
    pub fn build(
        transaction_id: i64,
        timestamp: NaiveDateTime,
        checklist: &Checklist,
        record: &VehicleRecord,
        quantity: u16,
    ) -> Self {
        let answer = |check: Check| match checklist.answer(check) {
            Some(true) => "true",
            Some(false) => "false",
            None => "",
        };

        let mut columns = vec![
            transaction_id.to_string(),
            timestamp.format(TIMESTAMP_FORMAT).to_string(),
            checklist.passed().to_string(),
            checklist.note(),
            answer(Check::Photo).to_owned(),
            format!("{} - {}", answer(Check::DriverName), record.driver_name),
            format!("{} - {}", answer(Check::Plate), record.plate),
            format!("{} - {}", answer(Check::FleetNumber), record.fleet_number),
            format!("{} - {}", answer(Check::Vehicle), record.vehicle),
            quantity.to_string(),
            "unknown".to_owned(),
        ];
        columns.resize(ROW_WIDTH, String::new());

        Self { columns }
    }

    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    /// JSON array form sent to the backend.
    pub fn to_json(&self) -> Value {
        Value::Array(self.columns.iter().cloned().map(Value::String).collect())
    }
}
