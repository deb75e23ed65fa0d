//! Typed view of a scanned or looked-up vehicle record.
use crate::payload::StructuredRecord;
use serde_json::Value;

/// Shown for any field the record does not carry.
pub const PLACEHOLDER: &str = "-";

/// The four fields the form displays and echoes into the transaction row.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VehicleRecord {
    /// `NAMA`: driver name.
    pub driver_name: String,
    /// `NOPOL`: licence plate.
    pub plate: String,
    /// `NOLAMBUNG`: fleet (hull) number painted on the vehicle.
    pub fleet_number: String,
    /// `KENDARAAN`: vehicle description.
    pub vehicle: String,
}

impl Default for VehicleRecord {
    fn default() -> Self {
        Self {
            driver_name: PLACEHOLDER.into(),
            plate: PLACEHOLDER.into(),
            fleet_number: PLACEHOLDER.into(),
            vehicle: PLACEHOLDER.into(),
        }
    }
}

impl VehicleRecord {
    /// Read the known fields; anything missing or non-textual becomes `-`.
    pub fn from_record(record: &StructuredRecord) -> Self {
        Self {
            driver_name: field(record, "NAMA"),
            plate: field(record, "NOPOL"),
            fleet_number: field(record, "NOLAMBUNG"),
            vehicle: field(record, "KENDARAAN"),
        }
    }
}

fn field(record: &StructuredRecord, key: &str) -> String {
    match record.get(key) {
        Some(Value::String(s)) if !s.trim().is_empty() => s.clone(),
        Some(Value::Number(n)) => n.to_string(),
        _ => PLACEHOLDER.to_owned(),
    }
}
