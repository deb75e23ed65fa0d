//! Form model: everything the operator fills in after a record is found.
//!
//! The flow is: a [`VehicleRecord`] arrives (scan or manual code lookup),
//! the operator answers the [`Checklist`], enters a quantity, and a
//! [`TransactionRow`] is built for submission.
pub mod checklist;
pub mod code;
pub mod record;
pub mod transaction;

pub use checklist::{Check, Checklist};
pub use code::compose_code;
pub use record::VehicleRecord;
pub use transaction::{parse_quantity, TransactionRow, MAX_QUANTITY_DIGITS, ROW_WIDTH};

/// Operator input that cannot be submitted as-is.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum FormError {
    #[error("all code fields must be filled")]
    IncompleteCode,
    #[error("make sure every check is answered")]
    UnansweredChecks(Vec<Check>),
    #[error("enter a quantity")]
    MissingQuantity,
}
