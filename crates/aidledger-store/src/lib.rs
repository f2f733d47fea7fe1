//! Storage layer: in-memory books with per-entity serialisation.

mod error;
pub use error::StoreError;

pub mod keyed;
mod loans;
mod payments;
mod receipts;
mod schedule;
mod targets;

pub use keyed::Keyed;
pub use loans::{LoanBook, SupportBook};
pub use payments::TransactionBook;
pub use receipts::ReceiptBook;
pub use schedule::{DeductionBook, DisbursementRun, ScheduleBook};
pub use targets::{Aggregate, TargetRegistry};
