//! CSV export of the upcoming automated deduction schedule.

use aidledger_core::ScheduledDeduction;
use aidledger_core::schema::deductions;
use arrow::csv::WriterBuilder;
use arrow::error::ArrowError;

/// Render the schedule as CSV with a header row.
pub fn schedule_csv(rows: &[ScheduledDeduction]) -> Result<Vec<u8>, ArrowError> {
    let batch = deductions::schedule_batch(rows)?;
    let mut writer = WriterBuilder::new().with_header(true).build(Vec::new());
    writer.write(&batch)?;
    Ok(writer.into_inner())
}

#[cfg(test)]
mod tests {
    use super::*;
    use aidledger_core::{BorrowerId, LoanId};
    use chrono::{TimeZone, Utc};

    #[test]
    fn header_and_rows() {
        let loan = LoanId::new();
        let rows = vec![ScheduledDeduction {
            loan_id: loan,
            borrower_id: BorrowerId::new("STU1"),
            term: "2026-S2".parse().unwrap(),
            amount: 1_200_000,
            scheduled_at: Utc.with_ymd_and_hms(2026, 3, 1, 9, 0, 0).unwrap(),
        }];
        let csv = String::from_utf8(schedule_csv(&rows).unwrap()).unwrap();
        let mut lines = csv.lines();
        assert_eq!(
            lines.next(),
            Some("loan_id,borrower_id,term,amount,scheduled_at")
        );
        let row = lines.next().unwrap();
        assert!(row.starts_with(&format!("{loan},STU1,2026-S2,1200000,2026-03-01T09:00:00")));
        assert!(lines.next().is_none());
    }

    #[test]
    fn empty_schedule_is_header_only() {
        let csv = String::from_utf8(schedule_csv(&[]).unwrap()).unwrap();
        assert_eq!(csv.lines().count(), 1);
    }
}
