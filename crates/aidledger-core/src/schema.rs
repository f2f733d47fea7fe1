/// Arrow schema definitions for ledger exports.
pub mod deductions {
    use std::sync::Arc;

    use arrow::array::{ArrayRef, StringArray, TimestampMillisecondArray, UInt64Array};
    use arrow::datatypes::{DataType, Field, Schema, TimeUnit};
    use arrow::error::ArrowError;
    use arrow::record_batch::RecordBatch;

    use crate::types::ScheduledDeduction;

    /// Offset form so the CSV writer can format it without a tz database.
    pub const TIMEZONE: &str = "+00:00";

    /// Schema for the upcoming automated deduction schedule.
    pub fn schedule_schema() -> Schema {
        Schema::new(vec![
            Field::new("loan_id", DataType::Utf8, false),
            Field::new("borrower_id", DataType::Utf8, false),
            Field::new("term", DataType::Utf8, false),
            Field::new("amount", DataType::UInt64, false),
            Field::new(
                "scheduled_at",
                DataType::Timestamp(TimeUnit::Millisecond, Some(TIMEZONE.into())),
                false,
            ),
        ])
    }

    /// Build one RecordBatch from schedule rows, in the order given.
    pub fn schedule_batch(rows: &[ScheduledDeduction]) -> Result<RecordBatch, ArrowError> {
        let loan_ids: Vec<String> = rows.iter().map(|r| r.loan_id.to_string()).collect();
        let borrowers: Vec<&str> = rows.iter().map(|r| r.borrower_id.as_str()).collect();
        let terms: Vec<String> = rows.iter().map(|r| r.term.to_string()).collect();
        let amounts: Vec<u64> = rows.iter().map(|r| r.amount).collect();
        let scheduled: Vec<i64> = rows.iter().map(|r| r.scheduled_at.timestamp_millis()).collect();

        let columns: Vec<ArrayRef> = vec![
            Arc::new(StringArray::from(loan_ids)),
            Arc::new(StringArray::from(borrowers)),
            Arc::new(StringArray::from(terms)),
            Arc::new(UInt64Array::from(amounts)),
            Arc::new(TimestampMillisecondArray::from(scheduled).with_timezone(TIMEZONE)),
        ];
        RecordBatch::try_new(Arc::new(schedule_schema()), columns)
    }
}
