//! Notifications fired on ledger state transitions.
//!
//! Consumers subscribe to these instead of polling balances.

use serde::{Deserialize, Serialize};

use crate::reference::Reference;
use crate::term::TermId;
use crate::types::{
    BorrowerId, DeductionId, FailureReason, LoanId, LoanStatus, PaymentId, PaymentTarget,
    ReceiptId, Ugx,
};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum LedgerEvent {
    PaymentConfirmed {
        reference: Reference,
        payment_id: PaymentId,
        receipt_id: ReceiptId,
        target: PaymentTarget,
        amount: Ugx,
    },
    PaymentFailed {
        reference: Reference,
        reason: FailureReason,
    },
    PaymentExpired {
        reference: Reference,
    },
    DeductionApplied {
        deduction_id: DeductionId,
        loan_id: LoanId,
        borrower_id: BorrowerId,
        term: TermId,
        amount: Ugx,
        receipt_id: ReceiptId,
        /// Outstanding after the deduction; non-zero means carried forward.
        outstanding: Ugx,
    },
    LoanStatusChanged {
        loan_id: LoanId,
        from: LoanStatus,
        to: LoanStatus,
    },
}

impl LedgerEvent {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::PaymentConfirmed { .. } => "payment_confirmed",
            Self::PaymentFailed { .. } => "payment_failed",
            Self::PaymentExpired { .. } => "payment_expired",
            Self::DeductionApplied { .. } => "deduction_applied",
            Self::LoanStatusChanged { .. } => "loan_status_changed",
        }
    }
}
