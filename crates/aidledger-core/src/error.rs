//! Error taxonomy returned by every core operation.

use serde::Serialize;
use thiserror::Error;

use crate::term::TermId;
use crate::types::{Confirmation, FailureReason, LoanStatus, Phase, Ugx};

/// Broad class of an [`ErrorKind`], used for retry policy and HTTP mapping.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCategory {
    /// Bad amount or input. Fix locally and resubmit.
    Validation,
    /// Cap exceeded, final term, blocked borrower. Not retried.
    Eligibility,
    /// PIN missing, invalid or expired; caller not allowed.
    Authorization,
    /// State moved on (already confirmed, overpaid, cancelled). Re-fetch first.
    Conflict,
    NotFound,
    /// Transient failure of an external collaborator. Start a new attempt.
    ExternalProvider,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ErrorKind {
    // ── Validation ──
    #[error("amount must be a positive number of shillings, got {0}")]
    InvalidAmount(i64),

    #[error("guarantor name, relation and phone are required for a loan")]
    MissingGuarantor,

    #[error("invalid input: {0}")]
    InvalidInput(String),

    // ── Eligibility ──
    #[error("requested {requested} exceeds the loan cap of {cap}")]
    LoanCapExceeded { requested: Ugx, cap: Ugx },

    #[error("{term} is the final term of the programme; no later disbursement exists")]
    FinalTermIneligible { term: TermId },

    #[error("borrower has an overdue loan and cannot take a new one")]
    BorrowerBlocked,

    #[error("borrower has not consented to the automated deduction")]
    ConsentRequired,

    // ── Authorization ──
    #[error("no PIN set; set a PIN before paying")]
    PinNotSet,

    #[error("invalid PIN")]
    InvalidPin { attempts_left: Option<u8> },

    #[error("PIN request expired")]
    RequestExpired,

    #[error("payment has not been authorised")]
    NotAuthorized,

    #[error("caller is not allowed to perform this operation")]
    Forbidden,

    #[error("missing or invalid bearer token")]
    Unauthenticated,

    // ── Conflict ──
    #[error("payment already confirmed")]
    AlreadyConfirmed { original: Confirmation },

    #[error("payment of {amount} exceeds outstanding balance of {outstanding}")]
    OverpaymentRejected { amount: Ugx, outstanding: Ugx },

    #[error("payment was cancelled")]
    Cancelled,

    #[error("payment window expired")]
    Expired,

    #[error("payment failed: {0}")]
    TransactionFailed(FailureReason),

    #[error("bank transfers are confirmed by staff reconciliation")]
    ManualSettlementRequired,

    #[error("cannot cancel a transaction in phase {0}")]
    NotCancellable(Phase),

    #[error("loan cannot move from {from} to {to}")]
    InvalidTransition { from: LoanStatus, to: LoanStatus },

    // ── Not found ──
    #[error("invalid payment target: {0}")]
    InvalidTarget(String),

    #[error("loan {0} not found")]
    LoanNotFound(String),

    #[error("support request {0} not found")]
    SupportRequestNotFound(String),

    #[error("transaction {0} not found")]
    TransactionNotFound(String),

    #[error("receipt not found for {0}")]
    ReceiptNotFound(String),

    // ── External ──
    #[error("external provider error: {0}")]
    Provider(String),
}

impl ErrorKind {
    pub fn category(&self) -> ErrorCategory {
        use ErrorKind::*;
        match self {
            InvalidAmount(_) | MissingGuarantor | InvalidInput(_) => ErrorCategory::Validation,
            LoanCapExceeded { .. } | FinalTermIneligible { .. } | BorrowerBlocked | ConsentRequired => {
                ErrorCategory::Eligibility
            }
            PinNotSet | InvalidPin { .. } | RequestExpired | NotAuthorized | Forbidden
            | Unauthenticated => ErrorCategory::Authorization,
            AlreadyConfirmed { .. }
            | OverpaymentRejected { .. }
            | Cancelled
            | Expired
            | TransactionFailed(_)
            | ManualSettlementRequired
            | NotCancellable(_)
            | InvalidTransition { .. } => ErrorCategory::Conflict,
            InvalidTarget(_)
            | LoanNotFound(_)
            | SupportRequestNotFound(_)
            | TransactionNotFound(_)
            | ReceiptNotFound(_) => ErrorCategory::NotFound,
            Provider(_) => ErrorCategory::ExternalProvider,
        }
    }

    /// Stable machine-readable code for API bodies.
    pub fn code(&self) -> &'static str {
        use ErrorKind::*;
        match self {
            InvalidAmount(_) => "invalid_amount",
            MissingGuarantor => "missing_guarantor",
            InvalidInput(_) => "invalid_input",
            LoanCapExceeded { .. } => "loan_cap_exceeded",
            FinalTermIneligible { .. } => "final_term_ineligible",
            BorrowerBlocked => "borrower_blocked",
            ConsentRequired => "consent_required",
            PinNotSet => "pin_not_set",
            InvalidPin { .. } => "invalid_pin",
            RequestExpired => "request_expired",
            NotAuthorized => "not_authorized",
            Forbidden => "forbidden",
            Unauthenticated => "unauthenticated",
            AlreadyConfirmed { .. } => "already_confirmed",
            OverpaymentRejected { .. } => "overpayment_rejected",
            Cancelled => "cancelled",
            Expired => "expired",
            TransactionFailed(_) => "transaction_failed",
            ManualSettlementRequired => "manual_settlement_required",
            NotCancellable(_) => "not_cancellable",
            InvalidTransition { .. } => "invalid_transition",
            InvalidTarget(_) => "invalid_target",
            LoanNotFound(_) => "loan_not_found",
            SupportRequestNotFound(_) => "support_request_not_found",
            TransactionNotFound(_) => "transaction_not_found",
            ReceiptNotFound(_) => "receipt_not_found",
            Provider(_) => "provider_error",
        }
    }

    /// Map the terminal failure of a transaction back to the error a late
    /// caller should see.
    pub fn for_failure(reason: FailureReason) -> Self {
        match reason {
            FailureReason::Cancelled => Self::Cancelled,
            other => Self::TransactionFailed(other),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn categories() {
        assert_eq!(ErrorKind::InvalidAmount(0).category(), ErrorCategory::Validation);
        assert_eq!(ErrorKind::BorrowerBlocked.category(), ErrorCategory::Eligibility);
        assert_eq!(ErrorKind::RequestExpired.category(), ErrorCategory::Authorization);
        assert_eq!(
            ErrorKind::OverpaymentRejected {
                amount: 2,
                outstanding: 1
            }
            .category(),
            ErrorCategory::Conflict
        );
        assert_eq!(
            ErrorKind::Provider("timeout".into()).category(),
            ErrorCategory::ExternalProvider
        );
    }

    #[test]
    fn cancelled_failure_maps_to_cancelled() {
        assert_eq!(ErrorKind::for_failure(FailureReason::Cancelled), ErrorKind::Cancelled);
        assert_eq!(
            ErrorKind::for_failure(FailureReason::PinAttemptsExhausted),
            ErrorKind::TransactionFailed(FailureReason::PinAttemptsExhausted)
        );
    }

    #[test]
    fn messages_do_not_echo_pins() {
        let msg = ErrorKind::InvalidPin {
            attempts_left: Some(2),
        }
        .to_string();
        assert_eq!(msg, "invalid PIN");
    }
}
