//! Domain records shared by the ledger, the payment machine and the HTTP surface.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::ErrorKind;
use crate::reference::Reference;
use crate::term::TermId;

/// Whole Uganda shillings. UGX has no minor unit in circulation.
pub type Ugx = u64;

/// Convert a caller-supplied signed amount into a positive [`Ugx`] value.
pub fn positive_amount(raw: i64) -> Result<Ugx, ErrorKind> {
    if raw <= 0 {
        return Err(ErrorKind::InvalidAmount(raw));
    }
    Ok(raw as Ugx)
}

// ── Identifiers ──

/// Student (borrower / payer) identifier issued by the university registry.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct BorrowerId(String);

impl BorrowerId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for BorrowerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

macro_rules! uuid_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(pub Uuid);

        impl $name {
            pub fn new() -> Self {
                Self(Uuid::new_v4())
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                fmt::Display::fmt(&self.0, f)
            }
        }

        impl std::str::FromStr for $name {
            type Err = uuid::Error;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                Uuid::parse_str(s).map(Self)
            }
        }
    };
}

uuid_id!(
    /// Loan identifier.
    LoanId
);
uuid_id!(
    /// Support (grant) request identifier.
    SupportRequestId
);
uuid_id!(
    /// Identifier of a payment transaction, distinct from its [`Reference`].
    PaymentId
);
uuid_id!(
    /// Identifier of an applied automated deduction.
    DeductionId
);

/// Receipt identifier, derived deterministically from the receipt's source.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ReceiptId(String);

impl ReceiptId {
    pub fn for_source(source: &ReceiptSource) -> Self {
        Self(format!("RCP-{}", source.key()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ReceiptId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

// ── Callers ──

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    Borrower,
    Staff,
}

/// Explicit identity of whoever is invoking a core operation.
///
/// Resolved from the bearer token at the edge and passed into every call; the
/// core keeps no session of its own.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Caller {
    pub borrower_id: BorrowerId,
    pub role: Role,
}

impl Caller {
    pub fn borrower(id: impl Into<String>) -> Self {
        Self {
            borrower_id: BorrowerId::new(id),
            role: Role::Borrower,
        }
    }

    pub fn staff(id: impl Into<String>) -> Self {
        Self {
            borrower_id: BorrowerId::new(id),
            role: Role::Staff,
        }
    }

    pub fn is_staff(&self) -> bool {
        self.role == Role::Staff
    }

    pub fn require_staff(&self) -> Result<(), ErrorKind> {
        if self.is_staff() {
            Ok(())
        } else {
            Err(ErrorKind::Forbidden)
        }
    }

    /// Staff may act on anyone's records; borrowers only on their own.
    pub fn may_act_for(&self, borrower: &BorrowerId) -> Result<(), ErrorKind> {
        if self.is_staff() || &self.borrower_id == borrower {
            Ok(())
        } else {
            Err(ErrorKind::Forbidden)
        }
    }
}

// ── Applications ──

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Guarantor {
    pub name: String,
    pub relation: String,
    pub phone: String,
}

impl Guarantor {
    pub fn is_complete(&self) -> bool {
        !self.name.trim().is_empty()
            && !self.relation.trim().is_empty()
            && !self.phone.trim().is_empty()
    }
}

/// Loan-specific application fields.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LoanTerms {
    pub principal: Ugx,
    pub guarantor: Guarantor,
    /// Borrower accepts that the full amount is withheld from the next disbursement.
    #[serde(default)]
    pub consent: bool,
    #[serde(default)]
    pub purpose: Option<String>,
    #[serde(default)]
    pub supporting_document: Option<String>,
}

/// Support (grant) request fields. Non-repayable.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SupportTerms {
    pub amount: Ugx,
    pub reason: String,
    #[serde(default)]
    pub supporting_document: Option<String>,
}

/// What kind of application was submitted, decided once at submission.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ApplicationKind {
    Loan(LoanTerms),
    SupportRequest(SupportTerms),
}

/// Academic standing used for issuance eligibility.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EligibilityContext {
    pub current_term: TermId,
    /// Last term of the borrower's programme.
    pub final_term: TermId,
}

impl EligibilityContext {
    /// A term after the current one exists within the programme.
    pub fn has_following_term(&self) -> bool {
        self.current_term < self.final_term
    }
}

// ── Loans ──

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LoanStatus {
    Pending,
    Approved,
    Rejected,
    Active,
    Overdue,
    Paid,
}

impl LoanStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Approved => "approved",
            Self::Rejected => "rejected",
            Self::Active => "active",
            Self::Overdue => "overdue",
            Self::Paid => "paid",
        }
    }

    /// Payments and deductions may only be posted to a disbursed, unsettled loan.
    pub fn accepts_postings(&self) -> bool {
        matches!(self, Self::Active | Self::Overdue)
    }

    /// Whether the ledger permits moving from `self` to `to`.
    pub fn can_become(&self, to: LoanStatus) -> bool {
        use LoanStatus::*;
        matches!(
            (*self, to),
            (Pending, Approved)
                | (Pending, Rejected)
                | (Approved, Active)
                | (Active, Overdue)
                | (Active, Paid)
                | (Overdue, Active)
                | (Overdue, Paid)
        )
    }
}

impl fmt::Display for LoanStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Loan {
    pub id: LoanId,
    pub borrower_id: BorrowerId,
    pub principal: Ugx,
    pub status: LoanStatus,
    pub created_at: DateTime<Utc>,
    pub consent: bool,
    pub guarantor: Guarantor,
    pub purpose: Option<String>,
    pub supporting_document: Option<String>,
    /// Term whose disbursement the full amount is withheld from.
    pub deduction_term: TermId,
    pub paid_total: Ugx,
    pub deducted_total: Ugx,
}

impl Loan {
    /// `principal − payments − deductions`.
    ///
    /// The ledger never posts more than the outstanding amount, so this cannot
    /// underflow for a loan that only the ledger has mutated.
    pub fn outstanding(&self) -> Ugx {
        self.principal
            .saturating_sub(self.paid_total)
            .saturating_sub(self.deducted_total)
    }

    pub fn has_postings(&self) -> bool {
        self.paid_total > 0 || self.deducted_total > 0
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SupportStatus {
    Pending,
    Approved,
    Rejected,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SupportRequest {
    pub id: SupportRequestId,
    pub borrower_id: BorrowerId,
    pub amount: Ugx,
    pub reason: String,
    pub supporting_document: Option<String>,
    pub status: SupportStatus,
    pub created_at: DateTime<Utc>,
}

// ── Payments ──

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Provider {
    Mtn,
    Airtel,
    Bank,
}

impl Provider {
    /// Mobile-money providers authorise with a PIN; bank transfers settle manually.
    pub fn requires_pin(&self) -> bool {
        matches!(self, Self::Mtn | Self::Airtel)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Mtn => "mtn",
            Self::Airtel => "airtel",
            Self::Bank => "bank",
        }
    }
}

/// What a payment is applied to once confirmed.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "type", content = "id", rename_all = "snake_case")]
pub enum PaymentTarget {
    Loan(LoanId),
    Donation(String),
    Event(String),
}

impl PaymentTarget {
    /// Reference prefix for this kind of target.
    pub fn prefix(&self) -> &'static str {
        match self {
            Self::Loan(_) => "LOAN",
            Self::Donation(_) => "DON",
            Self::Event(_) => "EVT",
        }
    }
}

impl fmt::Display for PaymentTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Loan(id) => write!(f, "loan:{id}"),
            Self::Donation(cause) => write!(f, "donation:{cause}"),
            Self::Event(event) => write!(f, "event:{event}"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    Created,
    PendingAuthorization,
    /// Bank transfer waiting for staff reconciliation.
    AwaitingSettlement,
    Confirmed,
    Failed,
    Expired,
}

impl Phase {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Created => "created",
            Self::PendingAuthorization => "pending_authorization",
            Self::AwaitingSettlement => "awaiting_settlement",
            Self::Confirmed => "confirmed",
            Self::Failed => "failed",
            Self::Expired => "expired",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Confirmed | Self::Failed | Self::Expired)
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Why a transaction ended in [`Phase::Failed`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureReason {
    Cancelled,
    PinAttemptsExhausted,
    OverpaymentRejected,
    TargetClosed,
    ProviderUnavailable,
}

impl FailureReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Cancelled => "cancelled",
            Self::PinAttemptsExhausted => "pin_attempts_exhausted",
            Self::OverpaymentRejected => "overpayment_rejected",
            Self::TargetClosed => "target_closed",
            Self::ProviderUnavailable => "provider_unavailable",
        }
    }
}

impl fmt::Display for FailureReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The result of a successful confirmation, replayed verbatim on repeat calls.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Confirmation {
    pub payment_id: PaymentId,
    pub receipt_id: ReceiptId,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PaymentTransaction {
    pub id: PaymentId,
    pub reference: Reference,
    pub payer: BorrowerId,
    pub amount: Ugx,
    pub target: PaymentTarget,
    pub provider: Provider,
    pub payer_contact: String,
    pub phase: Phase,
    pub created_at: DateTime<Utc>,
    /// End of the PIN window; `None` for bank transfers.
    pub prompt_expires_at: Option<DateTime<Utc>>,
    pub authorized_at: Option<DateTime<Utc>>,
    pub pin_failures: u8,
    pub confirmed_at: Option<DateTime<Utc>>,
    pub failure: Option<FailureReason>,
    pub confirmation: Option<Confirmation>,
    /// Provider-side identifier of the collection request, if any.
    pub provider_ref: Option<String>,
}

// ── Deductions and receipts ──

/// A pending instruction to withhold a loan's outstanding amount from a term's
/// disbursement.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScheduledDeduction {
    pub loan_id: LoanId,
    pub borrower_id: BorrowerId,
    pub term: TermId,
    /// Outstanding amount when the entry was last computed.
    pub amount: Ugx,
    pub scheduled_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AutomatedDeduction {
    pub id: DeductionId,
    pub loan_id: LoanId,
    pub borrower_id: BorrowerId,
    pub amount: Ugx,
    pub term: TermId,
    pub applied_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "type", content = "id", rename_all = "snake_case")]
pub enum ReceiptSource {
    Payment(PaymentId),
    Deduction(DeductionId),
}

impl ReceiptSource {
    /// Stable key used for receipt idempotency.
    pub fn key(&self) -> String {
        match self {
            Self::Payment(id) => format!("PAY-{id}"),
            Self::Deduction(id) => format!("DED-{id}"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Receipt {
    pub id: ReceiptId,
    pub source: ReceiptSource,
    pub borrower_id: BorrowerId,
    pub amount: Ugx,
    pub issued_at: DateTime<Utc>,
    /// Where the rendered artifact can be fetched.
    pub artifact: String,
}

// ── Borrower views ──

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LoanBalance {
    pub loan_id: LoanId,
    pub status: LoanStatus,
    pub principal: Ugx,
    pub paid: Ugx,
    pub deducted: Ugx,
    pub outstanding: Ugx,
    pub deduction_term: TermId,
}

impl From<&Loan> for LoanBalance {
    fn from(loan: &Loan) -> Self {
        Self {
            loan_id: loan.id,
            status: loan.status,
            principal: loan.principal,
            paid: loan.paid_total,
            deducted: loan.deducted_total,
            outstanding: loan.outstanding(),
            deduction_term: loan.deduction_term,
        }
    }
}

/// Aggregated borrower view behind `GET /automated-deductions/balance-summary`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BalanceSummary {
    pub borrower_id: BorrowerId,
    /// Principal of every loan that was ever disbursed.
    pub total_borrowed: Ugx,
    pub total_outstanding: Ugx,
    /// Payments plus deductions.
    pub total_paid: Ugx,
    pub is_blocked: bool,
    pub loans: Vec<LoanBalance>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_loan() -> Loan {
        Loan {
            id: LoanId::new(),
            borrower_id: BorrowerId::new("STU1"),
            principal: 800_000,
            status: LoanStatus::Active,
            created_at: Utc::now(),
            consent: true,
            guarantor: Guarantor {
                name: "Jane Nakato".into(),
                relation: "aunt".into(),
                phone: "+256700000001".into(),
            },
            purpose: None,
            supporting_document: None,
            deduction_term: "2026-S2".parse().unwrap(),
            paid_total: 0,
            deducted_total: 0,
        }
    }

    #[test]
    fn outstanding_subtracts_payments_and_deductions() {
        let mut loan = sample_loan();
        loan.paid_total = 300_000;
        loan.deducted_total = 200_000;
        assert_eq!(loan.outstanding(), 300_000);
        assert!(loan.has_postings());
    }

    #[test]
    fn positive_amount_rejects_zero_and_negative() {
        assert_eq!(positive_amount(0), Err(ErrorKind::InvalidAmount(0)));
        assert_eq!(positive_amount(-5), Err(ErrorKind::InvalidAmount(-5)));
        assert_eq!(positive_amount(10), Ok(10));
    }

    #[test]
    fn loan_status_edges() {
        use LoanStatus::*;
        assert!(Pending.can_become(Approved));
        assert!(Overdue.can_become(Active));
        assert!(!Pending.can_become(Active));
        assert!(!Paid.can_become(Active));
        assert!(!Rejected.can_become(Approved));
    }

    #[test]
    fn application_kind_is_tagged() {
        let json = r#"{
            "kind": "support_request",
            "amount": 150000,
            "reason": "medical emergency"
        }"#;
        let parsed: ApplicationKind = serde_json::from_str(json).unwrap();
        assert!(matches!(parsed, ApplicationKind::SupportRequest(ref s) if s.amount == 150_000));
    }

    #[test]
    fn payment_target_json_shape() {
        let target = PaymentTarget::Donation("library-fund".into());
        let json = serde_json::to_string(&target).unwrap();
        assert_eq!(json, r#"{"type":"donation","id":"library-fund"}"#);
        assert_eq!(target.prefix(), "DON");
    }

    #[test]
    fn receipt_id_is_deterministic() {
        let source = ReceiptSource::Payment(PaymentId::new());
        assert_eq!(ReceiptId::for_source(&source), ReceiptId::for_source(&source));
    }

    #[test]
    fn borrowers_only_act_for_themselves() {
        let me = Caller::borrower("STU1");
        assert!(me.may_act_for(&BorrowerId::new("STU1")).is_ok());
        assert_eq!(me.may_act_for(&BorrowerId::new("STU2")), Err(ErrorKind::Forbidden));
        assert!(Caller::staff("OPS1").may_act_for(&BorrowerId::new("STU2")).is_ok());
    }
}
