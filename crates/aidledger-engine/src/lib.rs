//! Payment and loan engine: PIN gate, payment state machine, loan ledger,
//! automated deduction scheduler and receipt issuance, wired together by
//! [`AidLedger`].

pub mod applications;
pub mod events;
pub mod ledger;
pub mod payments;
pub mod pin_gate;
pub mod receipts;
pub mod scheduler;

use std::sync::Arc;

use aidledger_core::{
    ApplicationKind, AutomatedDeduction, BalanceSummary, BorrowerId, Caller, Clock, Confirmation,
    EligibilityContext, ErrorKind, LedgerConfig, LedgerEvent, Loan, LoanId, LoanStatus, PaymentId,
    Receipt, Reference, SupportRequest, TermId, Ugx,
};
use aidledger_gateway::{MobileMoney, PinStatus, PinStore};
use aidledger_store::{
    DeductionBook, LoanBook, ReceiptBook, ScheduleBook, SupportBook, TargetRegistry,
    TransactionBook,
};
use serde::Serialize;
use tokio::sync::broadcast;
use tracing::info;

pub use applications::SupportDesk;
pub use events::EventHub;
pub use ledger::LoanLedger;
pub use payments::{Initiated, PaymentMachine, PaymentRequest};
pub use pin_gate::{Authorized, PinGate, PinPrompt};
pub use receipts::ReceiptIssuer;
pub use scheduler::DeductionScheduler;

/// External services the engine calls out to.
pub struct Collaborators {
    pub pin_store: Arc<dyn PinStore>,
    pub mobile_money: Arc<dyn MobileMoney>,
    pub clock: Arc<dyn Clock>,
}

/// What `submit_application` created.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Submitted {
    Loan(Loan),
    SupportRequest(SupportRequest),
}

/// Outcome of `POST /pin/verify`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PinVerification {
    pub verified: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub transaction_id: Option<PaymentId>,
}

pub struct AidLedger {
    config: LedgerConfig,
    events: EventHub,
    gate: Arc<PinGate>,
    ledger: Arc<LoanLedger>,
    payments: Arc<PaymentMachine>,
    scheduler: Arc<DeductionScheduler>,
    receipts: Arc<ReceiptIssuer>,
    support: SupportDesk,
    targets: Arc<TargetRegistry>,
}

impl AidLedger {
    pub fn new(config: LedgerConfig, collaborators: Collaborators) -> Self {
        let Collaborators {
            pin_store,
            mobile_money,
            clock,
        } = collaborators;
        let events = EventHub::new(config.event_buffer);
        let gate = Arc::new(PinGate::new(pin_store, clock.clone(), config.pin_window()));
        let ledger = Arc::new(LoanLedger::new(
            Arc::new(LoanBook::new()),
            clock.clone(),
            &config,
            events.clone(),
        ));
        let receipts = Arc::new(ReceiptIssuer::new(Arc::new(ReceiptBook::new()), clock.clone()));
        let targets = Arc::new(TargetRegistry::new());
        let payments = Arc::new(PaymentMachine::new(
            Arc::new(TransactionBook::new()),
            ledger.clone(),
            targets.clone(),
            receipts.clone(),
            gate.clone(),
            mobile_money,
            clock.clone(),
            events.clone(),
            config.max_pin_attempts,
        ));
        let scheduler = Arc::new(DeductionScheduler::new(
            Arc::new(ScheduleBook::new()),
            Arc::new(DeductionBook::new()),
            ledger.clone(),
            receipts.clone(),
            clock.clone(),
            events.clone(),
        ));
        let support = SupportDesk::new(Arc::new(SupportBook::new()), clock);
        info!(
            max_loan_amount = config.max_loan_amount,
            pin_window_secs = config.pin_window_secs,
            max_pin_attempts = config.max_pin_attempts,
            "ledger engine ready"
        );
        Self {
            config,
            events,
            gate,
            ledger,
            payments,
            scheduler,
            receipts,
            support,
            targets,
        }
    }

    pub fn config(&self) -> &LedgerConfig {
        &self.config
    }

    pub fn ledger(&self) -> &LoanLedger {
        &self.ledger
    }

    pub fn payments(&self) -> &PaymentMachine {
        &self.payments
    }

    pub fn scheduler(&self) -> &DeductionScheduler {
        &self.scheduler
    }

    pub fn receipts(&self) -> &ReceiptIssuer {
        &self.receipts
    }

    pub fn pin_gate(&self) -> &PinGate {
        &self.gate
    }

    pub fn support(&self) -> &SupportDesk {
        &self.support
    }

    pub fn targets(&self) -> &TargetRegistry {
        &self.targets
    }

    pub fn subscribe(&self) -> broadcast::Receiver<LedgerEvent> {
        self.events.subscribe()
    }

    // ── applications ──

    /// Submit a loan or support application. The kind is fixed here and never
    /// re-derived later.
    pub async fn submit_application(
        &self,
        caller: &Caller,
        kind: ApplicationKind,
        standing: &EligibilityContext,
    ) -> Result<Submitted, ErrorKind> {
        match kind {
            ApplicationKind::Loan(terms) => self
                .ledger
                .issue(caller, terms, standing)
                .await
                .map(Submitted::Loan),
            ApplicationKind::SupportRequest(terms) => {
                self.support.submit(caller, terms).map(Submitted::SupportRequest)
            }
        }
    }

    /// Staff approval. A loan that already carries consent is activated and
    /// its deduction scheduled straight away.
    pub async fn approve_loan(&self, caller: &Caller, id: &LoanId) -> Result<Loan, ErrorKind> {
        let loan = self.ledger.approve(caller, id).await?;
        if loan.consent {
            return self.activate_and_schedule(id).await;
        }
        Ok(loan)
    }

    pub async fn reject_loan(&self, caller: &Caller, id: &LoanId) -> Result<Loan, ErrorKind> {
        self.ledger.reject(caller, id).await
    }

    /// Borrower consent. An approved loan becomes active once consent exists.
    pub async fn consent(&self, caller: &Caller, id: &LoanId) -> Result<Loan, ErrorKind> {
        let loan = self.ledger.record_consent(caller, id).await?;
        match loan.status {
            LoanStatus::Approved => self.activate_and_schedule(id).await,
            LoanStatus::Active | LoanStatus::Overdue => {
                self.scheduler.schedule(id).await?;
                Ok(loan)
            }
            _ => Ok(loan),
        }
    }

    async fn activate_and_schedule(&self, id: &LoanId) -> Result<Loan, ErrorKind> {
        let loan = self.ledger.activate(id).await?;
        self.scheduler.schedule(id).await?;
        Ok(loan)
    }

    // ── payments ──

    /// Confirm a payment. Repeating the call for a confirmed reference returns
    /// the original result instead of an error.
    pub async fn confirm_payment(
        &self,
        caller: &Caller,
        reference: &Reference,
    ) -> Result<Confirmation, ErrorKind> {
        match self.payments.confirm(caller, reference).await {
            Err(ErrorKind::AlreadyConfirmed { original }) => Ok(original),
            other => other,
        }
    }

    pub async fn pin_status(&self, caller: &Caller) -> Result<PinStatus, ErrorKind> {
        self.gate.status(&caller.borrower_id).await
    }

    /// Verify a PIN, either for a payment transaction or on its own.
    pub async fn verify_pin(
        &self,
        caller: &Caller,
        pin: &str,
        transaction: Option<&PaymentId>,
    ) -> Result<PinVerification, ErrorKind> {
        match transaction {
            Some(id) => {
                let txn = self.payments.by_payment_id(caller, id).await?;
                self.payments.authorize(caller, &txn.reference, pin).await?;
                Ok(PinVerification {
                    verified: true,
                    transaction_id: Some(*id),
                })
            }
            None => {
                self.gate.verify_standalone(&caller.borrower_id, pin).await?;
                Ok(PinVerification {
                    verified: true,
                    transaction_id: None,
                })
            }
        }
    }

    /// The payment's receipt and its rendered artifact.
    pub async fn payment_receipt(
        &self,
        caller: &Caller,
        payment: &PaymentId,
    ) -> Result<(Receipt, Vec<u8>), ErrorKind> {
        self.payments.by_payment_id(caller, payment).await?;
        let receipt = self.receipts.for_payment(payment)?;
        let artifact = self.receipts.render(&receipt);
        Ok((receipt, artifact))
    }

    // ── deductions and terms ──

    pub async fn balance_summary(
        &self,
        caller: &Caller,
        borrower: &BorrowerId,
    ) -> Result<BalanceSummary, ErrorKind> {
        self.ledger.balance_summary(caller, borrower).await
    }

    /// Disbursement trigger from the disbursement subsystem.
    pub async fn disburse(
        &self,
        caller: &Caller,
        borrower: &BorrowerId,
        term: TermId,
        available: Ugx,
    ) -> Result<Vec<AutomatedDeduction>, ErrorKind> {
        caller.require_staff()?;
        self.scheduler
            .on_disbursement_event(borrower, term, available)
            .await
    }

    /// Start-of-term housekeeping: overdue sweep and stale payment expiry.
    pub async fn start_term(&self, caller: &Caller, term: TermId) -> Result<Vec<LoanId>, ErrorKind> {
        caller.require_staff()?;
        let expired = self.payments.expire_stale().await;
        let overdue = self.ledger.sweep_overdue(term).await;
        info!(
            term = %term,
            overdue = overdue.len(),
            expired = expired.len(),
            "term started"
        );
        Ok(overdue)
    }
}
