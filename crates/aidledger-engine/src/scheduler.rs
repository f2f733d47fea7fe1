//! Automated deduction ("chop") scheduler.
//!
//! One schedule entry per active loan, pointing at the term whose disbursement
//! the outstanding balance is withheld from. A disbursement smaller than the
//! balance deducts what is available and moves the entry to the next term.

use std::sync::Arc;

use aidledger_core::{
    AutomatedDeduction, BorrowerId, Clock, DeductionId, ErrorKind, LedgerEvent, LoanId,
    ReceiptSource, ScheduledDeduction, TermId, Ugx,
};
use aidledger_store::{DeductionBook, ScheduleBook, StoreError};
use tracing::{info, warn};

use crate::events::EventHub;
use crate::ledger::LoanLedger;
use crate::receipts::ReceiptIssuer;

/// How many times a deduction is re-quoted after losing a race with a payment.
const MAX_REQUOTES: usize = 3;

pub struct DeductionScheduler {
    schedule: Arc<ScheduleBook>,
    applied: Arc<DeductionBook>,
    ledger: Arc<LoanLedger>,
    receipts: Arc<ReceiptIssuer>,
    clock: Arc<dyn Clock>,
    events: EventHub,
}

impl DeductionScheduler {
    pub fn new(
        schedule: Arc<ScheduleBook>,
        applied: Arc<DeductionBook>,
        ledger: Arc<LoanLedger>,
        receipts: Arc<ReceiptIssuer>,
        clock: Arc<dyn Clock>,
        events: EventHub,
    ) -> Self {
        Self {
            schedule,
            applied,
            ledger,
            receipts,
            clock,
            events,
        }
    }

    /// Schedule the full outstanding balance against the loan's deduction term.
    /// Calling again for the same loan returns the existing entry.
    pub async fn schedule(&self, loan_id: &LoanId) -> Result<ScheduledDeduction, ErrorKind> {
        if let Some(existing) = self.schedule.get(loan_id).await {
            return Ok(existing);
        }
        let loan = self.ledger.loan(loan_id).await?;
        if !loan.status.accepts_postings() {
            return Err(ErrorKind::InvalidTarget(format!(
                "loan {loan_id} is {}",
                loan.status
            )));
        }
        let entry = ScheduledDeduction {
            loan_id: loan.id,
            borrower_id: loan.borrower_id.clone(),
            term: loan.deduction_term,
            amount: loan.outstanding(),
            scheduled_at: self.clock.now(),
        };
        match self.schedule.insert(entry.clone()) {
            Ok(()) => {
                info!(
                    loan = %loan.id,
                    term = %entry.term,
                    amount = entry.amount,
                    "deduction scheduled"
                );
                Ok(entry)
            }
            Err(StoreError::Duplicate(_)) => self
                .schedule
                .get(loan_id)
                .await
                .ok_or_else(|| ErrorKind::LoanNotFound(loan_id.to_string())),
            Err(err) => Err(err.into()),
        }
    }

    /// Handle the disbursement of `available` shillings to `borrower` for `term`.
    ///
    /// Entries due on or before `term` are settled oldest first until the
    /// disbursement is used up. The event only counts as handled once every
    /// due entry has been settled or carried forward. After an error the
    /// event can be redelivered: it resumes with what is left of the
    /// disbursement. Redelivery of a handled event applies nothing.
    pub async fn on_disbursement_event(
        &self,
        borrower: &BorrowerId,
        term: TermId,
        available: Ugx,
    ) -> Result<Vec<AutomatedDeduction>, ErrorKind> {
        let mut run = self.schedule.begin_disbursement(borrower, term).await;
        if run.completed {
            info!(borrower = %borrower, term = %term, "disbursement already processed");
            return Ok(Vec::new());
        }
        let following = term.next();
        let carry_to = || following.ok_or(ErrorKind::FinalTermIneligible { term });
        let mut remaining = available.saturating_sub(run.withheld);
        let mut applied = Vec::new();

        for due in self.schedule.due_for(borrower, term).await {
            let Ok(mut entry) = self.schedule.lock(&due.loan_id).await else {
                continue;
            };
            if remaining == 0 {
                entry.term = carry_to()?;
                info!(loan = %entry.loan_id, term = %entry.term, "deduction carried forward");
                continue;
            }
            let short = following.is_none()
                && self
                    .ledger
                    .quote(&entry.loan_id)
                    .await
                    .is_ok_and(|owed| owed > remaining);
            if short {
                warn!(loan = %entry.loan_id, term = %term, "shortfall has no later term");
                return Err(ErrorKind::FinalTermIneligible { term });
            }

            match self.deduct(&entry.loan_id, term, remaining).await {
                Ok(Some((deduction, outstanding))) => {
                    remaining -= deduction.amount;
                    run.withheld += deduction.amount;
                    self.record(&deduction, outstanding);
                    if outstanding == 0 {
                        drop(entry);
                        self.schedule.remove(&due.loan_id);
                    } else {
                        entry.term = carry_to()?;
                        entry.amount = outstanding;
                        entry.scheduled_at = self.clock.now();
                        info!(
                            loan = %entry.loan_id,
                            term = %entry.term,
                            outstanding,
                            "shortfall carried forward"
                        );
                    }
                    applied.push(deduction);
                }
                Ok(None) => {
                    drop(entry);
                    self.schedule.remove(&due.loan_id);
                }
                Err(err) => {
                    warn!(loan = %entry.loan_id, error = %err, "deduction not applied");
                    return Err(err);
                }
            }
        }
        run.completed = true;
        Ok(applied)
    }

    /// Deduct up to `limit` from the loan, re-quoting if a concurrent payment
    /// moved the balance. `Ok(None)` means the loan no longer takes postings.
    async fn deduct(
        &self,
        loan_id: &LoanId,
        term: TermId,
        limit: Ugx,
    ) -> Result<Option<(AutomatedDeduction, Ugx)>, ErrorKind> {
        let mut last = None;
        for _ in 0..MAX_REQUOTES {
            let outstanding = match self.ledger.quote(loan_id).await {
                Ok(0) | Err(ErrorKind::LoanNotFound(_)) => return Ok(None),
                Ok(outstanding) => outstanding,
                Err(err) => return Err(err),
            };
            let amount = outstanding.min(limit);
            match self.ledger.apply_deduction(loan_id, amount).await {
                Ok(loan) => {
                    let deduction = AutomatedDeduction {
                        id: DeductionId::new(),
                        loan_id: loan.id,
                        borrower_id: loan.borrower_id.clone(),
                        amount,
                        term,
                        applied_at: self.clock.now(),
                    };
                    return Ok(Some((deduction, loan.outstanding())));
                }
                Err(ErrorKind::InvalidTarget(_)) => return Ok(None),
                Err(err @ ErrorKind::OverpaymentRejected { .. }) => last = Some(err),
                Err(err) => return Err(err),
            }
        }
        Err(last.unwrap_or(ErrorKind::InvalidAmount(0)))
    }

    fn record(&self, deduction: &AutomatedDeduction, outstanding: Ugx) {
        self.applied.append(deduction.clone());
        let receipt = self.receipts.issue(
            ReceiptSource::Deduction(deduction.id),
            &deduction.borrower_id,
            deduction.amount,
        );
        info!(
            loan = %deduction.loan_id,
            borrower = %deduction.borrower_id,
            term = %deduction.term,
            amount = deduction.amount,
            outstanding,
            "automated deduction applied"
        );
        self.events.publish(LedgerEvent::DeductionApplied {
            deduction_id: deduction.id,
            loan_id: deduction.loan_id,
            borrower_id: deduction.borrower_id.clone(),
            term: deduction.term,
            amount: deduction.amount,
            receipt_id: receipt.id,
            outstanding,
        });
    }

    pub async fn entry(&self, loan_id: &LoanId) -> Option<ScheduledDeduction> {
        self.schedule.get(loan_id).await
    }

    /// Pending entries ordered by term, then borrower.
    pub async fn upcoming(&self) -> Vec<ScheduledDeduction> {
        self.schedule.upcoming().await
    }

    pub fn for_loan(&self, loan_id: &LoanId) -> Vec<AutomatedDeduction> {
        self.applied.for_loan(loan_id)
    }

    pub fn all_applied(&self) -> Vec<AutomatedDeduction> {
        self.applied.all()
    }
}
