//! Loan ledger: issuance eligibility, status transitions and postings.
//!
//! Every mutation of a loan happens under that loan's own lock, so two
//! postings racing for the same balance are serialised and the second sees
//! the first's result. `outstanding` is never stored; it is always derived by
//! [`Loan::outstanding`].

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};

use aidledger_core::{
    BalanceSummary, BorrowerId, Caller, Clock, EligibilityContext, ErrorKind, LedgerConfig,
    LedgerEvent, Loan, LoanBalance, LoanId, LoanStatus, LoanTerms, TermId, Ugx,
};
use aidledger_store::{LoanBook, StoreError};
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};
use tracing::{info, warn};

use crate::events::EventHub;

/// Which running total a posting lands in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Posting {
    Payment,
    Deduction,
}

impl Posting {
    fn as_str(&self) -> &'static str {
        match self {
            Self::Payment => "payment",
            Self::Deduction => "deduction",
        }
    }
}

pub struct LoanLedger {
    loans: Arc<LoanBook>,
    clock: Arc<dyn Clock>,
    max_loan_amount: Ugx,
    events: EventHub,
    /// Held across the overdue check and insert of `issue`, and while the
    /// overdue sweep marks that borrower's loans.
    borrowers: Mutex<HashMap<BorrowerId, Arc<AsyncMutex<()>>>>,
}

impl LoanLedger {
    pub fn new(
        loans: Arc<LoanBook>,
        clock: Arc<dyn Clock>,
        config: &LedgerConfig,
        events: EventHub,
    ) -> Self {
        Self {
            loans,
            clock,
            max_loan_amount: config.max_loan_amount,
            events,
            borrowers: Mutex::new(HashMap::new()),
        }
    }

    pub fn max_loan_amount(&self) -> Ugx {
        self.max_loan_amount
    }

    async fn lock_borrower(&self, borrower: &BorrowerId) -> OwnedMutexGuard<()> {
        let slot = self
            .borrowers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .entry(borrower.clone())
            .or_default()
            .clone();
        slot.lock_owned().await
    }

    async fn lock(&self, id: &LoanId) -> Result<OwnedMutexGuard<Loan>, ErrorKind> {
        self.loans.lock(id).await.map_err(|err| match err {
            StoreError::NotFound(_) => ErrorKind::LoanNotFound(id.to_string()),
            other => other.into(),
        })
    }

    /// Create a pending loan for the caller.
    ///
    /// Checks run in a fixed order so the same bad application always gets
    /// the same error: amount, guarantor, cap, final term, overdue block.
    pub async fn issue(
        &self,
        caller: &Caller,
        terms: LoanTerms,
        standing: &EligibilityContext,
    ) -> Result<Loan, ErrorKind> {
        let borrower = caller.borrower_id.clone();
        if terms.principal == 0 {
            return Err(ErrorKind::InvalidAmount(0));
        }
        if !terms.guarantor.is_complete() {
            return Err(ErrorKind::MissingGuarantor);
        }
        if terms.principal > self.max_loan_amount {
            return Err(ErrorKind::LoanCapExceeded {
                requested: terms.principal,
                cap: self.max_loan_amount,
            });
        }
        if !standing.has_following_term() {
            return Err(ErrorKind::FinalTermIneligible {
                term: standing.current_term,
            });
        }
        let deduction_term = standing
            .current_term
            .next()
            .ok_or(ErrorKind::FinalTermIneligible {
                term: standing.current_term,
            })?;
        let _borrower = self.lock_borrower(&borrower).await;
        if self.is_blocked(&borrower).await {
            info!(borrower = %borrower, "issuance refused: overdue loan on file");
            return Err(ErrorKind::BorrowerBlocked);
        }

        let loan = Loan {
            id: LoanId::new(),
            borrower_id: borrower,
            principal: terms.principal,
            status: LoanStatus::Pending,
            created_at: self.clock.now(),
            consent: terms.consent,
            guarantor: terms.guarantor,
            purpose: terms.purpose,
            supporting_document: terms.supporting_document,
            deduction_term,
            paid_total: 0,
            deducted_total: 0,
        };
        self.loans.insert(loan.clone())?;
        info!(
            loan = %loan.id,
            borrower = %loan.borrower_id,
            principal = loan.principal,
            deduction_term = %loan.deduction_term,
            "loan issued"
        );
        Ok(loan)
    }

    pub async fn is_blocked(&self, borrower: &BorrowerId) -> bool {
        self.loans
            .for_borrower(borrower)
            .await
            .iter()
            .any(|l| l.status == LoanStatus::Overdue)
    }

    /// Staff approval of a pending loan.
    pub async fn approve(&self, caller: &Caller, id: &LoanId) -> Result<Loan, ErrorKind> {
        caller.require_staff()?;
        let mut loan = self.lock(id).await?;
        self.transition(&mut loan, LoanStatus::Approved)?;
        Ok(loan.clone())
    }

    pub async fn reject(&self, caller: &Caller, id: &LoanId) -> Result<Loan, ErrorKind> {
        caller.require_staff()?;
        let mut loan = self.lock(id).await?;
        self.transition(&mut loan, LoanStatus::Rejected)?;
        Ok(loan.clone())
    }

    /// The borrower accepts the full-amount deduction from the next disbursement.
    pub async fn record_consent(&self, caller: &Caller, id: &LoanId) -> Result<Loan, ErrorKind> {
        let mut loan = self.lock(id).await?;
        caller.may_act_for(&loan.borrower_id)?;
        if matches!(loan.status, LoanStatus::Rejected | LoanStatus::Paid) {
            return Err(ErrorKind::InvalidTransition {
                from: loan.status,
                to: LoanStatus::Active,
            });
        }
        if !loan.consent {
            loan.consent = true;
            info!(loan = %loan.id, "deduction consent recorded");
        }
        Ok(loan.clone())
    }

    /// Move an approved loan to active. Requires consent.
    pub async fn activate(&self, id: &LoanId) -> Result<Loan, ErrorKind> {
        let mut loan = self.lock(id).await?;
        if loan.status == LoanStatus::Approved && !loan.consent {
            return Err(ErrorKind::ConsentRequired);
        }
        self.transition(&mut loan, LoanStatus::Active)?;
        Ok(loan.clone())
    }

    /// Current outstanding balance.
    pub async fn quote(&self, id: &LoanId) -> Result<Ugx, ErrorKind> {
        Ok(self.lock(id).await?.outstanding())
    }

    pub async fn loan(&self, id: &LoanId) -> Result<Loan, ErrorKind> {
        self.loans
            .get(id)
            .await
            .ok_or_else(|| ErrorKind::LoanNotFound(id.to_string()))
    }

    /// Fetch a loan on behalf of `caller`, who must own it or be staff.
    pub async fn loan_for(&self, caller: &Caller, id: &LoanId) -> Result<Loan, ErrorKind> {
        let loan = self.loan(id).await?;
        caller.may_act_for(&loan.borrower_id)?;
        Ok(loan)
    }

    pub async fn loans_of(&self, borrower: &BorrowerId) -> Vec<Loan> {
        self.loans.for_borrower(borrower).await
    }

    /// Whether the loan can currently receive a payment of `amount`.
    pub async fn check_payable(&self, id: &LoanId, amount: Ugx) -> Result<Ugx, ErrorKind> {
        let loan = self.lock(id).await?;
        if !loan.status.accepts_postings() {
            return Err(ErrorKind::InvalidTarget(format!("loan {id} is {}", loan.status)));
        }
        let outstanding = loan.outstanding();
        if amount > outstanding {
            return Err(ErrorKind::OverpaymentRejected {
                amount,
                outstanding,
            });
        }
        Ok(outstanding)
    }

    pub async fn apply_payment(&self, id: &LoanId, amount: Ugx) -> Result<Loan, ErrorKind> {
        self.post(id, amount, Posting::Payment).await
    }

    pub async fn apply_deduction(&self, id: &LoanId, amount: Ugx) -> Result<Loan, ErrorKind> {
        self.post(id, amount, Posting::Deduction).await
    }

    /// Compare-and-apply under the loan lock. An amount above the current
    /// outstanding is rejected whole; nothing is partially applied.
    async fn post(&self, id: &LoanId, amount: Ugx, kind: Posting) -> Result<Loan, ErrorKind> {
        if amount == 0 {
            return Err(ErrorKind::InvalidAmount(0));
        }
        let mut loan = self.lock(id).await?;
        if !loan.status.accepts_postings() {
            return Err(ErrorKind::InvalidTarget(format!("loan {id} is {}", loan.status)));
        }
        let outstanding = loan.outstanding();
        if amount > outstanding {
            warn!(loan = %id, amount, outstanding, kind = kind.as_str(), "posting rejected");
            return Err(ErrorKind::OverpaymentRejected {
                amount,
                outstanding,
            });
        }
        match kind {
            Posting::Payment => loan.paid_total += amount,
            Posting::Deduction => loan.deducted_total += amount,
        }
        info!(
            loan = %id,
            amount,
            outstanding = loan.outstanding(),
            kind = kind.as_str(),
            "posting applied"
        );
        if loan.outstanding() == 0 {
            self.transition(&mut loan, LoanStatus::Paid)?;
        } else if loan.status == LoanStatus::Overdue {
            self.transition(&mut loan, LoanStatus::Active)?;
        }
        Ok(loan.clone())
    }

    /// Mark active loans overdue at the start of `term` when their deduction
    /// term has arrived and nothing has been posted to them.
    pub async fn sweep_overdue(&self, term: TermId) -> Vec<LoanId> {
        let mut marked = Vec::new();
        for id in self.loans.ids() {
            let Some(borrower) = self.loans.get(&id).await.map(|l| l.borrower_id) else {
                continue;
            };
            let _borrower = self.lock_borrower(&borrower).await;
            let Ok(mut loan) = self.lock(&id).await else {
                continue;
            };
            if loan.status == LoanStatus::Active
                && loan.deduction_term <= term
                && !loan.has_postings()
                && self.transition(&mut loan, LoanStatus::Overdue).is_ok()
            {
                marked.push(id);
            }
        }
        info!(term = %term, marked = marked.len(), "overdue sweep finished");
        marked
    }

    pub async fn balance_summary(
        &self,
        caller: &Caller,
        borrower: &BorrowerId,
    ) -> Result<BalanceSummary, ErrorKind> {
        caller.may_act_for(borrower)?;
        let loans = self.loans.for_borrower(borrower).await;
        let disbursed: Vec<&Loan> = loans
            .iter()
            .filter(|l| {
                matches!(
                    l.status,
                    LoanStatus::Active | LoanStatus::Overdue | LoanStatus::Paid
                )
            })
            .collect();
        Ok(BalanceSummary {
            borrower_id: borrower.clone(),
            total_borrowed: disbursed.iter().map(|l| l.principal).sum(),
            total_outstanding: disbursed.iter().map(|l| l.outstanding()).sum(),
            total_paid: disbursed
                .iter()
                .map(|l| l.paid_total + l.deducted_total)
                .sum(),
            is_blocked: loans.iter().any(|l| l.status == LoanStatus::Overdue),
            loans: loans.iter().map(LoanBalance::from).collect(),
        })
    }

    fn transition(&self, loan: &mut Loan, to: LoanStatus) -> Result<(), ErrorKind> {
        let from = loan.status;
        if !from.can_become(to) {
            return Err(ErrorKind::InvalidTransition { from, to });
        }
        loan.status = to;
        info!(loan = %loan.id, from = %from, to = %to, "loan status changed");
        self.events.publish(LedgerEvent::LoanStatusChanged {
            loan_id: loan.id,
            from,
            to,
        });
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use aidledger_core::{Guarantor, SystemClock};

    fn terms(principal: Ugx) -> LoanTerms {
        LoanTerms {
            principal,
            guarantor: Guarantor {
                name: "Akello Grace".into(),
                relation: "mother".into(),
                phone: "+256701234567".into(),
            },
            consent: true,
            purpose: Some("tuition".into()),
            supporting_document: None,
        }
    }

    fn standing(current: &str, last: &str) -> EligibilityContext {
        EligibilityContext {
            current_term: current.parse().unwrap(),
            final_term: last.parse().unwrap(),
        }
    }

    fn ledger() -> LoanLedger {
        LoanLedger::new(
            Arc::new(LoanBook::new()),
            Arc::new(SystemClock),
            &LedgerConfig::default(),
            EventHub::new(16),
        )
    }

    async fn active_loan(ledger: &LoanLedger, principal: Ugx) -> Loan {
        let me = Caller::borrower("STU1");
        let loan = ledger
            .issue(&me, terms(principal), &standing("2026-S1", "2028-S2"))
            .await
            .unwrap();
        ledger.approve(&Caller::staff("OPS1"), &loan.id).await.unwrap();
        ledger.activate(&loan.id).await.unwrap()
    }

    #[tokio::test]
    async fn cap_boundary() {
        let ledger = ledger();
        let me = Caller::borrower("STU1");
        let ctx = standing("2026-S1", "2028-S2");
        let ok = ledger.issue(&me, terms(3_200_000), &ctx).await.unwrap();
        assert_eq!(ok.status, LoanStatus::Pending);
        assert_eq!(ok.deduction_term.to_string(), "2026-S2");

        let err = ledger.issue(&me, terms(3_300_000), &ctx).await.unwrap_err();
        assert_eq!(
            err,
            ErrorKind::LoanCapExceeded {
                requested: 3_300_000,
                cap: 3_200_000
            }
        );
        assert_eq!(err.category(), aidledger_core::ErrorCategory::Eligibility);
    }

    #[tokio::test]
    async fn final_term_never_reaches_pending() {
        let ledger = ledger();
        let me = Caller::borrower("STU1");
        let err = ledger
            .issue(&me, terms(500_000), &standing("2028-S2", "2028-S2"))
            .await
            .unwrap_err();
        assert!(matches!(err, ErrorKind::FinalTermIneligible { .. }));
        assert!(ledger.loans_of(&me.borrower_id).await.is_empty());
    }

    #[tokio::test]
    async fn incomplete_guarantor_rejected() {
        let ledger = ledger();
        let mut t = terms(500_000);
        t.guarantor.phone = "  ".into();
        let err = ledger
            .issue(&Caller::borrower("STU1"), t, &standing("2026-S1", "2028-S2"))
            .await
            .unwrap_err();
        assert_eq!(err, ErrorKind::MissingGuarantor);
    }

    #[tokio::test]
    async fn activation_needs_consent() {
        let ledger = ledger();
        let mut t = terms(500_000);
        t.consent = false;
        let me = Caller::borrower("STU1");
        let loan = ledger
            .issue(&me, t, &standing("2026-S1", "2028-S2"))
            .await
            .unwrap();
        ledger.approve(&Caller::staff("OPS1"), &loan.id).await.unwrap();
        assert_eq!(ledger.activate(&loan.id).await, Err(ErrorKind::ConsentRequired));

        ledger.record_consent(&me, &loan.id).await.unwrap();
        assert_eq!(
            ledger.activate(&loan.id).await.unwrap().status,
            LoanStatus::Active
        );
    }

    #[tokio::test]
    async fn only_staff_approve() {
        let ledger = ledger();
        let me = Caller::borrower("STU1");
        let loan = ledger
            .issue(&me, terms(500_000), &standing("2026-S1", "2028-S2"))
            .await
            .unwrap();
        assert_eq!(ledger.approve(&me, &loan.id).await, Err(ErrorKind::Forbidden));
        assert_eq!(
            ledger
                .reject(&Caller::staff("OPS1"), &loan.id)
                .await
                .unwrap()
                .status,
            LoanStatus::Rejected
        );
        assert!(matches!(
            ledger.approve(&Caller::staff("OPS1"), &loan.id).await,
            Err(ErrorKind::InvalidTransition { .. })
        ));
    }

    #[tokio::test]
    async fn overpayment_rejected_and_balance_unchanged() {
        let ledger = ledger();
        let loan = active_loan(&ledger, 800_000).await;
        let err = ledger.apply_payment(&loan.id, 800_001).await.unwrap_err();
        assert_eq!(
            err,
            ErrorKind::OverpaymentRejected {
                amount: 800_001,
                outstanding: 800_000
            }
        );
        assert_eq!(ledger.quote(&loan.id).await.unwrap(), 800_000);
    }

    #[tokio::test]
    async fn full_settlement_marks_paid() {
        let ledger = ledger();
        let loan = active_loan(&ledger, 800_000).await;
        ledger.apply_deduction(&loan.id, 300_000).await.unwrap();
        let paid = ledger.apply_payment(&loan.id, 500_000).await.unwrap();
        assert_eq!(paid.status, LoanStatus::Paid);
        assert_eq!(paid.outstanding(), 0);
        assert!(matches!(
            ledger.apply_payment(&loan.id, 1).await,
            Err(ErrorKind::InvalidTarget(_))
        ));
    }

    #[tokio::test]
    async fn concurrent_postings_never_go_negative() {
        let ledger = Arc::new(ledger());
        let loan = active_loan(&ledger, 800_000).await;
        let tasks: Vec<_> = (0..2)
            .map(|_| {
                let ledger = Arc::clone(&ledger);
                let id = loan.id;
                tokio::spawn(async move { ledger.apply_payment(&id, 500_000).await })
            })
            .collect();
        let results: Vec<_> = futures::future::join_all(tasks)
            .await
            .into_iter()
            .map(|r| r.unwrap())
            .collect();
        assert_eq!(results.iter().filter(|r| r.is_ok()).count(), 1);
        assert!(results
            .iter()
            .any(|r| matches!(r, Err(ErrorKind::OverpaymentRejected { .. }))));
        assert_eq!(ledger.quote(&loan.id).await.unwrap(), 300_000);
    }

    #[tokio::test]
    async fn overdue_blocks_issuance_until_cleared() {
        let ledger = ledger();
        let me = Caller::borrower("STU1");
        let loan = active_loan(&ledger, 400_000).await;

        assert!(ledger.sweep_overdue("2026-S1".parse().unwrap()).await.is_empty());
        let marked = ledger.sweep_overdue("2026-S2".parse().unwrap()).await;
        assert_eq!(marked, vec![loan.id]);
        assert_eq!(ledger.loan(&loan.id).await.unwrap().status, LoanStatus::Overdue);

        let err = ledger
            .issue(&me, terms(1_000), &standing("2026-S2", "2028-S2"))
            .await
            .unwrap_err();
        assert_eq!(err, ErrorKind::BorrowerBlocked);

        let summary = ledger.balance_summary(&me, &me.borrower_id).await.unwrap();
        assert!(summary.is_blocked);

        let cleared = ledger.apply_payment(&loan.id, 100_000).await.unwrap();
        assert_eq!(cleared.status, LoanStatus::Active);
        assert!(ledger
            .issue(&me, terms(1_000), &standing("2026-S2", "2028-S2"))
            .await
            .is_ok());
    }

    #[tokio::test]
    async fn issuance_waits_for_borrower_sweep() {
        let ledger = Arc::new(ledger());
        let me = Caller::borrower("STU1");
        let loan = active_loan(&ledger, 400_000).await;

        let held = ledger.lock_borrower(&me.borrower_id).await;
        let sweep = tokio::spawn({
            let ledger = Arc::clone(&ledger);
            async move { ledger.sweep_overdue("2026-S2".parse().unwrap()).await }
        });
        tokio::task::yield_now().await;
        let issue = tokio::spawn({
            let ledger = Arc::clone(&ledger);
            let me = me.clone();
            async move {
                ledger
                    .issue(&me, terms(1_000), &standing("2026-S2", "2028-S2"))
                    .await
            }
        });
        tokio::task::yield_now().await;
        assert_eq!(ledger.loan(&loan.id).await.unwrap().status, LoanStatus::Active);
        assert_eq!(ledger.loans_of(&me.borrower_id).await.len(), 1);

        drop(held);
        assert_eq!(sweep.await.unwrap(), vec![loan.id]);
        assert_eq!(issue.await.unwrap(), Err(ErrorKind::BorrowerBlocked));
        assert_eq!(ledger.loans_of(&me.borrower_id).await.len(), 1);
    }

    #[tokio::test]
    async fn balance_summary_totals() {
        let ledger = ledger();
        let me = Caller::borrower("STU1");
        let loan = active_loan(&ledger, 800_000).await;
        ledger.apply_payment(&loan.id, 200_000).await.unwrap();
        ledger.apply_deduction(&loan.id, 100_000).await.unwrap();
        // A pending application is listed but not counted as borrowed.
        ledger
            .issue(&me, terms(50_000), &standing("2026-S1", "2028-S2"))
            .await
            .unwrap();

        let summary = ledger.balance_summary(&me, &me.borrower_id).await.unwrap();
        assert_eq!(summary.total_borrowed, 800_000);
        assert_eq!(summary.total_paid, 300_000);
        assert_eq!(summary.total_outstanding, 500_000);
        assert_eq!(
            summary.total_outstanding,
            summary.total_borrowed - summary.total_paid
        );
        assert_eq!(summary.loans.len(), 2);
        assert!(!summary.is_blocked);

        assert_eq!(
            ledger
                .balance_summary(&Caller::borrower("STU2"), &me.borrower_id)
                .await,
            Err(ErrorKind::Forbidden)
        );
    }

    #[tokio::test]
    async fn status_changes_are_published() {
        let hub = EventHub::new(16);
        let ledger = LoanLedger::new(
            Arc::new(LoanBook::new()),
            Arc::new(SystemClock),
            &LedgerConfig::default(),
            hub.clone(),
        );
        let mut rx = hub.subscribe();
        let loan = active_loan(&ledger, 10_000).await;
        assert_eq!(
            rx.recv().await.unwrap(),
            LedgerEvent::LoanStatusChanged {
                loan_id: loan.id,
                from: LoanStatus::Pending,
                to: LoanStatus::Approved
            }
        );
        assert_eq!(
            rx.recv().await.unwrap(),
            LedgerEvent::LoanStatusChanged {
                loan_id: loan.id,
                from: LoanStatus::Approved,
                to: LoanStatus::Active
            }
        );
    }
}
