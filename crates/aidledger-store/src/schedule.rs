//! Deduction schedule and the immutable record of applied deductions.

use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};

use aidledger_core::{AutomatedDeduction, BorrowerId, LoanId, ScheduledDeduction, TermId, Ugx};
use tokio::sync::{Mutex, OwnedMutexGuard};

use crate::StoreError;
use crate::keyed::Keyed;

/// Progress of one `(borrower, term)` disbursement event.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct DisbursementRun {
    /// Shillings of the disbursement already withheld.
    pub withheld: Ugx,
    /// Every due entry was settled or carried forward.
    pub completed: bool,
}

/// Pending deductions, at most one per loan.
#[derive(Default)]
pub struct ScheduleBook {
    entries: Keyed<LoanId, ScheduledDeduction>,
    runs: RwLock<HashMap<(BorrowerId, TermId), Arc<Mutex<DisbursementRun>>>>,
}

impl ScheduleBook {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, entry: ScheduledDeduction) -> Result<(), StoreError> {
        self.entries.insert_new(entry.loan_id, entry)
    }

    pub async fn lock(
        &self,
        loan: &LoanId,
    ) -> Result<OwnedMutexGuard<ScheduledDeduction>, StoreError> {
        self.entries.lock(loan).await
    }

    pub async fn get(&self, loan: &LoanId) -> Option<ScheduledDeduction> {
        self.entries.get(loan).await
    }

    pub fn remove(&self, loan: &LoanId) -> bool {
        self.entries.remove(loan)
    }

    /// Entries for a borrower that are due at or before `term`, oldest term first.
    pub async fn due_for(&self, borrower: &BorrowerId, term: TermId) -> Vec<ScheduledDeduction> {
        let mut due: Vec<ScheduledDeduction> = self
            .entries
            .values()
            .await
            .into_iter()
            .filter(|e| &e.borrower_id == borrower && e.term <= term)
            .collect();
        due.sort_by(|a, b| a.term.cmp(&b.term).then(a.scheduled_at.cmp(&b.scheduled_at)));
        due
    }

    /// All pending entries ordered by term, then borrower.
    pub async fn upcoming(&self) -> Vec<ScheduledDeduction> {
        let mut all = self.entries.values().await;
        all.sort_by(|a, b| {
            a.term
                .cmp(&b.term)
                .then_with(|| a.borrower_id.cmp(&b.borrower_id))
                .then(a.scheduled_at.cmp(&b.scheduled_at))
        });
        all
    }

    /// Take the disbursement event for `(borrower, term)`. Deliveries of the
    /// same event queue on the guard, and a retry after a failure sees how
    /// much was already withheld.
    pub async fn begin_disbursement(
        &self,
        borrower: &BorrowerId,
        term: TermId,
    ) -> OwnedMutexGuard<DisbursementRun> {
        let slot = self
            .runs
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .entry((borrower.clone(), term))
            .or_default()
            .clone();
        slot.lock_owned().await
    }
}

/// Applied deductions. Append-only.
#[derive(Default)]
pub struct DeductionBook {
    applied: RwLock<Vec<AutomatedDeduction>>,
}

impl DeductionBook {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn append(&self, deduction: AutomatedDeduction) {
        self.applied
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .push(deduction);
    }

    pub fn for_loan(&self, loan: &LoanId) -> Vec<AutomatedDeduction> {
        self.applied
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .filter(|d| &d.loan_id == loan)
            .cloned()
            .collect()
    }

    pub fn all(&self) -> Vec<AutomatedDeduction> {
        self.applied
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}
