//! Loan and support request books.

use std::collections::HashMap;
use std::sync::{PoisonError, RwLock};

use aidledger_core::{BorrowerId, Loan, LoanId, SupportRequest, SupportRequestId};
use tokio::sync::OwnedMutexGuard;

use crate::StoreError;
use crate::keyed::Keyed;

/// Loans keyed by id, with a per-borrower index.
#[derive(Default)]
pub struct LoanBook {
    loans: Keyed<LoanId, Loan>,
    by_borrower: RwLock<HashMap<BorrowerId, Vec<LoanId>>>,
}

impl LoanBook {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, loan: Loan) -> Result<(), StoreError> {
        let borrower = loan.borrower_id.clone();
        let id = loan.id;
        self.loans.insert_new(id, loan)?;
        self.by_borrower
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .entry(borrower)
            .or_default()
            .push(id);
        Ok(())
    }

    pub async fn lock(&self, id: &LoanId) -> Result<OwnedMutexGuard<Loan>, StoreError> {
        self.loans.lock(id).await
    }

    pub async fn get(&self, id: &LoanId) -> Option<Loan> {
        self.loans.get(id).await
    }

    /// Every loan of one borrower, oldest first.
    pub async fn for_borrower(&self, borrower: &BorrowerId) -> Vec<Loan> {
        let ids: Vec<LoanId> = self
            .by_borrower
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(borrower)
            .cloned()
            .unwrap_or_default();
        let mut loans = Vec::with_capacity(ids.len());
        for id in &ids {
            if let Some(loan) = self.loans.get(id).await {
                loans.push(loan);
            }
        }
        loans.sort_by_key(|l| l.created_at);
        loans
    }

    pub fn ids(&self) -> Vec<LoanId> {
        self.loans.keys()
    }

    pub async fn all(&self) -> Vec<Loan> {
        self.loans.values().await
    }
}

#[derive(Default)]
pub struct SupportBook {
    requests: Keyed<SupportRequestId, SupportRequest>,
}

impl SupportBook {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, request: SupportRequest) -> Result<(), StoreError> {
        self.requests.insert_new(request.id, request)
    }

    pub async fn lock(
        &self,
        id: &SupportRequestId,
    ) -> Result<OwnedMutexGuard<SupportRequest>, StoreError> {
        self.requests.lock(id).await
    }

    pub async fn get(&self, id: &SupportRequestId) -> Option<SupportRequest> {
        self.requests.get(id).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use aidledger_core::{Guarantor, LoanStatus};
    use chrono::{Duration, Utc};

    fn loan(borrower: &str, age_secs: i64) -> Loan {
        Loan {
            id: LoanId::new(),
            borrower_id: BorrowerId::new(borrower),
            principal: 500_000,
            status: LoanStatus::Pending,
            created_at: Utc::now() - Duration::seconds(age_secs),
            consent: false,
            guarantor: Guarantor {
                name: "Okello Peter".into(),
                relation: "father".into(),
                phone: "+256772000000".into(),
            },
            purpose: None,
            supporting_document: None,
            deduction_term: "2026-S2".parse().unwrap(),
            paid_total: 0,
            deducted_total: 0,
        }
    }

    #[tokio::test]
    async fn for_borrower_is_indexed_and_ordered() {
        let book = LoanBook::new();
        let newer = loan("STU1", 10);
        let older = loan("STU1", 100);
        let other = loan("STU2", 5);
        book.insert(newer.clone()).unwrap();
        book.insert(older.clone()).unwrap();
        book.insert(other).unwrap();

        let loans = book.for_borrower(&BorrowerId::new("STU1")).await;
        assert_eq!(loans.len(), 2);
        assert_eq!(loans[0].id, older.id);
        assert_eq!(loans[1].id, newer.id);
        assert!(book.for_borrower(&BorrowerId::new("STU9")).await.is_empty());
    }

    #[tokio::test]
    async fn lock_mutates_in_place() {
        let book = LoanBook::new();
        let l = loan("STU1", 0);
        book.insert(l.clone()).unwrap();
        {
            let mut guard = book.lock(&l.id).await.unwrap();
            guard.status = LoanStatus::Approved;
        }
        assert_eq!(book.get(&l.id).await.unwrap().status, LoanStatus::Approved);
    }
}
