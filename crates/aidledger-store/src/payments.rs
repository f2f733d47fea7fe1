//! Payment transaction book. Transactions are never deleted.

use std::collections::HashMap;
use std::sync::{PoisonError, RwLock};

use aidledger_core::{PaymentId, PaymentTransaction, Reference};
use tokio::sync::OwnedMutexGuard;

use crate::StoreError;
use crate::keyed::Keyed;

#[derive(Default)]
pub struct TransactionBook {
    by_reference: Keyed<Reference, PaymentTransaction>,
    by_payment_id: RwLock<HashMap<PaymentId, Reference>>,
}

impl TransactionBook {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a new transaction. Fails with [`StoreError::Duplicate`] if the
    /// reference is already taken.
    pub fn insert(&self, txn: PaymentTransaction) -> Result<(), StoreError> {
        let id = txn.id;
        let reference = txn.reference.clone();
        self.by_reference.insert_new(reference.clone(), txn)?;
        self.by_payment_id
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(id, reference);
        Ok(())
    }

    pub fn contains(&self, reference: &Reference) -> bool {
        self.by_reference.contains(reference)
    }

    pub async fn lock(
        &self,
        reference: &Reference,
    ) -> Result<OwnedMutexGuard<PaymentTransaction>, StoreError> {
        self.by_reference.lock(reference).await
    }

    pub async fn get(&self, reference: &Reference) -> Option<PaymentTransaction> {
        self.by_reference.get(reference).await
    }

    pub fn reference_for(&self, id: &PaymentId) -> Option<Reference> {
        self.by_payment_id
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(id)
            .cloned()
    }

    pub async fn by_payment_id(&self, id: &PaymentId) -> Option<PaymentTransaction> {
        let reference = self.reference_for(id)?;
        self.get(&reference).await
    }

    pub fn references(&self) -> Vec<Reference> {
        self.by_reference.keys()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use aidledger_core::{BorrowerId, LoanId, PaymentTarget, Phase, Provider};
    use chrono::Utc;

    fn txn(reference: &str) -> PaymentTransaction {
        PaymentTransaction {
            id: PaymentId::new(),
            reference: reference.parse().unwrap(),
            payer: BorrowerId::new("STU1"),
            amount: 100_000,
            target: PaymentTarget::Loan(LoanId::new()),
            provider: Provider::Mtn,
            payer_contact: "+256770000000".into(),
            phase: Phase::Created,
            created_at: Utc::now(),
            prompt_expires_at: None,
            authorized_at: None,
            pin_failures: 0,
            confirmed_at: None,
            failure: None,
            confirmation: None,
            provider_ref: None,
        }
    }

    #[tokio::test]
    async fn duplicate_reference_rejected() {
        let book = TransactionBook::new();
        book.insert(txn("LOAN-STU1-1")).unwrap();
        assert!(matches!(
            book.insert(txn("LOAN-STU1-1")),
            Err(StoreError::Duplicate(_))
        ));
    }

    #[tokio::test]
    async fn lookup_by_payment_id() {
        let book = TransactionBook::new();
        let t = txn("LOAN-STU1-2");
        book.insert(t.clone()).unwrap();
        let found = book.by_payment_id(&t.id).await.unwrap();
        assert_eq!(found.reference, t.reference);
        assert!(book.by_payment_id(&PaymentId::new()).await.is_none());
    }
}
