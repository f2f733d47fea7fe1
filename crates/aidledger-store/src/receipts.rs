//! Append-only receipt book, idempotent by source.

use std::collections::HashMap;
use std::sync::{PoisonError, RwLock};

use aidledger_core::{Receipt, ReceiptId, ReceiptSource};

#[derive(Default)]
struct Inner {
    by_source: HashMap<ReceiptSource, Receipt>,
    by_id: HashMap<ReceiptId, ReceiptSource>,
}

#[derive(Default)]
pub struct ReceiptBook {
    inner: RwLock<Inner>,
}

impl ReceiptBook {
    pub fn new() -> Self {
        Self::default()
    }

    /// Return the receipt for `source`, creating it with `make` only if none
    /// exists. `make` runs under the write lock and must not block.
    pub fn issue_once(&self, source: ReceiptSource, make: impl FnOnce() -> Receipt) -> (Receipt, bool) {
        let mut inner = self.inner.write().unwrap_or_else(PoisonError::into_inner);
        if let Some(existing) = inner.by_source.get(&source) {
            return (existing.clone(), false);
        }
        let receipt = make();
        inner.by_id.insert(receipt.id.clone(), source);
        inner.by_source.insert(source, receipt.clone());
        (receipt, true)
    }

    pub fn by_source(&self, source: &ReceiptSource) -> Option<Receipt> {
        self.inner
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .by_source
            .get(source)
            .cloned()
    }

    pub fn by_id(&self, id: &ReceiptId) -> Option<Receipt> {
        let inner = self.inner.read().unwrap_or_else(PoisonError::into_inner);
        let source = inner.by_id.get(id)?;
        inner.by_source.get(source).cloned()
    }

    pub fn len(&self) -> usize {
        self.inner
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .by_source
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
