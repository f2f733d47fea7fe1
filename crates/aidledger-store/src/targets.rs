//! Donation causes and paid events, the non-loan payment targets.

use aidledger_core::Ugx;
use tokio::sync::OwnedMutexGuard;

use crate::StoreError;
use crate::keyed::Keyed;

/// Running total for one cause or event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Aggregate {
    pub id: String,
    pub title: String,
    /// Fixed registration fee; `None` for open-amount donations.
    pub fee: Option<Ugx>,
    pub open: bool,
    pub total: Ugx,
    pub contributions: u64,
}

impl Aggregate {
    pub fn cause(id: impl Into<String>, title: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            title: title.into(),
            fee: None,
            open: true,
            total: 0,
            contributions: 0,
        }
    }

    pub fn event(id: impl Into<String>, title: impl Into<String>, fee: Ugx) -> Self {
        Self {
            fee: Some(fee),
            ..Self::cause(id, title)
        }
    }
}

#[derive(Default)]
pub struct TargetRegistry {
    causes: Keyed<String, Aggregate>,
    events: Keyed<String, Aggregate>,
}

impl TargetRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_cause(&self, cause: Aggregate) -> Result<(), StoreError> {
        self.causes.insert_new(cause.id.clone(), cause)
    }

    pub fn add_event(&self, event: Aggregate) -> Result<(), StoreError> {
        self.events.insert_new(event.id.clone(), event)
    }

    pub async fn cause(&self, id: &str) -> Option<Aggregate> {
        self.causes.get(&id.to_string()).await
    }

    pub async fn event(&self, id: &str) -> Option<Aggregate> {
        self.events.get(&id.to_string()).await
    }

    pub async fn lock_cause(&self, id: &str) -> Result<OwnedMutexGuard<Aggregate>, StoreError> {
        self.causes.lock(&id.to_string()).await
    }

    pub async fn lock_event(&self, id: &str) -> Result<OwnedMutexGuard<Aggregate>, StoreError> {
        self.events.lock(&id.to_string()).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn cause_and_event_are_separate_namespaces() {
        let registry = TargetRegistry::new();
        registry.add_cause(Aggregate::cause("gala", "Scholarship fund")).unwrap();
        registry.add_event(Aggregate::event("gala", "Alumni gala", 50_000)).unwrap();

        assert_eq!(registry.cause("gala").await.unwrap().fee, None);
        assert_eq!(registry.event("gala").await.unwrap().fee, Some(50_000));
        assert!(registry.add_cause(Aggregate::cause("gala", "dup")).is_err());
    }

    #[tokio::test]
    async fn totals_accumulate_under_lock() {
        let registry = TargetRegistry::new();
        registry.add_cause(Aggregate::cause("library", "Library")).unwrap();
        {
            let mut cause = registry.lock_cause("library").await.unwrap();
            cause.total += 20_000;
            cause.contributions += 1;
        }
        let cause = registry.cause("library").await.unwrap();
        assert_eq!((cause.total, cause.contributions), (20_000, 1));
    }
}
