//! In-memory collaborators for tests.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Mutex, PoisonError};

use aidledger_core::{BorrowerId, Caller, EligibilityContext};
use async_trait::async_trait;

use crate::contract::{
    AcademicRecords, CollectionRequest, GatewayError, IdentityProvider, MobileMoney, PinStatus,
    PinStore, ProviderAck,
};

/// PIN store backed by a map of borrower → PIN. Counts verify calls.
#[derive(Default)]
pub struct FakePinStore {
    pins: Mutex<HashMap<BorrowerId, String>>,
    verify_calls: AtomicUsize,
}

impl FakePinStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_pin(self, borrower: &str, pin: &str) -> Self {
        self.set_pin(borrower, pin);
        self
    }

    pub fn set_pin(&self, borrower: &str, pin: &str) {
        self.pins
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(BorrowerId::new(borrower), pin.to_string());
    }

    pub fn verify_calls(&self) -> usize {
        self.verify_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl PinStore for FakePinStore {
    async fn status(&self, borrower: &BorrowerId) -> Result<PinStatus, GatewayError> {
        let has_pin = self
            .pins
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .contains_key(borrower);
        Ok(PinStatus { has_pin })
    }

    async fn verify(&self, borrower: &BorrowerId, pin: &str) -> Result<bool, GatewayError> {
        self.verify_calls.fetch_add(1, Ordering::SeqCst);
        let pins = self.pins.lock().unwrap_or_else(PoisonError::into_inner);
        Ok(pins.get(borrower).is_some_and(|stored| stored == pin))
    }
}

/// Provider that accepts every collection unless switched offline or hung.
#[derive(Default)]
pub struct FakeMobileMoney {
    offline: AtomicBool,
    hung: AtomicBool,
    requests: Mutex<Vec<CollectionRequest>>,
}

impl FakeMobileMoney {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::SeqCst);
    }

    /// Record requests but never answer them.
    pub fn set_hung(&self, hung: bool) {
        self.hung.store(hung, Ordering::SeqCst);
    }

    pub fn requests(&self) -> Vec<CollectionRequest> {
        self.requests
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

#[async_trait]
impl MobileMoney for FakeMobileMoney {
    async fn request_collection(
        &self,
        request: &CollectionRequest,
    ) -> Result<ProviderAck, GatewayError> {
        if self.offline.load(Ordering::SeqCst) {
            return Err(GatewayError::Unavailable("provider offline".into()));
        }
        self.requests
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(request.clone());
        if self.hung.load(Ordering::SeqCst) {
            std::future::pending::<()>().await;
        }
        Ok(ProviderAck {
            provider_ref: format!("FAKE-{}", request.reference),
        })
    }
}

/// Fixed token → caller table.
#[derive(Default)]
pub struct StaticIdentities {
    tokens: HashMap<String, Caller>,
}

impl StaticIdentities {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, token: &str, caller: Caller) -> Self {
        self.tokens.insert(token.to_string(), caller);
        self
    }
}

#[async_trait]
impl IdentityProvider for StaticIdentities {
    async fn resolve(&self, token: &str) -> Result<Caller, GatewayError> {
        self.tokens.get(token).cloned().ok_or(GatewayError::Unauthorized)
    }
}

/// Every student has the same standing.
pub struct FixedStanding(pub EligibilityContext);

#[async_trait]
impl AcademicRecords for FixedStanding {
    async fn standing(&self, _borrower: &BorrowerId) -> Result<EligibilityContext, GatewayError> {
        Ok(self.0)
    }
}
