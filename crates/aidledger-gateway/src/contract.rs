//! Contracts for the external collaborators the ledger depends on.

use aidledger_core::{BorrowerId, Caller, EligibilityContext, ErrorKind, Provider, Reference, Ugx};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum GatewayError {
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("server returned {status}: {body}")]
    Server { status: u16, body: String },
    #[error("JSON parse error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("credentials rejected")]
    Unauthorized,
    #[error("unavailable: {0}")]
    Unavailable(String),
}

impl From<GatewayError> for ErrorKind {
    fn from(err: GatewayError) -> Self {
        match err {
            GatewayError::Unauthorized => ErrorKind::Unauthenticated,
            other => ErrorKind::Provider(other.to_string()),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PinStatus {
    pub has_pin: bool,
}

/// Push-payment request sent to the mobile-money provider.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CollectionRequest {
    pub reference: Reference,
    pub payer: BorrowerId,
    pub amount: Ugx,
    pub phone: String,
    pub provider: Provider,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProviderAck {
    pub provider_ref: String,
}

/// The PIN credential store. Verification is a stateless call; nothing is
/// cached on this side.
#[async_trait]
pub trait PinStore: Send + Sync {
    async fn status(&self, borrower: &BorrowerId) -> Result<PinStatus, GatewayError>;

    /// `Ok(false)` means the PIN was wrong; `Err` means the store could not answer.
    async fn verify(&self, borrower: &BorrowerId, pin: &str) -> Result<bool, GatewayError>;
}

/// Mobile-money provider (MTN, Airtel).
#[async_trait]
pub trait MobileMoney: Send + Sync {
    async fn request_collection(&self, request: &CollectionRequest)
    -> Result<ProviderAck, GatewayError>;
}

/// Resolves bearer tokens into callers.
#[async_trait]
pub trait IdentityProvider: Send + Sync {
    async fn resolve(&self, token: &str) -> Result<Caller, GatewayError>;
}

/// Registry view of a student's programme.
#[async_trait]
pub trait AcademicRecords: Send + Sync {
    async fn standing(&self, borrower: &BorrowerId) -> Result<EligibilityContext, GatewayError>;
}
