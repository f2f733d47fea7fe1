use thiserror::Error;

use aidledger_core::ErrorKind;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("duplicate key: {0}")]
    Duplicate(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("{0}")]
    Other(String),
}

impl From<StoreError> for ErrorKind {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::NotFound(key) => ErrorKind::InvalidTarget(key),
            other => ErrorKind::InvalidInput(other.to_string()),
        }
    }
}
