//! PIN authorization gate.
//!
//! Verifies a short numeric secret against the external PIN store before a
//! mobile-money payment may complete. The gate is stateless per call: the
//! attempt counter belongs to the payment transaction, and the PIN itself is
//! passed straight through to the store and never kept or logged here.

use std::sync::Arc;

use aidledger_core::{BorrowerId, Clock, ErrorKind};
use aidledger_gateway::{PinStatus, PinStore};
use chrono::{DateTime, Duration, Utc};
use tracing::{debug, info};

const MIN_PIN_LEN: usize = 4;
const MAX_PIN_LEN: usize = 6;

/// A time-boxed verification request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PinPrompt {
    pub borrower: BorrowerId,
    pub opened_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

/// Proof that the PIN was accepted inside the prompt's window.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Authorized {
    pub borrower: BorrowerId,
    pub at: DateTime<Utc>,
}

pub struct PinGate {
    store: Arc<dyn PinStore>,
    clock: Arc<dyn Clock>,
    window: Duration,
}

impl PinGate {
    pub fn new(store: Arc<dyn PinStore>, clock: Arc<dyn Clock>, window: std::time::Duration) -> Self {
        Self {
            store,
            clock,
            window: Duration::from_std(window).unwrap_or(Duration::seconds(300)),
        }
    }

    pub async fn status(&self, borrower: &BorrowerId) -> Result<PinStatus, ErrorKind> {
        Ok(self.store.status(borrower).await?)
    }

    /// Fail with [`ErrorKind::PinNotSet`] unless the borrower has a PIN.
    pub async fn require_pin(&self, borrower: &BorrowerId) -> Result<(), ErrorKind> {
        if self.status(borrower).await?.has_pin {
            Ok(())
        } else {
            info!(borrower = %borrower, "payment halted: no PIN set");
            Err(ErrorKind::PinNotSet)
        }
    }

    /// Open a prompt starting now.
    pub fn open_prompt(&self, borrower: &BorrowerId) -> PinPrompt {
        self.prompt_from(borrower, self.clock.now())
    }

    /// The prompt that was opened at `opened_at`.
    pub fn prompt_from(&self, borrower: &BorrowerId, opened_at: DateTime<Utc>) -> PinPrompt {
        PinPrompt {
            borrower: borrower.clone(),
            opened_at,
            expires_at: opened_at + self.window,
        }
    }

    /// Rebuild the prompt that closes at `expires_at`.
    pub fn prompt_until(&self, borrower: &BorrowerId, expires_at: DateTime<Utc>) -> PinPrompt {
        self.prompt_from(borrower, expires_at - self.window)
    }

    pub fn is_expired(&self, prompt: &PinPrompt) -> bool {
        self.clock.now() >= prompt.expires_at
    }

    /// Verify `pin` for the prompt's borrower.
    ///
    /// An expired prompt is rejected before the store is consulted, whether or
    /// not the PIN is correct. Malformed PINs never reach the store.
    pub async fn verify(&self, prompt: &PinPrompt, pin: &str) -> Result<Authorized, ErrorKind> {
        if self.is_expired(prompt) {
            debug!(borrower = %prompt.borrower, "PIN prompt expired");
            return Err(ErrorKind::RequestExpired);
        }
        if !well_formed(pin) {
            return Err(ErrorKind::InvalidPin {
                attempts_left: None,
            });
        }
        let valid = self.store.verify(&prompt.borrower, pin).await?;
        // The store round trip may have crossed the deadline.
        if self.is_expired(prompt) {
            return Err(ErrorKind::RequestExpired);
        }
        if !valid {
            info!(borrower = %prompt.borrower, "PIN rejected");
            return Err(ErrorKind::InvalidPin {
                attempts_left: None,
            });
        }
        Ok(Authorized {
            borrower: prompt.borrower.clone(),
            at: self.clock.now(),
        })
    }

    /// Verify outside any payment, e.g. a settings screen confirming the PIN.
    pub async fn verify_standalone(
        &self,
        borrower: &BorrowerId,
        pin: &str,
    ) -> Result<Authorized, ErrorKind> {
        self.require_pin(borrower).await?;
        let prompt = self.open_prompt(borrower);
        self.verify(&prompt, pin).await
    }
}

fn well_formed(pin: &str) -> bool {
    (MIN_PIN_LEN..=MAX_PIN_LEN).contains(&pin.len()) && pin.bytes().all(|b| b.is_ascii_digit())
}

#[cfg(test)]
mod tests {
    use super::*;
    use aidledger_core::ManualClock;
    use aidledger_gateway::fake::FakePinStore;

    fn gate() -> (PinGate, Arc<ManualClock>, Arc<FakePinStore>) {
        let clock = Arc::new(ManualClock::new(Utc::now()));
        let store = Arc::new(FakePinStore::new().with_pin("STU1", "2468"));
        let gate = PinGate::new(
            store.clone(),
            clock.clone(),
            std::time::Duration::from_secs(300),
        );
        (gate, clock, store)
    }

    #[tokio::test]
    async fn correct_pin_inside_window() {
        let (gate, clock, _) = gate();
        let prompt = gate.open_prompt(&BorrowerId::new("STU1"));
        clock.advance(Duration::seconds(299));
        let auth = gate.verify(&prompt, "2468").await.unwrap();
        assert_eq!(auth.borrower.as_str(), "STU1");
    }

    #[tokio::test]
    async fn correct_pin_after_window_is_expired() {
        let (gate, clock, store) = gate();
        let prompt = gate.open_prompt(&BorrowerId::new("STU1"));
        clock.advance(Duration::seconds(300));
        assert_eq!(
            gate.verify(&prompt, "2468").await,
            Err(ErrorKind::RequestExpired)
        );
        assert_eq!(store.verify_calls(), 0);
    }

    #[tokio::test]
    async fn wrong_pin_is_invalid() {
        let (gate, _, _) = gate();
        let prompt = gate.open_prompt(&BorrowerId::new("STU1"));
        assert!(matches!(
            gate.verify(&prompt, "1357").await,
            Err(ErrorKind::InvalidPin { .. })
        ));
    }

    #[tokio::test]
    async fn malformed_pin_skips_store() {
        let (gate, _, store) = gate();
        let prompt = gate.open_prompt(&BorrowerId::new("STU1"));
        for pin in ["", "12", "abcd", "1234567", "12 4"] {
            assert!(matches!(
                gate.verify(&prompt, pin).await,
                Err(ErrorKind::InvalidPin { .. })
            ));
        }
        assert_eq!(store.verify_calls(), 0);
    }

    #[tokio::test]
    async fn missing_pin_halts() {
        let (gate, _, store) = gate();
        assert_eq!(
            gate.require_pin(&BorrowerId::new("STU2")).await,
            Err(ErrorKind::PinNotSet)
        );
        assert_eq!(
            gate.verify_standalone(&BorrowerId::new("STU2"), "2468").await,
            Err(ErrorKind::PinNotSet)
        );
        assert_eq!(store.verify_calls(), 0);
    }
}
