//! Ledger policy configuration.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::types::Ugx;

/// Fixed cap on a single loan's principal.
pub const DEFAULT_MAX_LOAN_AMOUNT: Ugx = 3_200_000;

/// Lifetime of a PIN prompt, in seconds.
pub const DEFAULT_PIN_WINDOW_SECS: u64 = 300;

/// Consecutive invalid PINs after which a payment attempt is abandoned.
pub const DEFAULT_MAX_PIN_ATTEMPTS: u8 = 3;

/// Capacity of the ledger event broadcast channel.
pub const DEFAULT_EVENT_BUFFER: usize = 1024;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LedgerConfig {
    pub max_loan_amount: Ugx,
    pub pin_window_secs: u64,
    pub max_pin_attempts: u8,
    pub event_buffer: usize,
}

impl Default for LedgerConfig {
    fn default() -> Self {
        Self {
            max_loan_amount: DEFAULT_MAX_LOAN_AMOUNT,
            pin_window_secs: DEFAULT_PIN_WINDOW_SECS,
            max_pin_attempts: DEFAULT_MAX_PIN_ATTEMPTS,
            event_buffer: DEFAULT_EVENT_BUFFER,
        }
    }
}

impl LedgerConfig {
    pub fn pin_window(&self) -> Duration {
        Duration::from_secs(self.pin_window_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partial_json_keeps_defaults() {
        let config: LedgerConfig = serde_json::from_str(r#"{"max_loan_amount": 1000000}"#).unwrap();
        assert_eq!(config.max_loan_amount, 1_000_000);
        assert_eq!(config.pin_window(), Duration::from_secs(300));
        assert_eq!(config.max_pin_attempts, 3);
    }
}
