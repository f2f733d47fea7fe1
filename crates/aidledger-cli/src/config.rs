//! Command-line and environment configuration for `aidledger serve`.

use std::net::SocketAddr;

use aidledger_core::LedgerConfig;
use aidledger_core::config::{
    DEFAULT_EVENT_BUFFER, DEFAULT_MAX_LOAN_AMOUNT, DEFAULT_MAX_PIN_ATTEMPTS,
    DEFAULT_PIN_WINDOW_SECS,
};
use clap::Args;

#[derive(Args, Debug, Clone)]
pub struct ServeArgs {
    /// Address the HTTP API listens on.
    #[arg(long, env = "AIDLEDGER_LISTEN", default_value = "127.0.0.1:8080")]
    pub listen: SocketAddr,

    /// Base URL of the PIN credential store.
    #[arg(long, env = "AIDLEDGER_PIN_STORE_URL")]
    pub pin_store_url: String,

    /// Base URL of the mobile-money collection gateway.
    #[arg(long, env = "AIDLEDGER_MOBILE_MONEY_URL")]
    pub mobile_money_url: String,

    /// Base URL of the identity service that resolves bearer tokens.
    #[arg(long, env = "AIDLEDGER_IDENTITY_URL")]
    pub identity_url: String,

    /// Base URL of the academic records service.
    #[arg(long, env = "AIDLEDGER_ACADEMIC_RECORDS_URL")]
    pub academic_records_url: String,

    /// API key sent to the PIN store, provider and records service.
    #[arg(long, env = "AIDLEDGER_SERVICE_API_KEY", hide_env_values = true)]
    pub service_api_key: Option<String>,

    #[command(flatten)]
    pub policy: PolicyArgs,
}

/// Ledger policy knobs.
#[derive(Args, Debug, Clone)]
pub struct PolicyArgs {
    /// Cap on a single loan's principal, in UGX.
    #[arg(long, env = "AIDLEDGER_MAX_LOAN_AMOUNT", default_value_t = DEFAULT_MAX_LOAN_AMOUNT)]
    pub max_loan_amount: u64,

    /// Seconds a PIN prompt stays open.
    #[arg(long, env = "AIDLEDGER_PIN_WINDOW_SECS", default_value_t = DEFAULT_PIN_WINDOW_SECS)]
    pub pin_window_secs: u64,

    /// Consecutive wrong PINs before a payment attempt is abandoned.
    #[arg(long, env = "AIDLEDGER_MAX_PIN_ATTEMPTS", default_value_t = DEFAULT_MAX_PIN_ATTEMPTS)]
    pub max_pin_attempts: u8,

    /// Capacity of the ledger event channel.
    #[arg(long, env = "AIDLEDGER_EVENT_BUFFER", default_value_t = DEFAULT_EVENT_BUFFER)]
    pub event_buffer: usize,
}

impl PolicyArgs {
    pub fn ledger_config(&self) -> anyhow::Result<LedgerConfig> {
        anyhow::ensure!(self.max_loan_amount > 0, "max loan amount must be positive");
        anyhow::ensure!(self.pin_window_secs > 0, "PIN window must be positive");
        anyhow::ensure!(self.max_pin_attempts > 0, "max PIN attempts must be positive");
        Ok(LedgerConfig {
            max_loan_amount: self.max_loan_amount,
            pin_window_secs: self.pin_window_secs,
            max_pin_attempts: self.max_pin_attempts,
            event_buffer: self.event_buffer,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;

    #[derive(Parser)]
    struct Harness {
        #[command(flatten)]
        policy: PolicyArgs,
    }

    #[test]
    fn defaults_match_ledger_defaults() {
        let parsed = Harness::parse_from(["aidledger"]);
        assert_eq!(parsed.policy.ledger_config().unwrap(), LedgerConfig::default());
    }

    #[test]
    fn zero_window_rejected() {
        let parsed = Harness::parse_from(["aidledger", "--pin-window-secs", "0"]);
        assert!(parsed.policy.ledger_config().is_err());
    }

    #[test]
    fn overrides_apply() {
        let parsed = Harness::parse_from(["aidledger", "--max-loan-amount", "1000000"]);
        let config = parsed.policy.ledger_config().unwrap();
        assert_eq!(config.max_loan_amount, 1_000_000);
        assert_eq!(config.pin_window_secs, 300);
    }
}
