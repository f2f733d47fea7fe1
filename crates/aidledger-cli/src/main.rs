mod api;
mod config;
mod export;

use std::sync::Arc;
use std::time::Duration;

use aidledger_core::SystemClock;
use aidledger_engine::{AidLedger, Collaborators};
use aidledger_gateway::{HttpAcademicRecords, HttpIdentity, HttpMobileMoney, HttpPinStore};
use anyhow::Context;
use clap::{Parser, Subcommand};
use tracing::{debug, info};

use crate::api::AppState;
use crate::config::{PolicyArgs, ServeArgs};

const EXPIRY_SWEEP_INTERVAL: Duration = Duration::from_secs(30);

#[derive(Parser)]
#[command(name = "aidledger", version, about = "Student aid payment and loan ledger")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run the HTTP API.
    Serve(ServeArgs),
    /// Print the effective ledger policy as JSON.
    Policy(PolicyArgs),
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt::init();
    info!("aidledger v{}", env!("CARGO_PKG_VERSION"));

    match Cli::parse().command {
        Command::Serve(args) => serve(args).await,
        Command::Policy(policy) => {
            let config = policy.ledger_config()?;
            println!("{}", serde_json::to_string_pretty(&config)?);
            Ok(())
        }
    }
}

async fn serve(args: ServeArgs) -> anyhow::Result<()> {
    let config = args.policy.ledger_config()?;
    let key = args.service_api_key.clone();

    let pin_store = HttpPinStore::new(args.pin_store_url, key.clone())
        .context("building PIN store client")?;
    let mobile_money = HttpMobileMoney::new(args.mobile_money_url, key.clone())
        .context("building mobile-money client")?;
    let identity = HttpIdentity::new(args.identity_url).context("building identity client")?;
    let records = HttpAcademicRecords::new(args.academic_records_url, key)
        .context("building academic records client")?;

    let engine = Arc::new(AidLedger::new(
        config,
        Collaborators {
            pin_store: Arc::new(pin_store),
            mobile_money: Arc::new(mobile_money),
            clock: Arc::new(SystemClock),
        },
    ));
    let state = AppState {
        engine: engine.clone(),
        identity: Arc::new(identity),
        records: Arc::new(records),
    };

    // Expire abandoned PIN prompts between requests.
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(EXPIRY_SWEEP_INTERVAL);
        loop {
            ticker.tick().await;
            let expired = engine.payments().expire_stale().await;
            if !expired.is_empty() {
                debug!(count = expired.len(), "expired stale payments");
            }
        }
    });

    let listener = tokio::net::TcpListener::bind(args.listen)
        .await
        .with_context(|| format!("binding {}", args.listen))?;
    info!(addr = %args.listen, "listening");
    axum::serve(listener, api::router(state))
        .await
        .context("HTTP server stopped")?;
    Ok(())
}
