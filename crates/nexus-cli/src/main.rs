// ============================================================================
// nexus-gate — CLI for the ZAO Nexus wallet gate
// ============================================================================
// Usage:
//   nexus-gate status                       Show the persisted wallet session
//   nexus-gate connect <ADDRESS>            Connect a wallet and check balances
//   nexus-gate check [--force]              Re-check balances for the saved wallet
//   nexus-gate disconnect                   Forget the saved wallet
//   nexus-gate watch [--interval SECS]      Re-check periodically until Ctrl-C
//
// Token contracts and RPC endpoints come from NEXUS_* variables (.env is read).
// ============================================================================

use anyhow::Result;
use chrono::{TimeZone, Utc};
use clap::{Parser, Subcommand};
use nexus_core::{
    CheckOutcome, GateConfig, GateState, SessionDb, SessionEvent, StaticWalletProvider,
    WalletGateController, WalletSession, SESSION_NAMESPACE,
};
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

/// ZAO Nexus wallet gate
#[derive(Parser)]
#[command(name = "nexus-gate", version, about = "Check token-gated access for a wallet")]
struct Cli {
    /// Path to the session database (default: ~/.nexus/session.redb)
    #[arg(long, global = true)]
    db_path: Option<String>,

    /// Print sessions as JSON
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Show the persisted wallet session without touching the network
    Status,

    /// Connect a wallet address and check its balances
    Connect {
        /// 0x-prefixed wallet address
        address: String,
    },

    /// Re-check balances for the saved wallet
    Check {
        /// Skip the cooldown and query the chains now
        #[arg(long)]
        force: bool,
    },

    /// Forget the saved wallet
    Disconnect,

    /// Re-check balances periodically and log access changes
    Watch {
        /// Seconds between checks (the gate cooldown still applies)
        #[arg(long, default_value = "30")]
        interval: u64,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    if let Err(e) = dotenvy::dotenv() {
        eprintln!("Warning: Could not load .env file: {}", e);
    }

    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("nexus_core=info".parse()?)
                .add_directive("nexus_cli=info".parse()?),
        )
        .init();

    let cli = Cli::parse();
    let mut config = GateConfig::from_env()?;
    if cli.db_path.is_some() {
        config.db_path = cli.db_path.clone();
    }
    let db = Arc::new(SessionDb::open(config.db_path.as_deref())?);

    match cli.command {
        Commands::Status => cmd_status(&db, cli.json),
        Commands::Connect { address } => cmd_connect(&config, db, address, cli.json).await,
        Commands::Check { force } => cmd_check(&config, db, force, cli.json).await,
        Commands::Disconnect => cmd_disconnect(&config, db).await,
        Commands::Watch { interval } => cmd_watch(&config, db, interval).await,
    }
}

/// Gate whose wallet provider reports `address`, hydrated from the store
fn build_gate(
    config: &GateConfig,
    db: Arc<SessionDb>,
    address: Option<String>,
) -> Result<WalletGateController> {
    let provider = Arc::new(StaticWalletProvider::new(address));
    Ok(WalletGateController::from_config(config, provider, Some(db))?)
}

fn saved_address(db: &SessionDb) -> Result<Option<String>> {
    Ok(db
        .load_session(SESSION_NAMESPACE)?
        .and_then(|s| s.address)
        .map(String::from))
}

fn cmd_status(db: &SessionDb, json: bool) -> Result<()> {
    let Some(stored) = db.load_session(SESSION_NAMESPACE)? else {
        println!("No wallet connected.");
        return Ok(());
    };

    if json {
        println!("{}", serde_json::to_string_pretty(&stored)?);
        return Ok(());
    }

    println!("=== Nexus Wallet Session ===");
    println!("Database: {}", db.path().display());
    println!(
        "Address:  {}",
        stored.address.as_ref().map(|a| a.as_str()).unwrap_or("-")
    );
    for (symbol, balance) in &stored.balances {
        println!("  {:8} {}", symbol.ticker(), balance);
    }
    println!("Access:   {}", if stored.has_access { "granted" } else { "denied" });
    println!("Saved:    {}", format_timestamp(stored.saved_at));
    Ok(())
}

async fn cmd_connect(config: &GateConfig, db: Arc<SessionDb>, address: String, json: bool) -> Result<()> {
    let gate = build_gate(config, db, Some(address))?;
    let session = gate.connect().await?;
    print_session(&session, gate.state().await, json)
}

async fn cmd_check(config: &GateConfig, db: Arc<SessionDb>, force: bool, json: bool) -> Result<()> {
    let address = saved_address(&db)?;
    if address.is_none() {
        println!("No wallet connected. Run `nexus-gate connect <ADDRESS>` first.");
        return Ok(());
    }

    let gate = build_gate(config, db, address)?;
    let session = if force {
        gate.refresh().await
    } else {
        gate.check_balances().await
    };
    print_session(&session, gate.state().await, json)
}

async fn cmd_disconnect(config: &GateConfig, db: Arc<SessionDb>) -> Result<()> {
    let address = saved_address(&db)?;
    if address.is_none() {
        println!("No wallet connected.");
        return Ok(());
    }

    let gate = build_gate(config, db, address)?;
    gate.disconnect().await;
    println!("Wallet disconnected.");
    Ok(())
}

async fn cmd_watch(config: &GateConfig, db: Arc<SessionDb>, interval_secs: u64) -> Result<()> {
    let address = saved_address(&db)?;
    if address.is_none() {
        println!("No wallet connected. Run `nexus-gate connect <ADDRESS>` first.");
        return Ok(());
    }

    let gate = Arc::new(build_gate(config, db, address)?);
    let listener = gate.spawn_event_listener();
    let mut events = gate.subscribe();
    let mut ticker = tokio::time::interval(Duration::from_secs(interval_secs.max(1)));
    let mut last_access: Option<bool> = None;

    info!("Watching wallet access every {}s (Ctrl-C to stop)", interval_secs.max(1));

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                gate.check_balances().await;
            }
            event = events.recv() => match event {
                Ok(SessionEvent::BalancesUpdated { has_access }) => {
                    if last_access != Some(has_access) {
                        info!("Access {}", if has_access { "granted" } else { "denied" });
                        last_access = Some(has_access);
                    }
                }
                Ok(SessionEvent::Disconnected) => {
                    warn!("Wallet disconnected, stopping watch");
                    break;
                }
                Ok(other) => info!("Session event: {:?}", other),
                Err(e) => warn!("Session event stream: {}", e),
            },
            _ = tokio::signal::ctrl_c() => {
                info!("Stopping watch");
                break;
            }
        }
    }

    listener.abort();
    Ok(())
}

fn print_session(session: &WalletSession, state: GateState, json: bool) -> Result<()> {
    if json {
        println!("{}", serde_json::to_string_pretty(session)?);
        return Ok(());
    }

    println!(
        "Address: {}",
        session.address().map(|a| a.as_str()).unwrap_or("-")
    );
    println!("State:   {:?}", state);
    for (symbol, balance) in session.balances() {
        let note = match session.last_check().and_then(|r| r.outcomes.get(symbol)) {
            Some(CheckOutcome::Failed(reason)) => format!("  (check failed: {})", reason),
            None if session.is_connected() => "  (not checked yet)".to_string(),
            _ => String::new(),
        };
        println!("  {:8} {}{}", symbol.ticker(), balance, note);
    }
    println!("Access:  {}", if session.has_access() { "granted" } else { "denied" });
    Ok(())
}

fn format_timestamp(ts: i64) -> String {
    Utc.timestamp_opt(ts, 0)
        .single()
        .map(|dt| dt.format("%Y-%m-%d %H:%M:%S UTC").to_string())
        .unwrap_or_else(|| format!("(invalid: {})", ts))
}
