//! provider-session CLI
//!
//! Drives one session against the configured account provider and prints
//! every published snapshot as JSON.
//!
//! ```text
//! config (TOML, optional) → logging → provider → SessionDriver
//!     status:     wait for startup queries, print snapshot
//!     round-trip: connect → request key → encrypt → decrypt
//! ```

use clap::{Parser, Subcommand};
use std::error::Error;
use std::io::BufRead;
use std::path::PathBuf;
use std::sync::Arc;

use provider_session::config::{load_config, ProviderKind, SessionConfig};
use provider_session::observability::logging::init_logging;
use provider_session::provider::{
    ApprovalMode, JsonRpcProvider, LocalWallet, ProviderClient,
};
use provider_session::session::{SessionDriver, SessionHandle, SessionResult, SessionSnapshot};

/// Plaintext for `round-trip` when no message is given.
const DEFAULT_MESSAGE: &str = "hello from provider-session";

#[derive(Parser)]
#[command(name = "provider-session")]
#[command(about = "Account-provider session with an encrypt/decrypt round trip", long_about = None)]
struct Cli {
    /// Path to a TOML config file. Defaults are used when omitted.
    #[arg(short, long)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Print the session after its startup queries settle
    Status,
    /// Connect, fetch the encryption key, encrypt MESSAGE and decrypt it back
    RoundTrip {
        #[arg(short, long, default_value = DEFAULT_MESSAGE)]
        message: String,
    },
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
    let cli = Cli::parse();

    let config = match &cli.config {
        Some(path) => load_config(path)?,
        None => SessionConfig::default(),
    };
    init_logging(&config.observability)?;

    tracing::info!(
        provider = ?config.provider.kind,
        request_timeout_secs = ?config.provider.request_timeout_secs,
        "Configuration loaded"
    );

    let (client, wallet) = build_client(&config)?;
    if let Some(wallet) = wallet {
        if config.wallet.approval == ApprovalMode::Manual {
            spawn_prompter(wallet);
        }
    }

    let handle = SessionDriver::spawn(client, &config.session);
    print_snapshot("startup", &handle.settled().await?)?;

    match cli.command.unwrap_or(Commands::RoundTrip {
        message: DEFAULT_MESSAGE.to_string(),
    }) {
        Commands::Status => {}
        Commands::RoundTrip { message } => round_trip(&handle, message).await?,
    }

    Ok(())
}

fn build_client(
    config: &SessionConfig,
) -> Result<(ProviderClient, Option<Arc<LocalWallet>>), Box<dyn Error>> {
    let timeout = config.provider.request_timeout();
    match config.provider.kind {
        ProviderKind::Local => {
            let wallet = Arc::new(LocalWallet::from_config(&config.wallet)?);
            let client = ProviderClient::new(wallet.clone()).with_timeout(timeout);
            Ok((client, Some(wallet)))
        }
        ProviderKind::JsonRpc => {
            let provider = JsonRpcProvider::from_url(&config.provider.rpc_url)?;
            tracing::info!(url = %provider.url(), "Using JSON-RPC account provider");
            Ok((ProviderClient::new(Arc::new(provider)).with_timeout(timeout), None))
        }
        ProviderKind::None => Ok((ProviderClient::unavailable(), None)),
    }
}

/// Answer manual wallet prompts from stdin: `y` approves, anything else rejects.
fn spawn_prompter(wallet: Arc<LocalWallet>) {
    eprintln!("Wallet prompts are manual: type 'y' to approve or 'n' to reject each one.");
    // Detached: a blocked stdin read must not hold up runtime shutdown.
    std::thread::spawn(move || {
        for line in std::io::stdin().lock().lines() {
            match line {
                Ok(answer) if answer.trim().eq_ignore_ascii_case("y") => wallet.approve(),
                Ok(_) => wallet.reject(),
                Err(e) => {
                    tracing::warn!(error = %e, "Stopped reading prompt answers");
                    break;
                }
            }
        }
    });
}

async fn round_trip(handle: &SessionHandle, message: String) -> Result<(), Box<dyn Error>> {
    step("connect", handle, handle.connect().await).await?;
    step("request_public_key", handle, handle.request_public_key().await).await?;
    step("encrypt", handle, handle.encrypt(message).await).await?;
    step("decrypt", handle, handle.decrypt().await).await?;
    Ok(())
}

/// Print the outcome of one command and wait for follow-up queries to drain.
async fn step(
    name: &str,
    handle: &SessionHandle,
    outcome: SessionResult<SessionSnapshot>,
) -> Result<(), Box<dyn Error>> {
    match outcome {
        Ok(snapshot) => {
            print_snapshot(name, &snapshot)?;
            handle.settled().await?;
            Ok(())
        }
        Err(e) => {
            tracing::error!(step = name, error = %e, "Session step failed");
            print_snapshot(name, &handle.snapshot())?;
            Err(e.into())
        }
    }
}

fn print_snapshot(step: &str, snapshot: &SessionSnapshot) -> Result<(), serde_json::Error> {
    println!("== {} ==", step);
    println!("{}", serde_json::to_string_pretty(snapshot)?);
    Ok(())
}
