//! usdt-link: pair with a mobile wallet over WalletConnect and transfer USDT.

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use eyre::{eyre, Result};
use tracing::{info, warn};

use usdt_link::{Pairing, TransferStatus, WalletBridge};
use usdt_link_adapters::LinkAdapterConfig;
use usdt_link_core::{NetworkId, SessionState, TransferRequest};

#[derive(Debug, Parser)]
#[command(name = "usdt-link", version, about = "WalletConnect USDT transfers")]
struct Cli {
    /// WalletConnect project id
    #[arg(long, env = "USDT_LINK_PROJECT_ID", global = true)]
    project_id: Option<String>,

    /// File holding the cached session token
    #[arg(long, env = "USDT_LINK_SESSION_STORE", global = true)]
    session_store: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// List the supported networks
    Networks,
    /// USDT balance of an address
    Balance {
        #[arg(long, default_value = "SEPOLIA")]
        network: NetworkId,
        address: String,
    },
    /// Look up a transaction receipt
    Receipt {
        #[arg(long, default_value = "SEPOLIA")]
        network: NetworkId,
        tx_hash: String,
    },
    /// Pair with a wallet and print the session
    Pair {
        /// Approve on behalf of the built-in peer with this account
        #[arg(long)]
        approve_as: Option<String>,
    },
    /// Pair, then transfer USDT
    Transfer {
        #[arg(long)]
        network: NetworkId,
        #[arg(long)]
        to: String,
        #[arg(long)]
        amount: String,
        #[arg(long)]
        approve_as: Option<String>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::INFO.into()),
        )
        .init();

    let cli = Cli::parse();
    let mut config = LinkAdapterConfig::from_env();
    if cli.project_id.is_some() {
        config.project_id = cli.project_id;
    }
    if cli.session_store.is_some() {
        config.session_store_path = cli.session_store;
    }

    let bridge =
        WalletBridge::new(config).map_err(|e| eyre!("failed to build wallet bridge: {e}"))?;

    match cli.command {
        Command::Networks => {
            for d in bridge.networks() {
                println!(
                    "{:<8} {:>9} {:<18} {}",
                    d.id.code(),
                    d.chain_id,
                    d.display_name,
                    d.token_contract_address
                );
            }
        }
        Command::Balance { network, address } => {
            let balance = bridge
                .token_balance_of(network, &address)
                .await
                .map_err(|m| eyre!(m))?;
            println!("{balance} USDT on {network}");
        }
        Command::Receipt { network, tx_hash } => {
            match bridge.receipt(network, &tx_hash).await.map_err(|m| eyre!(m))? {
                Some(receipt) => println!("{}", serde_json::to_string_pretty(&receipt)?),
                None => println!("transaction not mined yet"),
            }
        }
        Command::Pair { approve_as } => {
            let state = pair(&bridge, approve_as.as_deref()).await?;
            println!("{}", serde_json::to_string_pretty(&state)?);
        }
        Command::Transfer {
            network,
            to,
            amount,
            approve_as,
        } => {
            pair(&bridge, approve_as.as_deref()).await?;
            let request = TransferRequest {
                recipient_address: to,
                amount,
                network,
            };
            bridge.check(&request).map_err(|m| eyre!(m))?;
            match bridge.estimate_fee(&request).await {
                Ok(fee) => info!(%fee, "estimated network fee"),
                Err(m) => warn!("fee estimate unavailable: {m}"),
            }

            let report = bridge.transfer(&request).await;
            println!("{}", serde_json::to_string_pretty(&report)?);
            if report.status == TransferStatus::Error {
                return Err(eyre!(report.message));
            }
        }
    }

    Ok(())
}

/// Start the bridge and, unless a session was restored, pair a wallet.
async fn pair(bridge: &WalletBridge, approve_as: Option<&str>) -> Result<SessionState> {
    let state = bridge.start().await.map_err(|m| eyre!(m))?;
    if state.is_connected() {
        info!("reusing restored session");
        return Ok(state);
    }

    let pending = match bridge.begin_pairing().await {
        Pairing::Pending { link, attempt } => {
            if let Some(link) = link {
                println!("Open in wallet: {link}");
            }
            attempt
        }
        Pairing::Settled(outcome) => return pairing_outcome(outcome),
    };

    match approve_as {
        Some(_) if bridge.transport().is_proxied() => {
            warn!("--approve-as ignored, the wallet bridge answers pairing");
        }
        Some(address) => {
            bridge
                .transport()
                .approve_pairing(vec![format!("eip155:1:{address}")])
                .map_err(|e| eyre!("approval failed: {e}"))?;
        }
        None => info!("waiting for wallet approval"),
    }

    pairing_outcome(pending.await?)
}

fn pairing_outcome(outcome: Result<Option<SessionState>, String>) -> Result<SessionState> {
    match outcome {
        Ok(Some(state)) => Ok(state),
        Ok(None) => Err(eyre!("a pairing attempt is already in progress")),
        Err(m) => Err(eyre!(m)),
    }
}
