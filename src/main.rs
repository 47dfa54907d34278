//! Messaging Client CLI
//!
//! Talks to a messaging server as one identity/device.
//!
//! ## Usage
//!
//! ```bash
//! # Generate a private key seed
//! messaging-client keygen
//!
//! # Send a text message
//! messaging-client --endpoint wss://msg.example.com --self-id alice \
//!     --private-key "$KEY" send --to bob --text hello
//!
//! # Print incoming messages until interrupted
//! messaging-client listen
//!
//! # ACL management
//! messaging-client permit                 # everyone
//! messaging-client permit bob --expires 2030-01-01T00:00:00Z
//! messaging-client block bob
//! messaging-client rules
//! ```
//!
//! Connection settings fall back to `MESSAGING_ENDPOINT`,
//! `MESSAGING_SELF_ID`, `MESSAGING_DEVICE_ID` and `MESSAGING_PRIVATE_KEY`.

use anyhow::{anyhow, Context};
use chrono::{DateTime, Utc};
use clap::{Parser, Subcommand};
use messaging_client::config::default_config_path;
use messaging_client::{generate_private_key, Client, ClientConfig, Identity, Message, ANY_SENDER};
use std::path::PathBuf;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "messaging-client")]
#[command(about = "Authenticated messaging client")]
struct Args {
    /// Path to config file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Messaging server WebSocket URL
    #[arg(long, env = "MESSAGING_ENDPOINT")]
    endpoint: Option<String>,

    /// Identity to authenticate as
    #[arg(long, env = "MESSAGING_SELF_ID")]
    self_id: Option<String>,

    /// Device id for this connection
    #[arg(long, env = "MESSAGING_DEVICE_ID", default_value = "1")]
    device_id: String,

    /// Base64 Ed25519 private key seed
    #[arg(long, env = "MESSAGING_PRIVATE_KEY", hide_env_values = true)]
    private_key: Option<String>,

    /// Reconnect after read timeouts and abnormal closures
    #[arg(long)]
    auto_reconnect: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Print a fresh private key seed
    Keygen,

    /// Send a text message and wait for the server's ACK
    Send {
        #[arg(long)]
        to: String,
        #[arg(long)]
        text: String,
    },

    /// Print incoming messages until Ctrl-C
    Listen,

    /// Permit a sender pattern (everyone when omitted)
    Permit {
        pattern: Option<String>,
        /// Expiry as RFC 3339; required with a pattern
        #[arg(long)]
        expires: Option<DateTime<Utc>>,
    },

    /// Revoke a sender pattern
    Block { pattern: String },

    /// List active ACL rules
    Rules,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::from_default_env().add_directive("messaging_client=info".parse()?),
        )
        .init();

    let args = Args::parse();

    if let Command::Keygen = args.command {
        println!("{}", generate_private_key());
        return Ok(());
    }

    // Load config
    let mut config = match &args.config {
        Some(path) => ClientConfig::load(path)
            .with_context(|| format!("Failed to load config from {}", path.display()))?,
        None => {
            let path = default_config_path();
            if path.exists() {
                ClientConfig::load(&path)?
            } else {
                ClientConfig::default()
            }
        }
    };

    // Apply CLI overrides
    if args.auto_reconnect {
        config.auto_reconnect = true;
    }

    let endpoint = args
        .endpoint
        .ok_or_else(|| anyhow!("--endpoint or MESSAGING_ENDPOINT is required"))?;
    let self_id = args
        .self_id
        .ok_or_else(|| anyhow!("--self-id or MESSAGING_SELF_ID is required"))?;
    let private_key = args
        .private_key
        .ok_or_else(|| anyhow!("--private-key or MESSAGING_PRIVATE_KEY is required"))?;

    let identity = Identity::new(self_id, args.device_id, &private_key)?;
    let client = Client::connect(&endpoint, identity, config).await?;

    let result = run(&client, args.command).await;
    client.close().await;
    result
}

async fn run(client: &Client, command: Command) -> anyhow::Result<()> {
    match command {
        // Handled before connecting
        Command::Keygen => {}

        Command::Send { to, text } => {
            let message = Message::new(to, text.into_bytes());
            client.send(&message).await?;
            info!(id = %message.id, "Message delivered to server");
        }

        Command::Listen => loop {
            tokio::select! {
                message = client.receive() => {
                    let message = message?;
                    println!(
                        "{} -> {}: {}",
                        message.sender,
                        message.recipient,
                        String::from_utf8_lossy(&message.ciphertext)
                    );
                }
                _ = tokio::signal::ctrl_c() => {
                    info!("Interrupted, closing");
                    break;
                }
            }
        },

        Command::Permit { pattern, expires } => match pattern {
            None => {
                client.permit_all().await?;
                info!("Permitted all senders");
            }
            Some(pattern) if pattern == ANY_SENDER && expires.is_none() => {
                client.permit_all().await?;
                info!("Permitted all senders");
            }
            Some(pattern) => {
                let expires = expires.ok_or_else(|| anyhow!("--expires is required with a pattern"))?;
                if expires <= Utc::now() {
                    warn!(expires = %expires, "Expiry is in the past");
                }
                client.permit_sender(&pattern, expires).await?;
                info!(pattern = %pattern, expires = %expires, "Permitted sender");
            }
        },

        Command::Block { pattern } => {
            client.block_sender(&pattern).await?;
            info!(pattern = %pattern, "Blocked sender");
        }

        Command::Rules => {
            for rule in client.list_acl_rules().await? {
                match rule.expires {
                    Some(expires) => println!("{}\tuntil {}", rule.source, expires.to_rfc3339()),
                    None => println!("{}", rule.source),
                }
            }
        }
    }

    Ok(())
}
