//! bridgectl: add, remove and list ntfy → Discord mappings in the JSON store.
//! A running bridge picks the changes up on its next reconcile tick.

use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use ntfy_discord_bridge::config::BridgeConfig;
use ntfy_discord_bridge::error::StoreError;
use ntfy_discord_bridge::mapping::{Auth, JsonFileStore, MappingStore, NewMapping};

#[derive(Parser, Debug)]
#[command(author, version, about = "Manage ntfy → Discord bridge mappings", long_about = None)]
struct Args {
    /// Mapping store file (defaults to the bridge config's `store_path`)
    #[arg(long, global = true, env = "BRIDGE_STORE_PATH")]
    store: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Add a new mapping
    Add {
        /// ntfy server URL (e.g. https://ntfy.sh)
        #[arg(long)]
        server: String,
        /// ntfy topic name
        #[arg(long)]
        topic: String,
        /// Full Discord webhook URL
        #[arg(long)]
        webhook: String,
        /// Basic authentication
        #[arg(long, num_args = 2, value_names = ["USER", "PASS"], conflicts_with = "token")]
        basic: Option<Vec<String>>,
        /// Bearer token authentication
        #[arg(long, value_name = "TOKEN")]
        token: Option<String>,
    },
    /// Remove a mapping
    Remove {
        /// ID of the mapping to remove (see `list`)
        #[arg(long)]
        id: u64,
    },
    /// List all mappings
    List,
}

fn build_auth(basic: Option<Vec<String>>, token: Option<String>) -> Auth {
    if let Some(creds) = basic {
        if let [username, password] = creds.as_slice() {
            return Auth::Basic {
                username: username.clone(),
                password: password.clone(),
            };
        }
    }
    match token {
        Some(token) => Auth::Bearer { token },
        None => Auth::None,
    }
}

async fn run(args: Args) -> anyhow::Result<ExitCode> {
    let path = match args.store {
        Some(p) => p,
        None => BridgeConfig::load_default()?.store_path,
    };
    let store = JsonFileStore::new(path);

    match args.command {
        Command::Add {
            server,
            topic,
            webhook,
            basic,
            token,
        } => {
            let new = NewMapping {
                source_server_url: server,
                source_topic: topic,
                target_webhook_url: webhook,
                auth: build_auth(basic, token),
            };
            match store.create_mapping(new).await {
                Ok(m) => {
                    println!(
                        "Added mapping {}: {}/{} -> Discord",
                        m.id, m.source_server_url, m.source_topic
                    );
                    Ok(ExitCode::SUCCESS)
                }
                Err(e @ (StoreError::Duplicate { .. } | StoreError::Invalid(_))) => {
                    eprintln!("{e}");
                    Ok(ExitCode::FAILURE)
                }
                Err(e) => Err(e.into()),
            }
        }
        Command::Remove { id } => match store.delete_mapping(id).await {
            Ok(()) => {
                println!("Removed mapping {id}");
                Ok(ExitCode::SUCCESS)
            }
            Err(StoreError::NotFound(_)) => {
                eprintln!("Mapping not found with ID: {id}");
                Ok(ExitCode::FAILURE)
            }
            Err(e) => Err(e.into()),
        },
        Command::List => {
            let mappings = store.list_mappings().await?;
            if mappings.is_empty() {
                println!("No active mappings.");
                return Ok(ExitCode::SUCCESS);
            }
            println!(
                "{:>4}  {:<28}  {:<20}  {:<34}  {}",
                "ID", "ntfy server", "ntfy topic", "Discord webhook", "Auth"
            );
            for m in &mappings {
                println!(
                    "{:>4}  {:<28}  {:<20}  {:<34}  {}",
                    m.id,
                    m.source_server_url,
                    m.source_topic,
                    m.webhook_display(),
                    m.auth.display_kind()
                );
            }
            Ok(ExitCode::SUCCESS)
        }
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    let _ = dotenvy::dotenv();
    tracing_subscriber::fmt()
        .with_target(false)
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")))
        .init();

    match run(Args::parse()).await {
        Ok(code) => code,
        Err(e) => {
            tracing::error!("CLI error: {e:#}");
            ExitCode::FAILURE
        }
    }
}
