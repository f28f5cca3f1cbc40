//! # cloudkit-cli
//!
//! CLI tool for exercising the CloudKit bridge.
//!
//! ## Commands
//!
//! - `save-settings`, `save-history`, `save-note`: store a JSON record
//! - `fetch-settings`, `fetch-history`, `fetch-notes`: print stored records
//! - `delete-history`, `delete-note`: delete a record by id
//!
//! ## Example
//!
//! ```bash
//! # Degraded mode (no CloudKit): saves report why they failed
//! cloudkit-cli save-note '{"id":"n-1","text":"hello"}'
//!
//! # Fetches are empty
//! cloudkit-cli --container iCloud.com.example.app fetch-notes
//!
//! # Use a config file
//! cloudkit-cli --config cloudkit.toml fetch-settings
//! ```

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;

use cloudkit_bridge::{BridgeConfig, ProviderMode};

mod commands;

use commands::{delete, fetch, save, Session};

/// Default container when `--container` is not given.
const DEFAULT_CONTAINER: &str = "iCloud.cloudkit-bridge.default";

/// CLI tool for exercising the CloudKit bridge.
#[derive(Parser, Debug)]
#[command(name = "cloudkit-cli")]
#[command(version, about, long_about = None)]
struct Cli {
    /// TOML configuration file
    #[arg(long, short, global = true)]
    config: Option<PathBuf>,

    /// CloudKit container identifier
    #[arg(long, global = true, default_value = DEFAULT_CONTAINER)]
    container: String,

    /// Override the configured provider (disabled or native)
    #[arg(long, global = true)]
    provider: Option<ProviderMode>,

    /// Override the configured completion timeout, in milliseconds
    #[arg(long, global = true)]
    timeout_ms: Option<u64>,

    #[command(subcommand)]
    command: Commands,
}

/// A JSON record given inline or read from a file.
#[derive(Args, Debug)]
struct RecordArg {
    /// Record as JSON text
    json: Option<String>,

    /// Read the record from a file
    #[arg(long, short, conflicts_with = "json")]
    file: Option<PathBuf>,
}

impl RecordArg {
    async fn read(self) -> Result<String> {
        match (self.json, self.file) {
            (Some(json), _) => Ok(json),
            (None, Some(path)) => tokio::fs::read_to_string(&path)
                .await
                .with_context(|| format!("Failed to read record from {}", path.display())),
            (None, None) => anyhow::bail!("Must specify JSON or --file"),
        }
    }
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Save the settings record
    SaveSettings(RecordArg),

    /// Print the settings record (null if none)
    FetchSettings,

    /// Save a history item
    SaveHistory(RecordArg),

    /// Print all history items
    FetchHistory,

    /// Delete a history item
    DeleteHistory {
        /// Item id
        id: String,
    },

    /// Save a note
    SaveNote(RecordArg),

    /// Print all notes
    FetchNotes,

    /// Delete a note
    DeleteNote {
        /// Note id
        id: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let mut config = match &cli.config {
        Some(path) => BridgeConfig::load(path)
            .with_context(|| format!("Failed to load config {}", path.display()))?,
        None => BridgeConfig::default(),
    };
    if let Some(mode) = cli.provider {
        config.provider.mode = mode;
    }
    if let Some(ms) = cli.timeout_ms {
        config.relay.completion_timeout_ms = ms;
    }

    cloudkit_bridge::logging::init_logging(&config.logging.filter);

    let session = Session::open(&cli.container, &config)?;
    let outcome = run(&session, cli.command).await;
    session.close();
    outcome
}

async fn run(session: &Session, command: Commands) -> Result<()> {
    match command {
        Commands::SaveSettings(record) => save::settings(session, record.read().await?).await,
        Commands::FetchSettings => fetch::settings(session).await,
        Commands::SaveHistory(record) => save::history_item(session, record.read().await?).await,
        Commands::FetchHistory => fetch::history(session).await,
        Commands::DeleteHistory { id } => delete::history_item(session, id).await,
        Commands::SaveNote(record) => save::note(session, record.read().await?).await,
        Commands::FetchNotes => fetch::notes(session).await,
        Commands::DeleteNote { id } => delete::note(session, id).await,
    }
}
