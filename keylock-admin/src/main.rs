//! Keylock operator console
//!
//! Generates, lists, bans, extends and deletes license keys stored in a
//! remote document database.
//!
//! Usage:
//!   keylock-admin --project-id my-project --api-key KEY
//!   keylock-admin --base-url http://localhost:8080/v1/projects/p/databases/(default)/documents

use anyhow::{Context, Result, bail};
use clap::Parser;
use keylock_admin::Console;
use keylock_license::{GENERATED_KEYS_FILE, KeyAdmin};
use keylock_store::{DEFAULT_TIMEOUT_SECS, HttpDocumentStore, StoreConfig};
use std::io;
use std::path::PathBuf;
use tracing::{Level, info};
use tracing_subscriber::FmtSubscriber;

#[derive(Parser, Debug)]
#[command(name = "keylock-admin")]
#[command(about = "Operator console for license keys")]
struct Args {
    /// Firestore project holding the key collection
    #[arg(short, long, conflicts_with = "base_url")]
    project_id: Option<String>,

    /// Documents root of a compatible REST endpoint
    #[arg(long)]
    base_url: Option<String>,

    /// API key sent with every request
    #[arg(long, env = "KEYLOCK_API_KEY", hide_env_values = true)]
    api_key: Option<String>,

    /// Collection holding license keys
    #[arg(short, long, default_value = "keys")]
    collection: String,

    /// File newly generated keys are appended to
    #[arg(short, long, default_value = GENERATED_KEYS_FILE)]
    keys_file: PathBuf,

    /// Request timeout in seconds
    #[arg(short, long, default_value_t = DEFAULT_TIMEOUT_SECS)]
    timeout: u64,

    /// Enable verbose debug logging
    #[arg(short, long)]
    verbose: bool,
}

impl Args {
    fn store_config(&self) -> Result<StoreConfig> {
        let mut config = match (&self.project_id, &self.base_url) {
            (Some(project), None) => StoreConfig::firestore(project, self.api_key.clone()),
            (None, Some(base_url)) => StoreConfig {
                base_url: base_url.trim_end_matches('/').to_string(),
                api_key: self.api_key.clone(),
                ..StoreConfig::default()
            },
            _ => bail!("either --project-id or --base-url is required"),
        };
        config.timeout_secs = self.timeout;
        Ok(config)
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    let log_level = if args.verbose { Level::DEBUG } else { Level::INFO };
    // Keep stdout for the console itself.
    FmtSubscriber::builder()
        .with_max_level(log_level)
        .with_target(false)
        .with_writer(io::stderr)
        .compact()
        .init();

    let config = args.store_config()?;
    info!("Using store at {}", config.base_url);
    let store = HttpDocumentStore::new(config).context("Failed to create store client")?;
    let admin = KeyAdmin::new(store, args.collection.clone());

    let stdin = io::stdin();
    let mut console =
        Console::new(admin, stdin.lock(), io::stdout()).with_keys_file(args.keys_file.clone());
    console.run().await.context("Console I/O failed")?;

    Ok(())
}
