//! CatSCAN CLI - Command-line interface for CatSCAN
//!
//! Provides `catscan scan`, `catscan history`, `catscan show` and
//! `catscan token`. Results are printed as JSON on stdout; logs go to stderr.

mod commands;

use anyhow::{Context as _, Result};
use catscan_api::{ChainedTokenSource, EnvToken, TokenSource};
use catscan_core::{CatscanConfig, HistoryStore, KeyringTokenSource};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};
use uuid::Uuid;

use commands::scan::ScanArgs;
use commands::token::TokenCommands;

#[derive(Parser)]
#[command(name = "catscan")]
#[command(about = "CatSCAN - Terraform Cloud infrastructure scanner")]
#[command(version)]
struct Cli {
    /// Configuration file (defaults to ./.catscan_config.json when present)
    #[arg(long, global = true, value_name = "PATH")]
    config: Option<PathBuf>,

    /// Directory holding the scan history database
    #[arg(long, global = true, value_name = "DIR")]
    data_dir: Option<PathBuf>,

    /// Never read the API token from the system keyring
    #[arg(long, global = true)]
    no_keyring: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Scan every workspace of an organization
    Scan(ScanArgs),
    /// List saved scans and their recorded changes
    History {
        /// Organization (defaults to the configured one)
        #[arg(long)]
        org: Option<String>,
        /// Maximum entries to list
        #[arg(long, default_value_t = 20)]
        limit: usize,
    },
    /// Print a saved scan
    Show {
        /// Snapshot ID as printed by `scan` or `history`
        snapshot_id: Uuid,
    },
    /// Manage the API token
    Token {
        #[command(subcommand)]
        action: TokenCommands,
    },
}

/// Settings shared by every command
pub struct Context {
    pub config: CatscanConfig,
    pub use_keyring: bool,
}

impl Context {
    /// Environment first, then the keyring unless disabled
    pub fn token_source(&self) -> Arc<dyn TokenSource> {
        let mut chain = ChainedTokenSource::new().with(Arc::new(EnvToken::default()));
        if self.use_keyring {
            chain = chain.with(Arc::new(KeyringTokenSource::default()));
        }
        Arc::new(chain)
    }

    pub fn open_store(&self) -> Result<HistoryStore> {
        let path = self.config.database_path();
        HistoryStore::open(&path)
            .with_context(|| format!("failed to open history at {}", path.display()))
    }

    /// `org`, else the configured organization
    pub fn organization(&self, org: Option<String>) -> Option<String> {
        org.or_else(|| self.config.organization.clone())
            .filter(|o| !o.trim().is_empty())
    }
}

fn init_logging(debug: bool) {
    let default_level = if debug { "debug" } else { "info" };
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)))
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();
}

/// Print `value` as pretty JSON on stdout
pub fn print_json<T: serde::Serialize>(value: &T) -> Result<()> {
    let json = serde_json::to_string_pretty(value).context("failed to serialize output")?;
    println!("{json}");
    Ok(())
}

async fn run(cli: Cli, ctx: Context) -> Result<()> {
    match cli.command {
        Commands::Scan(args) => commands::scan::execute(args, &ctx).await,
        Commands::History { org, limit } => commands::history::list(org, limit, &ctx),
        Commands::Show { snapshot_id } => commands::history::show(snapshot_id, &ctx),
        Commands::Token { action } => commands::token::execute(action, &ctx).await,
    }
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let mut config = match CatscanConfig::load(cli.config.as_deref()) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Error: {e}");
            std::process::exit(1);
        }
    };
    if let Some(dir) = &cli.data_dir {
        config.data_dir.clone_from(dir);
    }
    init_logging(config.debug);

    let ctx = Context {
        config,
        use_keyring: !cli.no_keyring,
    };
    if let Err(e) = run(cli, ctx).await {
        eprintln!("Error: {e:#}");
        std::process::exit(1);
    }
}
