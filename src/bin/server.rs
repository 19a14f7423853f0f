//! HTTP server for spreadsheet ingestion and guarded queries

use anyhow::{Context, Result};
use clap::Parser;
use sheetsql::config::{AppConfig, StoreLocation};
use sheetsql::server::{self, AppState};
use tracing::info;

#[derive(Parser)]
#[command(name = "sheetsql-server")]
#[command(about = "Ingest spreadsheet archives and answer read-only SQL over HTTP")]
#[command(version)]
struct Args {
    /// Address to listen on (overrides SHEETSQL_BIND)
    #[arg(long)]
    bind: Option<String>,

    /// Store file, or `:memory:` (overrides SHEETSQL_DB_PATH)
    #[arg(long)]
    db: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load environment variables from .env file
    dotenv::dotenv().ok();
    sheetsql::init_tracing();

    let args = Args::parse();
    let mut config = AppConfig::from_env().context("Invalid configuration")?;
    if let Some(bind) = args.bind {
        config.bind = bind;
    }
    if let Some(db) = args.db {
        config.store = StoreLocation::parse(&db);
    }

    info!("🚀 Starting sheetsql API server");
    info!(
        "Store: {:?}, query cap {} rows / {:?}, ingest cap {} rows, upload cap {} bytes",
        config.store,
        config.guards.max_rows,
        config.guards.execution_timeout,
        config.ingestion.max_total_rows,
        config.max_upload_bytes
    );

    server::run(AppState::new(config))
        .await
        .context("Server stopped")?;
    Ok(())
}
