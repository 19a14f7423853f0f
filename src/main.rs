use sheetsql::catalog::Catalog;
use sheetsql::config::{AppConfig, StoreLocation};
use sheetsql::ingestion::IngestionOrchestrator;
use sheetsql::store::Store;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{error, info};

#[derive(Parser)]
#[command(name = "sheetsql")]
#[command(about = "Load spreadsheet archives into a local store and query them with read-only SQL")]
#[command(version)]
struct Args {
    /// Store file, or `:memory:` (overrides SHEETSQL_DB_PATH)
    #[arg(long, global = true)]
    db: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Ingest a ZIP archive (or a single .xlsx workbook)
    Ingest {
        /// Path to the upload
        file: PathBuf,
    },
    /// Run a read-only SQL statement
    Query {
        /// The statement, e.g. 'SELECT * FROM "_catalog"'
        sql: String,
    },
    /// List ingested tables
    Catalog {
        /// Also check the catalog against the tables in the store
        #[arg(long)]
        audit: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenv::dotenv().ok();
    sheetsql::init_tracing();

    let args = Args::parse();
    let mut config = AppConfig::from_env().context("Invalid configuration")?;
    if let Some(db) = args.db {
        config.store = StoreLocation::parse(&db);
    }

    let store = Arc::new(Store::open_location(&config.store).context("Failed to open store")?);

    match args.command {
        Commands::Ingest { file } => {
            let bytes = std::fs::read(&file)
                .with_context(|| format!("Failed to read {}", file.display()))?;
            let file_name = file
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_else(|| "upload.zip".to_string());
            info!("Ingesting {} ({} bytes)", file.display(), bytes.len());

            let orchestrator = IngestionOrchestrator::with_options(Arc::clone(&store), config.ingestion);
            let result = tokio::task::spawn_blocking(move || orchestrator.ingest_archive(&file_name, bytes))
                .await
                .context("Ingestion task failed")??;
            println!("{}", serde_json::to_string_pretty(&result)?);
        }
        Commands::Query { sql } => match config.guards.execute(Arc::clone(&store), &sql).await {
            Ok(result) => println!("{}", serde_json::to_string_pretty(&result)?),
            Err(e) => {
                error!("Query failed: {}", e);
                return Err(e.into());
            }
        },
        Commands::Catalog { audit } => {
            let entries = store.with_connection(Catalog::list)?;
            println!("{}", serde_json::to_string_pretty(&entries)?);
            if audit {
                let report = store.with_connection(Catalog::audit)?;
                println!("{}", serde_json::to_string_pretty(&report)?);
                if !report.is_consistent() {
                    anyhow::bail!("catalog is out of sync with the store");
                }
            }
        }
    }

    Ok(())
}
