pub mod catalog;
pub mod config;
pub mod error;
pub mod execution;
pub mod ingestion;
pub mod security;
pub mod server;
pub mod store;

pub use catalog::{Catalog, CatalogAudit, CatalogEntry};
pub use config::{AppConfig, StoreLocation};
pub use error::{Rejection, Result, SheetError};
pub use execution::{FieldDescriptor, QueryResult};
pub use ingestion::{IngestionOrchestrator, IngestionResult, IngestionStatus};
pub use security::{QueryGuards, SqlValidator, ValidatedQuery};
pub use store::{Store, StoreHandle};

/// Install the `tracing` subscriber used by the binaries. `RUST_LOG`
/// overrides the default `info` level.
pub fn init_tracing() {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    let _ = tracing_subscriber::fmt().with_env_filter(filter).try_init();
}
