//! Ingestion Module - uploaded archives into queryable tables
//!
//! Handles untrusted spreadsheet uploads with:
//! - Archive limits (entry count, per-member and total size)
//! - Format checks by extension and signature
//! - OOXML and delimited-text readers
//! - Header normalization to all-text tables
//! - A global row cap per upload

pub mod archive;
pub mod cell;
pub mod csv_reader;
pub mod orchestrator;
pub mod schema_normalizer;
pub mod source;
pub mod table_builder;
pub mod xlsx_reader;

pub use archive::{ArchiveLimits, ArchiveReader, MemberFormat};
pub use cell::CellValue;
pub use orchestrator::{IngestionOptions, IngestionOrchestrator, DEFAULT_MAX_TOTAL_ROWS};
pub use schema_normalizer::{NormalizedTable, SchemaNormalizer};
pub use source::{ReadError, SheetSource};
pub use table_builder::TableBuilder;

use crate::catalog::CatalogEntry;
use crate::error::SheetError;
use serde::{Deserialize, Serialize};

/// A member (or sheet) that was passed over, and why.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct SkippedMember {
    pub member: String,
    pub reason: String,
}

/// Ingestion result
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct IngestionResult {
    pub ok: bool,

    /// Catalog entries written by this run, in ingestion order
    pub tables: Vec<CatalogEntry>,

    /// True when the global row cap cut the run short
    pub truncated: bool,

    pub skipped: Vec<SkippedMember>,

    pub warnings: Vec<String>,

    /// Ingestion run ID
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub run_id: String,

    /// Status
    pub status: IngestionStatus,

    /// Error message (if failed)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl IngestionResult {
    /// Response body for a run that produced nothing.
    pub fn failed(err: &SheetError) -> Self {
        Self {
            ok: false,
            tables: Vec::new(),
            truncated: false,
            skipped: Vec::new(),
            warnings: Vec::new(),
            run_id: String::new(),
            status: IngestionStatus::Failed,
            error: Some(err.to_string()),
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub enum IngestionStatus {
    Success,
    Partial,
    Failed,
}
