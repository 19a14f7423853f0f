//! Ingestion Orchestrator - drives one upload from archive to catalog
//!
//! Members are handled in archive listing order and sheets in workbook
//! order. Parsing happens outside the store lock; each sheet then takes the
//! lock once to write its table and catalog row in a single transaction.

use crate::catalog::CatalogEntry;
use crate::error::{Result, SheetError};
use crate::ingestion::archive::{ArchiveLimits, ArchiveMember, ArchiveReader, MemberBytes, MemberFormat};
use crate::ingestion::cell::CellValue;
use crate::ingestion::schema_normalizer::{derive_table_name, SchemaNormalizer, MAX_TABLE_NAME_LEN};
use crate::ingestion::source::{open_source, SheetSource};
use crate::ingestion::table_builder::TableBuilder;
use crate::ingestion::{IngestionResult, IngestionStatus, SkippedMember};
use crate::store::Store;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::ops::ControlFlow;
use std::sync::Arc;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Cumulative row cap across all sheets of one upload.
pub const DEFAULT_MAX_TOTAL_ROWS: u64 = 2_000_000;

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct IngestionOptions {
    pub max_total_rows: u64,
    #[serde(skip)]
    pub archive_limits: ArchiveLimits,
}

impl Default for IngestionOptions {
    fn default() -> Self {
        Self {
            max_total_rows: DEFAULT_MAX_TOTAL_ROWS,
            archive_limits: ArchiveLimits::default(),
        }
    }
}

pub struct IngestionOrchestrator {
    store: Arc<Store>,
    options: IngestionOptions,
}

/// State of one run; dropped when the run ends.
struct IngestionRun {
    run_id: String,
    rows_ingested: u64,
    tables: Vec<CatalogEntry>,
    skipped: Vec<SkippedMember>,
    warnings: Vec<String>,
    truncated: bool,
    /// Archive-wide size limit crossed after some tables were committed.
    stopped_early: bool,
    used_names: HashSet<String>,
}

impl IngestionRun {
    fn new() -> Self {
        Self {
            run_id: Uuid::new_v4().to_string(),
            rows_ingested: 0,
            tables: Vec::new(),
            skipped: Vec::new(),
            warnings: Vec::new(),
            truncated: false,
            stopped_early: false,
            used_names: HashSet::new(),
        }
    }

    fn skip(&mut self, member: impl Into<String>, reason: impl Into<String>) {
        let (member, reason) = (member.into(), reason.into());
        warn!(
            "[{}] {}",
            self.run_id,
            SheetError::UnsupportedMember {
                member: member.clone(),
                reason: reason.clone(),
            }
        );
        self.skipped.push(SkippedMember { member, reason });
    }

    /// First free name for this run: `name`, then `name_2`, `name_3`, ...
    fn claim_name(&mut self, name: String) -> String {
        let mut candidate = name.clone();
        let mut suffix = 2;
        while self.used_names.contains(&candidate) {
            let tail = format!("_{}", suffix);
            let mut base = name.clone();
            base.truncate(MAX_TABLE_NAME_LEN.saturating_sub(tail.len()));
            candidate = format!("{}{}", base, tail);
            suffix += 1;
        }
        self.used_names.insert(candidate.clone());
        candidate
    }

    fn status(&self) -> IngestionStatus {
        if self.tables.is_empty() {
            IngestionStatus::Failed
        } else if self.truncated || self.stopped_early || !self.skipped.is_empty() {
            IngestionStatus::Partial
        } else {
            IngestionStatus::Success
        }
    }

    fn into_result(self) -> IngestionResult {
        let status = self.status();
        IngestionResult {
            ok: status != IngestionStatus::Failed,
            tables: self.tables,
            truncated: self.truncated,
            skipped: self.skipped,
            warnings: self.warnings,
            run_id: self.run_id,
            status,
            error: None,
        }
    }
}

/// Rows collected from one sheet under the remaining budget.
struct SheetRows {
    header: Option<Vec<CellValue>>,
    rows: Vec<Vec<CellValue>>,
    cut: bool,
}

impl IngestionOrchestrator {
    pub fn new(store: Arc<Store>) -> Self {
        Self::with_options(store, IngestionOptions::default())
    }

    pub fn with_options(store: Arc<Store>, options: IngestionOptions) -> Self {
        Self { store, options }
    }

    pub fn options(&self) -> &IngestionOptions {
        &self.options
    }

    /// Ingest one uploaded archive (or bare workbook).
    ///
    /// Blocking: callers on the async runtime go through `spawn_blocking`.
    pub fn ingest_archive(&self, file_name: &str, bytes: Vec<u8>) -> Result<IngestionResult> {
        let mut run = IngestionRun::new();
        info!(
            "📦 Ingestion run {} started: '{}' ({} bytes)",
            run.run_id,
            file_name,
            bytes.len()
        );

        let mut archive = ArchiveReader::open(file_name, bytes, self.options.archive_limits)?;
        let bare_workbook = archive.is_bare_workbook();

        for member in archive.members()? {
            if run.truncated {
                break;
            }

            let format = if bare_workbook {
                MemberFormat::Workbook
            } else {
                match MemberFormat::from_name(&member.name) {
                    Some(format) => format,
                    None => {
                        run.skip(&member.name, "unsupported file type");
                        continue;
                    }
                }
            };

            let bytes = match archive.read_member(&member) {
                Ok(MemberBytes::Read(bytes)) => bytes,
                Ok(MemberBytes::Skipped(reason)) => {
                    run.skip(&member.name, reason);
                    continue;
                }
                // Keep what was already committed; it is in the store either way.
                Err(SheetError::InvalidArchive(reason)) if !run.tables.is_empty() => {
                    warn!("[{}] Stopping at {}: {}", run.run_id, member.name, reason);
                    run.warnings
                        .push(format!("{}: {}; remaining members were not ingested", member.name, reason));
                    run.stopped_early = true;
                    break;
                }
                Err(e) => return Err(e),
            };
            if let Err(reason) = format.check_signature(&bytes) {
                run.skip(&member.name, reason);
                continue;
            }

            let source = match open_source(
                format,
                &member.stem(),
                bytes,
                self.options.archive_limits.max_member_bytes,
            ) {
                Ok(source) => source,
                Err(e) => {
                    run.skip(&member.name, e.to_string());
                    continue;
                }
            };

            self.ingest_member(&mut run, &member, source)?;
        }

        if run.tables.is_empty() {
            let reason = if run.skipped.is_empty() {
                "no spreadsheet members with data found".to_string()
            } else {
                format!(
                    "no tables produced; skipped: {}",
                    run.skipped
                        .iter()
                        .map(|s| format!("{} ({})", s.member, s.reason))
                        .collect::<Vec<_>>()
                        .join("; ")
                )
            };
            warn!("❌ Ingestion run {} failed: {}", run.run_id, reason);
            return Err(SheetError::InvalidArchive(reason));
        }

        info!(
            "✅ Ingestion run {} finished: {} tables, {} rows, truncated={}, skipped={}",
            run.run_id,
            run.tables.len(),
            run.rows_ingested,
            run.truncated,
            run.skipped.len()
        );
        Ok(run.into_result())
    }

    fn ingest_member(
        &self,
        run: &mut IngestionRun,
        member: &ArchiveMember,
        mut source: Box<dyn SheetSource>,
    ) -> Result<()> {
        let sheet_names = source.sheet_names();
        if sheet_names.is_empty() {
            run.skip(&member.name, "workbook has no sheets");
            return Ok(());
        }

        let stem = member.stem();
        for (index, sheet_name) in sheet_names.iter().enumerate() {
            let label = if sheet_names.len() > 1 {
                format!("{} [{}]", member.name, sheet_name)
            } else {
                member.name.clone()
            };

            let budget = self.options.max_total_rows.saturating_sub(run.rows_ingested);
            let collected = match read_sheet_rows(source.as_mut(), index, budget) {
                Ok(collected) => collected,
                Err(reason) => {
                    run.skip(label, reason);
                    continue;
                }
            };

            let header = match collected.header {
                Some(header) => header,
                None => {
                    debug!("[{}] {} is empty", run.run_id, label);
                    run.warnings.push(format!("{}: sheet is empty", label));
                    continue;
                }
            };

            if collected.rows.is_empty() {
                if collected.cut {
                    self.mark_truncated(run, &label);
                    return Ok(());
                }
                debug!("[{}] {} has a header but no data rows", run.run_id, label);
                run.warnings.push(format!("{}: sheet has no data rows", label));
                continue;
            }

            let table = SchemaNormalizer::normalize(&header, &collected.rows);
            let table_name =
                run.claim_name(derive_table_name(&stem, sheet_name, sheet_names.len()));

            let entry = self
                .store
                .with_transaction(|tx| TableBuilder::materialize(tx, &table_name, &table))?;
            info!(
                "[{}] Ingested {} -> '{}' ({} rows, {} columns)",
                run.run_id,
                label,
                entry.table_name,
                entry.rows,
                table.columns.len()
            );
            run.rows_ingested += entry.rows;
            run.tables.push(entry);

            if collected.cut {
                self.mark_truncated(run, &label);
                return Ok(());
            }
        }

        Ok(())
    }

    fn mark_truncated(&self, run: &mut IngestionRun, label: &str) {
        let cap = SheetError::RowCapExceeded {
            cap: self.options.max_total_rows,
        };
        warn!("[{}] {} while reading {}", run.run_id, cap, label);
        run.warnings.push(format!("{}: {}; later sheets were not ingested", label, cap));
        run.truncated = true;
    }
}

/// Header is the first non-empty row; fully empty rows are dropped. Stops as
/// soon as a data row arrives with no budget left.
fn read_sheet_rows(
    source: &mut dyn SheetSource,
    index: usize,
    budget: u64,
) -> std::result::Result<SheetRows, String> {
    let mut collected = SheetRows {
        header: None,
        rows: Vec::new(),
        cut: false,
    };

    source
        .stream_sheet(index, &mut |row: Vec<CellValue>| {
            if row.iter().all(CellValue::is_empty) {
                return ControlFlow::Continue(());
            }
            if collected.header.is_none() {
                collected.header = Some(row);
                return ControlFlow::Continue(());
            }
            if collected.rows.len() as u64 >= budget {
                collected.cut = true;
                return ControlFlow::Break(());
            }
            collected.rows.push(row);
            ControlFlow::Continue(())
        })
        .map_err(|e| e.to_string())?;

    Ok(collected)
}
