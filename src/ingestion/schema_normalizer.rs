//! Schema Normalizer - turns a sheet's header and rows into an all-text table
//!
//! Deterministic: the same header and rows always produce the same columns and
//! the same text rows.

use crate::ingestion::cell::CellValue;
use std::collections::HashSet;

/// Identifier length cap for generated table names.
pub const MAX_TABLE_NAME_LEN: usize = 63;

/// A sheet ready to be materialized: column names plus text rows aligned to them.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NormalizedTable {
    pub columns: Vec<String>,
    pub rows: Vec<Vec<String>>,
}

impl NormalizedTable {
    pub fn row_count(&self) -> u64 {
        self.rows.len() as u64
    }
}

pub struct SchemaNormalizer;

impl SchemaNormalizer {
    pub fn normalize(header: &[CellValue], rows: &[Vec<CellValue>]) -> NormalizedTable {
        let columns = Self::normalize_columns(header);
        let width = columns.len();
        let rows = rows
            .iter()
            .map(|row| Self::normalize_row(row, width))
            .collect();
        NormalizedTable { columns, rows }
    }

    /// Header cells to unique, quotable column names.
    ///
    /// Empty cells become `column_<n>` (1-based position); collisions, compared
    /// case-insensitively like the store does, get `_2`, `_3`, ... appended.
    pub fn normalize_columns(header: &[CellValue]) -> Vec<String> {
        let width = header
            .iter()
            .rposition(|cell| !cell.is_empty())
            .map(|idx| idx + 1)
            .unwrap_or(0);

        let mut taken: HashSet<String> = HashSet::new();
        let mut columns = Vec::with_capacity(width);

        for (idx, cell) in header[..width].iter().enumerate() {
            let cleaned = sanitize_column_name(&cell.to_text());
            let base = if cleaned.is_empty() {
                format!("column_{}", idx + 1)
            } else {
                cleaned
            };

            let mut name = base.clone();
            let mut suffix = 2;
            while taken.contains(&name.to_lowercase()) {
                name = format!("{}_{}", base, suffix);
                suffix += 1;
            }
            taken.insert(name.to_lowercase());
            columns.push(name);
        }

        columns
    }

    /// Coerce a row to text, padded or cut to `width`.
    pub fn normalize_row(row: &[CellValue], width: usize) -> Vec<String> {
        let mut out: Vec<String> = row.iter().take(width).map(CellValue::to_text).collect();
        out.resize(width, String::new());
        out
    }
}

/// Trim, drop `"` and control characters, collapse whitespace runs to one space.
pub fn sanitize_column_name(raw: &str) -> String {
    raw.split_whitespace()
        .map(|word| {
            word.chars()
                .filter(|c| *c != '"' && !c.is_control())
                .collect::<String>()
        })
        .filter(|word| !word.is_empty())
        .collect::<Vec<_>>()
        .join(" ")
}

/// Table names: lowercase ASCII identifiers made of `[a-z0-9_]`.
///
/// Names that would be empty, start with a digit or use SQLite's reserved
/// `sqlite_` prefix get a `t_` prefix.
pub fn sanitize_table_name(raw: &str) -> String {
    let mut name = String::with_capacity(raw.len());
    let mut pending_sep = false;
    for c in raw.chars().flat_map(char::to_lowercase) {
        if c.is_ascii_alphanumeric() || c == '_' {
            if pending_sep && !name.is_empty() {
                name.push('_');
            }
            pending_sep = false;
            name.push(c);
        } else {
            pending_sep = true;
        }
    }
    let mut name = name.trim_matches('_').to_string();

    let needs_prefix = name.is_empty()
        || name.starts_with(|c: char| c.is_ascii_digit())
        || name.starts_with("sqlite_");
    if needs_prefix {
        name = format!("t_{}", name);
        name = name.trim_end_matches('_').to_string();
    }

    name.truncate(MAX_TABLE_NAME_LEN);
    name.trim_end_matches('_').to_string()
}

/// Table name for one sheet: the member's stem alone when it only has one
/// sheet, `<stem>_<sheet>` otherwise.
pub fn derive_table_name(member_stem: &str, sheet_name: &str, sheet_count: usize) -> String {
    if sheet_count <= 1 {
        sanitize_table_name(member_stem)
    } else {
        sanitize_table_name(&format!("{}_{}", member_stem, sheet_name))
    }
}
