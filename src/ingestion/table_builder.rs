//! Table Builder - Materializes a normalized sheet as a store table

use crate::catalog::{Catalog, CatalogEntry};
use crate::error::{Result, SheetError};
use crate::ingestion::schema_normalizer::NormalizedTable;
use crate::store::quote_ident;
use itertools::Itertools;
use rusqlite::{params_from_iter, Transaction};
use tracing::debug;

pub struct TableBuilder;

impl TableBuilder {
    /// Replace `table_name` with the contents of `table` and record it in the
    /// catalog, all on `tx`. The caller commits.
    pub fn materialize(
        tx: &Transaction<'_>,
        table_name: &str,
        table: &NormalizedTable,
    ) -> Result<CatalogEntry> {
        if table.columns.is_empty() {
            return Err(SheetError::StorageWriteFailure(format!(
                "Table '{}' has no columns",
                table_name
            )));
        }

        let quoted_table = quote_ident(table_name);
        let column_defs = table
            .columns
            .iter()
            .map(|c| format!("{} TEXT", quote_ident(c)))
            .join(", ");

        tx.execute_batch(&format!(
            "DROP TABLE IF EXISTS {table}; CREATE TABLE {table} ({columns});",
            table = quoted_table,
            columns = column_defs
        ))
        .map_err(|e| write_failure(table_name, e))?;

        let insert_sql = format!(
            "INSERT INTO {} ({}) VALUES ({})",
            quoted_table,
            table.columns.iter().map(|c| quote_ident(c)).join(", "),
            (1..=table.columns.len()).map(|i| format!("?{}", i)).join(", ")
        );
        {
            let mut stmt = tx
                .prepare(&insert_sql)
                .map_err(|e| write_failure(table_name, e))?;
            for row in &table.rows {
                stmt.execute(params_from_iter(row.iter()))
                    .map_err(|e| write_failure(table_name, e))?;
            }
        }

        debug!(
            "Wrote {} rows x {} columns into '{}'",
            table.rows.len(),
            table.columns.len(),
            table_name
        );

        Catalog::upsert(tx, table_name, &table.columns, table.row_count())
    }
}

fn write_failure(table_name: &str, err: rusqlite::Error) -> SheetError {
    SheetError::StorageWriteFailure(format!("Failed to write table '{}': {}", table_name, err))
}
