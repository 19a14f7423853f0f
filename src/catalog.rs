//! Catalog Manager
//!
//! `_catalog` holds one row per ingested table: its name, a display list of its
//! columns and its row count. Rows are only ever written through
//! [`Catalog::upsert`], which takes the transaction that materialized the
//! table, so a catalog row and its table always commit (or roll back) together.

use crate::error::{Result, SheetError};
use crate::store::quote_ident;
use rusqlite::{params, Connection, OptionalExtension, Transaction};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

pub const CATALOG_TABLE: &str = "_catalog";

/// One ingested table as recorded in `_catalog`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CatalogEntry {
    pub table_name: String,
    /// Column names in table order, joined for display (`"Name, Qty"`).
    pub columns: String,
    pub rows: u64,
}

/// Read-only consistency report between `_catalog` and the tables in the store.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CatalogAudit {
    /// Catalog rows whose table does not exist.
    pub orphans: Vec<String>,
    /// Tables that exist without a catalog row.
    pub untracked: Vec<String>,
    /// Tables whose actual row count differs from the recorded one.
    pub miscounted: Vec<String>,
}

impl CatalogAudit {
    pub fn is_consistent(&self) -> bool {
        self.orphans.is_empty() && self.untracked.is_empty() && self.miscounted.is_empty()
    }
}

pub fn display_columns(columns: &[String]) -> String {
    columns.join(", ")
}

pub struct Catalog;

impl Catalog {
    /// Create `_catalog` if it does not exist yet.
    pub fn ensure_schema(conn: &Connection) -> Result<()> {
        conn.execute_batch(&format!(
            r#"
            CREATE TABLE IF NOT EXISTS {} (
                table_name TEXT PRIMARY KEY,
                columns TEXT NOT NULL,
                "rows" INTEGER NOT NULL
            )
            "#,
            quote_ident(CATALOG_TABLE)
        ))
        .map_err(|e| SheetError::StorageWriteFailure(format!("Failed to create catalog: {}", e)))
    }

    /// Insert or replace the catalog row for `table_name`.
    ///
    /// Must be called on the transaction that created the table; a catalog row
    /// for a table that is not there is refused.
    pub fn upsert(
        tx: &Transaction<'_>,
        table_name: &str,
        columns: &[String],
        rows: u64,
    ) -> Result<CatalogEntry> {
        if !table_exists(tx, table_name)? {
            return Err(SheetError::StorageWriteFailure(format!(
                "Cannot catalog '{}': table does not exist",
                table_name
            )));
        }

        let entry = CatalogEntry {
            table_name: table_name.to_string(),
            columns: display_columns(columns),
            rows,
        };
        let row_count = i64::try_from(rows).map_err(|_| {
            SheetError::StorageWriteFailure(format!("Row count {} out of range", rows))
        })?;

        tx.execute(
            &format!(
                r#"
                INSERT INTO {} (table_name, columns, "rows") VALUES (?1, ?2, ?3)
                ON CONFLICT(table_name) DO UPDATE SET columns = excluded.columns, "rows" = excluded."rows"
                "#,
                quote_ident(CATALOG_TABLE)
            ),
            params![entry.table_name, entry.columns, row_count],
        )
        .map_err(|e| {
            SheetError::StorageWriteFailure(format!("Failed to update catalog for '{}': {}", table_name, e))
        })?;

        Ok(entry)
    }

    /// All catalog rows, ordered by table name.
    pub fn list(conn: &Connection) -> Result<Vec<CatalogEntry>> {
        let mut stmt = conn
            .prepare(&format!(
                r#"SELECT table_name, columns, "rows" FROM {} ORDER BY table_name"#,
                quote_ident(CATALOG_TABLE)
            ))
            .map_err(|e| SheetError::ExecutionError(e.to_string()))?;

        let entries = stmt
            .query_map([], read_entry)
            .map_err(|e| SheetError::ExecutionError(e.to_string()))?
            .collect::<std::result::Result<Vec<_>, _>>()
            .map_err(|e| SheetError::ExecutionError(e.to_string()))?;

        Ok(entries)
    }

    pub fn get(conn: &Connection, table_name: &str) -> Result<Option<CatalogEntry>> {
        conn.query_row(
            &format!(
                r#"SELECT table_name, columns, "rows" FROM {} WHERE table_name = ?1"#,
                quote_ident(CATALOG_TABLE)
            ),
            params![table_name],
            read_entry,
        )
        .optional()
        .map_err(|e| SheetError::ExecutionError(e.to_string()))
    }

    /// Compare the catalog against the tables actually present in the store.
    pub fn audit(conn: &Connection) -> Result<CatalogAudit> {
        let tables: BTreeSet<String> = user_tables(conn)?.into_iter().collect();
        let entries = Self::list(conn)?;
        let cataloged: BTreeSet<String> =
            entries.iter().map(|entry| entry.table_name.clone()).collect();

        let mut miscounted = Vec::new();
        for entry in entries.iter().filter(|e| tables.contains(&e.table_name)) {
            let actual: i64 = conn
                .query_row(
                    &format!("SELECT COUNT(*) FROM {}", quote_ident(&entry.table_name)),
                    [],
                    |row| row.get(0),
                )
                .map_err(|e| SheetError::ExecutionError(e.to_string()))?;
            if actual.max(0) as u64 != entry.rows {
                miscounted.push(entry.table_name.clone());
            }
        }

        Ok(CatalogAudit {
            orphans: cataloged.difference(&tables).cloned().collect(),
            untracked: tables.difference(&cataloged).cloned().collect(),
            miscounted,
        })
    }
}

fn read_entry(row: &rusqlite::Row<'_>) -> rusqlite::Result<CatalogEntry> {
    let rows: i64 = row.get(2)?;
    Ok(CatalogEntry {
        table_name: row.get(0)?,
        columns: row.get(1)?,
        rows: rows.max(0) as u64,
    })
}

fn table_exists(conn: &Connection, table_name: &str) -> Result<bool> {
    conn.query_row(
        "SELECT COUNT(*) FROM sqlite_master WHERE type = 'table' AND name = ?1",
        params![table_name],
        |row| row.get::<_, i64>(0),
    )
    .map(|count| count > 0)
    .map_err(|e| SheetError::StorageWriteFailure(e.to_string()))
}

/// Data tables in the store: everything except SQLite internals and the catalog itself.
fn user_tables(conn: &Connection) -> Result<Vec<String>> {
    let mut stmt = conn
        .prepare(
            "SELECT name FROM sqlite_master \
             WHERE type = 'table' AND substr(name, 1, 7) <> 'sqlite_' AND name <> ?1 \
             ORDER BY name",
        )
        .map_err(|e| SheetError::ExecutionError(e.to_string()))?;

    let names = stmt
        .query_map(params![CATALOG_TABLE], |row| row.get::<_, String>(0))
        .map_err(|e| SheetError::ExecutionError(e.to_string()))?
        .collect::<std::result::Result<Vec<_>, _>>()
        .map_err(|e| SheetError::ExecutionError(e.to_string()))?;

    Ok(names)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::Store;

    fn create_table(tx: &Transaction<'_>, name: &str) {
        tx.execute_batch(&format!("CREATE TABLE {} (\"a\" TEXT)", quote_ident(name)))
            .unwrap();
    }

    #[test]
    fn test_upsert_then_get_and_list() {
        let store = Store::open_in_memory().unwrap();
        store
            .with_transaction(|tx| {
                create_table(tx, "zeta");
                create_table(tx, "alpha");
                Catalog::upsert(tx, "zeta", &["a".to_string()], 3)?;
                Catalog::upsert(tx, "alpha", &["a".to_string(), "b".to_string()], 0)
            })
            .unwrap();

        let entries = store.with_connection(Catalog::list).unwrap();
        let names: Vec<_> = entries.iter().map(|e| e.table_name.as_str()).collect();
        assert_eq!(names, vec!["alpha", "zeta"]);
        assert_eq!(entries[0].columns, "a, b");

        let zeta = store
            .with_connection(|conn| Catalog::get(conn, "zeta"))
            .unwrap()
            .unwrap();
        assert_eq!(zeta.rows, 3);

        let missing = store
            .with_connection(|conn| Catalog::get(conn, "nope"))
            .unwrap();
        assert!(missing.is_none());
    }

    #[test]
    fn test_upsert_overwrites() {
        let store = Store::open_in_memory().unwrap();
        for rows in [5, 9] {
            store
                .with_transaction(|tx| {
                    tx.execute_batch("DROP TABLE IF EXISTS sales; CREATE TABLE sales (x TEXT)")
                        .unwrap();
                    Catalog::upsert(tx, "sales", &["x".to_string()], rows)
                })
                .unwrap();
        }
        let entry = store
            .with_connection(|conn| Catalog::get(conn, "sales"))
            .unwrap()
            .unwrap();
        assert_eq!(entry.rows, 9);
    }

    #[test]
    fn test_upsert_refuses_missing_table() {
        let store = Store::open_in_memory().unwrap();
        let err = store
            .with_transaction(|tx| Catalog::upsert(tx, "ghost", &[], 0))
            .unwrap_err();
        assert!(matches!(err, SheetError::StorageWriteFailure(_)));
        assert!(store.with_connection(Catalog::list).unwrap().is_empty());
    }

    #[test]
    fn test_audit_reports_untracked_tables() {
        let store = Store::open_in_memory().unwrap();
        store
            .with_transaction(|tx| {
                create_table(tx, "tracked");
                Catalog::upsert(tx, "tracked", &["a".to_string()], 1)?;
                create_table(tx, "stray");
                Ok(())
            })
            .unwrap();

        let audit = store.with_connection(Catalog::audit).unwrap();
        assert!(audit.orphans.is_empty());
        assert_eq!(audit.untracked, vec!["stray".to_string()]);
        assert_eq!(audit.miscounted, vec!["tracked".to_string()]);
        assert!(!audit.is_consistent());
    }
}
