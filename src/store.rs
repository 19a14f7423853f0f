//! Embedded store
//!
//! A single SQLite connection shared by the whole process. Access is
//! serialized through a mutex, which gives the "one logical writer at a time"
//! discipline the catalog relies on. `StoreHandle` opens the connection
//! lazily on first use and hands out the same `Arc<Store>` afterwards.

use crate::catalog::Catalog;
use crate::config::StoreLocation;
use crate::error::{Result, SheetError};
use rusqlite::{Connection, Transaction};
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::OnceCell;
use tracing::info;

pub struct Store {
    conn: Mutex<Connection>,
    location: StoreLocation,
}

impl Store {
    /// Open (or create) a file-backed store.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let conn = Connection::open(path)
            .map_err(|e| SheetError::StorageWriteFailure(format!("Failed to open store: {}", e)))?;
        // WAL keeps readers of committed tables unblocked while a sheet is written.
        conn.pragma_update_and_check(None, "journal_mode", "WAL", |row| row.get::<_, String>(0))
            .map_err(|e| SheetError::StorageWriteFailure(format!("Failed to enable WAL: {}", e)))?;

        Self::init(conn, StoreLocation::File(path.to_path_buf()))
    }

    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()
            .map_err(|e| SheetError::StorageWriteFailure(format!("Failed to open store: {}", e)))?;
        Self::init(conn, StoreLocation::Memory)
    }

    pub fn open_location(location: &StoreLocation) -> Result<Self> {
        match location {
            StoreLocation::File(path) => Self::open(path),
            StoreLocation::Memory => Self::open_in_memory(),
        }
    }

    fn init(conn: Connection, location: StoreLocation) -> Result<Self> {
        Catalog::ensure_schema(&conn)?;
        info!("Store ready at {:?}", location);
        Ok(Self {
            conn: Mutex::new(conn),
            location,
        })
    }

    pub fn location(&self) -> &StoreLocation {
        &self.location
    }

    fn lock(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|_| SheetError::StorageWriteFailure("store lock poisoned".to_string()))
    }

    /// Run `f` with exclusive access to the connection.
    pub fn with_connection<T>(&self, f: impl FnOnce(&Connection) -> Result<T>) -> Result<T> {
        let conn = self.lock()?;
        f(&conn)
    }

    /// Run `f` inside one transaction; it commits only when `f` succeeds.
    /// Nothing `f` wrote is visible to other callers until the commit.
    pub fn with_transaction<T>(&self, f: impl FnOnce(&Transaction<'_>) -> Result<T>) -> Result<T> {
        let mut conn = self.lock()?;
        let tx = conn.transaction().map_err(|e| {
            SheetError::StorageWriteFailure(format!("Failed to start transaction: {}", e))
        })?;
        let value = f(&tx)?;
        tx.commit().map_err(|e| {
            SheetError::StorageWriteFailure(format!("Failed to commit transaction: {}", e))
        })?;
        Ok(value)
    }
}

/// Process-wide accessor for the store. The connection is created on first
/// use and lives until the process exits.
pub struct StoreHandle {
    location: StoreLocation,
    cell: OnceCell<Arc<Store>>,
}

impl StoreHandle {
    pub fn new(location: StoreLocation) -> Self {
        Self {
            location,
            cell: OnceCell::new(),
        }
    }

    /// Wrap an already opened store (tests, CLI).
    pub fn from_store(store: Arc<Store>) -> Self {
        Self {
            location: store.location().clone(),
            cell: OnceCell::new_with(Some(store)),
        }
    }

    pub async fn get(&self) -> Result<Arc<Store>> {
        let store = self
            .cell
            .get_or_try_init(|| async {
                let location = self.location.clone();
                let store = tokio::task::spawn_blocking(move || Store::open_location(&location))
                    .await
                    .map_err(|e| {
                        SheetError::StorageWriteFailure(format!("Store open task failed: {}", e))
                    })??;
                Ok::<_, SheetError>(Arc::new(store))
            })
            .await?;
        Ok(Arc::clone(store))
    }
}

/// Quote an identifier for the store's SQL dialect.
pub fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_failed_transaction_leaves_nothing_behind() {
        let store = Store::open_in_memory().unwrap();
        let result: Result<()> = store.with_transaction(|tx| {
            tx.execute_batch("CREATE TABLE scratch (a TEXT)").unwrap();
            Err(SheetError::StorageWriteFailure("boom".to_string()))
        });
        assert!(result.is_err());

        let exists: i64 = store
            .with_connection(|conn| {
                Ok(conn
                    .query_row(
                        "SELECT COUNT(*) FROM sqlite_master WHERE name = 'scratch'",
                        [],
                        |row| row.get(0),
                    )
                    .unwrap())
            })
            .unwrap();
        assert_eq!(exists, 0);
    }

    #[test]
    fn test_file_store_creates_parent_dirs() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("nested").join("store.db");
        let store = Store::open(&path).unwrap();
        assert!(path.exists());
        assert_eq!(store.location(), &StoreLocation::File(path));
    }

    #[tokio::test]
    async fn test_handle_opens_once() {
        let handle = StoreHandle::new(StoreLocation::Memory);
        let a = handle.get().await.unwrap();
        let b = handle.get().await.unwrap();
        assert!(Arc::ptr_eq(&a, &b));
    }

    #[test]
    fn test_quote_ident_escapes_quotes() {
        assert_eq!(quote_ident("Name"), "\"Name\"");
        assert_eq!(quote_ident("a\"b"), "\"a\"\"b\"");
    }
}
