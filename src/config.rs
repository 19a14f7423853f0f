//! Runtime configuration
//!
//! Values come from the environment (a `.env` file is loaded by the binaries
//! first), falling back to the built-in limits.

use crate::error::{Result, SheetError};
use crate::ingestion::IngestionOptions;
use crate::security::QueryGuards;
use std::path::PathBuf;
use std::time::Duration;

pub const DEFAULT_BIND: &str = "0.0.0.0:8080";
pub const DEFAULT_DB_PATH: &str = "data/sheetsql.db";
pub const DEFAULT_MAX_UPLOAD_MB: u64 = 200;

/// Where the store lives.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreLocation {
    File(PathBuf),
    Memory,
}

impl StoreLocation {
    /// `:memory:` selects an in-memory store, anything else is a file path.
    pub fn parse(raw: &str) -> Self {
        if raw.trim() == ":memory:" {
            StoreLocation::Memory
        } else {
            StoreLocation::File(PathBuf::from(raw.trim()))
        }
    }
}

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub bind: String,
    pub store: StoreLocation,
    pub guards: QueryGuards,
    pub ingestion: IngestionOptions,
    pub max_upload_bytes: u64,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            bind: DEFAULT_BIND.to_string(),
            store: StoreLocation::File(PathBuf::from(DEFAULT_DB_PATH)),
            guards: QueryGuards::default(),
            ingestion: IngestionOptions::default(),
            max_upload_bytes: DEFAULT_MAX_UPLOAD_MB * 1024 * 1024,
        }
    }
}

impl AppConfig {
    /// Read `SHEETSQL_*` variables from the process environment.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build a config from an arbitrary variable lookup.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();

        if let Some(bind) = lookup("SHEETSQL_BIND") {
            config.bind = bind;
        }
        if let Some(path) = lookup("SHEETSQL_DB_PATH") {
            config.store = StoreLocation::parse(&path);
        }
        if let Some(rows) = parse_var::<usize>(&lookup, "SHEETSQL_QUERY_MAX_ROWS")? {
            if rows == 0 {
                return Err(SheetError::Config(
                    "SHEETSQL_QUERY_MAX_ROWS must be positive".to_string(),
                ));
            }
            config.guards.max_rows = rows;
        }
        if let Some(secs) = parse_var::<f64>(&lookup, "SHEETSQL_QUERY_TIMEOUT_SECS")? {
            if !(secs.is_finite() && secs > 0.0) {
                return Err(SheetError::Config(
                    "SHEETSQL_QUERY_TIMEOUT_SECS must be a positive number".to_string(),
                ));
            }
            config.guards.execution_timeout = Duration::from_secs_f64(secs);
        }
        if let Some(rows) = parse_var::<u64>(&lookup, "SHEETSQL_INGEST_MAX_ROWS")? {
            config.ingestion.max_total_rows = rows;
        }
        if let Some(mb) = parse_var::<u64>(&lookup, "SHEETSQL_MAX_UPLOAD_MB")? {
            config.max_upload_bytes = mb.saturating_mul(1024 * 1024);
        }

        Ok(config)
    }
}

fn parse_var<T>(lookup: &impl Fn(&str) -> Option<String>, key: &str) -> Result<Option<T>>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    match lookup(key) {
        None => Ok(None),
        Some(raw) => raw
            .trim()
            .parse::<T>()
            .map(Some)
            .map_err(|e| SheetError::Config(format!("{}={:?}: {}", key, raw, e))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_defaults_match_limits() {
        let config = AppConfig::from_lookup(|_| None).unwrap();
        assert_eq!(config.guards.max_rows, 50_000);
        assert_eq!(config.guards.execution_timeout, Duration::from_secs(10));
        assert_eq!(config.ingestion.max_total_rows, 2_000_000);
        assert_eq!(config.bind, DEFAULT_BIND);
    }

    #[test]
    fn test_overrides() {
        let config = AppConfig::from_lookup(lookup_from(&[
            ("SHEETSQL_DB_PATH", ":memory:"),
            ("SHEETSQL_QUERY_MAX_ROWS", "10"),
            ("SHEETSQL_QUERY_TIMEOUT_SECS", "0.5"),
            ("SHEETSQL_INGEST_MAX_ROWS", "100"),
        ]))
        .unwrap();
        assert_eq!(config.store, StoreLocation::Memory);
        assert_eq!(config.guards.max_rows, 10);
        assert_eq!(config.guards.execution_timeout, Duration::from_millis(500));
        assert_eq!(config.ingestion.max_total_rows, 100);
    }

    #[test]
    fn test_bad_value_is_config_error() {
        let err = AppConfig::from_lookup(lookup_from(&[("SHEETSQL_QUERY_MAX_ROWS", "lots")]))
            .unwrap_err();
        assert!(matches!(err, SheetError::Config(_)));
    }
}
