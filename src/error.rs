use std::time::Duration;
use thiserror::Error;

/// Why the query guard refused a statement. Rejected statements are never executed.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum Rejection {
    #[error("statement is empty")]
    Empty,

    #[error("multiple statements are not allowed")]
    MultipleStatements,

    #[error("forbidden keyword: {0}")]
    ForbiddenKeyword(String),

    #[error("only SELECT or WITH ... SELECT statements are allowed (got {0})")]
    NotReadOnly(String),

    #[error("could not parse statement: {0}")]
    Malformed(String),
}

#[derive(Error, Debug)]
pub enum SheetError {
    #[error("Invalid archive: {0}")]
    InvalidArchive(String),

    #[error("Unsupported member '{member}': {reason}")]
    UnsupportedMember { member: String, reason: String },

    #[error("Storage write failure: {0}")]
    StorageWriteFailure(String),

    #[error("Row cap of {cap} rows reached; remaining sheets were not ingested")]
    RowCapExceeded { cap: u64 },

    #[error("Query rejected: {0}")]
    ValidationRejected(Rejection),

    #[error("Query exceeded the {}s timeout", .0.as_secs_f64())]
    Timeout(Duration),

    #[error("Execution error: {0}")]
    ExecutionError(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl SheetError {
    /// Short, stable label surfaced as the `error` field of API responses.
    pub fn label(&self) -> &'static str {
        match self {
            SheetError::InvalidArchive(_) => "InvalidArchive",
            SheetError::UnsupportedMember { .. } => "UnsupportedMember",
            SheetError::StorageWriteFailure(_) => "StorageWriteFailure",
            SheetError::RowCapExceeded { .. } => "RowCapExceeded",
            SheetError::ValidationRejected(_) => "ValidationRejected",
            SheetError::Timeout(_) => "Timeout",
            SheetError::ExecutionError(_) => "ExecutionError",
            SheetError::NotFound(_) => "NotFound",
            SheetError::Config(_) => "Config",
            SheetError::Io(_) => "Io",
            SheetError::Json(_) => "Json",
        }
    }

    /// Human-readable detail for the `details` field, when there is more to say than the label.
    pub fn details(&self) -> Option<String> {
        match self {
            SheetError::ValidationRejected(reason) => Some(reason.to_string()),
            SheetError::ExecutionError(msg)
            | SheetError::InvalidArchive(msg)
            | SheetError::StorageWriteFailure(msg)
            | SheetError::NotFound(msg) => Some(msg.clone()),
            SheetError::Json(e) => Some(e.to_string()),
            SheetError::Timeout(_) => Some(self.to_string()),
            _ => None,
        }
    }
}

impl From<Rejection> for SheetError {
    fn from(reason: Rejection) -> Self {
        SheetError::ValidationRejected(reason)
    }
}

pub type Result<T> = std::result::Result<T, SheetError>;
