//! Query Result - rows and field descriptors as returned to clients

use rusqlite::types::ValueRef;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Name plus the type the store reports for it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldDescriptor {
    pub name: String,
    #[serde(rename = "type")]
    pub data_type: String,
}

/// Result of a guarded query.
///
/// `rows.len() == min(row_count, cap)` and `truncated` is set exactly when
/// more rows matched than were returned.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueryResult {
    pub ok: bool,

    pub fields: Vec<FieldDescriptor>,

    /// One object per row, keyed by field name
    pub rows: Vec<Map<String, Value>>,

    /// Total number of matched rows, including any beyond the cap
    #[serde(rename = "rowCount")]
    pub row_count: u64,

    pub truncated: bool,

    /// Execution time in milliseconds
    #[serde(skip)]
    pub execution_time_ms: u64,
}

/// Store value to JSON: text as strings, integers and reals as numbers,
/// blobs as lowercase hex.
pub fn value_to_json(value: ValueRef<'_>) -> Value {
    match value {
        ValueRef::Null => Value::Null,
        ValueRef::Integer(i) => Value::from(i),
        ValueRef::Real(f) => serde_json::Number::from_f64(f)
            .map(Value::Number)
            .unwrap_or(Value::Null),
        ValueRef::Text(bytes) => Value::String(String::from_utf8_lossy(bytes).into_owned()),
        ValueRef::Blob(bytes) => Value::String(to_hex(bytes)),
    }
}

/// SQLite storage class of a value, `None` for NULL.
pub fn storage_class(value: ValueRef<'_>) -> Option<&'static str> {
    match value {
        ValueRef::Null => None,
        ValueRef::Integer(_) => Some("integer"),
        ValueRef::Real(_) => Some("real"),
        ValueRef::Text(_) => Some("text"),
        ValueRef::Blob(_) => Some("blob"),
    }
}

fn to_hex(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{:02x}", b)).collect()
}
