//! Execution Module - result shaping for guarded queries

pub mod result;

pub use result::{FieldDescriptor, QueryResult};
