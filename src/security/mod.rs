pub mod query_guards;
pub mod sql_validator;

pub use query_guards::*;
pub use sql_validator::*;
