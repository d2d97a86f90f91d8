use thiserror::Error;

use crate::construct::Thing;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum SchemataError {
    #[error("Schema incomplete: {0}")]
    SchemaIncomplete(String),
    #[error("Schema conflict: {0}")]
    SchemaConflict(String),
    #[error("Type mismatch: attribute {attribute} expects {expected}, got {found}")]
    TypeMismatch { attribute: String, expected: String, found: String },
    #[error("Unique conflict: {attribute} value {value} is already held by {existing}")]
    UniqueConflict { attribute: String, value: String, existing: Thing },
    #[error("Unknown ident: {0}")]
    UnknownIdent(String),
    #[error("Cardinality violation: {0}")]
    CardinalityViolation(String),
    #[error("Unknown entity: {0}")]
    UnknownEntity(Thing),
    #[error("Invalid transaction: {0}")]
    InvalidTransaction(String),
    #[error("Parse error: {message}")]
    Parse { message: String, line: Option<usize>, col: Option<usize> },
    #[error("Config error: {0}")]
    Config(String),
    #[error("Transaction cancelled")]
    Cancelled,
    #[error("Lock poisoned: {0}")]
    Lock(String),
}

pub type Result<T> = std::result::Result<T, SchemataError>;

// Helper conversions
impl From<config::ConfigError> for SchemataError {
    fn from(e: config::ConfigError) -> Self { Self::Config(e.to_string()) }
}
impl<T> From<std::sync::PoisonError<T>> for SchemataError {
    fn from(e: std::sync::PoisonError<T>) -> Self { Self::Lock(e.to_string()) }
}
