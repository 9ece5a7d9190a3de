use thiserror::Error;

use super::types::DbType;

pub type MapperResult<T> = Result<T, MapperError>;

/// Mapping failures. These are programming errors in the data model or the
/// caller and are raised before any SQL reaches the database.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum MapperError {
    #[error("Unknown column: {property} is not mapped on {table}")]
    UnknownColumn { table: String, property: String },

    #[error("Value out of range for parameter `{param}`: no database type mapping for `{type_name}`")]
    UnsupportedType {
        param: &'static str,
        type_name: &'static str,
    },

    #[error("Type mismatch on {property}: column is {expected}, value is {got}")]
    TypeMismatch {
        property: String,
        expected: DbType,
        got: DbType,
    },

    #[error("Expected a {expected} value, got {got}")]
    ValueMismatch { expected: DbType, got: DbType },

    #[error("Unexpected NULL for a non-optional {expected} value")]
    UnexpectedNull { expected: DbType },

    #[error("Operator {op} is not applicable to {property} ({db_type})")]
    InvalidOperator {
        property: String,
        op: &'static str,
        db_type: DbType,
    },

    #[error("Invalid SQL identifier: {0:?}")]
    InvalidIdentifier(String),

    #[error("Duplicate mapping for {0}")]
    DuplicateColumn(String),

    #[error("Expected {expected} values for {table}, got {got}")]
    ValueCountMismatch {
        table: String,
        expected: usize,
        got: usize,
    },

    #[error("IN list for {0} must not be empty")]
    EmptyValueList(String),

    #[error("Update of {0} must assign at least one column")]
    EmptyAssignment(String),

    #[error("Filter on {property} expects {expected}")]
    FilterShape {
        property: String,
        expected: &'static str,
    },
}

impl MapperError {
    pub(crate) const fn unsupported_type(type_name: &'static str) -> Self {
        Self::UnsupportedType {
            param: "type",
            type_name,
        }
    }
}
