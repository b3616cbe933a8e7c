use thiserror::Error;

/// Errors returned by store sessions and row accessors.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum StoreError {
    /// A unique column already holds the value.
    #[error("duplicate value for {table}.{column}")]
    Duplicate { table: String, column: String },

    #[error("unknown table: {0}")]
    UnknownTable(String),

    #[error("unknown column {table}.{column}")]
    UnknownColumn { table: String, column: String },

    /// A statement bound no values, or bound the same column twice.
    #[error("bad arity: {0}")]
    Arity(String),

    /// A row value could not be read as the requested type.
    #[error("type mismatch: {0}")]
    TypeMismatch(String),
}

pub type StoreResult<T> = Result<T, StoreError>;
