use crate::model::{ColumnAttribute, Handle};
use thiserror::Error;

/// Failures raised by the storage contract.
#[derive(Debug, Error)]
pub enum RelationError {
    #[error("storage error: {0}")]
    Storage(#[from] sled::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] bincode::Error),

    #[error("{0} already exists")]
    AlreadyExists(String),

    #[error("{0} does not exist")]
    Missing(String),

    #[error("unknown column '{column}' in {relation}")]
    UnknownColumn { relation: String, column: String },

    #[error("no value for column '{column}' in row for {relation}")]
    MissingValue { relation: String, column: String },

    #[error("column '{column}' is {expected}, cannot store {found}")]
    TypeMismatch {
        column: String,
        expected: ColumnAttribute,
        found: String,
    },

    #[error("no row at {handle} in {relation}")]
    NoSuchRow { relation: String, handle: Handle },

    #[error("duplicate key in unique index {0}")]
    DuplicateKey(String),

    #[error("corrupt record: {0}")]
    Corrupt(String),
}

/// The single user-visible error of statement execution.
#[derive(Debug, Error)]
pub enum ExecError {
    #[error("DbRelationError: {0}")]
    Relation(#[from] RelationError),

    #[error("invalid SQL: {0}")]
    Parse(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("{0} is a schema table")]
    Protected(String),

    #[error("unrecognized expression: {0}")]
    MalformedPredicate(String),

    #[error("unrecognized column attribute: {0}")]
    UnsupportedType(String),

    #[error("already exists: {0}")]
    AlreadyExists(String),

    #[error("invalid: {0}")]
    Invalid(String),

    #[error("not supported: {0}")]
    NotSupported(String),
}
