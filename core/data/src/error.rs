//! FILENAME: core/data/src/error.rs

use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum DataError {
    #[error("Unknown field type '{0}'")]
    UnknownFieldType(String),

    #[error("Record has no value for id field '{0}'")]
    MissingRecordId(String),

    #[error("Duplicate record id: {0}")]
    DuplicateRecordId(String),

    #[error("Record not found: {0}")]
    UnknownRecord(String),

    #[error("Invalid raw record: {0}")]
    InvalidRecord(String),
}
