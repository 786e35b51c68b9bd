//! FILENAME: core/filter-engine/src/error.rs

use data::DataError;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum FilterError {
    #[error("Invalid filter spec: {0}")]
    InvalidFilterSpec(String),

    #[error("Unknown filter operator '{0}'")]
    UnknownOperator(String),

    #[error("Operator '{0}' does not support multiple values")]
    MultipleValuesNotSupported(String),

    #[error("Filter cannot be serialized: {0}")]
    NotSerializable(String),

    #[error(transparent)]
    Data(#[from] DataError),
}
