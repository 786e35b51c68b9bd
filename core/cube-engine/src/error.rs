//! FILENAME: core/cube-engine/src/error.rs

use data::DataError;
use filter_engine::FilterError;
use thiserror::Error;

use crate::definition::ViewId;

#[derive(Error, Debug)]
pub enum CubeError {
    #[error("Unknown dimension '{0}'")]
    UnknownDimension(String),

    #[error("Field '{0}' is not a dimension")]
    NotADimension(String),

    #[error("Unknown field '{0}'")]
    UnknownField(String),

    #[error("Unknown aggregator '{0}'")]
    UnknownAggregator(String),

    #[error("View not found: {0}")]
    UnknownView(ViewId),

    #[error("Record not found in view: {0}")]
    UnknownRecord(String),

    #[error("Cannot update dimension field '{0}' in place")]
    DimensionUpdate(String),

    #[error(transparent)]
    Data(#[from] DataError),

    #[error(transparent)]
    Filter(#[from] FilterError),

    #[error("Invalid cube config: {0}")]
    Config(#[from] serde_json::Error),
}
