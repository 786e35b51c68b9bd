//! FILENAME: core/data/src/lib.rs
//! Shared data layer for the cube: typed values, the field registry and the
//! record store. Nothing here knows about dimensions, filters or views.

pub mod error;
pub mod field;
pub mod record;
pub mod value;

pub use error::DataError;
pub use field::{
    coerce_value, create_field, gen_display_name, parse_field_value, Field, FieldConfig, FieldType,
};
pub use record::{ChangeLog, RecordChange, RecordId, RecordStore, SourceRecord, StoreTransaction};
pub use value::{OrderedFloat, Value};
