//! FILENAME: core/filter-engine/src/lib.rs
//! Record filters for the cube.
//!
//! Filters come in three shapes:
//! - `FieldFilter` - tests one field against one or more values
//! - `CompoundFilter` - ANDs or ORs child filters
//! - `FunctionFilter` - wraps an app-supplied predicate
//!
//! `parse_filter` normalizes JSON and code-built specs into a `Filter` tree, and
//! `Filter::get_test_fn` compiles the tree into one closure for use in a scan.

pub mod compile;
pub mod error;
pub mod filter;
pub mod parse;
pub mod utils;

pub use compile::FieldSource;
pub use error::FilterError;
pub use filter::{
    CompoundFilter, CompoundOp, FieldFilter, Filter, FilterOp, FilterType, FilterValue,
    FunctionFilter, TestFn,
};
pub use parse::{parse_filter, parse_filter_json, FilterLike, FilterValidation, DEFAULT_FUNCTION_KEY};
pub use utils::{
    combine_value_filters, flatten_filter, with_filter, with_filter_by_field, with_filter_by_key,
    with_filter_by_types, without_filters_by_field, without_filters_by_key,
    without_filters_by_type,
};
