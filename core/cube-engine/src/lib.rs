//! FILENAME: core/cube-engine/src/lib.rs
//! In-memory cube for hierarchical aggregation.
//!
//! A cube holds flat source records and answers grouped queries over them as
//! trees of aggregate rows. Views keep their tree alive and patch it in place
//! when only measure values change, so a grid can redraw just the rows in the
//! `ChangeSet` returned inside `ViewChange::Patched`.
//!
//! Layers:
//! - `definition`: Serializable configuration (what the cube and a query ARE)
//! - `field` / `aggregate`: Field roles and aggregation rules
//! - `row`: The row arena a view is built on (HOW we store results)
//! - `view`: Building, rendering and incremental updates (HOW we calculate)
//! - `render`: Row snapshots for the frontend (WHAT we display)
//! - `cube`: Owns records and views and routes data changes

pub mod aggregate;
pub mod cube;
pub mod definition;
pub mod error;
pub mod field;
pub mod query;
pub mod render;
pub mod row;
pub mod view;

pub use aggregate::{
    AggregateAccumulator, Aggregator, CellUpdate, ChildCell, CustomAggregator, FieldUpdate,
    MeasureCell,
};
pub use cube::{Cube, Info};
pub use definition::*;
pub use error::CubeError;
pub use field::{AppliedDimensions, CanAggregateFn, CubeField, CubeFieldSource};
pub use query::{BucketFn, BucketSpec, BucketSpecFn, LockFn, OmitFn, Query, QueryConfig};
pub use render::RenderRow;
pub use row::{RowId, RowKind, RowNode, RowRef, RowTree, RECORD_ID_DELIMITER, ROOT_ID, ROOT_LABEL};
pub use view::{build_view, ChangeSet, DimensionValues, View, ViewChange};
