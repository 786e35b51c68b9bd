//! FILENAME: core/cube-engine/src/query.rs
//! PURPOSE: Query configuration and its resolution against cube fields.
//! CONTEXT: `QueryConfig` is what callers build. `Query` is the resolved form a
//! view holds: field references checked, dimensions ordered, filter compiled.

use std::fmt;
use std::sync::Arc;

use data::{SourceRecord, Value};
use filter_engine::{parse_filter, Filter, TestFn};

use crate::definition::{FieldIndex, QuerySpec};
use crate::error::CubeError;
use crate::field::{CubeField, CubeFieldSource};
use crate::row::RowRef;

pub type LockFn = Arc<dyn Fn(&RowRef<'_>) -> bool + Send + Sync>;
pub type OmitFn = Arc<dyn Fn(&RowRef<'_>) -> bool + Send + Sync>;
pub type BucketSpecFn = Arc<dyn Fn(&[RowRef<'_>]) -> Option<BucketSpec> + Send + Sync>;
/// Bucket value for a row. `Value::Null` leaves the row unbucketed.
pub type BucketFn = Arc<dyn Fn(&RowRef<'_>) -> Value + Send + Sync>;

/// Ad hoc grouping applied to the rows at one level.
#[derive(Clone)]
pub struct BucketSpec {
    pub name: String,
    pub bucket_fn: BucketFn,
}

impl BucketSpec {
    pub fn new<F>(name: impl Into<String>, bucket_fn: F) -> Self
    where
        F: Fn(&RowRef<'_>) -> Value + Send + Sync + 'static,
    {
        BucketSpec {
            name: name.into(),
            bucket_fn: Arc::new(bucket_fn),
        }
    }
}

impl fmt::Debug for BucketSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BucketSpec").field("name", &self.name).finish()
    }
}

fn same_fn<T: ?Sized>(a: &Option<Arc<T>>, b: &Option<Arc<T>>) -> bool {
    match (a, b) {
        (None, None) => true,
        (Some(a), Some(b)) => Arc::ptr_eq(a, b),
        _ => false,
    }
}

// ============================================================================
// QUERY CONFIG
// ============================================================================

#[derive(Clone, Default)]
pub struct QueryConfig {
    /// Ordered dimension names to group by.
    pub dimensions: Vec<String>,
    /// Field names to include. `None` means every cube field.
    pub fields: Option<Vec<String>>,
    pub filter: Option<Filter>,
    /// Expose the grand-total row as the single top-level row.
    pub include_root: bool,
    /// Expose leaf rows beneath the lowest grouping level.
    pub include_leaves: bool,
    /// Rows for which this returns true render without children.
    pub lock_fn: Option<LockFn>,
    /// A single child row for which this returns true is replaced by its children.
    pub omit_fn: Option<OmitFn>,
    /// Called with the rows produced at each grouping level.
    pub bucket_spec_fn: Option<BucketSpecFn>,
}

impl QueryConfig {
    pub fn new() -> Self {
        QueryConfig::default()
    }

    pub fn from_spec(spec: &QuerySpec) -> Result<Self, CubeError> {
        Ok(QueryConfig {
            dimensions: spec.dimensions.clone(),
            fields: spec.fields.clone(),
            filter: parse_filter(spec.filter.clone())?,
            include_root: spec.include_root,
            include_leaves: spec.include_leaves,
            ..Default::default()
        })
    }

    pub fn with_dimensions<I, S>(mut self, dimensions: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.dimensions = dimensions.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_fields<I, S>(mut self, fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.fields = Some(fields.into_iter().map(Into::into).collect());
        self
    }

    pub fn with_filter(mut self, filter: Option<Filter>) -> Self {
        self.filter = filter;
        self
    }

    pub fn include_root(mut self, include_root: bool) -> Self {
        self.include_root = include_root;
        self
    }

    pub fn include_leaves(mut self, include_leaves: bool) -> Self {
        self.include_leaves = include_leaves;
        self
    }

    pub fn with_lock_fn<F>(mut self, f: F) -> Self
    where
        F: Fn(&RowRef<'_>) -> bool + Send + Sync + 'static,
    {
        self.lock_fn = Some(Arc::new(f));
        self
    }

    pub fn with_omit_fn<F>(mut self, f: F) -> Self
    where
        F: Fn(&RowRef<'_>) -> bool + Send + Sync + 'static,
    {
        self.omit_fn = Some(Arc::new(f));
        self
    }

    pub fn with_bucket_spec_fn<F>(mut self, f: F) -> Self
    where
        F: Fn(&[RowRef<'_>]) -> Option<BucketSpec> + Send + Sync + 'static,
    {
        self.bucket_spec_fn = Some(Arc::new(f));
        self
    }
}

impl fmt::Debug for QueryConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("QueryConfig")
            .field("dimensions", &self.dimensions)
            .field("fields", &self.fields)
            .field("filter", &self.filter)
            .field("include_root", &self.include_root)
            .field("include_leaves", &self.include_leaves)
            .finish_non_exhaustive()
    }
}

// ============================================================================
// QUERY
// ============================================================================

#[derive(Clone)]
pub struct Query {
    /// Fields carried by the view, dimensions included.
    pub fields: Vec<Arc<CubeField>>,
    /// Grouping order, as indices into `fields`.
    pub dimensions: Vec<FieldIndex>,
    pub filter: Option<Filter>,
    test_fn: Option<TestFn>,
    pub include_root: bool,
    pub include_leaves: bool,
    pub lock_fn: Option<LockFn>,
    pub omit_fn: Option<OmitFn>,
    pub bucket_spec_fn: Option<BucketSpecFn>,
}

impl Query {
    /// Resolves `config` against the cube's fields.
    ///
    /// Dimension names are checked before anything else. Dimensions listed after
    /// a leaf dimension are dropped.
    pub fn new(config: QueryConfig, cube_fields: &[Arc<CubeField>]) -> Result<Self, CubeError> {
        let find = |name: &str| cube_fields.iter().find(|f| f.name() == name);

        let mut dimensions: Vec<Arc<CubeField>> = Vec::with_capacity(config.dimensions.len());
        for name in &config.dimensions {
            let field = find(name.as_str()).ok_or_else(|| CubeError::UnknownDimension(name.clone()))?;
            if !field.is_dimension {
                return Err(CubeError::NotADimension(name.clone()));
            }
            if dimensions.iter().any(|d| d.name() == field.name()) {
                continue;
            }
            dimensions.push(Arc::clone(field));
            if field.is_leaf_dimension {
                break;
            }
        }

        let mut fields: Vec<Arc<CubeField>> = match &config.fields {
            None => cube_fields.to_vec(),
            Some(names) => names
                .iter()
                .map(|name| {
                    find(name.as_str())
                        .cloned()
                        .ok_or_else(|| CubeError::UnknownField(name.clone()))
                })
                .collect::<Result<_, _>>()?,
        };
        for dim in &dimensions {
            if !fields.iter().any(|f| f.name() == dim.name()) {
                fields.push(Arc::clone(dim));
            }
        }

        let dimensions = dimensions
            .iter()
            .filter_map(|d| fields.iter().position(|f| f.name() == d.name()))
            .collect();

        let test_fn = config
            .filter
            .as_ref()
            .map(|f| f.get_test_fn(Some(&CubeFieldSource(cube_fields))));

        Ok(Query {
            fields,
            dimensions,
            filter: config.filter,
            test_fn,
            include_root: config.include_root,
            include_leaves: config.include_leaves,
            lock_fn: config.lock_fn,
            omit_fn: config.omit_fn,
            bucket_spec_fn: config.bucket_spec_fn,
        })
    }

    /// Whether the record passes the query filter.
    pub fn test(&self, record: &SourceRecord) -> bool {
        self.test_fn.as_ref().map_or(true, |t| t(record))
    }

    pub fn field_index(&self, name: &str) -> Option<FieldIndex> {
        self.fields.iter().position(|f| f.name() == name)
    }

    pub fn dimension_fields(&self) -> impl Iterator<Item = &Arc<CubeField>> {
        self.dimensions.iter().map(|&i| &self.fields[i])
    }

    pub fn is_dimension(&self, field: FieldIndex) -> bool {
        self.dimensions.contains(&field)
    }

    /// True when every aggregator can be updated from its row's children alone.
    pub fn aggregators_are_simple(&self) -> bool {
        self.fields
            .iter()
            .all(|f| f.aggregator.as_ref().map_or(true, |a| a.depends_on_children_only()))
    }

    /// Config that resolves back to this query.
    pub fn to_config(&self) -> QueryConfig {
        QueryConfig {
            dimensions: self.dimension_fields().map(|f| f.name().to_string()).collect(),
            fields: Some(self.fields.iter().map(|f| f.name().to_string()).collect()),
            filter: self.filter.clone(),
            include_root: self.include_root,
            include_leaves: self.include_leaves,
            lock_fn: self.lock_fn.clone(),
            omit_fn: self.omit_fn.clone(),
            bucket_spec_fn: self.bucket_spec_fn.clone(),
        }
    }

    pub fn equals_excluding_filter(&self, other: &Query) -> bool {
        self.dimensions == other.dimensions
            && self.fields.len() == other.fields.len()
            && self
                .fields
                .iter()
                .zip(&other.fields)
                .all(|(a, b)| Arc::ptr_eq(a, b) || a.name() == b.name())
            && self.include_root == other.include_root
            && self.include_leaves == other.include_leaves
            && same_fn(&self.lock_fn, &other.lock_fn)
            && same_fn(&self.omit_fn, &other.omit_fn)
            && same_fn(&self.bucket_spec_fn, &other.bucket_spec_fn)
    }
}

impl PartialEq for Query {
    fn eq(&self, other: &Self) -> bool {
        self.equals_excluding_filter(other) && self.filter == other.filter
    }
}

impl fmt::Debug for Query {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let fields: Vec<&str> = self.fields.iter().map(|f| f.name()).collect();
        let dims: Vec<&str> = self.dimension_fields().map(|f| f.name()).collect();
        f.debug_struct("Query")
            .field("fields", &fields)
            .field("dimensions", &dims)
            .field("filter", &self.filter)
            .field("include_root", &self.include_root)
            .field("include_leaves", &self.include_leaves)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::aggregate::Aggregator;
    use data::FieldType;
    use filter_engine::{FieldFilter, FilterOp};
    use serde_json::json;

    fn fields() -> Vec<Arc<CubeField>> {
        vec![
            Arc::new(CubeField::dimension("region", FieldType::String)),
            Arc::new(CubeField::dimension("desk", FieldType::String).as_leaf_dimension()),
            Arc::new(CubeField::dimension("trader", FieldType::String)),
            Arc::new(CubeField::measure("amt", FieldType::Number, Aggregator::Sum)),
            Arc::new(CubeField::measure("qty", FieldType::Int, Aggregator::Max)),
        ]
    }

    #[test]
    fn test_unknown_dimension_fails_first() {
        let config = QueryConfig::new()
            .with_dimensions(["region", "nope"])
            .with_fields(["also_nope"]);
        assert!(matches!(
            Query::new(config, &fields()),
            Err(CubeError::UnknownDimension(d)) if d == "nope"
        ));
    }

    #[test]
    fn test_non_dimension_and_unknown_field() {
        let config = QueryConfig::new().with_dimensions(["amt"]);
        assert!(matches!(
            Query::new(config, &fields()),
            Err(CubeError::NotADimension(d)) if d == "amt"
        ));

        let config = QueryConfig::new().with_fields(["amt", "zzz"]);
        assert!(matches!(
            Query::new(config, &fields()),
            Err(CubeError::UnknownField(f)) if f == "zzz"
        ));
    }

    #[test]
    fn test_dimensions_are_appended_to_fields() {
        let config = QueryConfig::new().with_dimensions(["region"]).with_fields(["amt"]);
        let query = Query::new(config, &fields()).unwrap();
        let names: Vec<_> = query.fields.iter().map(|f| f.name()).collect();
        assert_eq!(names, vec!["amt", "region"]);
        assert_eq!(query.dimensions, vec![1]);
    }

    #[test]
    fn test_leaf_dimension_truncates() {
        let config = QueryConfig::new().with_dimensions(["region", "desk", "trader"]);
        let query = Query::new(config, &fields()).unwrap();
        let dims: Vec<_> = query.dimension_fields().map(|f| f.name()).collect();
        assert_eq!(dims, vec!["region", "desk"]);
    }

    #[test]
    fn test_filter_coerced_to_field_types() {
        let filter = FieldFilter::new("qty", FilterOp::Ge, "10").unwrap();
        let config = QueryConfig::new().with_filter(Some(filter.into()));
        let query = Query::new(config, &fields()).unwrap();
        assert!(query.test(&SourceRecord::new("a").with_value("qty", 12i64)));
        assert!(!query.test(&SourceRecord::new("b").with_value("qty", 9i64)));
    }

    #[test]
    fn test_from_spec_and_equality() {
        let spec: QuerySpec = serde_json::from_value(json!({
            "dimensions": ["region"],
            "filter": {"field": "region", "op": "=", "value": "East"},
            "includeRoot": true
        }))
        .unwrap();
        let a = Query::new(QueryConfig::from_spec(&spec).unwrap(), &fields()).unwrap();
        let b = Query::new(QueryConfig::from_spec(&spec).unwrap(), &fields()).unwrap();
        assert_eq!(a, b);

        let c = Query::new(a.to_config().with_filter(None), &fields()).unwrap();
        assert_ne!(a, c);
        assert!(a.equals_excluding_filter(&c));

        let locked = Query::new(a.to_config().with_lock_fn(|_| true), &fields()).unwrap();
        assert!(!a.equals_excluding_filter(&locked));
    }
}
