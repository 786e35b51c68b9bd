//! FILENAME: core/cube-engine/src/field.rs
//! PURPOSE: Cube fields: a data field plus its role in grouping and aggregation.

use std::fmt;
use std::sync::Arc;

use data::{Field, FieldConfig, FieldType, Value};
use filter_engine::FieldSource;
use smallvec::SmallVec;

use crate::aggregate::Aggregator;
use crate::definition::CubeFieldConfig;
use crate::error::CubeError;

// ============================================================================
// APPLIED DIMENSIONS
// ============================================================================

/// Dimension values fixed along the path from the root to a row, outermost first.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AppliedDimensions(SmallVec<[(String, Value); 4]>);

impl AppliedDimensions {
    pub fn new() -> Self {
        AppliedDimensions::default()
    }

    pub fn get(&self, name: &str) -> Option<&Value> {
        self.0.iter().find(|(n, _)| n == name).map(|(_, v)| v)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.0.iter().any(|(n, _)| n == name)
    }

    /// Copy of `self` with `name` set to `value`.
    pub fn with(&self, name: &str, value: Value) -> Self {
        let mut ret = self.clone();
        match ret.0.iter_mut().find(|(n, _)| n == name) {
            Some(entry) => entry.1 = value,
            None => ret.0.push((name.to_string(), value)),
        }
        ret
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.0.iter().map(|(n, v)| (n.as_str(), v))
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

// ============================================================================
// CUBE FIELD
// ============================================================================

/// Decides whether a measure is aggregated at a given row. Called with the name
/// of the row's dimension or bucket (`None` for the grand total), the row's value
/// for it, and every dimension value applied at the row.
pub type CanAggregateFn =
    Arc<dyn Fn(Option<&str>, &Value, &AppliedDimensions) -> bool + Send + Sync>;

#[derive(Clone)]
pub struct CubeField {
    pub field: Field,

    /// Whether the field may be used to group records.
    pub is_dimension: bool,

    /// `None` means values are never aggregated.
    pub aggregator: Option<Aggregator>,

    pub can_aggregate_fn: Option<CanAggregateFn>,

    /// Grouping stops at this dimension.
    pub is_leaf_dimension: bool,

    /// Dimension this one refines.
    pub parent_dimension: Option<String>,
}

impl CubeField {
    pub fn new(field: Field) -> Self {
        CubeField {
            field,
            is_dimension: false,
            aggregator: None,
            can_aggregate_fn: None,
            is_leaf_dimension: false,
            parent_dimension: None,
        }
    }

    pub fn dimension(name: &str, field_type: FieldType) -> Self {
        CubeField::new(Field::new(name, field_type)).as_dimension()
    }

    pub fn measure(name: &str, field_type: FieldType, aggregator: Aggregator) -> Self {
        CubeField::new(Field::new(name, field_type)).with_aggregator(aggregator)
    }

    pub fn from_config(config: CubeFieldConfig) -> Result<Self, CubeError> {
        let aggregator = config
            .aggregator
            .as_deref()
            .map(Aggregator::from_token)
            .transpose()?;
        let field = Field::from_config(FieldConfig {
            name: config.name,
            field_type: config.field_type,
            display_name: config.display_name,
            default_value: config.default_value,
        })?;
        Ok(CubeField {
            field,
            is_dimension: config.is_dimension.unwrap_or(false),
            aggregator,
            can_aggregate_fn: None,
            is_leaf_dimension: config.is_leaf_dimension.unwrap_or(false),
            parent_dimension: config.parent_dimension,
        })
    }

    pub fn as_dimension(mut self) -> Self {
        self.is_dimension = true;
        self
    }

    pub fn as_leaf_dimension(mut self) -> Self {
        self.is_dimension = true;
        self.is_leaf_dimension = true;
        self
    }

    pub fn with_parent_dimension(mut self, parent: impl Into<String>) -> Self {
        self.parent_dimension = Some(parent.into());
        self
    }

    pub fn with_aggregator(mut self, aggregator: Aggregator) -> Self {
        self.aggregator = Some(aggregator);
        self
    }

    pub fn with_can_aggregate_fn<F>(mut self, f: F) -> Self
    where
        F: Fn(Option<&str>, &Value, &AppliedDimensions) -> bool + Send + Sync + 'static,
    {
        self.can_aggregate_fn = Some(Arc::new(f));
        self
    }

    pub fn name(&self) -> &str {
        &self.field.name
    }

    pub fn field_type(&self) -> FieldType {
        self.field.field_type
    }

    /// Whether this field is aggregated at a row grouped by `dim_name = value`.
    /// Fields fixed by an applied dimension are never aggregated.
    pub fn can_aggregate(
        &self,
        dim_name: Option<&str>,
        value: &Value,
        applied: &AppliedDimensions,
    ) -> bool {
        if applied.contains(self.name()) || self.aggregator.is_none() {
            return false;
        }
        match &self.can_aggregate_fn {
            Some(f) => f(dim_name, value, applied),
            None => true,
        }
    }
}

impl fmt::Debug for CubeField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CubeField")
            .field("field", &self.field)
            .field("is_dimension", &self.is_dimension)
            .field("aggregator", &self.aggregator)
            .field("can_aggregate_fn", &self.can_aggregate_fn.is_some())
            .field("is_leaf_dimension", &self.is_leaf_dimension)
            .field("parent_dimension", &self.parent_dimension)
            .finish()
    }
}

/// Lets filters coerce their values to cube field types.
pub struct CubeFieldSource<'a>(pub &'a [Arc<CubeField>]);

impl FieldSource for CubeFieldSource<'_> {
    fn field_type(&self, name: &str) -> Option<FieldType> {
        self.0.iter().find(|f| f.name() == name).map(|f| f.field_type())
    }
}
