//! FILENAME: core/filter-engine/src/filter.rs
//! PURPOSE: Filter tree types, structural equality and JSON serialization.
//! CONTEXT: Filters are immutable values. Every transform in `utils` returns a new
//! tree, so a filter can be shared freely between queries and views.

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use data::{SourceRecord, Value};
use serde_json::json;

use crate::error::FilterError;

/// Compiled predicate over a source record.
pub type TestFn = Arc<dyn Fn(&SourceRecord) -> bool + Send + Sync>;

// ============================================================================
// OPERATORS
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FilterOp {
    Eq,
    Ne,
    Gt,
    Ge,
    Lt,
    Le,
    Like,
    NotLike,
    Begins,
    Ends,
}

impl FilterOp {
    pub const ALL: [FilterOp; 10] = [
        FilterOp::Eq,
        FilterOp::Ne,
        FilterOp::Gt,
        FilterOp::Ge,
        FilterOp::Lt,
        FilterOp::Le,
        FilterOp::Like,
        FilterOp::NotLike,
        FilterOp::Begins,
        FilterOp::Ends,
    ];

    pub fn token(&self) -> &'static str {
        match self {
            FilterOp::Eq => "=",
            FilterOp::Ne => "!=",
            FilterOp::Gt => ">",
            FilterOp::Ge => ">=",
            FilterOp::Lt => "<",
            FilterOp::Le => "<=",
            FilterOp::Like => "like",
            FilterOp::NotLike => "not like",
            FilterOp::Begins => "begins",
            FilterOp::Ends => "ends",
        }
    }

    /// Operators that accept a list of values, matching if any value matches
    /// (or, for the negated forms, if none does).
    pub fn supports_list(&self) -> bool {
        !self.is_comparison()
    }

    pub fn is_comparison(&self) -> bool {
        matches!(self, FilterOp::Gt | FilterOp::Ge | FilterOp::Lt | FilterOp::Le)
    }

    pub fn is_text(&self) -> bool {
        matches!(
            self,
            FilterOp::Like | FilterOp::NotLike | FilterOp::Begins | FilterOp::Ends
        )
    }
}

impl FromStr for FilterOp {
    type Err = FilterError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        FilterOp::ALL
            .iter()
            .find(|op| op.token() == s)
            .copied()
            .ok_or_else(|| FilterError::UnknownOperator(s.to_string()))
    }
}

impl fmt::Display for FilterOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.token())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum CompoundOp {
    #[default]
    And,
    Or,
}

impl CompoundOp {
    pub fn token(&self) -> &'static str {
        match self {
            CompoundOp::And => "AND",
            CompoundOp::Or => "OR",
        }
    }
}

impl FromStr for CompoundOp {
    type Err = FilterError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "AND" => Ok(CompoundOp::And),
            "OR" => Ok(CompoundOp::Or),
            _ => Err(FilterError::InvalidFilterSpec(format!(
                "compound operator must be AND or OR, got '{}'",
                s
            ))),
        }
    }
}

// ============================================================================
// FIELD FILTER
// ============================================================================

#[derive(Debug, Clone, PartialEq)]
pub enum FilterValue {
    Single(Value),
    List(Vec<Value>),
}

impl FilterValue {
    pub fn values(&self) -> &[Value] {
        match self {
            FilterValue::Single(v) => std::slice::from_ref(v),
            FilterValue::List(vs) => vs,
        }
    }

    pub fn is_list(&self) -> bool {
        matches!(self, FilterValue::List(_))
    }
}

impl From<Value> for FilterValue {
    fn from(v: Value) -> Self {
        FilterValue::Single(v)
    }
}

impl From<f64> for FilterValue {
    fn from(v: f64) -> Self {
        FilterValue::Single(v.into())
    }
}

impl From<i64> for FilterValue {
    fn from(v: i64) -> Self {
        FilterValue::Single(v.into())
    }
}

impl From<bool> for FilterValue {
    fn from(v: bool) -> Self {
        FilterValue::Single(v.into())
    }
}

impl From<&str> for FilterValue {
    fn from(v: &str) -> Self {
        FilterValue::Single(v.into())
    }
}

impl From<String> for FilterValue {
    fn from(v: String) -> Self {
        FilterValue::Single(v.into())
    }
}

impl From<chrono::NaiveDate> for FilterValue {
    fn from(v: chrono::NaiveDate) -> Self {
        FilterValue::Single(v.into())
    }
}

impl<T: Into<Value>> From<Vec<T>> for FilterValue {
    fn from(vs: Vec<T>) -> Self {
        FilterValue::List(vs.into_iter().map(Into::into).collect())
    }
}

/// Tests a single field against one or more candidate values.
#[derive(Debug, Clone)]
pub struct FieldFilter {
    pub field: String,
    pub op: FilterOp,
    pub value: FilterValue,
}

impl FieldFilter {
    /// List values are de-duplicated in first-seen order. Integer values are held
    /// as numbers so that filters built in code equal their parsed JSON form.
    pub fn new(
        field: impl Into<String>,
        op: FilterOp,
        value: impl Into<FilterValue>,
    ) -> Result<Self, FilterError> {
        let value = match value.into() {
            FilterValue::Single(v) => FilterValue::Single(normalize_value(v)),
            FilterValue::List(_) if !op.supports_list() => {
                return Err(FilterError::MultipleValuesNotSupported(op.to_string()))
            }
            FilterValue::List(vs) => {
                let mut unique: Vec<Value> = Vec::with_capacity(vs.len());
                for v in vs.into_iter().map(normalize_value) {
                    if !unique.contains(&v) {
                        unique.push(v);
                    }
                }
                FilterValue::List(unique)
            }
        };
        Ok(FieldFilter {
            field: field.into(),
            op,
            value,
        })
    }

    pub fn values(&self) -> &[Value] {
        self.value.values()
    }

    pub fn to_json(&self) -> serde_json::Value {
        let value = match &self.value {
            FilterValue::Single(v) => v.to_json(),
            FilterValue::List(vs) => serde_json::Value::Array(vs.iter().map(Value::to_json).collect()),
        };
        let mut ret = json!({
            "field": self.field,
            "op": self.op.token(),
            "value": value,
        });
        let value_type = self.values().iter().find_map(|v| match v {
            Value::Date(_) => Some("date"),
            Value::LocalDate(_) => Some("localDate"),
            _ => None,
        });
        if let (Some(value_type), Some(obj)) = (value_type, ret.as_object_mut()) {
            obj.insert("valueType".to_string(), json!(value_type));
        }
        ret
    }
}

fn normalize_value(v: Value) -> Value {
    match v {
        Value::Int(i) => Value::number(i as f64),
        other => other,
    }
}

impl PartialEq for FieldFilter {
    fn eq(&self, other: &Self) -> bool {
        if self.field != other.field || self.op != other.op {
            return false;
        }
        match (&self.value, &other.value) {
            (FilterValue::List(a), FilterValue::List(b)) => {
                a.len() == b.len() && a.iter().all(|v| b.contains(v))
            }
            (a, b) => a == b,
        }
    }
}

// ============================================================================
// COMPOUND FILTER
// ============================================================================

/// Combines child filters with AND or OR. An empty compound passes everything.
#[derive(Debug, Clone)]
pub struct CompoundFilter {
    pub filters: Vec<Filter>,
    pub op: CompoundOp,
}

impl CompoundFilter {
    pub fn new(filters: Vec<Filter>, op: CompoundOp) -> Self {
        CompoundFilter { filters, op }
    }

    pub fn and(filters: Vec<Filter>) -> Self {
        CompoundFilter::new(filters, CompoundOp::And)
    }

    pub fn or(filters: Vec<Filter>) -> Self {
        CompoundFilter::new(filters, CompoundOp::Or)
    }

    pub fn to_json(&self) -> Result<serde_json::Value, FilterError> {
        let filters = self
            .filters
            .iter()
            .map(Filter::to_json)
            .collect::<Result<Vec<_>, _>>()?;
        Ok(json!({ "filters": filters, "op": self.op.token() }))
    }
}

/// Order of children is not significant.
impl PartialEq for CompoundFilter {
    fn eq(&self, other: &Self) -> bool {
        self.op == other.op
            && self.filters.len() == other.filters.len()
            && self.filters.iter().all(|f| other.filters.contains(f))
            && other.filters.iter().all(|f| self.filters.contains(f))
    }
}

// ============================================================================
// FUNCTION FILTER
// ============================================================================

/// Wraps an app-supplied predicate. Identified by `key` for the `*_by_key` transforms.
#[derive(Clone)]
pub struct FunctionFilter {
    pub key: String,
    pub test_fn: TestFn,
}

impl FunctionFilter {
    pub fn new<F>(key: impl Into<String>, test_fn: F) -> Self
    where
        F: Fn(&SourceRecord) -> bool + Send + Sync + 'static,
    {
        FunctionFilter {
            key: key.into(),
            test_fn: Arc::new(test_fn),
        }
    }
}

impl fmt::Debug for FunctionFilter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FunctionFilter").field("key", &self.key).finish()
    }
}

impl PartialEq for FunctionFilter {
    fn eq(&self, other: &Self) -> bool {
        self.key == other.key && Arc::ptr_eq(&self.test_fn, &other.test_fn)
    }
}

// ============================================================================
// FILTER
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FilterType {
    Field,
    Compound,
    Function,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Filter {
    Field(FieldFilter),
    Compound(CompoundFilter),
    Function(FunctionFilter),
}

impl Filter {
    pub fn filter_type(&self) -> FilterType {
        match self {
            Filter::Field(_) => FilterType::Field,
            Filter::Compound(_) => FilterType::Compound,
            Filter::Function(_) => FilterType::Function,
        }
    }

    /// Field name for field filters.
    pub fn field(&self) -> Option<&str> {
        match self {
            Filter::Field(f) => Some(&f.field),
            _ => None,
        }
    }

    /// Key for function filters.
    pub fn key(&self) -> Option<&str> {
        match self {
            Filter::Function(f) => Some(&f.key),
            _ => None,
        }
    }

    /// JSON form accepted by `parse_filter`. Function filters cannot be serialized.
    pub fn to_json(&self) -> Result<serde_json::Value, FilterError> {
        match self {
            Filter::Field(f) => Ok(f.to_json()),
            Filter::Compound(f) => f.to_json(),
            Filter::Function(f) => Err(FilterError::NotSerializable(format!(
                "function filter '{}'",
                f.key
            ))),
        }
    }
}

impl From<FieldFilter> for Filter {
    fn from(f: FieldFilter) -> Self {
        Filter::Field(f)
    }
}

impl From<CompoundFilter> for Filter {
    fn from(f: CompoundFilter) -> Self {
        Filter::Compound(f)
    }
}

impl From<FunctionFilter> for Filter {
    fn from(f: FunctionFilter) -> Self {
        Filter::Function(f)
    }
}
